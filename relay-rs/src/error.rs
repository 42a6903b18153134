use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SMTP protocol error: {0}")]
    SmtpProtocol(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of a failed outbound delivery attempt.
///
/// The `Display` form is what the scheduler records as `last_error`,
/// so every variant names the stage that failed.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("MX resolution failed for {domain}: {reason}")]
    Resolution { domain: String, reason: String },

    #[error("connect to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    #[error("{stage}: unexpected reply {reply:?}")]
    Protocol { stage: &'static str, reply: String },

    #[error("TLS negotiation failed: {0}")]
    Tls(String),

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
