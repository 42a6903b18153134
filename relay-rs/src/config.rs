use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub smtp: SmtpConfig,
    pub queue: QueueConfig,
    pub delivery: DeliveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name used in the greeting banner and in outbound EHLO
    pub hostname: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub listen_addr: String,
    /// PEM certificate chain; a self-signed identity is generated when unset
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub spool_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub retry_interval_secs: u64,
    pub backoff_step_secs: u64,
    /// `None` keeps retrying forever
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        Self {
            hostname: if hostname.is_empty() {
                "localhost".to_string()
            } else {
                hostname
            },
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:2525".to_string(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            spool_dir: "spool".to_string(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            port: 25,
            connect_timeout_secs: 10,
            retry_interval_secs: 60,
            backoff_step_secs: 15 * 60,
            max_attempts: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl DeliveryConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn backoff_step(&self) -> Duration {
        Duration::from_secs(self.backoff_step_secs)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| RelayError::Config(e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| RelayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.delivery.retry_interval_secs == 0 {
            return Err(RelayError::Config(
                "delivery.retry_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
