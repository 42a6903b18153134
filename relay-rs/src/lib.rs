//! relay-rs: minimal SMTP relay with a durable retry queue
//!
//! Accepts mail over SMTP (with STARTTLS), spools each message to disk and
//! relays it to the recipient domain's mail exchanger, retrying with linear
//! backoff until delivery succeeds.
//!
//! # Architecture
//!
//! ```text
//! client -> [SmtpSession] -> QueueStore -> [Scheduler] -> [DeliveryClient] -> MX
//!                                ^              |
//!                                +-- update ----+ (on failure)
//! ```
//!
//! The session engine and the scheduler share nothing but the
//! [`queue::QueueStore`].
//!
//! # Example
//!
//! ```no_run
//! use relay_rs::queue::FileQueueStore;
//! use relay_rs::security::TlsConfig;
//! use relay_rs::smtp::SmtpServer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> relay_rs::Result<()> {
//!     let store = Arc::new(FileQueueStore::open("spool").await?);
//!     let tls = Arc::new(TlsConfig::self_signed("relay.example.com")?);
//!
//!     let server = SmtpServer::bind(
//!         "0.0.0.0:2525",
//!         "relay.example.com".to_string(),
//!         store,
//!         tls,
//!     )
//!     .await?;
//!     server.run().await
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Error types
//! - [`queue`]: Queued messages, their storage and the retry scheduler
//! - [`security`]: TLS identity and connectors
//! - [`smtp`]: Inbound session engine and outbound delivery client
//! - [`utils`]: MX lookup and address helpers

pub mod config;
pub mod error;
pub mod queue;
pub mod security;
pub mod smtp;
pub mod utils;

pub use config::Config;
pub use error::{DeliveryError, RelayError, Result};
