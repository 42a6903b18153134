//! SMTP server and client implementation (RFC 5321)
//!
//! - [`server`]: listener accepting inbound connections
//! - [`session`]: per-connection state machine, including STARTTLS
//! - [`commands`]: command line parsing
//! - [`client`]: outbound delivery of queued messages
//! - [`reply`]: reply parsing for the client side
//! - [`stream`]: plaintext/TLS stream shared by both sides
//! - [`transparency`]: dot-stuffing of message content

pub mod client;
pub mod commands;
pub mod reply;
pub mod server;
pub mod session;
pub mod stream;
pub mod transparency;

pub use client::{Deliver, DeliveryClient};
pub use commands::SmtpCommand;
pub use server::SmtpServer;
pub use session::{Phase, SessionState, SmtpSession};
