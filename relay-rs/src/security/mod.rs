//! Security module
//!
//! - [`tls`]: STARTTLS identity (inbound) and trust-on-connect connector (outbound)

pub mod tls;

pub use tls::TlsConfig;
