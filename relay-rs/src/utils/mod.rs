//! Utility modules
//!
//! - [`dns`]: MX lookup for outbound delivery
//! - [`email`]: Envelope address helpers

pub mod dns;
pub mod email;

pub use dns::{DnsMxResolver, MxResolver, StaticMxResolver};
pub use email::{domain_of, strip_address};
