//! Durable delivery queue
//!
//! - [`message`]: the queued record and its backoff arithmetic
//! - [`store`]: file-per-message spool and an in-memory store
//! - [`scheduler`]: periodic delivery and retry loop

pub mod message;
pub mod scheduler;
pub mod store;

pub use message::QueuedMessage;
pub use scheduler::{CycleReport, Scheduler};
pub use store::{FileQueueStore, MemoryQueueStore, QueueStore};
