//! Lease-backed distributed lock.
//!
//! - [`record`] - Lock attempt records and states
//! - [`service`] - Acquire, release and loss detection

pub mod record;
pub mod service;

pub use record::{LockRecord, LockState, UnlockResponse};
pub use service::LockService;
