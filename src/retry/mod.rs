//! Failure classification and retry policy.
//!
//! - [`classify`] - Closed failure taxonomy
//! - [`policy`] - Read-only transaction retry policy

pub mod classify;
pub mod policy;

pub use classify::{classify, classify_anyhow, classify_kv, FailureKind};
pub use policy::ReadRetryPolicy;
