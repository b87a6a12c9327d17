//! Error types.
//!
//! `KvError` is the single error surface of the transaction engine, the lock
//! service and the in-memory store collaborators. Validation errors are raised
//! before any store contact; transport errors are classified by
//! [`crate::retry::classify`].

use thiserror::Error;

/// Errors surfaced at the transaction and lock boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    /// Two mutating operations in the same branch target the same key.
    #[error("duplicate key given in txn request: {}", display_key(.key))]
    DuplicateKey { key: Vec<u8> },

    /// A branch holds more operations than the configured maximum.
    #[error("too many operations in txn request: {count} > {max}")]
    TooManyOps { count: usize, max: usize },

    /// Nested transactions exceed the configured depth bound.
    #[error("txn nesting too deep: {depth} > {max}")]
    NestingTooDeep { depth: usize, max: usize },

    /// An operation or compare names an empty key.
    #[error("key is not provided")]
    EmptyKey,

    /// The snapshot a transaction evaluated against went stale before commit.
    #[error("txn conflict: {} modified after snapshot revision {snapshot}", display_key(.key))]
    Conflict { snapshot: u64, key: Vec<u8> },

    /// Requested revision is below the compaction floor.
    #[error("required revision {revision} has been compacted (floor {floor})")]
    Compacted { revision: u64, floor: u64 },

    /// Requested revision has not been committed yet.
    #[error("required revision {revision} is a future revision (current {current})")]
    FutureRevision { revision: u64, current: u64 },

    /// Lease does not exist or already expired.
    #[error("lease {lease_id} not found")]
    LeaseNotFound { lease_id: i64 },

    /// A lock's own key vanished while waiting or holding.
    #[error("lock key {} was removed", display_key(.key))]
    LockLost { key: Vec<u8> },

    /// The caller's deadline expired.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The caller canceled the operation.
    #[error("context canceled")]
    Canceled,

    /// The serving member cannot be reached.
    #[error("unavailable: {reason}")]
    Unavailable { reason: String },

    /// Internal invariant breach.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl KvError {
    /// Create an Unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for structural errors raised before the store is contacted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateKey { .. }
                | Self::TooManyOps { .. }
                | Self::NestingTooDeep { .. }
                | Self::EmptyKey
        )
    }

    /// True when the request may have been lost in transit.
    ///
    /// Whether a retry is safe still depends on knowing the write did not
    /// commit.
    pub fn is_retryable_transport(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::DeadlineExceeded)
    }
}

/// Result type using KvError.
pub type KvResult<T> = Result<T, KvError>;

fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_flagged() {
        assert!(KvError::DuplicateKey { key: b"a".to_vec() }.is_validation());
        assert!(KvError::TooManyOps { count: 3, max: 2 }.is_validation());
        assert!(!KvError::DeadlineExceeded.is_validation());
    }

    #[test]
    fn transport_errors_are_flagged() {
        assert!(KvError::unavailable("member 1 is stopped").is_retryable_transport());
        assert!(KvError::DeadlineExceeded.is_retryable_transport());
        assert!(!KvError::Canceled.is_retryable_transport());
        assert!(!KvError::EmptyKey.is_retryable_transport());
    }

    #[test]
    fn display_renders_keys_as_text() {
        let err = KvError::DuplicateKey {
            key: b"foo".to_vec(),
        };
        assert_eq!(err.to_string(), "duplicate key given in txn request: foo");
    }
}
