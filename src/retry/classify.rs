//! Failure classification.
//!
//! Maps any error onto a closed set of kinds callers use for retry
//! decisions. Classification inspects the error and its source chain and has
//! no side effects.

use crate::core::error::KvError;
use std::error::Error as StdError;
use std::io;

/// Coarse failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The caller's deadline expired. The operation may or may not have
    /// committed.
    DeadlineExceeded,
    /// The caller canceled. Never retried automatically.
    Canceled,
    /// The serving member could not be reached.
    Unavailable,
    /// Anything else, including validation and conflict errors.
    Other,
}

impl FailureKind {
    /// Whether a caller that can confirm non-commitment may retry.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Unavailable | Self::DeadlineExceeded)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Canceled => "canceled",
            Self::Unavailable => "unavailable",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Classify a store or engine error.
pub fn classify_kv(err: &KvError) -> FailureKind {
    match err {
        KvError::DeadlineExceeded => FailureKind::DeadlineExceeded,
        KvError::Canceled => FailureKind::Canceled,
        KvError::Unavailable { .. } => FailureKind::Unavailable,
        KvError::DuplicateKey { .. }
        | KvError::TooManyOps { .. }
        | KvError::NestingTooDeep { .. }
        | KvError::EmptyKey
        | KvError::Conflict { .. }
        | KvError::Compacted { .. }
        | KvError::FutureRevision { .. }
        | KvError::LeaseNotFound { .. }
        | KvError::LockLost { .. }
        | KvError::Internal { .. } => FailureKind::Other,
    }
}

fn classify_io(err: &io::Error) -> FailureKind {
    match err.kind() {
        io::ErrorKind::TimedOut => FailureKind::DeadlineExceeded,
        io::ErrorKind::Interrupted => FailureKind::Canceled,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::UnexpectedEof => FailureKind::Unavailable,
        _ => FailureKind::Other,
    }
}

/// Classify an arbitrary error.
///
/// The first link in the source chain with a known type decides.
pub fn classify(err: &(dyn StdError + 'static)) -> FailureKind {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(kv) = e.downcast_ref::<KvError>() {
            return classify_kv(kv);
        }
        if e.is::<tokio::time::error::Elapsed>() {
            return FailureKind::DeadlineExceeded;
        }
        if let Some(io) = e.downcast_ref::<io::Error>() {
            return classify_io(io);
        }
        current = e.source();
    }
    FailureKind::Other
}

/// Classify an `anyhow` error by walking its chain.
pub fn classify_anyhow(err: &anyhow::Error) -> FailureKind {
    err.chain()
        .map(classify)
        .find(|kind| *kind != FailureKind::Other)
        .unwrap_or(FailureKind::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;
    use std::time::Duration;

    #[test]
    fn kv_errors() {
        assert_eq!(
            classify(&KvError::DeadlineExceeded),
            FailureKind::DeadlineExceeded
        );
        assert_eq!(classify(&KvError::Canceled), FailureKind::Canceled);
        assert_eq!(
            classify(&KvError::unavailable("member 0 is stopped")),
            FailureKind::Unavailable
        );
        assert_eq!(
            classify(&KvError::DuplicateKey { key: b"k".to_vec() }),
            FailureKind::Other
        );
        assert_eq!(
            classify(&KvError::Conflict {
                snapshot: 1,
                key: b"k".to_vec()
            }),
            FailureKind::Other
        );
    }

    #[test]
    fn io_errors() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify(&refused), FailureKind::Unavailable);
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(classify(&timed_out), FailureKind::DeadlineExceeded);
        let other = io::Error::new(io::ErrorKind::InvalidData, "bad frame");
        assert_eq!(classify(&other), FailureKind::Other);
    }

    #[derive(Debug)]
    struct Transport(KvError);

    impl std::fmt::Display for Transport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "transport failed")
        }
    }

    impl StdError for Transport {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn source_chain_is_walked() {
        let err = Transport(KvError::Canceled);
        assert_eq!(classify(&err), FailureKind::Canceled);
    }

    #[test]
    fn anyhow_chain() {
        let err: anyhow::Result<()> =
            Err(KvError::unavailable("down")).context("committing txn");
        assert_eq!(classify_anyhow(&err.unwrap_err()), FailureKind::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_elapsed() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        assert_eq!(classify(&elapsed), FailureKind::DeadlineExceeded);
    }

    #[test]
    fn retryable_kinds() {
        assert!(FailureKind::Unavailable.is_retryable());
        assert!(FailureKind::DeadlineExceeded.is_retryable());
        assert!(!FailureKind::Canceled.is_retryable());
        assert!(!FailureKind::Other.is_retryable());
    }
}
