//! Lock attempt records.

use crate::store::ops::ResponseHeader;
use serde::{Deserialize, Serialize};

/// Lifecycle of a lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    /// Own key is being written.
    Requesting,
    /// Own key exists; older contenders remain.
    Waiting,
    /// No older contender remains.
    Held,
    /// Own key is being deleted.
    Releasing,
    /// Own key is gone.
    Released,
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Requesting => "requesting",
            Self::Waiting => "waiting",
            Self::Held => "held",
            Self::Releasing => "releasing",
            Self::Released => "released",
        };
        f.write_str(name)
    }
}

/// A lock attempt or hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Shared prefix of all contenders, `name/`.
    pub prefix: Vec<u8>,

    /// This contender's key, `name/<lease hex>`.
    pub key: Vec<u8>,

    /// Lease the key is attached to.
    pub lease_id: i64,

    /// Creation revision of the key; the contender's place in line.
    pub create_revision: u64,

    /// Store revision at which the lock was observed as held.
    pub header: ResponseHeader,

    /// Current state.
    pub state: LockState,
}

impl LockRecord {
    pub(crate) fn new(name: &[u8], lease_id: i64) -> Self {
        let mut prefix = name.to_vec();
        prefix.push(b'/');
        let mut key = prefix.clone();
        key.extend_from_slice(format!("{:x}", lease_id).as_bytes());
        Self {
            prefix,
            key,
            lease_id,
            create_revision: 0,
            header: ResponseHeader::default(),
            state: LockState::Requesting,
        }
    }

    pub(crate) fn transition(&mut self, state: LockState) {
        tracing::debug!(
            key = %String::from_utf8_lossy(&self.key),
            from = %self.state,
            to = %state,
            "lock state changed"
        );
        self.state = state;
    }
}

/// Result of an unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockResponse {
    /// Store revision after the delete.
    pub header: ResponseHeader,
}
