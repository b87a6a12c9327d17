//! Key ranges and single-operation request/response types.
//!
//! Ranges follow etcd conventions: an empty `range_end` names the single key,
//! `range_end == [0]` means every key `>= key`, otherwise the half-open
//! interval `[key, range_end)`.

use super::record::KeyValue;
use serde::{Deserialize, Serialize};

/// A key or a half-open key interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    /// First key.
    pub key: Vec<u8>,
    /// Exclusive end, empty for a single key.
    pub range_end: Vec<u8>,
}

impl KeyRange {
    /// A single key.
    pub fn single(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            range_end: Vec::new(),
        }
    }

    /// Every key starting with `prefix`.
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        let key = prefix.into();
        let range_end = prefix_end(&key);
        Self { key, range_end }
    }

    /// Keys in `[key, range_end)`.
    pub fn between(key: impl Into<Vec<u8>>, range_end: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            range_end: range_end.into(),
        }
    }

    /// Every key `>= key`.
    pub fn from_key(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            range_end: vec![0],
        }
    }

    /// True if this range names exactly one key.
    pub fn is_single(&self) -> bool {
        self.range_end.is_empty()
    }

    /// True if the range is unbounded above.
    pub fn is_open_ended(&self) -> bool {
        self.range_end == [0]
    }

    /// Check if `key` falls inside this range.
    pub fn contains(&self, key: &[u8]) -> bool {
        if self.is_single() {
            key == self.key.as_slice()
        } else if self.is_open_ended() {
            key >= self.key.as_slice()
        } else {
            key >= self.key.as_slice() && key < self.range_end.as_slice()
        }
    }

    /// Check whether two ranges share at least one key.
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        if self.is_single() {
            return other.contains(&self.key);
        }
        if other.is_single() {
            return self.contains(&other.key);
        }
        // [a, b) and [c, d) intersect when a < d and c < b.
        let below_other_end = other.is_open_ended() || self.key < other.range_end;
        let other_below_end = self.is_open_ended() || other.key < self.range_end;
        below_other_end && other_below_end
    }
}

/// Smallest key strictly greater than every key with the given prefix.
///
/// Returns `[0]` (open-ended) when no such key exists.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

/// Response header stamped with the store revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Store revision the response reflects.
    pub revision: u64,
}

impl ResponseHeader {
    /// Create a header at the given revision.
    pub fn new(revision: u64) -> Self {
        Self { revision }
    }
}

/// Get a key or range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRequest {
    /// Keys to read.
    pub range: KeyRange,
    /// Maximum number of keys returned, zero for no limit.
    pub limit: usize,
    /// Revision to read at, zero for the latest.
    pub revision: u64,
    /// Return keys without values.
    pub keys_only: bool,
    /// Return only the count.
    pub count_only: bool,
}

impl RangeRequest {
    /// Read the given range at the latest revision.
    pub fn new(range: KeyRange) -> Self {
        Self {
            range,
            limit: 0,
            revision: 0,
            keys_only: false,
            count_only: false,
        }
    }

    /// Read a single key.
    pub fn key(key: impl Into<Vec<u8>>) -> Self {
        Self::new(KeyRange::single(key))
    }

    /// Read every key under a prefix.
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self::new(KeyRange::prefix(prefix))
    }

    /// Pin the read to a revision.
    pub fn at_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// Cap the number of returned keys.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Omit values.
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// Return only the count.
    pub fn count_only(mut self) -> Self {
        self.count_only = true;
        self
    }
}

/// Range result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RangeResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// Matching keys, in key order.
    pub kvs: Vec<KeyValue>,
    /// Whether `limit` truncated the result.
    pub more: bool,
    /// Number of matching keys before `limit`.
    pub count: usize,
}

/// Put a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRequest {
    /// Key to write.
    pub key: Vec<u8>,
    /// Value to write.
    pub value: Vec<u8>,
    /// Lease to attach, if any.
    pub lease_id: Option<i64>,
    /// Return the previous record.
    pub prev_kv: bool,
}

impl PutRequest {
    /// Put `value` at `key`.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            lease_id: None,
            prev_kv: false,
        }
    }

    /// Attach the key to a lease.
    pub fn with_lease(mut self, lease_id: i64) -> Self {
        self.lease_id = Some(lease_id);
        self
    }

    /// Request the previous record.
    pub fn with_prev_kv(mut self) -> Self {
        self.prev_kv = true;
        self
    }
}

/// Put result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PutResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// Previous record, if requested and present.
    pub prev_kv: Option<KeyValue>,
}

/// Delete a key or range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRangeRequest {
    /// Keys to delete.
    pub range: KeyRange,
    /// Return the deleted records.
    pub prev_kv: bool,
}

impl DeleteRangeRequest {
    /// Delete the given range.
    pub fn new(range: KeyRange) -> Self {
        Self {
            range,
            prev_kv: false,
        }
    }

    /// Delete a single key.
    pub fn key(key: impl Into<Vec<u8>>) -> Self {
        Self::new(KeyRange::single(key))
    }

    /// Delete every key under a prefix.
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self::new(KeyRange::prefix(prefix))
    }

    /// Request the deleted records.
    pub fn with_prev_kv(mut self) -> Self {
        self.prev_kv = true;
        self
    }
}

/// Delete result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeleteRangeResponse {
    /// Response header.
    pub header: ResponseHeader,
    /// Number of keys deleted.
    pub deleted: usize,
    /// Deleted records, if requested.
    pub prev_kvs: Vec<KeyValue>,
}
