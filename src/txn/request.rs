//! Transaction request and response types.
//!
//! A [`Txn`] is a compare list plus a `success` and a `failure` branch. Branch
//! ops may themselves be transactions, so requests and responses are recursive.

use crate::store::ops::{
    DeleteRangeRequest, DeleteRangeResponse, KeyRange, PutRequest, PutResponse, RangeRequest,
    RangeResponse, ResponseHeader,
};
use serde::{Deserialize, Serialize};

/// Compare operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareResult {
    Equal,
    NotEqual,
    Greater,
    Less,
}

/// Attribute a compare inspects, with its comparand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareTarget {
    /// Value bytes.
    Value(Vec<u8>),
    /// Mutation counter since creation.
    Version(u64),
    /// Creation revision.
    CreateRevision(u64),
    /// Last modification revision.
    ModRevision(u64),
    /// Attached lease, zero for none.
    Lease(i64),
}

/// A predicate over one key or every key of a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compare {
    /// Keys the predicate covers.
    pub range: KeyRange,
    /// Operator.
    pub result: CompareResult,
    /// Attribute and comparand.
    pub target: CompareTarget,
}

impl Compare {
    /// Compare an arbitrary target on a single key.
    pub fn new(key: impl Into<Vec<u8>>, result: CompareResult, target: CompareTarget) -> Self {
        Self {
            range: KeyRange::single(key),
            result,
            target,
        }
    }

    pub fn value(key: impl Into<Vec<u8>>, result: CompareResult, value: impl Into<Vec<u8>>) -> Self {
        Self::new(key, result, CompareTarget::Value(value.into()))
    }

    pub fn version(key: impl Into<Vec<u8>>, result: CompareResult, version: u64) -> Self {
        Self::new(key, result, CompareTarget::Version(version))
    }

    pub fn create_revision(key: impl Into<Vec<u8>>, result: CompareResult, revision: u64) -> Self {
        Self::new(key, result, CompareTarget::CreateRevision(revision))
    }

    pub fn mod_revision(key: impl Into<Vec<u8>>, result: CompareResult, revision: u64) -> Self {
        Self::new(key, result, CompareTarget::ModRevision(revision))
    }

    pub fn lease(key: impl Into<Vec<u8>>, result: CompareResult, lease_id: i64) -> Self {
        Self::new(key, result, CompareTarget::Lease(lease_id))
    }

    /// Apply the predicate to every key sharing this compare's key as prefix.
    pub fn with_prefix(mut self) -> Self {
        self.range = KeyRange::prefix(std::mem::take(&mut self.range.key));
        self
    }

    /// Apply the predicate to every key in `[key, range_end)`.
    pub fn with_range_end(mut self, range_end: impl Into<Vec<u8>>) -> Self {
        self.range.range_end = range_end.into();
        self
    }
}

/// One operation of a transaction branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Get(RangeRequest),
    Put(PutRequest),
    Delete(DeleteRangeRequest),
    Txn(Txn),
}

impl Op {
    /// Get a single key.
    pub fn get(key: impl Into<Vec<u8>>) -> Self {
        Self::Get(RangeRequest::key(key))
    }

    /// Put a key.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put(PutRequest::new(key, value))
    }

    /// Delete a single key.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self::Delete(DeleteRangeRequest::key(key))
    }

    /// True if this op, or any op nested in it, may change keys.
    pub fn is_mutation(&self) -> bool {
        match self {
            Self::Get(_) => false,
            Self::Put(_) | Self::Delete(_) => true,
            Self::Txn(txn) => !txn.is_read_only(),
        }
    }
}

/// A compare-then-else transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Txn {
    /// Predicates; all must hold for `success` to run.
    pub compare: Vec<Compare>,
    /// Ops run when every compare holds.
    pub success: Vec<Op>,
    /// Ops run otherwise.
    pub failure: Vec<Op>,
}

impl Txn {
    /// An empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compare list.
    pub fn when(mut self, compare: impl IntoIterator<Item = Compare>) -> Self {
        self.compare = compare.into_iter().collect();
        self
    }

    /// Set the success branch.
    pub fn and_then(mut self, ops: impl IntoIterator<Item = Op>) -> Self {
        self.success = ops.into_iter().collect();
        self
    }

    /// Set the failure branch.
    pub fn or_else(mut self, ops: impl IntoIterator<Item = Op>) -> Self {
        self.failure = ops.into_iter().collect();
        self
    }

    /// True if neither branch can change keys.
    pub fn is_read_only(&self) -> bool {
        !self
            .success
            .iter()
            .chain(self.failure.iter())
            .any(Op::is_mutation)
    }
}

/// Result of one op, mirroring the op's variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseOp {
    Range(RangeResponse),
    Put(PutResponse),
    DeleteRange(DeleteRangeResponse),
    Txn(TxnResponse),
}

impl ResponseOp {
    /// The range result, if this is one.
    pub fn as_range(&self) -> Option<&RangeResponse> {
        match self {
            Self::Range(r) => Some(r),
            _ => None,
        }
    }

    /// The nested transaction result, if this is one.
    pub fn as_txn(&self) -> Option<&TxnResponse> {
        match self {
            Self::Txn(t) => Some(t),
            _ => None,
        }
    }
}

/// Transaction result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnResponse {
    /// Store revision after the transaction.
    pub header: ResponseHeader,
    /// Whether every compare held.
    pub succeeded: bool,
    /// Per-op results of the chosen branch, in order.
    pub responses: Vec<ResponseOp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_compare_covers_children() {
        let cmp = Compare::create_revision("foo/", CompareResult::Equal, 0).with_prefix();
        assert!(cmp.range.contains(b"foo/a"));
        assert!(!cmp.range.contains(b"foo"));
    }

    #[test]
    fn read_only_detection_sees_nested_writes() {
        let reads = Txn::new().and_then([Op::get("a")]);
        assert!(reads.is_read_only());

        let nested = Txn::new().or_else([Op::Txn(Txn::new().and_then([Op::put("a", "1")]))]);
        assert!(!nested.is_read_only());
    }
}
