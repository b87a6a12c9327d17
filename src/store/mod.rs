//! Revisioned store, lease registry and watch collaborators.
//!
//! The transaction engine and the lock service only talk to the store through
//! the traits below. [`memory::MemoryStore`] is the in-process implementation;
//! [`cluster::Cluster`] wraps it in member handles that can be stopped or
//! partitioned.
//!
//! - [`ops`] - Key ranges and single-operation request/response types
//! - [`record`] - Key-value records and change events
//! - [`mvcc`] - Multi-version key index
//! - [`lease`] - Lease table
//! - [`watch`] - Change notification
//! - [`memory`] - In-memory store
//! - [`cluster`] - Member handles with failure injection

pub mod cluster;
pub mod lease;
pub mod memory;
pub mod mvcc;
pub mod ops;
pub mod record;
pub mod watch;

use crate::core::error::KvResult;
use async_trait::async_trait;
use lease::LeaseTimeToLive;
use ops::{
    DeleteRangeRequest, DeleteRangeResponse, KeyRange, PutRequest, PutResponse, RangeRequest,
    RangeResponse,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use watch::{WatchFilters, WatchStream};

/// A branch-resolved operation submitted in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    /// Read a key or range.
    Range(RangeRequest),
    /// Write a key.
    Put(PutRequest),
    /// Delete a key or range.
    DeleteRange(DeleteRangeRequest),
    /// A nested transaction whose branch was already chosen.
    Txn {
        /// Whether the nested compares held.
        succeeded: bool,
        /// Operations of the chosen branch.
        ops: Vec<BatchOp>,
    },
}

impl BatchOp {
    /// True if applying this op may change keys.
    pub fn is_mutation(&self) -> bool {
        match self {
            Self::Range(_) => false,
            Self::Put(_) | Self::DeleteRange(_) => true,
            Self::Txn { ops, .. } => ops.iter().any(BatchOp::is_mutation),
        }
    }
}

/// Per-op result of an applied batch, mirroring the batch's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchResponse {
    /// Range result.
    Range(RangeResponse),
    /// Put result.
    Put(PutResponse),
    /// Delete result.
    DeleteRange(DeleteRangeResponse),
    /// Nested transaction result.
    Txn {
        /// Whether the nested compares held.
        succeeded: bool,
        /// Results of the chosen branch.
        responses: Vec<BatchResponse>,
    },
}

/// Ranges a batch's branch selection depended on.
///
/// The store rejects the batch if any of them changed after `snapshot`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadGuard {
    /// Revision the compares were evaluated at.
    pub snapshot: u64,
    /// Ranges the compares read.
    pub ranges: Vec<KeyRange>,
}

/// An atomic group of operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyBatch {
    /// Staleness guard, if the batch was conditional.
    pub guard: Option<ReadGuard>,
    /// Operations in submission order.
    pub ops: Vec<BatchOp>,
}

impl ApplyBatch {
    /// True if the batch may change keys.
    pub fn is_mutation(&self) -> bool {
        self.ops.iter().any(BatchOp::is_mutation)
    }
}

/// Outcome of an applied batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Revision after the batch.
    pub revision: u64,
    /// Per-op results in submission order.
    pub responses: Vec<BatchResponse>,
}

/// Linearizable, monotonically versioned key space.
#[async_trait]
pub trait RevisionedStore: Send + Sync {
    /// Latest committed revision.
    async fn current_revision(&self) -> KvResult<u64>;

    /// Read a key or range.
    async fn range(&self, request: &RangeRequest) -> KvResult<RangeResponse>;

    /// Apply all operations at one new revision, or none of them.
    async fn apply(&self, batch: ApplyBatch) -> KvResult<ApplyResult>;
}

/// TTL-bound ownership tokens.
#[async_trait]
pub trait LeaseRegistry: Send + Sync {
    /// Grant a lease and return its id.
    async fn grant(&self, ttl: Duration) -> KvResult<i64>;

    /// Renew a lease, returning its TTL.
    async fn keep_alive(&self, lease_id: i64) -> KvResult<Duration>;

    /// Revoke a lease and delete its keys.
    async fn revoke(&self, lease_id: i64) -> KvResult<()>;

    /// Remaining lifetime and attached keys.
    async fn time_to_live(&self, lease_id: i64) -> KvResult<LeaseTimeToLive>;
}

/// Subscription to committed changes.
#[async_trait]
pub trait WatchService: Send + Sync {
    /// Watch a range from the next commit on.
    async fn watch(&self, range: KeyRange, filters: WatchFilters) -> KvResult<WatchStream>;
}
