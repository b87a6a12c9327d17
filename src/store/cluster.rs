//! Member handles over one committed store.
//!
//! Every member forwards to the same [`MemoryStore`], so a batch is either
//! visible through all members or through none. A member can be stopped or
//! partitioned to exercise client behavior under partial failure.

use super::lease::LeaseTimeToLive;
use super::memory::MemoryStore;
use super::ops::{KeyRange, RangeRequest, RangeResponse};
use super::watch::{WatchFilters, WatchStream};
use super::{ApplyBatch, ApplyResult, LeaseRegistry, RevisionedStore, WatchService};
use crate::core::error::{KvError, KvResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Reachability of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    /// Serving requests.
    Running,
    /// Refusing requests.
    Stopped,
    /// Requests never complete.
    Partitioned,
    /// Writes commit but their replies are lost.
    ReplyLost,
}

/// One member of a [`Cluster`].
#[derive(Debug)]
pub struct Member {
    id: usize,
    store: Arc<MemoryStore>,
    state: RwLock<MemberState>,
}

impl Member {
    /// Current reachability.
    pub fn state(&self) -> MemberState {
        *self.state.read()
    }

    /// Refuse further requests with `Unavailable`.
    pub fn stop(&self) {
        self.set_state(MemberState::Stopped);
    }

    /// Make further requests hang.
    pub fn partition(&self) {
        self.set_state(MemberState::Partitioned);
    }

    /// Commit writes but report them as `Unavailable`.
    pub fn lose_replies(&self) {
        self.set_state(MemberState::ReplyLost);
    }

    /// Serve requests again.
    pub fn restart(&self) {
        self.set_state(MemberState::Running);
    }

    fn set_state(&self, state: MemberState) {
        let mut current = self.state.write();
        if *current != state {
            tracing::info!(member = self.id, from = ?*current, to = ?state, "member state changed");
            *current = state;
        }
    }

    async fn reachable(&self) -> KvResult<()> {
        match self.state() {
            MemberState::Running | MemberState::ReplyLost => Ok(()),
            MemberState::Stopped => Err(KvError::unavailable(format!(
                "member {} is stopped",
                self.id
            ))),
            MemberState::Partitioned => std::future::pending().await,
        }
    }
}

#[async_trait]
impl RevisionedStore for Member {
    async fn current_revision(&self) -> KvResult<u64> {
        self.reachable().await?;
        Ok(self.store.revision())
    }

    async fn range(&self, request: &RangeRequest) -> KvResult<RangeResponse> {
        self.reachable().await?;
        self.store.read(request)
    }

    async fn apply(&self, batch: ApplyBatch) -> KvResult<ApplyResult> {
        self.reachable().await?;
        let result = self.store.apply_batch(batch)?;
        if self.state() == MemberState::ReplyLost {
            return Err(KvError::unavailable(format!(
                "member {} lost reply for revision {}",
                self.id, result.revision
            )));
        }
        Ok(result)
    }
}

#[async_trait]
impl LeaseRegistry for Member {
    async fn grant(&self, ttl: Duration) -> KvResult<i64> {
        self.reachable().await?;
        self.store.grant(ttl).await
    }

    async fn keep_alive(&self, lease_id: i64) -> KvResult<Duration> {
        self.reachable().await?;
        self.store.keep_alive(lease_id).await
    }

    async fn revoke(&self, lease_id: i64) -> KvResult<()> {
        self.reachable().await?;
        self.store.revoke(lease_id).await
    }

    async fn time_to_live(&self, lease_id: i64) -> KvResult<LeaseTimeToLive> {
        self.reachable().await?;
        self.store.time_to_live(lease_id).await
    }
}

#[async_trait]
impl WatchService for Member {
    async fn watch(&self, range: KeyRange, filters: WatchFilters) -> KvResult<WatchStream> {
        self.reachable().await?;
        self.store.watch(range, filters).await
    }
}

/// A fixed set of members sharing one store.
#[derive(Debug)]
pub struct Cluster {
    store: Arc<MemoryStore>,
    members: Vec<Arc<Member>>,
}

impl Cluster {
    /// Create a cluster of `size` running members over a fresh store.
    pub fn new(size: usize) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), size)
    }

    /// Create a cluster of `size` running members over `store`.
    pub fn with_store(store: Arc<MemoryStore>, size: usize) -> Self {
        let members = (0..size)
            .map(|id| {
                Arc::new(Member {
                    id,
                    store: Arc::clone(&store),
                    state: RwLock::new(MemberState::Running),
                })
            })
            .collect();
        Self { store, members }
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Member by index.
    pub fn member(&self, id: usize) -> Option<Arc<Member>> {
        self.members.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ops::PutRequest;
    use crate::store::BatchOp;

    fn put_batch(key: &str) -> ApplyBatch {
        ApplyBatch {
            guard: None,
            ops: vec![BatchOp::Put(PutRequest::new(key, "v"))],
        }
    }

    #[tokio::test]
    async fn stopped_member_is_unavailable() {
        let cluster = Cluster::new(3);
        let m0 = cluster.member(0).unwrap();
        let m1 = cluster.member(1).unwrap();
        m0.stop();

        let err = m0.apply(put_batch("a")).await.unwrap_err();
        assert!(matches!(err, KvError::Unavailable { .. }));
        assert_eq!(cluster.store().revision(), 0);

        m1.apply(put_batch("a")).await.unwrap();
        m0.restart();
        let seen = m0.range(&RangeRequest::key("a")).await.unwrap();
        assert_eq!(seen.kvs.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn partitioned_member_hangs() {
        let cluster = Cluster::new(2);
        let m0 = cluster.member(0).unwrap();
        m0.partition();

        let pending = tokio::time::timeout(Duration::from_secs(1), m0.apply(put_batch("a"))).await;
        assert!(pending.is_err());
        assert_eq!(cluster.store().revision(), 0);
    }

    #[tokio::test]
    async fn lost_reply_still_commits() {
        let cluster = Cluster::new(2);
        let m0 = cluster.member(0).unwrap();
        m0.lose_replies();

        assert!(m0.apply(put_batch("a")).await.is_err());
        let m1 = cluster.member(1).unwrap();
        assert_eq!(m1.current_revision().await.unwrap(), 1);
    }
}
