//! In-memory revisioned store.
//!
//! One mutex guards the index and the lease table, so a batch is validated
//! and applied without interleaving. Lease expiry runs only when a tick is
//! advanced, either by a test or by the background ticker.

use super::lease::{LeaseTable, LeaseTimeToLive};
use super::mvcc::MvccIndex;
use super::ops::{
    DeleteRangeRequest, DeleteRangeResponse, KeyRange, PutRequest, PutResponse, RangeRequest,
    RangeResponse, ResponseHeader,
};
use super::record::KvEvent;
use super::watch::{WatchFilters, WatchHub, WatchStream};
use super::{
    ApplyBatch, ApplyResult, BatchOp, BatchResponse, LeaseRegistry, ReadGuard, RevisionedStore,
    WatchService,
};
use crate::core::config::{Config, LeaseConfig};
use crate::core::error::{KvError, KvResult};
use crate::core::time::{Tick, TickClock};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Inner {
    index: MvccIndex,
    leases: LeaseTable,
    tick: Tick,
}

/// In-memory store with leases and watches.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    hub: WatchHub,
    lease_config: LeaseConfig,
}

impl MemoryStore {
    /// Create an empty store with default lease bounds.
    pub fn new() -> Self {
        Self::with_lease_config(LeaseConfig::default())
    }

    /// Create an empty store with lease settings from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::with_lease_config(config.lease.clone())
    }

    /// Create an empty store with the given lease settings.
    pub fn with_lease_config(lease_config: LeaseConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                index: MvccIndex::new(),
                leases: LeaseTable::new(),
                tick: Tick::zero(),
            }),
            hub: WatchHub::new(),
            lease_config,
        }
    }

    /// Latest committed revision.
    pub fn revision(&self) -> u64 {
        self.inner.lock().index.current_revision()
    }

    /// Number of live watch streams.
    pub fn active_watches(&self) -> usize {
        self.hub.active_watches()
    }

    /// Read a range synchronously.
    pub fn read(&self, request: &RangeRequest) -> KvResult<RangeResponse> {
        let inner = self.inner.lock();
        read_range(&inner.index, request)
    }

    /// Apply a batch synchronously.
    pub fn apply_batch(&self, batch: ApplyBatch) -> KvResult<ApplyResult> {
        let mut inner = self.inner.lock();

        if let Some(guard) = &batch.guard {
            check_guard(&inner.index, guard)?;
        }
        // Everything that can fail is checked before the first mutation.
        for op in &batch.ops {
            precheck(&inner, op)?;
        }

        let is_write = batch.is_mutation();
        let revision = if is_write {
            inner.index.current_revision() + 1
        } else {
            inner.index.current_revision()
        };

        let mut events = Vec::new();
        let responses = batch
            .ops
            .iter()
            .map(|op| apply_op(&mut inner, op, revision, &mut events))
            .collect::<KvResult<Vec<_>>>()?;

        if is_write {
            inner.index.commit(revision);
            tracing::debug!(revision, changes = events.len(), "batch committed");
        }
        self.hub.publish(revision, events);
        Ok(ApplyResult {
            revision,
            responses,
        })
    }

    /// Discard history below `revision`.
    pub fn compact(&self, revision: u64) -> KvResult<usize> {
        self.inner.lock().index.compact(revision)
    }

    /// Advance store time and expire overdue leases.
    ///
    /// All keys of all expired leases are deleted at one new revision.
    /// Returns the expired lease ids.
    pub fn advance_tick(&self, tick: Tick) -> Vec<i64> {
        let mut inner = self.inner.lock();
        if tick > inner.tick {
            inner.tick = tick;
        }

        let expired = inner.leases.collect_expired(inner.tick);
        if expired.is_empty() {
            return expired;
        }

        let revision = inner.index.current_revision() + 1;
        let mut events = Vec::new();
        for lease_id in &expired {
            if let Some(lease) = inner.leases.revoke(*lease_id) {
                for key in &lease.attached_keys {
                    events.extend(inner.index.delete(key, revision));
                }
            }
        }
        if !events.is_empty() {
            inner.index.commit(revision);
        }
        tracing::info!(
            revision = inner.index.current_revision(),
            leases = expired.len(),
            keys = events.len(),
            "expired leases"
        );
        self.hub.publish(revision, events);
        expired
    }

    /// Drive [`MemoryStore::advance_tick`] from wall-clock time, once per
    /// configured tick period.
    ///
    /// The task stops once the store is dropped.
    pub fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        let period = self.lease_config.tick_period();
        let clock = TickClock::start();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.advance_tick(clock.now());
            }
        })
    }

    fn grant_lease(&self, ttl: Duration) -> i64 {
        let requested_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let ttl_ms = self.lease_config.clamp_ttl_ms(requested_ms);
        let mut inner = self.inner.lock();
        let now = inner.tick;
        let id = inner.leases.grant(ttl_ms, now);
        tracing::debug!(lease_id = id, ttl_ms, "lease granted");
        id
    }

    fn revoke_lease(&self, lease_id: i64) -> KvResult<()> {
        let mut inner = self.inner.lock();
        let lease = inner
            .leases
            .revoke(lease_id)
            .ok_or(KvError::LeaseNotFound { lease_id })?;

        let revision = inner.index.current_revision() + 1;
        let events: Vec<KvEvent> = lease
            .attached_keys
            .iter()
            .filter_map(|key| inner.index.delete(key, revision))
            .collect();
        if !events.is_empty() {
            inner.index.commit(revision);
        }
        tracing::debug!(lease_id, keys = events.len(), "lease revoked");
        self.hub.publish(revision, events);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read_range(index: &MvccIndex, request: &RangeRequest) -> KvResult<RangeResponse> {
    // Zero reads the latest state, including uncommitted writes of a batch.
    let matching = if request.revision == 0 {
        index.range(&request.range)
    } else {
        index.check_revision(request.revision)?;
        index.range_at(&request.range, request.revision)
    };
    let count = matching.len();
    let header = ResponseHeader::new(index.current_revision());
    if request.count_only {
        return Ok(RangeResponse {
            header,
            kvs: Vec::new(),
            more: false,
            count,
        });
    }

    let limit = if request.limit == 0 {
        count
    } else {
        request.limit.min(count)
    };
    let kvs = matching
        .into_iter()
        .take(limit)
        .map(|kv| {
            if request.keys_only {
                kv.without_value()
            } else {
                kv.clone()
            }
        })
        .collect();

    Ok(RangeResponse {
        header,
        kvs,
        more: limit < count,
        count,
    })
}

fn check_guard(index: &MvccIndex, guard: &ReadGuard) -> KvResult<()> {
    if guard.snapshot < index.compaction_floor() {
        return Err(KvError::Compacted {
            revision: guard.snapshot,
            floor: index.compaction_floor(),
        });
    }
    for range in &guard.ranges {
        if let Some(key) = index.modified_after(range, guard.snapshot) {
            tracing::debug!(snapshot = guard.snapshot, "txn snapshot went stale");
            return Err(KvError::Conflict {
                snapshot: guard.snapshot,
                key: key.to_vec(),
            });
        }
    }
    Ok(())
}

fn precheck(inner: &Inner, op: &BatchOp) -> KvResult<()> {
    match op {
        BatchOp::Range(request) if request.revision != 0 => {
            inner.index.check_revision(request.revision)
        }
        BatchOp::Put(PutRequest {
            lease_id: Some(lease_id),
            ..
        }) if !inner.leases.exists(*lease_id) => Err(KvError::LeaseNotFound {
            lease_id: *lease_id,
        }),
        BatchOp::Txn { ops, .. } => ops.iter().try_for_each(|op| precheck(inner, op)),
        _ => Ok(()),
    }
}

fn apply_op(
    inner: &mut Inner,
    op: &BatchOp,
    revision: u64,
    events: &mut Vec<KvEvent>,
) -> KvResult<BatchResponse> {
    let header = ResponseHeader::new(revision);
    let response = match op {
        BatchOp::Range(request) => {
            let mut response = read_range(&inner.index, request)?;
            response.header = header;
            BatchResponse::Range(response)
        }
        BatchOp::Put(put) => BatchResponse::Put(apply_put(inner, put, revision, events)),
        BatchOp::DeleteRange(del) => {
            BatchResponse::DeleteRange(apply_delete(inner, del, revision, events))
        }
        BatchOp::Txn { succeeded, ops } => BatchResponse::Txn {
            succeeded: *succeeded,
            responses: ops
                .iter()
                .map(|op| apply_op(inner, op, revision, events))
                .collect::<KvResult<Vec<_>>>()?,
        },
    };
    Ok(response)
}

fn apply_put(
    inner: &mut Inner,
    put: &PutRequest,
    revision: u64,
    events: &mut Vec<KvEvent>,
) -> PutResponse {
    let event = inner
        .index
        .put(put.key.clone(), put.value.clone(), put.lease_id, revision);

    if let Some(old_lease) = event.prev_kv.as_ref().and_then(|p| p.lease_id) {
        if Some(old_lease) != put.lease_id {
            inner.leases.detach(old_lease, &put.key);
        }
    }
    if let Some(lease_id) = put.lease_id {
        inner.leases.attach(lease_id, put.key.clone());
    }

    let prev_kv = if put.prev_kv {
        event.prev_kv.clone()
    } else {
        None
    };
    events.push(event);
    PutResponse {
        header: ResponseHeader::new(revision),
        prev_kv,
    }
}

fn apply_delete(
    inner: &mut Inner,
    del: &DeleteRangeRequest,
    revision: u64,
    events: &mut Vec<KvEvent>,
) -> DeleteRangeResponse {
    let deleted = inner.index.delete_range(&del.range, revision);
    let mut prev_kvs = Vec::new();
    for event in &deleted {
        if let Some(prev) = &event.prev_kv {
            if let Some(lease_id) = prev.lease_id {
                inner.leases.detach(lease_id, &prev.key);
            }
            if del.prev_kv {
                prev_kvs.push(prev.clone());
            }
        }
    }
    let count = deleted.len();
    events.extend(deleted);
    DeleteRangeResponse {
        header: ResponseHeader::new(revision),
        deleted: count,
        prev_kvs,
    }
}

#[async_trait]
impl RevisionedStore for MemoryStore {
    async fn current_revision(&self) -> KvResult<u64> {
        Ok(self.revision())
    }

    async fn range(&self, request: &RangeRequest) -> KvResult<RangeResponse> {
        self.read(request)
    }

    async fn apply(&self, batch: ApplyBatch) -> KvResult<ApplyResult> {
        self.apply_batch(batch)
    }
}

#[async_trait]
impl LeaseRegistry for MemoryStore {
    async fn grant(&self, ttl: Duration) -> KvResult<i64> {
        Ok(self.grant_lease(ttl))
    }

    async fn keep_alive(&self, lease_id: i64) -> KvResult<Duration> {
        let mut inner = self.inner.lock();
        let now = inner.tick;
        inner
            .leases
            .keepalive(lease_id, now)
            .map(Duration::from_millis)
            .ok_or(KvError::LeaseNotFound { lease_id })
    }

    async fn revoke(&self, lease_id: i64) -> KvResult<()> {
        self.revoke_lease(lease_id)
    }

    async fn time_to_live(&self, lease_id: i64) -> KvResult<LeaseTimeToLive> {
        let inner = self.inner.lock();
        inner
            .leases
            .time_to_live(lease_id, inner.tick)
            .ok_or(KvError::LeaseNotFound { lease_id })
    }
}

#[async_trait]
impl WatchService for MemoryStore {
    async fn watch(&self, range: KeyRange, filters: WatchFilters) -> KvResult<WatchStream> {
        Ok(self.hub.subscribe(range, filters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &str, value: &str) -> BatchOp {
        BatchOp::Put(PutRequest::new(key, value))
    }

    #[test]
    fn write_batch_advances_revision_once() {
        let store = MemoryStore::new();
        let result = store
            .apply_batch(ApplyBatch {
                guard: None,
                ops: vec![put("a", "1"), put("b", "2")],
            })
            .unwrap();
        assert_eq!(result.revision, 1);
        assert_eq!(store.revision(), 1);

        let a = store.read(&RangeRequest::key("a")).unwrap();
        let b = store.read(&RangeRequest::key("b")).unwrap();
        assert_eq!(a.kvs[0].mod_revision, 1);
        assert_eq!(b.kvs[0].mod_revision, 1);
    }

    #[test]
    fn read_only_batch_keeps_revision() {
        let store = MemoryStore::new();
        store
            .apply_batch(ApplyBatch {
                guard: None,
                ops: vec![put("a", "1")],
            })
            .unwrap();
        let result = store
            .apply_batch(ApplyBatch {
                guard: None,
                ops: vec![BatchOp::Range(RangeRequest::key("a"))],
            })
            .unwrap();
        assert_eq!(result.revision, 1);
    }

    #[test]
    fn range_in_batch_sees_earlier_write() {
        let store = MemoryStore::new();
        let result = store
            .apply_batch(ApplyBatch {
                guard: None,
                ops: vec![put("a", "1"), BatchOp::Range(RangeRequest::key("a"))],
            })
            .unwrap();
        match &result.responses[1] {
            BatchResponse::Range(r) => assert_eq!(r.kvs[0].value, b"1"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn stale_guard_is_rejected_without_effects() {
        let store = MemoryStore::new();
        store
            .apply_batch(ApplyBatch {
                guard: None,
                ops: vec![put("a", "1")],
            })
            .unwrap();

        let err = store
            .apply_batch(ApplyBatch {
                guard: Some(ReadGuard {
                    snapshot: 0,
                    ranges: vec![KeyRange::single("a")],
                }),
                ops: vec![put("b", "2")],
            })
            .unwrap_err();
        assert!(matches!(err, KvError::Conflict { .. }));
        assert_eq!(store.revision(), 1);
        assert!(store.read(&RangeRequest::key("b")).unwrap().kvs.is_empty());
    }

    #[test]
    fn unknown_lease_rejects_whole_batch() {
        let store = MemoryStore::new();
        let err = store
            .apply_batch(ApplyBatch {
                guard: None,
                ops: vec![
                    put("a", "1"),
                    BatchOp::Put(PutRequest::new("b", "2").with_lease(42)),
                ],
            })
            .unwrap_err();
        assert_eq!(err, KvError::LeaseNotFound { lease_id: 42 });
        assert_eq!(store.revision(), 0);
        assert!(store.read(&RangeRequest::key("a")).unwrap().kvs.is_empty());
    }

    #[tokio::test]
    async fn lease_expiry_deletes_attached_keys() {
        let store = MemoryStore::new();
        let lease = store.grant(Duration::from_millis(1_000)).await.unwrap();
        store
            .apply_batch(ApplyBatch {
                guard: None,
                ops: vec![
                    BatchOp::Put(PutRequest::new("a", "1").with_lease(lease)),
                    put("b", "2"),
                ],
            })
            .unwrap();

        assert!(store.advance_tick(Tick::new(999)).is_empty());
        assert_eq!(store.advance_tick(Tick::new(1_000)), vec![lease]);
        assert!(store.read(&RangeRequest::key("a")).unwrap().kvs.is_empty());
        assert_eq!(store.read(&RangeRequest::key("b")).unwrap().kvs.len(), 1);
        assert_eq!(store.revision(), 2);
        assert!(matches!(
            store.keep_alive(lease).await,
            Err(KvError::LeaseNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_expires_leases() {
        let store = Arc::new(MemoryStore::with_lease_config(LeaseConfig {
            tick_period_ms: 100,
            ..LeaseConfig::default()
        }));
        let lease = store.grant(Duration::from_millis(1_000)).await.unwrap();
        store
            .apply_batch(ApplyBatch {
                guard: None,
                ops: vec![BatchOp::Put(PutRequest::new("a", "1").with_lease(lease))],
            })
            .unwrap();

        let ticker = store.spawn_ticker();
        tokio::time::sleep(Duration::from_millis(1_250)).await;
        assert!(store.read(&RangeRequest::key("a")).unwrap().kvs.is_empty());
        ticker.abort();
    }

    #[test]
    fn historical_read_after_compaction() {
        let store = MemoryStore::new();
        for value in ["1", "2", "3"] {
            store
                .apply_batch(ApplyBatch {
                    guard: None,
                    ops: vec![put("k", value)],
                })
                .unwrap();
        }
        let old = store.read(&RangeRequest::key("k").at_revision(1)).unwrap();
        assert_eq!(old.kvs[0].value, b"1");

        store.compact(2).unwrap();
        assert!(matches!(
            store.read(&RangeRequest::key("k").at_revision(1)),
            Err(KvError::Compacted { .. })
        ));
        let err = store
            .apply_batch(ApplyBatch {
                guard: None,
                ops: vec![put("j", "x"), BatchOp::Range(RangeRequest::key("k").at_revision(1))],
            })
            .unwrap_err();
        assert!(matches!(err, KvError::Compacted { .. }));
        assert!(store.read(&RangeRequest::key("j")).unwrap().kvs.is_empty());
    }

    #[tokio::test]
    async fn oversized_ttl_is_clamped_to_max() {
        let store = MemoryStore::new();
        // 2^64 + 5000 milliseconds.
        let huge = Duration::new(18_446_744_073_709_556, 616_000_000);
        let lease = store.grant(huge).await.unwrap();
        let ttl = store.time_to_live(lease).await.unwrap();
        assert_eq!(ttl.granted_ttl_ms, LeaseConfig::default().max_ttl_ms);
    }

    #[tokio::test]
    async fn deleting_key_leaves_lease_alive() {
        let store = MemoryStore::new();
        let lease = store.grant(Duration::from_secs(5)).await.unwrap();
        store
            .apply_batch(ApplyBatch {
                guard: None,
                ops: vec![BatchOp::Put(PutRequest::new("a", "1").with_lease(lease))],
            })
            .unwrap();
        store
            .apply_batch(ApplyBatch {
                guard: None,
                ops: vec![BatchOp::DeleteRange(DeleteRangeRequest::key("a"))],
            })
            .unwrap();

        let ttl = store.time_to_live(lease).await.unwrap();
        assert!(ttl.keys.is_empty());
    }

    #[test]
    fn limit_and_count_only() {
        let store = MemoryStore::new();
        store
            .apply_batch(ApplyBatch {
                guard: None,
                ops: vec![put("p/a", "1"), put("p/b", "2"), put("p/c", "3")],
            })
            .unwrap();

        let limited = store.read(&RangeRequest::prefix("p/").with_limit(2)).unwrap();
        assert_eq!(limited.kvs.len(), 2);
        assert!(limited.more);
        assert_eq!(limited.count, 3);

        let counted = store.read(&RangeRequest::prefix("p/").count_only()).unwrap();
        assert!(counted.kvs.is_empty());
        assert_eq!(counted.count, 3);
    }
}
