//! Fair, lease-backed mutual exclusion.
//!
//! Each contender writes `name/<lease>` attached to its own lease. Contenders
//! are ordered by the creation revision of their keys; a contender holds the
//! lock once no key under `name/` was created before its own. A waiter watches
//! only the contender directly ahead of it, so a release wakes one waiter.
//!
//! Expiry of a contender's lease deletes its key, which releases the lock or
//! gives up the place in line exactly like an explicit unlock.

use super::record::{LockRecord, LockState, UnlockResponse};
use crate::core::config::Config;
use crate::core::context::Context;
use crate::core::error::{KvError, KvResult};
use crate::store::ops::{DeleteRangeRequest, KeyRange, PutRequest, RangeRequest};
use crate::store::record::KeyValue;
use crate::store::watch::{WatchFilters, WatchNext, WatchStream};
use crate::store::{RevisionedStore, WatchService};
use crate::txn::{Op, ResponseOp, Txn, TxnEngine};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one look at the contenders.
enum Position {
    /// Nobody is ahead.
    First { revision: u64 },
    /// The contender directly ahead.
    Behind(KeyValue),
}

/// Lock service over a store.
pub struct LockService<S: ?Sized> {
    engine: TxnEngine<S>,
    identity: Vec<u8>,
    poll_interval: Option<Duration>,
}

impl<S: RevisionedStore + WatchService + ?Sized> LockService<S> {
    /// Create a service with default settings.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, &Config::default())
    }

    /// Create a service configured from `config`.
    pub fn with_config(store: Arc<S>, config: &Config) -> Self {
        Self {
            engine: TxnEngine::with_config(store, config),
            identity: Vec::new(),
            poll_interval: config.lock.poll_interval(),
        }
    }

    /// Value written into the contender's key.
    pub fn with_identity(mut self, identity: impl Into<Vec<u8>>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Acquire the lock `name` on behalf of `lease_id`.
    ///
    /// Blocks until every older contender is gone. If `ctx` finishes first,
    /// the wait is abandoned but the contender's key is left in place; call
    /// [`LockService::unlock`] to give up the place in line.
    pub async fn lock(
        &self,
        ctx: &Context,
        name: impl AsRef<[u8]>,
        lease_id: i64,
    ) -> KvResult<LockRecord> {
        let mut record = LockRecord::new(name.as_ref(), lease_id);

        let put = PutRequest::new(record.key.clone(), self.identity.clone())
            .with_lease(lease_id)
            .with_prev_kv();
        let resp = self
            .engine
            .execute(ctx, &Txn::new().and_then([Op::Put(put)]))
            .await?;
        record.create_revision = match resp.responses.first() {
            // Re-acquiring with the same lease keeps the original place.
            Some(ResponseOp::Put(put)) => put
                .prev_kv
                .as_ref()
                .map_or(resp.header.revision, |prev| prev.create_revision),
            _ => return Err(KvError::internal("lock put returned no put response")),
        };
        record.transition(LockState::Waiting);

        loop {
            match self.position(ctx, &record).await? {
                Position::First { revision } => {
                    record.header.revision = revision;
                    record.transition(LockState::Held);
                    tracing::info!(
                        key = %String::from_utf8_lossy(&record.key),
                        revision,
                        "lock acquired"
                    );
                    return Ok(record);
                }
                Position::Behind(ahead) => self.wait_deleted(ctx, &ahead).await?,
            }
        }
    }

    /// Delete a contender's key. Deleting an absent key succeeds.
    pub async fn unlock(&self, ctx: &Context, key: impl Into<Vec<u8>>) -> KvResult<UnlockResponse> {
        let resp = self
            .engine
            .delete(ctx, DeleteRangeRequest::key(key))
            .await?;
        Ok(UnlockResponse {
            header: resp.header,
        })
    }

    /// Release a lock obtained from [`LockService::lock`].
    pub async fn release(&self, ctx: &Context, record: &mut LockRecord) -> KvResult<UnlockResponse> {
        record.transition(LockState::Releasing);
        let resp = self.unlock(ctx, record.key.clone()).await?;
        record.transition(LockState::Released);
        Ok(resp)
    }

    /// Whether the record's key still exists with its original creation
    /// revision.
    pub async fn is_held(&self, ctx: &Context, record: &LockRecord) -> KvResult<bool> {
        Ok(self.own_key(ctx, record).await?.is_some())
    }

    /// Resolve once the record's key is gone, typically by lease expiry.
    ///
    /// Returns the revision at which the loss was observed.
    pub async fn wait_lost(&self, ctx: &Context, record: &LockRecord) -> KvResult<u64> {
        let store = self.engine.store();
        let mut watch = ctx
            .run(store.watch(KeyRange::single(record.key.clone()), WatchFilters::NOPUT))
            .await?;
        loop {
            if self.own_key(ctx, record).await?.is_none() {
                return ctx.run(store.current_revision()).await;
            }
            match ctx.run(self.next_event(&mut watch)).await? {
                WatchNext::Events { revision, .. } => return Ok(revision),
                WatchNext::Lagged => continue,
                WatchNext::Closed => return Err(KvError::unavailable("watch closed")),
            }
        }
    }

    async fn own_key(&self, ctx: &Context, record: &LockRecord) -> KvResult<Option<KeyValue>> {
        let resp = self
            .engine
            .get(ctx, RangeRequest::key(record.key.clone()))
            .await?;
        Ok(resp
            .kvs
            .into_iter()
            .find(|kv| kv.create_revision == record.create_revision))
    }

    async fn position(&self, ctx: &Context, record: &LockRecord) -> KvResult<Position> {
        let resp = self
            .engine
            .get(ctx, RangeRequest::prefix(record.prefix.clone()))
            .await?;

        let own = resp
            .kvs
            .iter()
            .any(|kv| kv.key == record.key && kv.create_revision == record.create_revision);
        if !own {
            tracing::warn!(
                key = %String::from_utf8_lossy(&record.key),
                "lock key removed while waiting"
            );
            return Err(KvError::LockLost {
                key: record.key.clone(),
            });
        }

        let ahead = resp
            .kvs
            .into_iter()
            .filter(|kv| kv.create_revision < record.create_revision)
            .max_by_key(|kv| kv.create_revision);
        Ok(match ahead {
            Some(kv) => Position::Behind(kv),
            None => Position::First {
                revision: resp.header.revision,
            },
        })
    }

    /// Wait until `ahead` is deleted or may have been.
    async fn wait_deleted(&self, ctx: &Context, ahead: &KeyValue) -> KvResult<()> {
        let store = self.engine.store();
        let mut watch = ctx
            .run(store.watch(KeyRange::single(ahead.key.clone()), WatchFilters::NOPUT))
            .await?;

        // The key may have gone between the listing and the watch.
        let current = self
            .engine
            .get(ctx, RangeRequest::key(ahead.key.clone()))
            .await?;
        if !current
            .kvs
            .iter()
            .any(|kv| kv.create_revision == ahead.create_revision)
        {
            return Ok(());
        }

        tracing::debug!(
            ahead = %String::from_utf8_lossy(&ahead.key),
            "waiting for lock predecessor"
        );
        match ctx.run(self.next_event(&mut watch)).await? {
            WatchNext::Events { .. } | WatchNext::Lagged => Ok(()),
            WatchNext::Closed => Err(KvError::unavailable("watch closed")),
        }
    }

    /// Next watch event, or a synthetic `Lagged` when the poll interval
    /// elapses first.
    async fn next_event(&self, watch: &mut WatchStream) -> KvResult<WatchNext> {
        let next = match self.poll_interval {
            Some(interval) => tokio::select! {
                next = watch.next() => next,
                _ = tokio::time::sleep(interval) => WatchNext::Lagged,
            },
            None => watch.next().await,
        };
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::LeaseRegistry;

    #[tokio::test]
    async fn uncontended_lock_is_immediate() {
        let store = Arc::new(MemoryStore::new());
        let locks = LockService::new(Arc::clone(&store));
        let lease = store.grant(Duration::from_secs(30)).await.unwrap();
        let ctx = Context::background();

        let mut record = locks.lock(&ctx, "l", lease).await.unwrap();
        assert_eq!(record.state, LockState::Held);
        assert_eq!(record.create_revision, 1);
        assert!(locks.is_held(&ctx, &record).await.unwrap());

        locks.release(&ctx, &mut record).await.unwrap();
        assert_eq!(record.state, LockState::Released);
        assert!(!locks.is_held(&ctx, &record).await.unwrap());
    }

    #[tokio::test]
    async fn relock_with_same_lease_keeps_place() {
        let store = Arc::new(MemoryStore::new());
        let locks = LockService::new(Arc::clone(&store));
        let lease = store.grant(Duration::from_secs(30)).await.unwrap();
        let ctx = Context::background();

        let first = locks.lock(&ctx, "l", lease).await.unwrap();
        let again = locks.lock(&ctx, "l", lease).await.unwrap();
        assert_eq!(first.key, again.key);
        assert_eq!(first.create_revision, again.create_revision);
    }

    #[tokio::test]
    async fn unlock_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let locks = LockService::new(store);
        let ctx = Context::background();
        locks.unlock(&ctx, "l/1").await.unwrap();
        locks.unlock(&ctx, "l/1").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_lease_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let locks = LockService::new(Arc::clone(&store));
        let err = locks
            .lock(&Context::background(), "l", 99)
            .await
            .unwrap_err();
        assert_eq!(err, KvError::LeaseNotFound { lease_id: 99 });
        assert_eq!(store.revision(), 0);
    }
}
