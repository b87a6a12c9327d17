//! Transaction engine.
//!
//! Executes compare-then-else transactions with optimistic concurrency:
//!
//! 1. Validate the request structure. Nothing touches the store on failure.
//! 2. Take a snapshot revision and read every compared range at it.
//! 3. Choose branches top-down, nested transactions included, using that one
//!    snapshot.
//! 4. Submit the chosen ops as one batch guarded by the compared ranges. The
//!    store commits it at one new revision, or rejects it with `Conflict` if
//!    any compared range changed after the snapshot.
//!
//! Conflicts are returned to the caller; the engine never resubmits a
//! mutating transaction.

use super::compare;
use super::request::{Op, ResponseOp, Txn, TxnResponse};
use super::validate::TxnValidator;
use crate::core::config::Config;
use crate::core::context::Context;
use crate::core::error::{KvError, KvResult};
use crate::retry::ReadRetryPolicy;
use crate::store::ops::{
    DeleteRangeRequest, DeleteRangeResponse, KeyRange, PutRequest, PutResponse, RangeRequest,
    RangeResponse, ResponseHeader,
};
use crate::store::record::KeyValue;
use crate::store::{ApplyBatch, BatchOp, BatchResponse, ReadGuard, RevisionedStore};
use std::collections::HashMap;
use std::sync::Arc;

/// Compared ranges read at the snapshot.
type SnapshotReads = HashMap<KeyRange, Vec<KeyValue>>;

/// Executes transactions against a [`RevisionedStore`].
pub struct TxnEngine<S: ?Sized> {
    store: Arc<S>,
    validator: TxnValidator,
    read_retry: ReadRetryPolicy,
}

impl<S: RevisionedStore + ?Sized> TxnEngine<S> {
    /// Create an engine with default limits.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, &Config::default())
    }

    /// Create an engine with limits and retry policy from `config`.
    pub fn with_config(store: Arc<S>, config: &Config) -> Self {
        Self {
            store,
            validator: TxnValidator::new(&config.txn),
            read_retry: ReadRetryPolicy::from_config(&config.retry),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Check a transaction without executing it.
    pub fn validate(&self, txn: &Txn) -> KvResult<()> {
        self.validator.validate(txn).inspect_err(|err| {
            tracing::debug!(error = %err, "txn rejected by validation");
        })
    }

    /// Validate and execute a transaction.
    pub async fn execute(&self, ctx: &Context, txn: &Txn) -> KvResult<TxnResponse> {
        self.validate(txn)?;

        let read_only = txn.is_read_only();
        let mut attempt = 1;
        loop {
            let err = match ctx.run(self.execute_once(txn)).await {
                Ok(resp) => return Ok(resp),
                Err(err) => err,
            };
            let Some(delay) = self.read_retry.next_delay(read_only, attempt, &err) else {
                return Err(err);
            };
            tracing::warn!(attempt, error = %err, "retrying read-only txn");
            ctx.run(async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
            attempt += 1;
        }
    }

    async fn execute_once(&self, txn: &Txn) -> KvResult<TxnResponse> {
        let snapshot = self.store.current_revision().await?;
        let reads = self.read_compared(txn, snapshot).await?;

        let mut guard = ReadGuard {
            snapshot,
            ranges: Vec::new(),
        };
        let (succeeded, ops) = resolve(txn, &reads, &mut guard.ranges)?;
        let op_count = ops.len();
        let batch = ApplyBatch {
            guard: (!guard.ranges.is_empty()).then_some(guard),
            ops,
        };

        let result = self.store.apply(batch).await.inspect_err(|err| {
            if let KvError::Conflict { snapshot, .. } = err {
                tracing::debug!(snapshot, "txn conflict");
            }
        })?;
        tracing::debug!(
            revision = result.revision,
            succeeded,
            ops = op_count,
            "txn committed"
        );

        let header = ResponseHeader::new(result.revision);
        Ok(TxnResponse {
            header,
            succeeded,
            responses: result
                .responses
                .into_iter()
                .map(|r| to_response_op(r, header))
                .collect(),
        })
    }

    /// Read every range compared anywhere in the tree at `snapshot`.
    async fn read_compared(&self, txn: &Txn, snapshot: u64) -> KvResult<SnapshotReads> {
        let mut ranges = Vec::new();
        collect_compare_ranges(txn, &mut ranges);

        let mut reads = SnapshotReads::with_capacity(ranges.len());
        for range in ranges {
            if reads.contains_key(&range) {
                continue;
            }
            let request = RangeRequest::new(range.clone()).at_revision(snapshot);
            let resp = self.store.range(&request).await?;
            reads.insert(range, resp.kvs);
        }
        Ok(reads)
    }

    /// Read a key or range.
    pub async fn get(&self, ctx: &Context, request: RangeRequest) -> KvResult<RangeResponse> {
        let txn = Txn::new().and_then([Op::Get(request)]);
        let mut resp = self.execute(ctx, &txn).await?;
        match resp.responses.pop() {
            Some(ResponseOp::Range(r)) => Ok(r),
            _ => Err(KvError::internal("get returned no range response")),
        }
    }

    /// Put a key.
    pub async fn put(&self, ctx: &Context, request: PutRequest) -> KvResult<PutResponse> {
        let txn = Txn::new().and_then([Op::Put(request)]);
        let mut resp = self.execute(ctx, &txn).await?;
        match resp.responses.pop() {
            Some(ResponseOp::Put(r)) => Ok(r),
            _ => Err(KvError::internal("put returned no put response")),
        }
    }

    /// Delete a key or range.
    pub async fn delete(
        &self,
        ctx: &Context,
        request: DeleteRangeRequest,
    ) -> KvResult<DeleteRangeResponse> {
        let txn = Txn::new().and_then([Op::Delete(request)]);
        let mut resp = self.execute(ctx, &txn).await?;
        match resp.responses.pop() {
            Some(ResponseOp::DeleteRange(r)) => Ok(r),
            _ => Err(KvError::internal("delete returned no delete response")),
        }
    }
}

fn collect_compare_ranges(txn: &Txn, out: &mut Vec<KeyRange>) {
    out.extend(txn.compare.iter().map(|c| c.range.clone()));
    for op in txn.success.iter().chain(txn.failure.iter()) {
        if let Op::Txn(nested) = op {
            collect_compare_ranges(nested, out);
        }
    }
}

/// Choose branches and lower them into batch ops.
///
/// Ranges whose compares decided a branch are appended to `guarded`.
fn resolve(
    txn: &Txn,
    reads: &SnapshotReads,
    guarded: &mut Vec<KeyRange>,
) -> KvResult<(bool, Vec<BatchOp>)> {
    let mut succeeded = true;
    for cmp in &txn.compare {
        let kvs = reads
            .get(&cmp.range)
            .ok_or_else(|| KvError::internal("compare range was not read"))?;
        if !guarded.contains(&cmp.range) {
            guarded.push(cmp.range.clone());
        }
        if !compare::evaluate(cmp, kvs) {
            succeeded = false;
        }
    }

    let branch = if succeeded { &txn.success } else { &txn.failure };
    let ops = branch
        .iter()
        .map(|op| {
            Ok(match op {
                Op::Get(req) => BatchOp::Range(req.clone()),
                Op::Put(req) => BatchOp::Put(req.clone()),
                Op::Delete(req) => BatchOp::DeleteRange(req.clone()),
                Op::Txn(nested) => {
                    let (succeeded, ops) = resolve(nested, reads, guarded)?;
                    BatchOp::Txn { succeeded, ops }
                }
            })
        })
        .collect::<KvResult<Vec<_>>>()?;
    Ok((succeeded, ops))
}

fn to_response_op(resp: BatchResponse, header: ResponseHeader) -> ResponseOp {
    match resp {
        BatchResponse::Range(r) => ResponseOp::Range(r),
        BatchResponse::Put(r) => ResponseOp::Put(r),
        BatchResponse::DeleteRange(r) => ResponseOp::DeleteRange(r),
        BatchResponse::Txn {
            succeeded,
            responses,
        } => ResponseOp::Txn(TxnResponse {
            header,
            succeeded,
            responses: responses
                .into_iter()
                .map(|r| to_response_op(r, header))
                .collect(),
        }),
    }
}
