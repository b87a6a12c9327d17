//! Structural validation of transaction requests.
//!
//! Runs before any store contact. Within one branch, and any transactions
//! nested in it, no two mutations may touch the same key. The success and
//! failure branches of one transaction are mutually exclusive, so they are
//! checked independently of each other.

use super::request::{Op, Txn};
use crate::core::config::TxnConfig;
use crate::core::error::{KvError, KvResult};
use crate::store::ops::KeyRange;
use std::collections::BTreeSet;

/// Keys written and ranges deleted by the ops seen so far.
#[derive(Debug, Clone, Default)]
struct Writes {
    puts: BTreeSet<Vec<u8>>,
    deletes: Vec<KeyRange>,
}

impl Writes {
    fn check_put(&self, key: &[u8]) -> KvResult<()> {
        if self.puts.contains(key) || self.deletes.iter().any(|d| d.contains(key)) {
            return Err(duplicate(key));
        }
        Ok(())
    }

    fn check_delete(&self, range: &KeyRange) -> KvResult<()> {
        if let Some(key) = self.puts.iter().find(|k| range.contains(k)) {
            return Err(duplicate(key));
        }
        if self.deletes.iter().any(|d| d.overlaps(range)) {
            return Err(duplicate(&range.key));
        }
        Ok(())
    }

    fn absorb(&mut self, other: Writes) {
        self.puts.extend(other.puts);
        self.deletes.extend(other.deletes);
    }
}

fn duplicate(key: &[u8]) -> KvError {
    KvError::DuplicateKey { key: key.to_vec() }
}

/// Validates transaction shape against configured limits.
#[derive(Debug, Clone)]
pub struct TxnValidator {
    max_ops: usize,
    max_nesting_depth: usize,
}

impl TxnValidator {
    pub fn new(config: &TxnConfig) -> Self {
        Self {
            max_ops: config.max_ops,
            max_nesting_depth: config.max_nesting_depth,
        }
    }

    /// Check a transaction.
    ///
    /// Fails with `EmptyKey`, `NestingTooDeep`, `TooManyOps` or
    /// `DuplicateKey`.
    pub fn validate(&self, txn: &Txn) -> KvResult<()> {
        self.check_compares(txn)?;
        for branch in [&txn.success, &txn.failure] {
            let count = self.count_ops(branch, 0)?;
            if count > self.max_ops {
                return Err(KvError::TooManyOps {
                    count,
                    max: self.max_ops,
                });
            }
            self.check_branch(branch, 0, &Writes::default(), &mut Writes::default())?;
        }
        Ok(())
    }

    /// Flattened op count of a branch at `depth`. A nested transaction counts
    /// itself plus both of its branches.
    ///
    /// Stops with `NestingTooDeep` before descending past the depth bound.
    pub fn count_ops(&self, ops: &[Op], depth: usize) -> KvResult<usize> {
        let mut count = 0;
        for op in ops {
            count += 1;
            if let Op::Txn(nested) = op {
                let depth = self.nested_depth(depth)?;
                count += self.count_ops(&nested.success, depth)?;
                count += self.count_ops(&nested.failure, depth)?;
            }
        }
        Ok(count)
    }

    fn nested_depth(&self, depth: usize) -> KvResult<usize> {
        let depth = depth + 1;
        if depth > self.max_nesting_depth {
            return Err(KvError::NestingTooDeep {
                depth,
                max: self.max_nesting_depth,
            });
        }
        Ok(depth)
    }

    fn check_compares(&self, txn: &Txn) -> KvResult<()> {
        if txn.compare.iter().any(|c| c.range.key.is_empty()) {
            return Err(KvError::EmptyKey);
        }
        Ok(())
    }

    /// Walk `ops` at `depth`, recording mutations into `local`.
    ///
    /// `outer` holds the mutations of enclosing scopes.
    fn check_branch(
        &self,
        ops: &[Op],
        depth: usize,
        outer: &Writes,
        local: &mut Writes,
    ) -> KvResult<()> {
        for op in ops {
            match op {
                Op::Get(req) => {
                    if req.range.key.is_empty() {
                        return Err(KvError::EmptyKey);
                    }
                }
                Op::Put(req) => {
                    if req.key.is_empty() {
                        return Err(KvError::EmptyKey);
                    }
                    outer.check_put(&req.key)?;
                    local.check_put(&req.key)?;
                    local.puts.insert(req.key.clone());
                }
                Op::Delete(req) => {
                    if req.range.key.is_empty() {
                        return Err(KvError::EmptyKey);
                    }
                    outer.check_delete(&req.range)?;
                    local.check_delete(&req.range)?;
                    local.deletes.push(req.range.clone());
                }
                Op::Txn(nested) => {
                    let depth = self.nested_depth(depth)?;
                    self.check_compares(nested)?;

                    let mut scope = outer.clone();
                    scope.absorb(local.clone());
                    let mut merged = Writes::default();
                    for branch in [&nested.success, &nested.failure] {
                        let mut inner = Writes::default();
                        self.check_branch(branch, depth, &scope, &mut inner)?;
                        merged.absorb(inner);
                    }
                    local.absorb(merged);
                }
            }
        }
        Ok(())
    }
}

impl Default for TxnValidator {
    fn default() -> Self {
        Self::new(&TxnConfig::default())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ops::DeleteRangeRequest;
    use crate::txn::request::{Compare, CompareResult};

    fn validator(max_ops: usize, max_nesting_depth: usize) -> TxnValidator {
        TxnValidator::new(&TxnConfig {
            max_ops,
            max_nesting_depth,
        })
    }

    #[test]
    fn duplicate_put_in_branch() {
        let txn = Txn::new().and_then([Op::put("a", "1"), Op::put("a", "2")]);
        assert_eq!(
            TxnValidator::default().validate(&txn),
            Err(KvError::DuplicateKey { key: b"a".to_vec() })
        );
    }

    #[test]
    fn same_key_across_branches_is_allowed() {
        let txn = Txn::new()
            .and_then([Op::put("a", "1")])
            .or_else([Op::put("a", "2")]);
        assert!(TxnValidator::default().validate(&txn).is_ok());
    }

    #[test]
    fn put_inside_deleted_range() {
        let txn = Txn::new().and_then([
            Op::Delete(DeleteRangeRequest::prefix("p/")),
            Op::put("p/x", "1"),
        ]);
        assert!(matches!(
            TxnValidator::default().validate(&txn),
            Err(KvError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn nested_conflicts_with_parent() {
        let txn = Txn::new().and_then([
            Op::put("a", "1"),
            Op::Txn(Txn::new().or_else([Op::delete("a")])),
        ]);
        assert!(matches!(
            TxnValidator::default().validate(&txn),
            Err(KvError::DuplicateKey { .. })
        ));

        let exclusive = Txn::new().and_then([Op::Txn(
            Txn::new()
                .and_then([Op::put("a", "1")])
                .or_else([Op::put("a", "2")]),
        )]);
        assert!(TxnValidator::default().validate(&exclusive).is_ok());
    }

    #[test]
    fn nested_sibling_conflict() {
        let txn = Txn::new().and_then([
            Op::Txn(Txn::new().and_then([Op::put("a", "1")])),
            Op::Txn(Txn::new().or_else([Op::put("a", "2")])),
        ]);
        assert!(matches!(
            TxnValidator::default().validate(&txn),
            Err(KvError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn op_count_includes_nested() {
        let txn = Txn::new().and_then([
            Op::put("a", "1"),
            Op::Txn(Txn::new().and_then([Op::put("b", "1"), Op::put("c", "1")])),
        ]);
        assert_eq!(validator(128, 8).count_ops(&txn.success, 0), Ok(4));
        assert_eq!(
            validator(3, 8).validate(&txn),
            Err(KvError::TooManyOps { count: 4, max: 3 })
        );
        assert!(validator(4, 8).validate(&txn).is_ok());
    }

    #[test]
    fn nesting_depth_bound() {
        let mut txn = Txn::new().and_then([Op::get("k")]);
        for _ in 0..3 {
            txn = Txn::new().and_then([Op::Txn(txn)]);
        }
        assert!(validator(128, 3).validate(&txn).is_ok());
        assert_eq!(
            validator(128, 2).validate(&txn),
            Err(KvError::NestingTooDeep { depth: 3, max: 2 })
        );
    }

    #[test]
    fn depth_is_checked_before_op_count() {
        // Over both limits at once: the depth bound answers first.
        let mut txn = Txn::new().and_then((0..10).map(|i| Op::get(format!("k{}", i))));
        for _ in 0..3 {
            txn = Txn::new().and_then([Op::Txn(txn)]);
        }
        assert_eq!(
            validator(4, 2).validate(&txn),
            Err(KvError::NestingTooDeep { depth: 3, max: 2 })
        );
    }

    #[test]
    fn very_deep_nesting_is_rejected() {
        let mut txn = Txn::new().and_then([Op::get("k")]);
        for _ in 0..200_000 {
            txn = Txn::new().and_then([Op::Txn(txn)]);
        }
        assert_eq!(
            TxnValidator::default().validate(&txn),
            Err(KvError::NestingTooDeep { depth: 9, max: 8 })
        );
        // Dropping the chain recurses once per level.
        std::mem::forget(txn);
    }

    #[test]
    fn empty_keys_rejected() {
        let txn = Txn::new().when([Compare::version("", CompareResult::Equal, 0)]);
        assert_eq!(TxnValidator::default().validate(&txn), Err(KvError::EmptyKey));

        let txn = Txn::new().and_then([Op::put("", "v")]);
        assert_eq!(TxnValidator::default().validate(&txn), Err(KvError::EmptyKey));
    }
}
