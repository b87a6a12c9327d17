//! Compare evaluation.
//!
//! A compare over a range holds only if every live key in the range satisfies
//! it. A range with no live keys is evaluated against a zero record, except for
//! value compares, which fail.

use super::request::{Compare, CompareResult, CompareTarget};
use crate::store::record::KeyValue;
use std::cmp::Ordering;

/// Evaluate `compare` against the live records of its range.
pub fn evaluate(compare: &Compare, kvs: &[KeyValue]) -> bool {
    if kvs.is_empty() {
        return match compare.target {
            CompareTarget::Value(_) => false,
            _ => holds(compare, &absent()),
        };
    }
    kvs.iter().all(|kv| holds(compare, kv))
}

fn holds(compare: &Compare, kv: &KeyValue) -> bool {
    let ordering = match &compare.target {
        CompareTarget::Value(expected) => kv.value.as_slice().cmp(expected.as_slice()),
        CompareTarget::Version(expected) => kv.version.cmp(expected),
        CompareTarget::CreateRevision(expected) => kv.create_revision.cmp(expected),
        CompareTarget::ModRevision(expected) => kv.mod_revision.cmp(expected),
        CompareTarget::Lease(expected) => kv.lease().cmp(expected),
    };
    matches(compare.result, ordering)
}

fn matches(result: CompareResult, ordering: Ordering) -> bool {
    match result {
        CompareResult::Equal => ordering == Ordering::Equal,
        CompareResult::NotEqual => ordering != Ordering::Equal,
        CompareResult::Greater => ordering == Ordering::Greater,
        CompareResult::Less => ordering == Ordering::Less,
    }
}

/// Stand-in for a key that does not exist.
fn absent() -> KeyValue {
    KeyValue {
        key: Vec::new(),
        value: Vec::new(),
        create_revision: 0,
        mod_revision: 0,
        version: 0,
        lease_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &str, value: &str, create: u64, modified: u64, version: u64) -> KeyValue {
        KeyValue {
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
            create_revision: create,
            mod_revision: modified,
            version,
            lease_id: None,
        }
    }

    #[test]
    fn missing_key_compares_as_zero() {
        assert!(evaluate(&Compare::version("foo", CompareResult::Equal, 0), &[]));
        assert!(evaluate(&Compare::create_revision("foo", CompareResult::Equal, 0), &[]));
        assert!(evaluate(&Compare::lease("foo", CompareResult::Equal, 0), &[]));
        assert!(!evaluate(&Compare::value("foo", CompareResult::Equal, ""), &[]));
        assert!(!evaluate(&Compare::value("foo", CompareResult::NotEqual, "x"), &[]));
    }

    #[test]
    fn operators() {
        let rec = [kv("k", "b", 2, 5, 3)];
        assert!(evaluate(&Compare::value("k", CompareResult::Greater, "a"), &rec));
        assert!(evaluate(&Compare::value("k", CompareResult::Less, "c"), &rec));
        assert!(evaluate(&Compare::mod_revision("k", CompareResult::Equal, 5), &rec));
        assert!(evaluate(&Compare::version("k", CompareResult::NotEqual, 1), &rec));
        assert!(!evaluate(&Compare::create_revision("k", CompareResult::Greater, 2), &rec));
    }

    #[test]
    fn range_compare_requires_every_key() {
        let parent = kv("foo/", "bar", 1, 1, 1);
        let child = kv("foo/a", "baz", 2, 2, 1);
        let cmp = Compare::create_revision("foo/", CompareResult::Equal, 1).with_prefix();
        assert!(evaluate(&cmp, std::slice::from_ref(&parent)));
        assert!(!evaluate(&cmp, &[parent, child]));
    }
}
