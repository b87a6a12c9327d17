//! Lease table.
//!
//! A lease holds a TTL and a weak set of attached keys. Revoking or expiring
//! the lease deletes the keys; deleting a key only detaches it.

use crate::core::time::Tick;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A granted lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Unique lease identifier.
    pub lease_id: i64,

    /// TTL in milliseconds.
    pub ttl_ms: u64,

    /// Tick when the lease was granted.
    pub granted_at: Tick,

    /// Tick when the lease expires unless renewed.
    pub keepalive_deadline: Tick,

    /// Keys attached to this lease.
    pub attached_keys: BTreeSet<Vec<u8>>,
}

impl LeaseRecord {
    /// Create a new lease.
    pub fn new(lease_id: i64, ttl_ms: u64, granted_at: Tick) -> Self {
        Self {
            lease_id,
            ttl_ms,
            granted_at,
            keepalive_deadline: granted_at.add_ms(ttl_ms),
            attached_keys: BTreeSet::new(),
        }
    }

    /// Check if the lease has expired at the given tick.
    pub fn is_expired_at(&self, tick: Tick) -> bool {
        tick.is_at_or_after(self.keepalive_deadline)
    }

    /// Remaining TTL at the given tick.
    pub fn remaining_ttl_at(&self, tick: Tick) -> u64 {
        tick.ms_until(self.keepalive_deadline)
    }
}

/// Remaining lifetime of a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseTimeToLive {
    /// Lease ID.
    pub lease_id: i64,
    /// Remaining TTL in milliseconds.
    pub remaining_ms: u64,
    /// Granted TTL in milliseconds.
    pub granted_ttl_ms: u64,
    /// Keys attached to the lease.
    pub keys: Vec<Vec<u8>>,
}

/// Active leases of a store.
#[derive(Debug)]
pub struct LeaseTable {
    leases: HashMap<i64, LeaseRecord>,
    next_lease_id: i64,
}

impl LeaseTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            leases: HashMap::new(),
            next_lease_id: 1,
        }
    }

    /// Check if a lease exists.
    pub fn exists(&self, lease_id: i64) -> bool {
        self.leases.contains_key(&lease_id)
    }

    /// Grant a lease with an auto-assigned id.
    pub fn grant(&mut self, ttl_ms: u64, now: Tick) -> i64 {
        let id = self.next_lease_id;
        self.next_lease_id += 1;
        self.leases.insert(id, LeaseRecord::new(id, ttl_ms, now));
        id
    }

    /// Remove a lease, returning its record.
    pub fn revoke(&mut self, lease_id: i64) -> Option<LeaseRecord> {
        self.leases.remove(&lease_id)
    }

    /// Push the deadline of a lease out by its TTL.
    pub fn keepalive(&mut self, lease_id: i64, now: Tick) -> Option<u64> {
        let lease = self.leases.get_mut(&lease_id)?;
        lease.keepalive_deadline = now.add_ms(lease.ttl_ms);
        Some(lease.ttl_ms)
    }

    /// Attach a key to a lease.
    pub fn attach(&mut self, lease_id: i64, key: Vec<u8>) -> bool {
        match self.leases.get_mut(&lease_id) {
            Some(lease) => {
                lease.attached_keys.insert(key);
                true
            }
            None => false,
        }
    }

    /// Detach a key from a lease.
    pub fn detach(&mut self, lease_id: i64, key: &[u8]) -> bool {
        self.leases
            .get_mut(&lease_id)
            .is_some_and(|l| l.attached_keys.remove(key))
    }

    /// IDs of leases expired at `now`, in id order.
    pub fn collect_expired(&self, now: Tick) -> Vec<i64> {
        let mut expired: Vec<i64> = self
            .leases
            .values()
            .filter(|l| l.is_expired_at(now))
            .map(|l| l.lease_id)
            .collect();
        expired.sort_unstable();
        expired
    }

    /// Remaining lifetime of a lease.
    pub fn time_to_live(&self, lease_id: i64, now: Tick) -> Option<LeaseTimeToLive> {
        self.leases.get(&lease_id).map(|l| LeaseTimeToLive {
            lease_id,
            remaining_ms: l.remaining_ttl_at(now),
            granted_ttl_ms: l.ttl_ms,
            keys: l.attached_keys.iter().cloned().collect(),
        })
    }
}

impl Default for LeaseTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_assigns_increasing_ids() {
        let mut table = LeaseTable::new();
        let a = table.grant(1_000, Tick::zero());
        let b = table.grant(1_000, Tick::zero());
        assert!(b > a);
        assert!(table.exists(a) && table.exists(b));
    }

    #[test]
    fn keepalive_extends_deadline() {
        let mut table = LeaseTable::new();
        let id = table.grant(1_000, Tick::zero());
        assert_eq!(table.collect_expired(Tick::new(1_000)), vec![id]);

        table.keepalive(id, Tick::new(900));
        assert!(table.collect_expired(Tick::new(1_000)).is_empty());
        assert_eq!(table.collect_expired(Tick::new(1_900)), vec![id]);
    }

    #[test]
    fn attach_and_detach() {
        let mut table = LeaseTable::new();
        let id = table.grant(1_000, Tick::zero());
        assert!(table.attach(id, b"k".to_vec()));
        assert!(!table.attach(id + 1, b"k".to_vec()));

        let ttl = table.time_to_live(id, Tick::new(400)).unwrap();
        assert_eq!(ttl.remaining_ms, 600);
        assert_eq!(ttl.keys, vec![b"k".to_vec()]);

        assert!(table.detach(id, b"k"));
        assert!(!table.detach(id, b"k"));
    }
}
