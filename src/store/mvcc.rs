//! Multi-version key index.
//!
//! Every key keeps the chain of revisions at which it changed, so reads can be
//! served at any revision above the compaction floor and commits can detect
//! whether a range changed after a given snapshot.

use super::ops::KeyRange;
use super::record::{KeyValue, KvEvent};
use crate::core::error::{KvError, KvResult};
use std::collections::BTreeMap;
use std::ops::Bound;

/// One entry in a key's change chain.
#[derive(Debug, Clone)]
enum Generation {
    /// Key holds this record from its `mod_revision` on.
    Live(KeyValue),
    /// Key was deleted at this revision.
    Tombstone(u64),
}

impl Generation {
    fn revision(&self) -> u64 {
        match self {
            Self::Live(kv) => kv.mod_revision,
            Self::Tombstone(rev) => *rev,
        }
    }

    fn live(&self) -> Option<&KeyValue> {
        match self {
            Self::Live(kv) => Some(kv),
            Self::Tombstone(_) => None,
        }
    }
}

/// Change chain of a single key, ascending by revision.
#[derive(Debug, Clone, Default)]
struct KeyHistory {
    generations: Vec<Generation>,
}

impl KeyHistory {
    fn latest(&self) -> Option<&KeyValue> {
        self.generations.last().and_then(Generation::live)
    }

    fn at(&self, revision: u64) -> Option<&KeyValue> {
        self.generations
            .iter()
            .rev()
            .find(|g| g.revision() <= revision)
            .and_then(Generation::live)
    }

    fn last_revision(&self) -> u64 {
        self.generations.last().map_or(0, Generation::revision)
    }

    fn record(&mut self, generation: Generation) {
        // Two changes to one key at the same revision collapse into the later.
        if self
            .generations
            .last()
            .is_some_and(|g| g.revision() == generation.revision())
        {
            self.generations.pop();
        }
        self.generations.push(generation);
    }

    /// Drop generations no read at or above `floor` can observe.
    fn compact(&mut self, floor: u64) -> usize {
        let keep_from = self
            .generations
            .iter()
            .rposition(|g| g.revision() <= floor)
            .unwrap_or(0);
        let mut removed = keep_from;
        self.generations.drain(..keep_from);
        if let [Generation::Tombstone(rev)] = self.generations.as_slice() {
            if *rev <= floor {
                self.generations.clear();
                removed += 1;
            }
        }
        removed
    }
}

/// Multi-version key index.
#[derive(Debug, Default)]
pub struct MvccIndex {
    /// Last committed revision.
    current_revision: u64,

    /// Key → change chain.
    keys: BTreeMap<Vec<u8>, KeyHistory>,

    /// Reads below this revision are rejected.
    compaction_floor: u64,

    /// Keys currently live.
    live_key_count: usize,
}

impl MvccIndex {
    /// Create an empty index at revision zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current revision.
    pub fn current_revision(&self) -> u64 {
        self.current_revision
    }

    /// Get the compaction floor.
    pub fn compaction_floor(&self) -> u64 {
        self.compaction_floor
    }

    /// Number of live keys.
    pub fn live_key_count(&self) -> usize {
        self.live_key_count
    }

    /// Mark `revision` as committed.
    ///
    /// Revisions never move backwards.
    pub fn commit(&mut self, revision: u64) {
        debug_assert!(
            revision >= self.current_revision,
            "revision regressed: {} < {}",
            revision,
            self.current_revision
        );
        self.current_revision = self.current_revision.max(revision);
    }

    /// Check a read revision against the floor and the head.
    pub fn check_revision(&self, revision: u64) -> KvResult<()> {
        if revision > self.current_revision {
            return Err(KvError::FutureRevision {
                revision,
                current: self.current_revision,
            });
        }
        if revision < self.compaction_floor {
            return Err(KvError::Compacted {
                revision,
                floor: self.compaction_floor,
            });
        }
        Ok(())
    }

    /// Live records in a range at `revision`, in key order.
    pub fn range_at(&self, range: &KeyRange, revision: u64) -> Vec<&KeyValue> {
        self.histories(range)
            .filter_map(|(_, h)| h.at(revision))
            .collect()
    }

    /// Latest live records in a range, in key order.
    pub fn range(&self, range: &KeyRange) -> Vec<&KeyValue> {
        self.histories(range).filter_map(|(_, h)| h.latest()).collect()
    }

    /// First key in `range` changed after `revision`, if any.
    pub fn modified_after(&self, range: &KeyRange, revision: u64) -> Option<&[u8]> {
        self.histories(range)
            .find(|(_, h)| h.last_revision() > revision)
            .map(|(k, _)| k.as_slice())
    }

    fn histories<'a>(
        &'a self,
        range: &KeyRange,
    ) -> Box<dyn Iterator<Item = (&'a Vec<u8>, &'a KeyHistory)> + 'a> {
        if range.is_single() {
            return Box::new(self.keys.get_key_value(&range.key).into_iter());
        }
        let start = Bound::Included(range.key.clone());
        let end = if range.is_open_ended() {
            Bound::Unbounded
        } else if range.range_end <= range.key {
            return Box::new(std::iter::empty());
        } else {
            Bound::Excluded(range.range_end.clone())
        };
        Box::new(self.keys.range::<Vec<u8>, _>((start, end)))
    }

    /// Put a key at `revision`.
    ///
    /// Returns the change event; its `prev_kv` is the replaced record.
    pub fn put(
        &mut self,
        key: Vec<u8>,
        value: Vec<u8>,
        lease_id: Option<i64>,
        revision: u64,
    ) -> KvEvent {
        let history = self.keys.entry(key.clone()).or_default();
        let prev = history.latest().cloned();

        let mut record = KeyValue::new(key, value, revision);
        record.lease_id = lease_id;
        match &prev {
            Some(p) => {
                record.create_revision = p.create_revision;
                record.version = p.version + 1;
            }
            None => self.live_key_count += 1,
        }

        history.record(Generation::Live(record.clone()));
        KvEvent::put(record, prev)
    }

    /// Delete a key at `revision`.
    pub fn delete(&mut self, key: &[u8], revision: u64) -> Option<KvEvent> {
        let history = self.keys.get_mut(key)?;
        let prev = history.latest()?.clone();
        history.record(Generation::Tombstone(revision));
        self.live_key_count = self.live_key_count.saturating_sub(1);
        Some(KvEvent::delete(prev, revision))
    }

    /// Delete every live key in a range at `revision`.
    pub fn delete_range(&mut self, range: &KeyRange, revision: u64) -> Vec<KvEvent> {
        let keys: Vec<Vec<u8>> = self.range(range).into_iter().map(|kv| kv.key.clone()).collect();
        keys.iter()
            .filter_map(|k| self.delete(k, revision))
            .collect()
    }

    /// Discard history below `revision`.
    ///
    /// Returns the number of generations removed.
    pub fn compact(&mut self, revision: u64) -> KvResult<usize> {
        if revision > self.current_revision {
            return Err(KvError::FutureRevision {
                revision,
                current: self.current_revision,
            });
        }
        if revision <= self.compaction_floor {
            return Err(KvError::Compacted {
                revision,
                floor: self.compaction_floor,
            });
        }

        let mut removed = 0;
        self.keys.retain(|_, h| {
            removed += h.compact(revision);
            !h.generations.is_empty()
        });
        self.compaction_floor = revision;
        Ok(removed)
    }
}
