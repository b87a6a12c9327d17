//! Push-based change notification.
//!
//! Every commit that changes keys is published once on a broadcast channel.
//! A [`WatchStream`] filters that feed down to one key range. Dropping the
//! stream unregisters it.

use super::ops::KeyRange;
use super::record::{EventType, KvEvent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Broadcast capacity in commits.
const WATCH_CHANNEL_CAPACITY: usize = 1024;

bitflags::bitflags! {
    /// Event filters for a watch stream.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct WatchFilters: u32 {
        /// Filter out PUT events.
        const NOPUT = 0b0000_0001;
        /// Filter out DELETE events.
        const NODELETE = 0b0000_0010;
    }
}

impl Default for WatchFilters {
    fn default() -> Self {
        Self::empty()
    }
}

impl WatchFilters {
    fn admits(&self, event_type: EventType) -> bool {
        match event_type {
            EventType::Put => !self.contains(Self::NOPUT),
            EventType::Delete => !self.contains(Self::NODELETE),
        }
    }
}

/// All events committed at one revision.
#[derive(Debug, Clone)]
pub struct CommitEvents {
    /// Revision of the commit.
    pub revision: u64,
    /// Changes in commit order.
    pub events: Vec<KvEvent>,
}

/// Fan-out point for committed events.
#[derive(Debug)]
pub struct WatchHub {
    tx: broadcast::Sender<Arc<CommitEvents>>,
    active: Arc<AtomicUsize>,
}

impl WatchHub {
    /// Create a hub with no subscribers.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            tx,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish a commit. No-op when nothing changed or nobody listens.
    pub fn publish(&self, revision: u64, events: Vec<KvEvent>) {
        if events.is_empty() {
            return;
        }
        let _ = self.tx.send(Arc::new(CommitEvents { revision, events }));
    }

    /// Register a watch over `range`, starting after the latest commit.
    pub fn subscribe(&self, range: KeyRange, filters: WatchFilters) -> WatchStream {
        self.active.fetch_add(1, Ordering::SeqCst);
        WatchStream {
            rx: self.tx.subscribe(),
            range,
            filters,
            active: Arc::clone(&self.active),
        }
    }

    /// Number of live watch streams.
    pub fn active_watches(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for WatchHub {
    fn default() -> Self {
        Self::new()
    }
}

/// What a watch stream yielded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchNext {
    /// Matching events of one commit.
    Events { revision: u64, events: Vec<KvEvent> },
    /// Commits were dropped; the caller must re-read state.
    Lagged,
    /// The store shut down.
    Closed,
}

/// A registered watch over one key range.
#[derive(Debug)]
pub struct WatchStream {
    rx: broadcast::Receiver<Arc<CommitEvents>>,
    range: KeyRange,
    filters: WatchFilters,
    active: Arc<AtomicUsize>,
}

impl WatchStream {
    /// Wait for the next commit touching the watched range.
    pub async fn next(&mut self) -> WatchNext {
        loop {
            match self.rx.recv().await {
                Ok(commit) => {
                    let events: Vec<KvEvent> = commit
                        .events
                        .iter()
                        .filter(|e| self.range.contains(&e.kv.key))
                        .filter(|e| self.filters.admits(e.event_type))
                        .cloned()
                        .collect();
                    if !events.is_empty() {
                        return WatchNext::Events {
                            revision: commit.revision,
                            events,
                        };
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "watch stream lagged");
                    return WatchNext::Lagged;
                }
                Err(broadcast::error::RecvError::Closed) => return WatchNext::Closed,
            }
        }
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::record::KeyValue;

    fn put_event(key: &str, rev: u64) -> KvEvent {
        KvEvent::put(KeyValue::new(key.as_bytes().to_vec(), Vec::new(), rev), None)
    }

    #[tokio::test]
    async fn stream_filters_by_range_and_type() {
        let hub = WatchHub::new();
        let mut stream = hub.subscribe(KeyRange::single("a"), WatchFilters::NOPUT);

        hub.publish(1, vec![put_event("a", 1)]);
        let prev = KeyValue::new(b"a".to_vec(), Vec::new(), 1);
        hub.publish(2, vec![put_event("b", 2), KvEvent::delete(prev, 2)]);

        match stream.next().await {
            WatchNext::Events { revision, events } => {
                assert_eq!(revision, 2);
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].event_type, EventType::Delete);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn drop_unregisters() {
        let hub = WatchHub::new();
        let stream = hub.subscribe(KeyRange::prefix("x"), WatchFilters::empty());
        assert_eq!(hub.active_watches(), 1);
        drop(stream);
        assert_eq!(hub.active_watches(), 0);
    }
}
