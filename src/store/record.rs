//! Key-value records and change events.

use serde::{Deserialize, Serialize};

/// A key-value record as observed at some revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// The key (byte string).
    pub key: Vec<u8>,

    /// The value (byte string).
    pub value: Vec<u8>,

    /// Revision when this key was created since its last delete.
    pub create_revision: u64,

    /// Revision of the last modification.
    pub mod_revision: u64,

    /// Mutation counter since creation.
    pub version: u64,

    /// Attached lease, if any.
    pub lease_id: Option<i64>,
}

impl KeyValue {
    /// Create a freshly created record.
    pub fn new(key: Vec<u8>, value: Vec<u8>, revision: u64) -> Self {
        Self {
            key,
            value,
            create_revision: revision,
            mod_revision: revision,
            version: 1,
            lease_id: None,
        }
    }

    /// Lease id, zero when unattached.
    pub fn lease(&self) -> i64 {
        self.lease_id.unwrap_or(0)
    }

    /// Copy of this record without its value.
    pub fn without_value(&self) -> Self {
        Self {
            value: Vec::new(),
            ..self.clone()
        }
    }
}

/// Event type for watch notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// Key was created or updated.
    Put,
    /// Key was deleted.
    Delete,
}

/// A committed change to one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvEvent {
    /// Type of event.
    pub event_type: EventType,

    /// New record for Put; for Delete, the key with `mod_revision` set to the
    /// deleting revision.
    pub kv: KeyValue,

    /// Record before the change.
    pub prev_kv: Option<KeyValue>,
}

impl KvEvent {
    /// Create a Put event.
    pub fn put(kv: KeyValue, prev_kv: Option<KeyValue>) -> Self {
        Self {
            event_type: EventType::Put,
            kv,
            prev_kv,
        }
    }

    /// Create a Delete event.
    pub fn delete(prev_kv: KeyValue, revision: u64) -> Self {
        let kv = KeyValue {
            key: prev_kv.key.clone(),
            value: Vec::new(),
            create_revision: 0,
            mod_revision: revision,
            version: 0,
            lease_id: None,
        };
        Self {
            event_type: EventType::Delete,
            kv,
            prev_kv: Some(prev_kv),
        }
    }

    /// Revision at which the change committed.
    pub fn revision(&self) -> u64 {
        self.kv.mod_revision
    }
}
