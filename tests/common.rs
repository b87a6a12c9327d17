//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use revkv::core::config::Config;
use revkv::core::context::Context;
use revkv::store::memory::MemoryStore;
use revkv::store::ops::RangeRequest;
use revkv::store::record::KeyValue;
use revkv::txn::TxnEngine;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Write `content` to a temporary config file.
pub fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a configuration with custom settings.
pub fn create_config_with_settings(max_ops: usize, read_retry: &str, log_level: &str) -> NamedTempFile {
    config_file(&format!(
        r#"
[txn]
max_ops = {}

[retry]
read_retry = "{}"
max_attempts = 3
backoff_ms = 10

[telemetry]
log_level = "{}"
"#,
        max_ops, read_retry, log_level
    ))
}

/// A fresh store and an engine over it.
pub fn engine() -> (Arc<MemoryStore>, TxnEngine<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = TxnEngine::with_config(Arc::clone(&store), &Config::default());
    (store, engine)
}

/// Live records of a single key.
pub fn read_key(store: &MemoryStore, key: &str) -> Vec<KeyValue> {
    store
        .read(&RangeRequest::key(key))
        .expect("read failed")
        .kvs
}

/// A context that fails the test run instead of hanging.
pub fn test_ctx() -> Context {
    Context::with_timeout(Duration::from_secs(10))
}
