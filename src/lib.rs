//! revkv - Conditional transactions and fair locks over a revisioned key-value store.
//!
//! Clients submit compare-then-else transactions that are evaluated against one
//! snapshot revision and committed atomically at one new revision. A lock
//! service built on the same transactions gives fair, lease-backed mutual
//! exclusion.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            LockService            │     FailureClassifier       │
//! │  ordered contender keys + watch   │   closed error taxonomy     │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Transaction Engine                        │
//! │   validate │ snapshot compares │ branch selection │ commit      │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  RevisionedStore / LeaseRegistry                │
//! │        MVCC index │ Leases │ Watches │ Guarded atomic apply     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::context`] - Deadlines and cancellation
//! - [`core::error`] - Error types
//! - [`core::logging`] - Tracing setup
//! - [`core::time`] - Deterministic time utilities
//!
//! ## Store
//! - [`store::mvcc`] - Multi-version key index
//! - [`store::lease`] - Lease table
//! - [`store::watch`] - Change notification
//! - [`store::memory`] - In-memory store
//! - [`store::cluster`] - Member handles with failure injection
//!
//! ## Transactions
//! - [`txn::validate`] - Structural validation
//! - [`txn::engine`] - Snapshot evaluation and atomic commit
//!
//! ## Locks
//! - [`lock::service`] - Fair lease-backed lock
//!
//! ## Retry
//! - [`retry::classify`] - Failure classification
//! - [`retry::policy`] - Read-only retry policy
//!
//! # Key Invariants
//!
//! - The store revision grows by exactly one per committed write batch
//! - All compares of a transaction, nested ones included, see one snapshot
//! - A transaction commits entirely at one revision or not at all
//! - Lock holders are granted in creation-revision order

// Core infrastructure
pub mod core;

// Revisioned store collaborators
pub mod store;

// Transactions
pub mod txn;

// Locks
pub mod lock;

// Failure classification
pub mod retry;

// Re-exports for convenience
pub use self::core::{config, context, error, time};
pub use lock::LockService;
pub use retry::{classify, FailureKind};
pub use txn::TxnEngine;
