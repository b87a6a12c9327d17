//! Compare-then-else transactions.
//!
//! - [`request`] - Transaction request and response types
//! - [`compare`] - Compare evaluation
//! - [`validate`] - Structural validation
//! - [`engine`] - Snapshot evaluation and atomic commit

pub mod compare;
pub mod engine;
pub mod request;
pub mod validate;

pub use engine::TxnEngine;
pub use request::{Compare, CompareResult, CompareTarget, Op, ResponseOp, Txn, TxnResponse};
pub use validate::TxnValidator;
