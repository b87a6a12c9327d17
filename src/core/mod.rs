//! Core infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`context`] - Request deadlines and cancellation
//! - [`error`] - Error types
//! - [`logging`] - Tracing subscriber setup
//! - [`time`] - Deterministic time utilities

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod time;
