//! Tracing subscriber setup.

use crate::core::config::TelemetryConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a global subscriber for the configured level.
///
/// `RUST_LOG` overrides the configured level. Returns `false` if a subscriber
/// was already installed.
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .is_ok()
}
