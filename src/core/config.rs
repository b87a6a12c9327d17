//! Configuration parsing and validation.
//!
//! Configuration is loaded from TOML. Every section is optional and falls back
//! to the defaults below.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Transaction limits.
    #[serde(default)]
    pub txn: TxnConfig,

    /// Lock service tuning.
    #[serde(default)]
    pub lock: LockConfig,

    /// Lease registry settings.
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Retry policy for read-only transactions.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Transaction limits enforced by validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnConfig {
    /// Maximum flattened operation count per branch.
    #[serde(default = "default_max_ops")]
    pub max_ops: usize,

    /// Maximum nesting depth of `Txn` operations.
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            max_ops: default_max_ops(),
            max_nesting_depth: default_max_nesting_depth(),
        }
    }
}

/// Lock service tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Fallback re-check interval while waiting on a predecessor.
    ///
    /// Zero disables polling and relies on watch notifications alone.
    #[serde(default = "default_lock_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_lock_poll_interval_ms(),
        }
    }
}

impl LockConfig {
    /// Poll interval, if polling is enabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }
}

/// Lease registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Tick period of the expiry sweeper.
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    /// TTL used when a grant requests zero.
    #[serde(default = "default_lease_ttl_default_ms")]
    pub default_ttl_ms: u64,

    /// Upper bound for granted TTLs.
    #[serde(default = "default_lease_ttl_max_ms")]
    pub max_ttl_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period_ms(),
            default_ttl_ms: default_lease_ttl_default_ms(),
            max_ttl_ms: default_lease_ttl_max_ms(),
        }
    }
}

impl LeaseConfig {
    /// Period of the expiry sweeper.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    /// Clamp a requested TTL into the configured bounds.
    pub fn clamp_ttl_ms(&self, requested_ms: u64) -> u64 {
        if requested_ms == 0 {
            self.default_ttl_ms
        } else {
            requested_ms.min(self.max_ttl_ms)
        }
    }
}

/// Read-retry mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadRetryMode {
    /// Never retry.
    #[default]
    Disabled,
    /// Retry read-only transactions a bounded number of times.
    Bounded,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retry mode for read-only transactions.
    #[serde(default)]
    pub read_retry: ReadRetryMode,

    /// Total attempts including the first one.
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            read_retry: ReadRetryMode::Disabled,
            max_attempts: default_retry_max_attempts(),
            backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_max_ops() -> usize {
    128
}

fn default_max_nesting_depth() -> usize {
    8
}

fn default_lock_poll_interval_ms() -> u64 {
    1_000
}

fn default_tick_period_ms() -> u64 {
    500
}

fn default_lease_ttl_default_ms() -> u64 {
    60_000
}

fn default_lease_ttl_max_ms() -> u64 {
    600_000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_txn()?;
        self.validate_lease()?;
        self.validate_retry()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_txn(&self) -> Result<()> {
        if self.txn.max_ops == 0 {
            anyhow::bail!("txn.max_ops must be > 0");
        }
        if self.txn.max_nesting_depth == 0 {
            anyhow::bail!("txn.max_nesting_depth must be > 0");
        }
        Ok(())
    }

    fn validate_lease(&self) -> Result<()> {
        if self.lease.tick_period_ms == 0 {
            anyhow::bail!("lease.tick_period_ms must be > 0");
        }
        if self.lease.default_ttl_ms > self.lease.max_ttl_ms {
            anyhow::bail!(
                "lease.default_ttl_ms ({}) cannot exceed lease.max_ttl_ms ({})",
                self.lease.default_ttl_ms,
                self.lease.max_ttl_ms
            );
        }
        Ok(())
    }

    fn validate_retry(&self) -> Result<()> {
        if self.retry.read_retry == ReadRetryMode::Bounded && self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be > 0 when read_retry is bounded");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}
