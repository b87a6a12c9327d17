//! Deterministic time.
//!
//! Lease deadlines are measured in [`Tick`]s. The store only expires leases
//! when a tick is explicitly advanced, so tests can drive expiry without
//! sleeping and production code drives it from a periodic ticker.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A point in store time, in milliseconds since the store's epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tick {
    /// Milliseconds since the store epoch.
    pub ms: u64,
}

impl Tick {
    /// Create a new tick with the given millisecond value.
    pub const fn new(ms: u64) -> Self {
        Self { ms }
    }

    /// The store epoch.
    pub const fn zero() -> Self {
        Self { ms: 0 }
    }

    /// Add milliseconds to this tick.
    pub const fn add_ms(self, ms: u64) -> Self {
        Self {
            ms: self.ms.saturating_add(ms),
        }
    }

    /// Check if this tick is at or after the given deadline.
    pub const fn is_at_or_after(self, deadline: Tick) -> bool {
        self.ms >= deadline.ms
    }

    /// Milliseconds until a deadline, zero once it has passed.
    pub fn ms_until(self, deadline: Tick) -> u64 {
        deadline.ms.saturating_sub(self.ms)
    }
}

impl std::fmt::Display for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tick({}ms)", self.ms)
    }
}

/// Maps wall-clock instants onto ticks relative to a fixed start.
#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    started: Instant,
}

impl TickClock {
    /// Start a clock at tick zero.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Current tick.
    pub fn now(&self) -> Tick {
        Tick::new(self.started.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_arithmetic() {
        let t = Tick::new(100);
        assert_eq!(t.add_ms(50), Tick::new(150));
        assert!(Tick::new(150).is_at_or_after(t.add_ms(50)));
        assert!(!Tick::new(149).is_at_or_after(t.add_ms(50)));
        assert_eq!(t.ms_until(Tick::new(130)), 30);
        assert_eq!(Tick::new(200).ms_until(t), 0);
    }

    #[test]
    fn add_saturates() {
        assert_eq!(Tick::new(u64::MAX).add_ms(1), Tick::new(u64::MAX));
    }
}
