//! Injectable time source
//!
//! The pipeline never reads the wall clock directly. Verifiers hold an
//! `Arc<dyn Clock>` so tests and reproducible runs can pin time.

use std::fmt::Debug;
use std::time::Instant;

/// Fixed timestamp used for reproducible result objects
pub const DETERMINISTIC_TIMESTAMP: i64 = 1_735_600_000;

/// Time source for validity checks, result timestamps and telemetry
pub trait Clock: Send + Sync + Debug {
    /// Current time as seconds since the Unix epoch
    fn now(&self) -> i64;

    /// Monotonic microsecond counter used for durations
    fn monotonic_micros(&self) -> u64;
}

/// Wall clock
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a wall clock
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn monotonic_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Frozen clock; every duration measured against it is zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock {
    timestamp: i64,
}

impl FixedClock {
    /// Clock pinned at `timestamp`
    pub fn at(timestamp: i64) -> Self {
        Self { timestamp }
    }

    /// Clock pinned at [`DETERMINISTIC_TIMESTAMP`]
    pub fn deterministic() -> Self {
        Self::at(DETERMINISTIC_TIMESTAMP)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.timestamp
    }

    fn monotonic_micros(&self) -> u64 {
        0
    }
}
