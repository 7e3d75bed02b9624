//! Time sources.
//!
//! Store state is shared between processes, so every timestamp is wall-clock
//! milliseconds since the Unix epoch rather than a process-local `Instant`.

use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// System clock backed by `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same time value, so advancing one advances all of them.
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<u64>>,
}

impl MockClock {
    /// Create a mock clock starting at `start_millis`.
    pub fn new(start_millis: u64) -> Self {
        Self {
            current: Arc::new(Mutex::new(start_millis)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration.as_millis() as u64;
    }

    /// Set the clock to an absolute epoch-millisecond value.
    pub fn set(&self, millis: u64) {
        *self.current.lock() = millis;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        // Arbitrary fixed point so tests never start at zero.
        Self::new(1_700_000_000_000)
    }
}

impl Clock for MockClock {
    fn now_millis(&self) -> u64 {
        *self.current.lock()
    }
}
