//! Clock abstraction.
//!
//! The store and the inspector stamp statistics and scan reports with a
//! [`Clock`] so that tests can drive time explicitly. Wall-clock time is
//! never used to decide what the local map contains; that is derived from
//! log replay alone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of millisecond timestamps.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch (or a test-defined origin).
    fn now_ms(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at the given time.
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(now_ms)),
        }
    }

    /// Move the clock forward.
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::AcqRel);
    }

    /// Set the clock to an absolute value.
    pub fn set_ms(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Acquire)
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// The default clock for production wiring.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
