//! Monotonic time source.
//!
//! One clock is chosen on first use and shared for the rest of the process.
//! All readings are nanoseconds since that first use.

use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Monotonic nanosecond clock
pub trait MonotonicClock: Send + Sync + fmt::Debug {
    /// Nanoseconds since the clock's origin
    fn now_ns(&self) -> u64;

    /// Time elapsed since an earlier reading
    fn since(&self, earlier_ns: u64) -> Duration {
        Duration::from_nanos(self.now_ns().saturating_sub(earlier_ns))
    }
}

/// Clock backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct InstantClock {
    origin: Instant,
}

impl InstantClock {
    /// Clock whose origin is now
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for InstantClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for InstantClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

static SYSTEM: OnceLock<InstantClock> = OnceLock::new();

/// The process-wide clock
#[inline]
pub fn system() -> &'static InstantClock {
    SYSTEM.get_or_init(InstantClock::new)
}

/// Duration to fractional milliseconds
#[inline]
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}
