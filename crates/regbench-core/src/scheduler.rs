//! Cycle pacing with a hybrid sleep-then-spin wait.
//!
//! After the work of a cycle the scheduler sleeps for a fraction of the
//! remaining time while more than `sleep_threshold` is left, then busy-waits
//! to the deadline. An overrun cycle returns at once.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::clock::{self, MonotonicClock};
use crate::error::SchedulerError;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Cycle period
    pub target: Duration,
    /// Remaining time above which the scheduler sleeps before spinning
    pub sleep_threshold: Duration,
    /// Share of the remaining time slept per step
    pub sleep_fraction: f64,
    /// Busy-wait guard
    pub spin_timeout: Duration,
    /// Leading cycles flagged as warm-up
    pub warmup_cycles: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target: Duration::from_millis(1),
            sleep_threshold: Duration::from_millis(2),
            sleep_fraction: 0.5,
            spin_timeout: Duration::from_secs(5),
            warmup_cycles: 10,
        }
    }
}

impl SchedulerConfig {
    /// Default pacing with a different period
    #[must_use]
    pub fn with_target(target: Duration) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }
}

/// Start mark of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStart {
    started_ns: u64,
}

/// A completed cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleOutcome {
    /// Zero-based cycle index
    pub index: u64,
    /// Start to end of the wait
    pub duration: Duration,
    /// Whether the cycle falls into the warm-up window
    pub warmup: bool,
    /// Whether the work alone exceeded the period
    pub overran: bool,
}

enum Step {
    Done { overran: bool },
    Sleep(Duration),
    Spin,
}

/// Paces a loop to a fixed period
#[derive(Debug)]
pub struct CycleScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn MonotonicClock>,
    completed: u64,
}

impl CycleScheduler {
    /// Scheduler on the process-wide clock
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(*clock::system()))
    }

    /// Scheduler on an explicit clock
    #[must_use]
    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn MonotonicClock>) -> Self {
        Self {
            config,
            clock,
            completed: 0,
        }
    }

    /// Scheduler configuration
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Cycles finished so far, warm-up included
    #[must_use]
    pub const fn completed(&self) -> u64 {
        self.completed
    }

    /// Mark the start of a cycle
    #[must_use]
    pub fn begin(&self) -> CycleStart {
        CycleStart {
            started_ns: self.clock.now_ns(),
        }
    }

    /// Wait out the rest of the cycle, blocking the thread
    pub fn finish(&mut self, start: CycleStart) -> Result<CycleOutcome, SchedulerError> {
        let mut first = true;
        let overran = loop {
            match self.next_step(start, first) {
                Step::Done { overran } => break overran,
                Step::Sleep(chunk) => std::thread::sleep(chunk),
                Step::Spin => {
                    self.spin_until(start)?;
                    break false;
                }
            }
            first = false;
        };
        Ok(self.complete(start, overran))
    }

    /// Wait out the rest of the cycle, yielding to the runtime while sleeping
    pub async fn finish_async(&mut self, start: CycleStart) -> Result<CycleOutcome, SchedulerError> {
        let mut first = true;
        let overran = loop {
            match self.next_step(start, first) {
                Step::Done { overran } => break overran,
                Step::Sleep(chunk) => tokio::time::sleep(chunk).await,
                Step::Spin => {
                    self.spin_until(start)?;
                    break false;
                }
            }
            first = false;
        };
        Ok(self.complete(start, overran))
    }

    fn remaining(&self, start: CycleStart) -> Duration {
        self.config.target.saturating_sub(self.clock.since(start.started_ns))
    }

    fn next_step(&self, start: CycleStart, first: bool) -> Step {
        let remaining = self.remaining(start);
        if remaining.is_zero() {
            return Step::Done { overran: first };
        }
        if remaining > self.config.sleep_threshold {
            return Step::Sleep(remaining.mul_f64(self.config.sleep_fraction));
        }
        Step::Spin
    }

    fn spin_until(&self, start: CycleStart) -> Result<(), SchedulerError> {
        let deadline = start.started_ns + self.config.target.as_nanos() as u64;
        let spin_started = self.clock.now_ns();
        let guard = self.config.spin_timeout.as_nanos() as u64;

        loop {
            let now = self.clock.now_ns();
            if now >= deadline {
                return Ok(());
            }
            if now.saturating_sub(spin_started) >= guard {
                return Err(SchedulerError::SpinTimeout(self.config.spin_timeout));
            }
            std::hint::spin_loop();
        }
    }

    fn complete(&mut self, start: CycleStart, overran: bool) -> CycleOutcome {
        let index = self.completed;
        self.completed += 1;
        let outcome = CycleOutcome {
            index,
            duration: self.clock.since(start.started_ns),
            warmup: index < self.config.warmup_cycles,
            overran,
        };
        trace!(index, duration_us = outcome.duration.as_micros() as u64, overran, "cycle complete");
        outcome
    }
}
