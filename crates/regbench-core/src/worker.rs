//! One simulated master driving load through a connection source.
//!
//! Per cycle the worker may inject a disconnect, leases a connection, runs
//! one random operation, hands the connection back (or replaces it after a
//! failure) and lets the scheduler pace the loop. Stop requests and run
//! limits are checked between cycles only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use regbench_transport::ConnectionSource;
use tracing::{debug, error, info, warn};

use crate::clock::duration_ms;
use crate::config::{HarnessConfig, MasterConfig, millis, secs};
use crate::error::HarnessError;
use crate::fault::FaultInjector;
use crate::report::RunReport;
use crate::scheduler::{CycleScheduler, SchedulerConfig};
use crate::stats::{DEFAULT_JITTER_WINDOW, StatsRecorder};
use crate::workload::{OperationGenerator, WorkloadConfig};

/// Cooperative stop flag shared between a controller and its workers
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    /// A signal that has not fired
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder to stop at its next cycle boundary
    pub fn stop(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock() = true;
        condvar.notify_all();
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep up to `timeout`, waking early on a stop request. Returns whether
    /// a stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let deadline = Instant::now().checked_add(timeout);
        let mut stopped = flag.lock();
        while !*stopped {
            match deadline {
                Some(deadline) => {
                    if condvar.wait_until(&mut stopped, deadline).timed_out() {
                        break;
                    }
                }
                None => condvar.wait(&mut stopped),
            }
        }
        *stopped
    }
}

/// Derive an independent seed for one component of one worker
#[must_use]
pub fn derive_seed(seed: u64, component: &str) -> u64 {
    // FNV-1a over the seed bytes and the component name
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in seed.to_le_bytes().iter().chain(component.as_bytes()) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Label used in logs and the report
    pub label: String,
    /// Cycle pacing
    pub scheduler: SchedulerConfig,
    /// Operation mix
    pub workload: WorkloadConfig,
    /// Wall-clock limit
    pub duration: Option<Duration>,
    /// Cycle limit
    pub max_cycles: Option<u64>,
    /// Pause before replacing a connection after a failed operation
    pub replace_delay: Duration,
    /// Acquire time that triggers a warning
    pub slow_acquire: Duration,
    /// Operation time that triggers a warning
    pub slow_operation: Duration,
    /// Interval of the status line
    pub status_interval: Duration,
    /// Trailing cycles used for jitter
    pub jitter_window: usize,
    /// Open pool connections before the first cycle
    pub warm_up_source: bool,
    /// Seed for workload and fault draws
    pub seed: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            label: "worker".to_string(),
            scheduler: SchedulerConfig::default(),
            workload: WorkloadConfig::default(),
            duration: None,
            max_cycles: None,
            replace_delay: Duration::from_secs(1),
            slow_acquire: Duration::from_millis(100),
            slow_operation: Duration::from_millis(50),
            status_interval: Duration::from_secs(1),
            jitter_window: DEFAULT_JITTER_WINDOW,
            warm_up_source: true,
            seed: None,
        }
    }
}

impl WorkerConfig {
    /// Configuration for one master of a harness run
    #[must_use]
    pub fn for_master(harness: &HarnessConfig, master: &MasterConfig) -> Self {
        let run = &harness.run;
        Self {
            label: master.label.clone(),
            scheduler: harness.scheduler_config(Some(master)),
            workload: harness.workload_config(),
            duration: (run.duration_secs > 0.0).then(|| secs(run.duration_secs)),
            max_cycles: run.max_cycles,
            replace_delay: secs(run.replace_delay_secs),
            slow_acquire: millis(run.slow_acquire_ms),
            slow_operation: millis(run.slow_operation_ms),
            status_interval: secs(run.status_interval_secs),
            jitter_window: harness.timing.jitter_window,
            warm_up_source: true,
            seed: run.seed.map(|seed| derive_seed(seed, &master.label)),
        }
    }
}

/// A single load-generating master
pub struct Worker {
    config: WorkerConfig,
    source: Arc<dyn ConnectionSource>,
    faults: FaultInjector,
    stop: StopSignal,
    generator: OperationGenerator,
    scheduler: CycleScheduler,
    stats: StatsRecorder,
    last_status: Instant,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("label", &self.config.label)
            .field("cycles", &self.scheduler.completed())
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Create a worker
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        source: Arc<dyn ConnectionSource>,
        faults: FaultInjector,
        stop: StopSignal,
    ) -> Self {
        let workload_seed = config.seed.map(|seed| derive_seed(seed, "workload"));
        Self {
            generator: OperationGenerator::new(config.workload.clone(), workload_seed),
            scheduler: CycleScheduler::new(config.scheduler.clone()),
            stats: StatsRecorder::new(config.jitter_window),
            last_status: Instant::now(),
            config,
            source,
            faults,
            stop,
        }
    }

    /// Worker for one master of a harness run
    #[must_use]
    pub fn for_master(
        harness: &HarnessConfig,
        master: &MasterConfig,
        source: Arc<dyn ConnectionSource>,
        stop: StopSignal,
    ) -> Self {
        let config = WorkerConfig::for_master(harness, master);
        let fault_seed = config.seed.map(|seed| derive_seed(seed, "faults"));
        Self::new(
            config,
            source,
            FaultInjector::for_master(master, fault_seed),
            stop,
        )
    }

    /// Run until a limit or stop request is hit, then close the source and
    /// report.
    ///
    /// Operation and connection failures are recorded and the run goes on;
    /// a scheduler timeout ends it and is noted in the report.
    pub fn run(mut self) -> RunReport {
        let started_at = Utc::now();
        let run_started = Instant::now();
        let label = self.config.label.clone();

        info!(
            worker = %label,
            target_ms = duration_ms(self.config.scheduler.target),
            disconnect_prob = self.faults.probability(),
            "Worker started"
        );
        if self.config.warm_up_source {
            let opened = self.source.warm_up();
            debug!(worker = %label, opened, "Connection source warmed up");
        }
        self.last_status = Instant::now();

        let mut fatal = None;
        while let Some(time_left) = self.time_left(run_started) {
            if let Some(delay) = self.faults.draw() {
                let closed = self.source.close_all();
                self.stats.record_injected_disconnect();
                warn!(
                    worker = %label,
                    closed,
                    delay_ms = delay.as_millis() as u64,
                    "Injected disconnect"
                );
                if !delay.is_zero() && self.stop.wait_timeout(delay.min(time_left)) {
                    break;
                }
                if self.time_left(run_started).is_none() {
                    break;
                }
            }

            let start = self.scheduler.begin();
            self.run_cycle();
            match self.scheduler.finish(start) {
                Ok(outcome) => {
                    if !outcome.warmup {
                        self.stats.record_cycle(outcome.duration);
                    }
                    self.report_status(outcome.duration);
                }
                Err(e) => {
                    let e = HarnessError::from(e);
                    error!(worker = %label, "Cycle control failed: {}", e);
                    fatal = Some(e);
                    break;
                }
            }
        }

        let closed = self.source.close_all();
        let elapsed = run_started.elapsed().as_secs_f64();
        let mut report = RunReport::new(
            label.clone(),
            started_at,
            elapsed,
            self.scheduler.completed(),
            self.stats.finalize(),
        );
        report.fatal_error = fatal.map(|e| e.to_string());
        info!(
            worker = %label,
            cycles = report.cycles_run,
            total = report.stats.total_operations,
            success_rate = report.success_rate,
            closed,
            "Worker finished"
        );
        report
    }

    /// Remaining budget, or `None` once the run must end
    fn time_left(&self, run_started: Instant) -> Option<Duration> {
        if self.stop.is_stopped() {
            return None;
        }
        if let Some(max) = self.config.max_cycles
            && self.scheduler.completed() >= max
        {
            return None;
        }
        match self.config.duration {
            Some(limit) => {
                let left = limit.saturating_sub(run_started.elapsed());
                (!left.is_zero()).then_some(left)
            }
            None => Some(Duration::MAX),
        }
    }

    fn run_cycle(&mut self) {
        let label = &self.config.label;

        let acquire_started = Instant::now();
        let mut conn = match self.source.acquire() {
            Ok(conn) => conn,
            Err(e) => {
                self.stats.record_connection_failure();
                warn!(worker = %label, "{}", HarnessError::from(e));
                return;
            }
        };
        let acquire_time = acquire_started.elapsed();
        if acquire_time > self.config.slow_acquire {
            warn!(worker = %label, acquire_ms = duration_ms(acquire_time), "Slow connection acquire");
        }

        let op = self.generator.next_operation();
        let op_started = Instant::now();
        let result = op.execute(&mut conn);
        let latency = op_started.elapsed();
        self.stats.record_operation(op.kind(), latency, result.is_ok());

        match result {
            Ok(()) => {
                if latency > self.config.slow_operation {
                    warn!(worker = %label, kind = %op.kind(), op_ms = duration_ms(latency), "Slow operation");
                }
                self.source.release(conn);
            }
            Err(e) => {
                warn!(
                    worker = %label,
                    conn = %conn.id(),
                    kind = %op.kind(),
                    address = op.address(),
                    count = op.count(),
                    "{}, replacing connection",
                    HarnessError::from(e)
                );
                self.source.discard(conn);
                if !self.config.replace_delay.is_zero() {
                    self.stop.wait_timeout(self.config.replace_delay);
                }
                if let Err(e) = self.source.replenish() {
                    warn!(worker = %label, "Replacement connection failed: {}", HarnessError::from(e));
                }
            }
        }
    }

    fn report_status(&mut self, last_cycle: Duration) {
        if self.last_status.elapsed() < self.config.status_interval {
            return;
        }
        self.last_status = Instant::now();
        info!(
            worker = %self.config.label,
            cycle_ms = format_args!("{:.3}", duration_ms(last_cycle)),
            mean_ms = format_args!("{:.3}", self.stats.recent_cycle_mean_ms()),
            success_rate = format_args!("{:.1}", self.stats.success_rate()),
            "status"
        );
        self.source.heartbeat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_wakes_waiter() {
        let stop = StopSignal::new();
        let waiter = stop.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        stop.stop();
        assert!(handle.join().unwrap());
        assert!(stop.is_stopped());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let stop = StopSignal::new();
        let started = Instant::now();
        assert!(!stop.wait_timeout(Duration::from_millis(10)));
        assert!(started.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_derive_seed_separates_components() {
        assert_eq!(derive_seed(42, "workload"), derive_seed(42, "workload"));
        assert_ne!(derive_seed(42, "workload"), derive_seed(42, "faults"));
        assert_ne!(derive_seed(1, "workload"), derive_seed(2, "workload"));
    }

    #[test]
    fn test_worker_config_for_master() {
        let harness = HarnessConfig::default();
        let config = WorkerConfig::for_master(&harness, &harness.masters[2]);
        assert_eq!(config.label, "master-3");
        assert_eq!(config.scheduler.target, Duration::from_millis(50));
        assert_eq!(config.duration, Some(Duration::from_secs(43_200)));
        assert_eq!(config.replace_delay, Duration::from_secs(1));
    }
}
