//! Cooperative long-connection client.
//!
//! A single task shares one session from the [`AsyncConnectionPool`] and
//! issues several operations per cycle concurrently on it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use regbench_transport::{AsyncConnectionPool, AsyncTransport, TransportResult};
use tracing::{debug, error, info, warn};

use crate::clock::duration_ms;
use crate::config::{HarnessConfig, secs};
use crate::error::HarnessError;
use crate::report::RunReport;
use crate::scheduler::{CycleScheduler, SchedulerConfig};
use crate::stats::{DEFAULT_JITTER_WINDOW, StatsRecorder};
use crate::worker::{StopSignal, derive_seed};
use crate::workload::{OperationGenerator, OperationKind, WorkloadConfig};

/// Client configuration
#[derive(Debug, Clone)]
pub struct AsyncClientConfig {
    /// Label used in logs and the report
    pub label: String,
    /// Cycle pacing
    pub scheduler: SchedulerConfig,
    /// Operation mix
    pub workload: WorkloadConfig,
    /// Operations issued together per cycle
    pub concurrency: usize,
    /// Wall-clock limit
    pub duration: Option<Duration>,
    /// Cycle limit
    pub max_cycles: Option<u64>,
    /// Trailing cycles used for jitter
    pub jitter_window: usize,
    /// Interval of the status line
    pub status_interval: Duration,
    /// Seed for workload draws
    pub seed: Option<u64>,
}

impl Default for AsyncClientConfig {
    fn default() -> Self {
        Self {
            label: "long-connection".to_string(),
            scheduler: SchedulerConfig::default(),
            workload: WorkloadConfig {
                max_per_read: 10,
                max_per_write: 10,
                ..WorkloadConfig::default()
            },
            concurrency: 3,
            duration: None,
            max_cycles: None,
            jitter_window: DEFAULT_JITTER_WINDOW,
            status_interval: Duration::from_secs(1),
            seed: None,
        }
    }
}

impl AsyncClientConfig {
    /// Client settings derived from the harness configuration
    #[must_use]
    pub fn from_harness(harness: &HarnessConfig) -> Self {
        let run = &harness.run;
        Self {
            label: "long-connection".to_string(),
            scheduler: harness.scheduler_config(None),
            workload: harness.async_workload_config(),
            concurrency: harness.async_client.concurrency,
            duration: (run.duration_secs > 0.0).then(|| secs(run.duration_secs)),
            max_cycles: run.max_cycles,
            jitter_window: harness.timing.jitter_window,
            status_interval: secs(run.status_interval_secs),
            seed: run.seed.map(|seed| derive_seed(seed, "long-connection")),
        }
    }
}

/// Long-connection load client driven by a cooperative scheduler
#[derive(Debug)]
pub struct AsyncLongConnectionClient {
    config: AsyncClientConfig,
    pool: Arc<AsyncConnectionPool>,
    generator: OperationGenerator,
    scheduler: CycleScheduler,
    stats: StatsRecorder,
}

impl AsyncLongConnectionClient {
    /// Create a client on `pool`
    #[must_use]
    pub fn new(config: AsyncClientConfig, pool: Arc<AsyncConnectionPool>) -> Self {
        Self {
            generator: OperationGenerator::new(config.workload.clone(), config.seed),
            scheduler: CycleScheduler::new(config.scheduler.clone()),
            stats: StatsRecorder::new(config.jitter_window),
            config,
            pool,
        }
    }

    /// Run until a limit or stop request is hit, then close the pool and
    /// report
    pub async fn run(mut self, stop: StopSignal) -> RunReport {
        let started_at = Utc::now();
        let run_started = Instant::now();
        let label = self.config.label.clone();

        let opened = self.pool.initialize().await;
        info!(
            worker = %label,
            opened,
            concurrency = self.config.concurrency,
            "Long-connection client started"
        );

        let mut session: Option<Arc<dyn AsyncTransport>> = None;
        let mut last_status = Instant::now();
        let mut fatal = None;

        while self.within_limits(&stop, run_started) {
            let start = self.scheduler.begin();

            if session.is_none() {
                match self.pool.get_connection().await {
                    Ok(conn) => session = Some(conn),
                    Err(e) => {
                        self.stats.record_connection_failure();
                        warn!(worker = %label, "{}", HarnessError::from(e));
                    }
                }
            }
            let batch_ok = match &session {
                Some(conn) => self.run_batch(conn).await,
                None => true,
            };
            if !batch_ok {
                debug!(worker = %label, "Batch failed, obtaining a fresh session");
                session = None;
            }

            match self.scheduler.finish_async(start).await {
                Ok(outcome) => {
                    if !outcome.warmup {
                        self.stats.record_cycle(outcome.duration);
                    }
                    if last_status.elapsed() >= self.config.status_interval {
                        last_status = Instant::now();
                        info!(
                            worker = %label,
                            cycle_ms = format_args!("{:.3}", duration_ms(outcome.duration)),
                            mean_ms = format_args!("{:.3}", self.stats.recent_cycle_mean_ms()),
                            success_rate = format_args!("{:.1}", self.stats.success_rate()),
                            "status"
                        );
                    }
                }
                Err(e) => {
                    let e = HarnessError::from(e);
                    error!(worker = %label, "Cycle control failed: {}", e);
                    fatal = Some(e);
                    break;
                }
            }
        }

        drop(session);
        let closed = self.pool.close_all().await;
        let mut report = RunReport::new(
            label.clone(),
            started_at,
            run_started.elapsed().as_secs_f64(),
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
            "Long-connection client finished"
        );
        report
    }

    fn within_limits(&self, stop: &StopSignal, run_started: Instant) -> bool {
        if stop.is_stopped() {
            return false;
        }
        if self
            .config
            .max_cycles
            .is_some_and(|max| self.scheduler.completed() >= max)
        {
            return false;
        }
        self.config
            .duration
            .is_none_or(|limit| run_started.elapsed() < limit)
    }

    /// Issue one batch concurrently on `conn`. Returns whether every
    /// operation succeeded.
    async fn run_batch(&mut self, conn: &Arc<dyn AsyncTransport>) -> bool {
        let ops: Vec<_> = (0..self.config.concurrency.max(1))
            .map(|_| self.generator.next_operation())
            .collect();

        let outcomes: Vec<(OperationKind, Duration, TransportResult<()>)> =
            join_all(ops.iter().map(|op| async move {
                let started = Instant::now();
                let result = op.execute_async(conn.as_ref()).await;
                (op.kind(), started.elapsed(), result)
            }))
            .await;

        let mut all_ok = true;
        for (kind, latency, result) in outcomes {
            self.stats.record_operation(kind, latency, result.is_ok());
            if let Err(e) = result {
                all_ok = false;
                warn!(worker = %self.config.label, %kind, "{}", HarnessError::from(e));
            }
        }
        all_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regbench_transport::{AsyncPoolConfig, SimulatedController, SimulatorConfig};

    #[test]
    fn test_config_from_harness() {
        let mut harness = HarnessConfig::default();
        harness.async_client.max_registers = 8;
        harness.run.seed = Some(3);

        let config = AsyncClientConfig::from_harness(&harness);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.workload.max_per_read, 8);
        assert_eq!(config.workload.max_per_write, 8);
        assert_eq!(config.scheduler.target, Duration::from_millis(1));
        assert_eq!(config.seed, Some(derive_seed(3, "long-connection")));
    }

    #[test]
    fn test_single_cycle_run() {
        let controller = SimulatedController::new(SimulatorConfig::default());
        let pool = AsyncConnectionPool::new(Arc::new(controller.clone()), AsyncPoolConfig::default());
        let config = AsyncClientConfig {
            max_cycles: Some(1),
            ..AsyncClientConfig::default()
        };

        let client = AsyncLongConnectionClient::new(config, Arc::new(pool));
        let report = tokio_test::block_on(client.run(StopSignal::new()));
        assert_eq!(report.cycles_run, 1);
        assert_eq!(report.stats.total_operations, 3);
        // The only cycle is a warm-up cycle
        assert_eq!(report.stats.cycles.count, 0);
        assert_eq!(controller.open_sessions(), 0);
    }
}
