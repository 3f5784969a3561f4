//! Runs one worker per master on its own thread.

use std::any::Any;
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use regbench_transport::{ConnectionPool, ConnectionSource, Connector, PersistentConnection};
use tracing::{error, info};

use crate::config::{HarnessConfig, MasterConfig};
use crate::report::{ReportSink, RunReport};
use crate::worker::{StopSignal, Worker};

/// Builds the connection source a master leases from
pub type SourceFactory =
    Arc<dyn Fn(&MasterConfig) -> Arc<dyn ConnectionSource> + Send + Sync>;

/// Multi-master load run.
///
/// Every master gets its own thread, connection source and statistics; a
/// master that fails or panics ends up as a failed report and does not
/// disturb its siblings.
pub struct Coordinator {
    config: HarnessConfig,
    factory: SourceFactory,
    sink: Option<Arc<dyn ReportSink>>,
    stop: StopSignal,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("masters", &self.config.masters.len())
            .field("stopped", &self.stop.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Coordinator giving each master its own source on `connector`: a
    /// blocking pool, or a persistent connection when `pool.persistent` is set
    #[must_use]
    pub fn new(config: HarnessConfig, connector: Arc<dyn Connector>) -> Self {
        let factory: SourceFactory = if config.pool.persistent {
            let persistent_config = config.persistent_config();
            Arc::new(move |_master: &MasterConfig| {
                Arc::new(PersistentConnection::new(
                    Arc::clone(&connector),
                    persistent_config.clone(),
                )) as Arc<dyn ConnectionSource>
            })
        } else {
            let pool_config = config.pool_config();
            Arc::new(move |_master: &MasterConfig| {
                Arc::new(ConnectionPool::new(
                    Arc::clone(&connector),
                    pool_config.clone(),
                )) as Arc<dyn ConnectionSource>
            })
        };
        Self::with_source_factory(config, factory)
    }

    /// Coordinator with a custom source per master
    #[must_use]
    pub fn with_source_factory(config: HarnessConfig, factory: SourceFactory) -> Self {
        Self {
            config,
            factory,
            sink: None,
            stop: StopSignal::new(),
        }
    }

    /// Publish every finished report to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Handle that stops every worker at its next cycle boundary
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run every master to completion and collect their reports in table
    /// order
    pub fn run(&self) -> Vec<RunReport> {
        info!(masters = self.config.masters.len(), "Starting load run");

        let mut handles = Vec::with_capacity(self.config.masters.len());
        for master in &self.config.masters {
            let started_at = Utc::now();
            let harness = self.config.clone();
            let profile = master.clone();
            let factory = Arc::clone(&self.factory);
            let stop = self.stop.clone();

            let spawned = thread::Builder::new()
                .name(master.label.clone())
                .spawn(move || {
                    let source = factory(&profile);
                    Worker::for_master(&harness, &profile, source, stop).run()
                });
            match spawned {
                Ok(handle) => handles.push((master.label.clone(), started_at, Some(handle))),
                Err(e) => {
                    error!(worker = %master.label, "Failed to spawn worker thread: {}", e);
                    handles.push((master.label.clone(), started_at, None));
                }
            }
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (label, started_at, handle) in handles {
            let report = match handle.map(thread::JoinHandle::join) {
                Some(Ok(report)) => report,
                Some(Err(payload)) => {
                    let message = panic_message(&*payload);
                    error!(worker = %label, "Worker panicked: {}", message);
                    RunReport::failed(label, started_at, format!("worker panicked: {message}"))
                }
                None => RunReport::failed(label, started_at, "worker thread could not be spawned"),
            };
            if let Some(sink) = &self.sink {
                sink.publish(&report);
            }
            reports.push(report);
        }

        info!(
            completed = reports.iter().filter(|r| r.completed()).count(),
            total = reports.len(),
            "Load run finished"
        );
        reports
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
