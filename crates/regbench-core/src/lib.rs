//! # Regbench Core
//!
//! Load generation for register-protocol controllers: several simulated
//! masters hammer one endpoint with random register reads and writes at a
//! precisely paced cycle while connections are torn down on purpose, and
//! every run ends in a latency and jitter report.
//!
//! ## Building Blocks
//!
//! - **Cycle Scheduler**: coarse sleep followed by a bounded busy-wait, with
//!   a cooperative variant for async tasks
//! - **Worker**: one master's cycle loop with fault injection and connection
//!   replacement
//! - **Coordinator**: one thread per master, failures isolated per report
//! - **Long-Connection Client**: concurrent batches on one shared session
//! - **Statistics**: append-only event log finalized into percentiles,
//!   jitter and per-kind breakdowns
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use regbench_core::{Coordinator, HarnessConfig, TracingSink};
//! use regbench_transport::{SimulatedController, SimulatorConfig};
//!
//! let config = HarnessConfig::load(None)?;
//! let controller = SimulatedController::new(SimulatorConfig::default());
//! let reports = Coordinator::new(config, Arc::new(controller))
//!     .with_sink(Arc::new(TracingSink))
//!     .run();
//! assert!(reports.iter().all(|r| r.completed()));
//! # Ok::<(), regbench_core::ConfigError>(())
//! ```
//!
//! ## Module Organization
//!
//! ```text
//! regbench-core/
//! ├── config/         # Layered harness configuration
//! ├── error/          # Error taxonomy
//! ├── clock/          # Monotonic nanosecond clock
//! ├── scheduler/      # Cycle pacing
//! ├── workload/       # Random register operations
//! ├── fault/          # Forced disconnects
//! ├── stats/          # Statistics engine
//! ├── worker/         # Per-master cycle loop
//! ├── coordinator/    # Multi-master runs
//! ├── async_client/   # Cooperative long-connection client
//! └── report/         # Run reports and sinks
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,  // statistics on u64 counters
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::must_use_candidate
)]

pub mod async_client;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fault;
pub mod report;
pub mod scheduler;
pub mod stats;
pub mod worker;
pub mod workload;

// Re-export configuration and errors
pub use config::{
    AsyncClientSettings, DelayRange, EndpointConfig, HarnessConfig, LoggingConfig, MasterConfig,
    PoolSettings, RegisterSettings, ReportSettings, RunSettings, TimingSettings,
};
pub use error::{ConfigError, HarnessError, HarnessResult, SchedulerError};

// Re-export the run machinery
pub use async_client::{AsyncClientConfig, AsyncLongConnectionClient};
pub use coordinator::{Coordinator, SourceFactory};
pub use fault::FaultInjector;
pub use scheduler::{CycleOutcome, CycleScheduler, SchedulerConfig};
pub use worker::{StopSignal, Worker, WorkerConfig};
pub use workload::{Operation, OperationGenerator, OperationKind, RegisterRange, WorkloadConfig};

// Re-export statistics and reporting
pub use clock::{InstantClock, MonotonicClock};
pub use report::{JsonLinesSink, ReportSink, RunReport, TextFileSink, TracingSink};
pub use stats::{CycleSummary, KindSummary, LatencySummary, StatsAggregate, StatsRecorder};
