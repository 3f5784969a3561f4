//! # Regbench CLI
//!
//! Command-line front end for the regbench load harness.
//!
//! ## Features
//!
//! - Multi-master runs with per-master fault injection
//! - Single-master precision runs at an arbitrary cycle period
//! - Cooperative long-connection runs with concurrent batches
//! - Layered configuration (file, `REGBENCH__*` environment, flags)
//! - Human-readable or JSON logs, JSON-lines and text reports
//!
//! ## Usage
//!
//! ```bash
//! # Four reference masters for ten minutes
//! regbench multi-master --duration 600
//!
//! # 50 ms pacing, 10 000 cycles, JSON logs
//! regbench --json-logs precision --cycle-ms 50 --cycles 10000
//!
//! # Long-connection client against a flaky simulated controller
//! regbench long-connection --duration 60 --sim-latency-ms 2 --sim-fail-every 500
//!
//! # Effective configuration after all layers
//! regbench --config regbench.toml show-config
//! ```

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use regbench_core::{
    AsyncClientConfig, AsyncLongConnectionClient, Coordinator, HarnessConfig, JsonLinesSink,
    LoggingConfig, MasterConfig, ReportSettings, ReportSink, RunReport, StopSignal,
    TextFileSink, TracingSink,
};
use regbench_transport::{
    AsyncConnectionPool, SimulatedController, SimulatedFailure, SimulatorConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Main CLI application structure
#[derive(Parser, Debug)]
#[command(
    name = "regbench",
    version,
    about = "Load, precision and fault-injection testing for register-protocol controllers."
)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, global = true, env = "REGBENCH_CONFIG")]
    pub config: Option<PathBuf>,
    /// Log filter, e.g. `debug` or `regbench_core=trace`; `RUST_LOG` wins
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    /// Emit JSON logs
    #[arg(long, global = true)]
    pub json_logs: bool,
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every configured master in parallel
    #[command(name = "multi-master")]
    MultiMaster(RunArgs),
    /// Run a single master at a fixed cycle period
    Precision {
        #[command(flatten)]
        run: RunArgs,
        /// Cycle period in milliseconds
        #[arg(long, default_value_t = 1.0)]
        cycle_ms: f64,
    },
    /// Run the cooperative long-connection client
    #[command(name = "long-connection")]
    LongConnection {
        #[command(flatten)]
        run: RunArgs,
        /// Operations issued together per cycle
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Print the effective configuration as JSON
    #[command(name = "show-config")]
    ShowConfig,
}

/// Run limits shared by the load commands
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct RunArgs {
    /// Run length in seconds
    #[arg(long)]
    pub duration: Option<f64>,
    /// Cycle budget; without `--duration` the run ends on cycles alone
    #[arg(long)]
    pub cycles: Option<u64>,
    /// Seed for workload and fault draws
    #[arg(long)]
    pub seed: Option<u64>,
    /// Lease from one persistent connection per master instead of a pool
    #[arg(long)]
    pub persistent: bool,
    #[command(flatten)]
    pub simulator: SimulatorArgs,
}

/// Simulated controller knobs
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct SimulatorArgs {
    /// Service time per request in milliseconds
    #[arg(long = "sim-latency-ms", default_value_t = 0.0)]
    pub latency_ms: f64,
    /// Fail every n-th request
    #[arg(long = "sim-fail-every")]
    pub fail_every: Option<u64>,
    /// Injected failures drop the link instead of returning an exception
    #[arg(long = "sim-link-drops")]
    pub link_drops: bool,
}

impl RunArgs {
    /// Apply the flags on top of the loaded configuration
    pub fn apply(&self, config: &mut HarnessConfig) {
        if let Some(duration) = self.duration {
            config.run.duration_secs = duration;
        }
        if let Some(cycles) = self.cycles {
            config.run.max_cycles = Some(cycles);
            if self.duration.is_none() {
                config.run.duration_secs = 0.0;
            }
        }
        if self.seed.is_some() {
            config.run.seed = self.seed;
        }
        if self.persistent {
            config.pool.persistent = true;
        }
    }
}

impl SimulatorArgs {
    /// Controller with register banks covering the configured ranges
    #[must_use]
    pub fn controller(&self, config: &HarnessConfig) -> SimulatedController {
        SimulatedController::new(SimulatorConfig {
            input_registers: usize::from(config.registers.input_range.end) + 1,
            holding_registers: usize::from(config.registers.holding_range.end) + 1,
            latency: Duration::try_from_secs_f64(self.latency_ms / 1000.0).unwrap_or_default(),
            fail_every: self.fail_every,
            failure: if self.link_drops {
                SimulatedFailure::LinkDrop
            } else {
                SimulatedFailure::Exception
            },
        })
    }
}

/// Run the CLI application
pub fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = HarnessConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let (run, reports) = match cli.command {
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        Commands::MultiMaster(run) => {
            run.apply(&mut config);
            prepare(cli.log_level.as_deref(), cli.json_logs, &config)?;
            let reports = run_masters(config, &run.simulator);
            (run, reports)
        }
        Commands::Precision { run, cycle_ms } => {
            run.apply(&mut config);
            config.masters = vec![MasterConfig {
                description: format!("{cycle_ms} ms precision run"),
                cycle_time_ms: Some(cycle_ms),
                ..MasterConfig::steady("precision")
            }];
            prepare(cli.log_level.as_deref(), cli.json_logs, &config)?;
            let reports = run_masters(config, &run.simulator);
            (run, reports)
        }
        Commands::LongConnection { run, concurrency } => {
            run.apply(&mut config);
            if let Some(concurrency) = concurrency {
                config.async_client.concurrency = concurrency;
            }
            prepare(cli.log_level.as_deref(), cli.json_logs, &config)?;
            let report = run_long_connection(&config, &run.simulator)?;
            (run, vec![report])
        }
    };

    print!("{}", summary_table(&reports));
    let failed = reports.iter().filter(|r| !r.completed()).count();
    if failed > 0 {
        bail!("{failed} of {} workers stopped early (seed {:?})", reports.len(), run.seed);
    }
    Ok(())
}

/// Validate the final configuration and install logging
fn prepare(log_level: Option<&str>, json_logs: bool, config: &HarnessConfig) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;
    init_tracing(&config.logging, log_level, json_logs)
}

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `level_override`, which takes precedence over the configured level.
pub fn init_tracing(
    logging: &LoggingConfig,
    level_override: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let level = level_override.unwrap_or(&logging.level);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log filter '{level}'"))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true);
    let installed = if json || logging.structured {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

/// Report sinks for the configured outputs; the log always gets one
#[must_use]
pub fn build_sinks(settings: &ReportSettings) -> Vec<Box<dyn ReportSink>> {
    let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(TracingSink)];
    if let Some(path) = &settings.json_lines {
        sinks.push(Box::new(JsonLinesSink::new(path)));
    }
    if let Some(dir) = &settings.text_dir {
        sinks.push(Box::new(TextFileSink::new(dir)));
    }
    sinks
}

/// One line per report
#[must_use]
pub fn summary_table(reports: &[RunReport]) -> String {
    let mut out = format!(
        "{:<16} {:>10} {:>9} {:>10} {:>10} {:>10}  {}\n",
        "worker", "requests", "success", "qps", "p99 ms", "jitter ms", "status"
    );
    for report in reports {
        let status = report.fatal_error.as_deref().unwrap_or("ok");
        let _ = writeln!(
            out,
            "{:<16} {:>10} {:>8.2}% {:>10.2} {:>10.3} {:>10.4}  {}",
            report.label,
            report.stats.total_operations,
            report.success_rate,
            report.qps,
            report.stats.latency.p99_ms,
            report.stats.cycles.jitter_ms,
            status
        );
    }
    out
}

fn run_masters(config: HarnessConfig, simulator: &SimulatorArgs) -> Vec<RunReport> {
    let controller = simulator.controller(&config);
    let sinks = build_sinks(&config.reports);
    let coordinator = Coordinator::new(config, Arc::new(controller)).with_sink(Arc::new(sinks));
    stop_on_interrupt(coordinator.stop_signal());
    coordinator.run()
}

fn run_long_connection(
    config: &HarnessConfig,
    simulator: &SimulatorArgs,
) -> anyhow::Result<RunReport> {
    let controller = simulator.controller(config);
    let pool = AsyncConnectionPool::new(Arc::new(controller), config.async_pool_config());
    let client = AsyncLongConnectionClient::new(
        AsyncClientConfig::from_harness(config),
        Arc::new(pool),
    );
    let stop = StopSignal::new();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    let report = runtime.block_on(async {
        let interrupt = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping after the current cycle");
                interrupt.stop();
            }
        });
        client.run(stop).await
    });

    build_sinks(&config.reports).publish(&report);
    Ok(report)
}

/// Stop `signal` on Ctrl-C from a dedicated thread
fn stop_on_interrupt(signal: StopSignal) {
    let spawned = thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Interrupt handler unavailable: {}", e);
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping after the current cycle");
                    signal.stop();
                }
            });
        });
    if let Err(e) = spawned {
        warn!("Interrupt handler unavailable: {}", e);
    }
}
