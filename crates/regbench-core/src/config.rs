//! Harness configuration.
//!
//! Values are layered: built-in defaults, then an optional file (TOML, YAML
//! or JSON by extension), then `REGBENCH__*` environment variables with `__`
//! separating nested keys, e.g. `REGBENCH__POOL__SIZE=5`.
//!
//! Durations are plain numbers with the unit in the key name so that every
//! layer can express them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regbench_transport::config::PROTOCOL_MAX_REGISTERS;
use regbench_transport::{
    AsyncPoolConfig, HealthCheckConfig, PersistentConfig, PoolConfig, RetryConfig,
    TransportConfig,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scheduler::SchedulerConfig;
use crate::workload::{RegisterRange, WorkloadConfig};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "REGBENCH";

/// Convert fractional seconds to a duration, treating invalid input as zero
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

/// Convert fractional milliseconds to a duration
pub(crate) fn millis(value: f64) -> Duration {
    secs(value / 1000.0)
}

/// Complete harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Controller endpoint
    pub endpoint: EndpointConfig,
    /// Connection pool
    pub pool: PoolSettings,
    /// Register ranges and per-request limits
    pub registers: RegisterSettings,
    /// Cycle pacing
    pub timing: TimingSettings,
    /// Run limits and worker behaviour
    pub run: RunSettings,
    /// Cooperative long-connection client
    pub async_client: AsyncClientSettings,
    /// One entry per simulated master
    pub masters: Vec<MasterConfig>,
    /// Logging
    pub logging: LoggingConfig,
    /// Report outputs
    pub reports: ReportSettings,
}

/// Controller endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Connect timeout in seconds
    pub connect_timeout_secs: f64,
    /// Response timeout in seconds
    pub response_timeout_secs: f64,
    /// Disable Nagle's algorithm
    pub no_delay: bool,
}

/// Connection pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Idle connections kept per worker
    pub size: usize,
    /// Connect attempts before giving up
    pub connect_retries: u32,
    /// Pause between connect attempts in seconds
    pub retry_delay_secs: f64,
    /// Require a test read on every new session
    pub probe_on_connect: bool,
    /// Failed probes in a row before a connection is declared dead
    pub health_failure_threshold: u32,
    /// Persistent link heartbeat interval in seconds
    pub heartbeat_interval_secs: f64,
    /// Lease from one persistent connection per master instead of a pool
    pub persistent: bool,
}

/// Register ranges and request limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterSettings {
    /// Addressable input registers
    pub input_range: RegisterRange,
    /// Addressable holding registers
    pub holding_range: RegisterRange,
    /// Registers per read
    pub max_per_read: u16,
    /// Registers per write
    pub max_per_write: u16,
}

/// Cycle pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Default cycle period in milliseconds
    pub target_cycle_ms: f64,
    /// Leading cycles excluded from statistics
    pub warmup_cycles: u64,
    /// Trailing cycles used for jitter
    pub jitter_window: usize,
    /// Busy-wait guard in seconds
    pub spin_timeout_secs: f64,
    /// Remaining time above which the scheduler sleeps before spinning
    pub sleep_threshold_ms: f64,
    /// Share of the remaining time spent sleeping
    pub sleep_fraction: f64,
}

/// Run limits and worker behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Wall-clock run length in seconds
    pub duration_secs: f64,
    /// Optional cycle budget; the run ends at whichever limit is hit first
    pub max_cycles: Option<u64>,
    /// Pause before replacing a connection after a failed operation
    pub replace_delay_secs: f64,
    /// Acquire time that triggers a warning
    pub slow_acquire_ms: f64,
    /// Operation time that triggers a warning
    pub slow_operation_ms: f64,
    /// Interval of the status line in seconds
    pub status_interval_secs: f64,
    /// Seed for workload and fault draws; random when unset
    pub seed: Option<u64>,
}

/// Cooperative client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncClientSettings {
    /// Operations issued together per cycle
    pub concurrency: usize,
    /// Registers per request
    pub max_registers: u16,
    /// Rebuild rounds before the pool gives up
    pub rebuild_attempts: u32,
    /// Pause before each rebuild round in seconds
    pub rebuild_delay_secs: f64,
}

/// Profile of one simulated master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Unique label, used for thread names and log fields
    pub label: String,
    /// Free-form description
    pub description: String,
    /// Per-cycle probability of a forced disconnect
    pub disconnect_prob: f64,
    /// Pause after a forced disconnect
    pub reconnect_delay: DelayRange,
    /// Cycle period overriding the default target
    pub cycle_time_ms: Option<f64>,
}

/// Uniform delay range in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DelayRange {
    /// Lower bound
    pub min_secs: f64,
    /// Upper bound
    pub max_secs: f64,
}

impl DelayRange {
    /// Range in seconds
    #[must_use]
    pub const fn secs(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }

    /// Bounds as durations
    #[must_use]
    pub fn bounds(&self) -> (Duration, Duration) {
        (secs(self.min_secs), secs(self.max_secs))
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub structured: bool,
}

/// Report outputs besides the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReportSettings {
    /// Append one JSON object per report to this file
    pub json_lines: Option<PathBuf>,
    /// Write a timestamped text report per run into this directory
    pub text_dir: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            pool: PoolSettings::default(),
            registers: RegisterSettings::default(),
            timing: TimingSettings::default(),
            run: RunSettings::default(),
            async_client: AsyncClientSettings::default(),
            masters: MasterConfig::default_profiles(),
            logging: LoggingConfig::default(),
            reports: ReportSettings::default(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "192.168.2.100".to_string(),
            port: 502,
            connect_timeout_secs: 3.0,
            response_timeout_secs: 2.0,
            no_delay: true,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 3,
            connect_retries: 3,
            retry_delay_secs: 1.0,
            probe_on_connect: true,
            health_failure_threshold: 2,
            heartbeat_interval_secs: 30.0,
            persistent: false,
        }
    }
}

impl Default for RegisterSettings {
    fn default() -> Self {
        Self {
            input_range: RegisterRange::new(0, 9),
            holding_range: RegisterRange::new(0, 999),
            max_per_read: 120,
            max_per_write: 120,
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            target_cycle_ms: 1.0,
            warmup_cycles: 10,
            jitter_window: 100,
            spin_timeout_secs: 5.0,
            sleep_threshold_ms: 2.0,
            sleep_fraction: 0.5,
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            duration_secs: 12.0 * 60.0 * 60.0,
            max_cycles: None,
            replace_delay_secs: 1.0,
            slow_acquire_ms: 100.0,
            slow_operation_ms: 50.0,
            status_interval_secs: 1.0,
            seed: None,
        }
    }
}

impl Default for AsyncClientSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_registers: 10,
            rebuild_attempts: 3,
            rebuild_delay_secs: 1.0,
        }
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            label: "master".to_string(),
            description: String::new(),
            disconnect_prob: 0.0,
            reconnect_delay: DelayRange::default(),
            cycle_time_ms: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
        }
    }
}

impl MasterConfig {
    /// The four reference profiles of the multi-master scenario
    #[must_use]
    pub fn default_profiles() -> Vec<Self> {
        vec![
            Self {
                label: "master-1".to_string(),
                description: "random disconnect, immediate reconnect".to_string(),
                disconnect_prob: 0.01,
                reconnect_delay: DelayRange::secs(0.0, 0.0),
                cycle_time_ms: None,
            },
            Self {
                label: "master-2".to_string(),
                description: "random disconnect, delayed reconnect".to_string(),
                disconnect_prob: 0.005,
                reconnect_delay: DelayRange::secs(60.0, 300.0),
                cycle_time_ms: None,
            },
            Self {
                label: "master-3".to_string(),
                description: "50 ms long frame".to_string(),
                disconnect_prob: 0.0,
                reconnect_delay: DelayRange::default(),
                cycle_time_ms: Some(50.0),
            },
            Self {
                label: "master-4".to_string(),
                description: "1 ms busy wait".to_string(),
                disconnect_prob: 0.0,
                reconnect_delay: DelayRange::default(),
                cycle_time_ms: Some(1.0),
            },
        ]
    }

    /// A profile without fault injection
    #[must_use]
    pub fn steady(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }
}

impl HarnessConfig {
    /// Load from defaults, an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map instead of the process one.
    ///
    /// Keys use the same `REGBENCH__SECTION__KEY` form as real variables.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let defaults = config::Config::try_from(&Self::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(env.map(|vars| vars.into_iter().collect()));

        let config: Self = builder
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.host.trim().is_empty() {
            return Err(ConfigError::invalid("endpoint.host", "must not be empty"));
        }
        if self.endpoint.port == 0 {
            return Err(ConfigError::invalid("endpoint.port", "must not be 0"));
        }
        positive("endpoint.connect_timeout_secs", self.endpoint.connect_timeout_secs)?;
        positive("endpoint.response_timeout_secs", self.endpoint.response_timeout_secs)?;

        if self.pool.size == 0 {
            return Err(ConfigError::invalid("pool.size", "must be at least 1"));
        }
        if self.pool.connect_retries == 0 {
            return Err(ConfigError::invalid("pool.connect_retries", "must be at least 1"));
        }
        non_negative("pool.retry_delay_secs", self.pool.retry_delay_secs)?;
        if self.pool.health_failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "pool.health_failure_threshold",
                "must be at least 1",
            ));
        }
        non_negative("pool.heartbeat_interval_secs", self.pool.heartbeat_interval_secs)?;

        for (key, range) in [
            ("registers.input_range", self.registers.input_range),
            ("registers.holding_range", self.registers.holding_range),
        ] {
            if range.start > range.end {
                return Err(ConfigError::invalid(
                    key,
                    format!("start {} is past end {}", range.start, range.end),
                ));
            }
        }
        for (key, value) in [
            ("registers.max_per_read", self.registers.max_per_read),
            ("registers.max_per_write", self.registers.max_per_write),
            ("async_client.max_registers", self.async_client.max_registers),
        ] {
            if value == 0 || value > PROTOCOL_MAX_REGISTERS {
                return Err(ConfigError::invalid(
                    key,
                    format!("must be within 1..={PROTOCOL_MAX_REGISTERS}, got {value}"),
                ));
            }
        }

        positive("timing.target_cycle_ms", self.timing.target_cycle_ms)?;
        positive("timing.spin_timeout_secs", self.timing.spin_timeout_secs)?;
        non_negative("timing.sleep_threshold_ms", self.timing.sleep_threshold_ms)?;
        if !(self.timing.sleep_fraction > 0.0 && self.timing.sleep_fraction <= 1.0) {
            return Err(ConfigError::invalid(
                "timing.sleep_fraction",
                "must be within (0, 1]",
            ));
        }
        if self.timing.jitter_window < 2 {
            return Err(ConfigError::invalid("timing.jitter_window", "must be at least 2"));
        }

        non_negative("run.duration_secs", self.run.duration_secs)?;
        if self.run.duration_secs == 0.0 && self.run.max_cycles.is_none() {
            return Err(ConfigError::invalid(
                "run.duration_secs",
                "a run needs a duration or a cycle budget",
            ));
        }
        non_negative("run.replace_delay_secs", self.run.replace_delay_secs)?;
        positive("run.status_interval_secs", self.run.status_interval_secs)?;

        if self.async_client.concurrency == 0 {
            return Err(ConfigError::invalid("async_client.concurrency", "must be at least 1"));
        }
        non_negative("async_client.rebuild_delay_secs", self.async_client.rebuild_delay_secs)?;

        let mut labels = std::collections::HashSet::new();
        for master in &self.masters {
            master.validate()?;
            if !labels.insert(master.label.as_str()) {
                return Err(ConfigError::invalid(
                    "masters",
                    format!("duplicate label '{}'", master.label),
                ));
            }
        }
        Ok(())
    }

    /// Transport settings for the endpoint
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            host: self.endpoint.host.clone(),
            port: self.endpoint.port,
            connect_timeout: secs(self.endpoint.connect_timeout_secs),
            response_timeout: secs(self.endpoint.response_timeout_secs),
            no_delay: self.endpoint.no_delay,
            max_registers_per_read: self.registers.max_per_read,
            max_registers_per_write: self.registers.max_per_write,
        }
    }

    fn health_config(&self) -> HealthCheckConfig {
        HealthCheckConfig {
            failure_threshold: self.pool.health_failure_threshold,
            heartbeat_interval: secs(self.pool.heartbeat_interval_secs),
        }
    }

    /// Settings for one worker's blocking pool
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            capacity: self.pool.size,
            transport: self.transport_config(),
            connect_retry: RetryConfig::fixed(
                self.pool.connect_retries,
                secs(self.pool.retry_delay_secs),
            ),
            health: self.health_config(),
            probe_on_connect: self.pool.probe_on_connect,
        }
    }

    /// Settings for a persistent connection manager
    #[must_use]
    pub fn persistent_config(&self) -> PersistentConfig {
        PersistentConfig {
            transport: self.transport_config(),
            reconnect: RetryConfig::exponential(
                self.pool.connect_retries,
                secs(self.pool.retry_delay_secs),
            ),
            health: self.health_config(),
        }
    }

    /// Settings for the cooperative pool
    #[must_use]
    pub fn async_pool_config(&self) -> AsyncPoolConfig {
        AsyncPoolConfig {
            size: self.pool.size,
            transport: self.transport_config(),
            rebuild_attempts: self.async_client.rebuild_attempts,
            rebuild_delay: secs(self.async_client.rebuild_delay_secs),
        }
    }

    /// Scheduler settings, with the master's cycle period if it has one
    #[must_use]
    pub fn scheduler_config(&self, master: Option<&MasterConfig>) -> SchedulerConfig {
        let target_ms = master
            .and_then(|m| m.cycle_time_ms)
            .unwrap_or(self.timing.target_cycle_ms);
        SchedulerConfig {
            target: millis(target_ms),
            sleep_threshold: millis(self.timing.sleep_threshold_ms),
            sleep_fraction: self.timing.sleep_fraction,
            spin_timeout: secs(self.timing.spin_timeout_secs),
            warmup_cycles: self.timing.warmup_cycles,
        }
    }

    /// Workload settings for the blocking workers
    #[must_use]
    pub fn workload_config(&self) -> WorkloadConfig {
        WorkloadConfig {
            input_range: self.registers.input_range,
            holding_range: self.registers.holding_range,
            max_per_read: self.registers.max_per_read,
            max_per_write: self.registers.max_per_write,
        }
    }

    /// Workload settings for the cooperative client
    #[must_use]
    pub fn async_workload_config(&self) -> WorkloadConfig {
        let max = self.async_client.max_registers;
        WorkloadConfig {
            max_per_read: max.min(self.registers.max_per_read),
            max_per_write: max.min(self.registers.max_per_write),
            ..self.workload_config()
        }
    }
}

impl MasterConfig {
    /// Check probability and delay bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.label.trim().is_empty() {
            return Err(ConfigError::invalid("masters.label", "must not be empty"));
        }
        let key = |field: &str| format!("masters.{}.{field}", self.label);

        if !(0.0..=1.0).contains(&self.disconnect_prob) {
            return Err(ConfigError::invalid(
                key("disconnect_prob"),
                format!("{} is outside 0.0..=1.0", self.disconnect_prob),
            ));
        }
        non_negative(&key("reconnect_delay.min_secs"), self.reconnect_delay.min_secs)?;
        non_negative(&key("reconnect_delay.max_secs"), self.reconnect_delay.max_secs)?;
        if self.reconnect_delay.min_secs > self.reconnect_delay.max_secs {
            return Err(ConfigError::invalid(
                key("reconnect_delay"),
                "min_secs is greater than max_secs",
            ));
        }
        if let Some(cycle) = self.cycle_time_ms {
            positive(&key("cycle_time_ms"), cycle)?;
        }
        Ok(())
    }
}

fn non_negative(key: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(key, format!("{value} is not a finite non-negative number")))
    }
}

fn positive(key: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(key, format!("{value} is not a finite positive number")))
    }
}
