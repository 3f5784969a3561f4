//! Harness error types

use std::time::Duration;

use regbench_transport::{PoolError, TransportError};
use thiserror::Error;

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors raised while driving a load test.
///
/// Only [`HarnessError::Timeout`] and [`HarnessError::Config`] stop a worker;
/// the rest are recorded and the run continues.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A session could not be (re)established
    #[error("Connect error: {0}")]
    Connect(#[source] PoolError),

    /// Every connect attempt of a bounded retry loop failed
    #[error("Connection pool exhausted: {0}")]
    Exhausted(#[source] PoolError),

    /// A register read or write failed
    #[error("Operation failed: {0}")]
    Operation(#[from] TransportError),

    /// The cycle scheduler gave up waiting
    #[error(transparent)]
    Timeout(#[from] SchedulerError),

    /// Invalid or unreadable configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HarnessError {
    /// Whether the error ends the worker that raised it
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Config(_))
    }
}

impl From<PoolError> for HarnessError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { .. } => Self::Exhausted(err),
            PoolError::Connect { .. } | PoolError::Busy => Self::Connect(err),
        }
    }
}

/// Cycle pacing failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The busy-wait did not reach its target within the guard interval
    #[error("Busy wait exceeded its {0:?} guard")]
    SpinTimeout(Duration),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of range or inconsistent with another one
    #[error("Invalid configuration for '{key}': {message}")]
    Invalid {
        /// Configuration key
        key: String,
        /// What is wrong with it
        message: String,
    },

    /// The layered sources could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}
