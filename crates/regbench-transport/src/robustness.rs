//! Retry and health-check policies shared by the pools and the persistent
//! connection manager.
//!
//! - Bounded retries with fixed or exponential backoff
//! - Consecutive-failure thresholds for health probes
//! - Heartbeat staleness windows

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::{TransportError, TransportResult};

/// Delay growth between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed,
    /// `base_delay * multiplier^attempt`
    Exponential {
        /// Growth factor per attempt
        multiplier: f64,
    },
}

/// Retry configuration for connect sequences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay between attempts
    pub base_delay: Duration,
    /// Backoff strategy
    pub backoff: Backoff,
    /// Maximum delay between attempts
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Fixed delay between attempts
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            backoff: Backoff::Fixed,
            max_delay: delay,
        }
    }

    /// Delay of `base * 2^attempt`
    #[must_use]
    pub const fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Exponential { multiplier: 2.0 },
            max_delay: Duration::from_secs(60),
        }
    }

    /// Delay to wait after the zero-based `attempt` failed, never more than
    /// `max_delay`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay.min(self.max_delay),
            Backoff::Exponential { .. } if self.base_delay.is_zero() => Duration::ZERO,
            Backoff::Exponential { multiplier } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let secs = self.base_delay.as_secs_f64() * multiplier.powi(exponent);
                Duration::try_from_secs_f64(secs)
                    .map_or(self.max_delay, |delay| delay.min(self.max_delay))
            }
        }
    }

    /// Run `operation` until it succeeds or the attempts are used up.
    ///
    /// Sleeps the calling thread between attempts; no sleep follows the last
    /// failed attempt.
    pub fn run_blocking<T>(
        &self,
        what: &str,
        mut operation: impl FnMut(u32) -> TransportResult<T>,
    ) -> Result<T, RetryExhausted> {
        let attempts = self.max_attempts.max(1);
        let mut last_error = TransportError::NotConnected;

        for attempt in 0..attempts {
            match operation(attempt) {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded after {} retries", what, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!("{} failed (attempt {}/{}): {}", what, attempt + 1, attempts, e);
                    last_error = e;
                    if attempt + 1 < attempts {
                        std::thread::sleep(self.delay_for(attempt));
                    }
                }
            }
        }

        Err(RetryExhausted {
            attempts,
            last_error,
        })
    }

    /// Cooperative counterpart of [`RetryConfig::run_blocking`]
    pub async fn run_async<T, F, Fut>(
        &self,
        what: &str,
        mut operation: F,
    ) -> Result<T, RetryExhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = TransportError::NotConnected;

        for attempt in 0..attempts {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("{} failed (attempt {}/{}): {}", what, attempt + 1, attempts, e);
                    last_error = e;
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.delay_for(attempt)).await;
                    }
                }
            }
        }

        Err(RetryExhausted {
            attempts,
            last_error,
        })
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(1))
    }
}

/// All retry attempts failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("gave up after {attempts} attempts: {last_error}")]
pub struct RetryExhausted {
    /// Attempts made
    pub attempts: u32,
    /// Error of the final attempt
    #[source]
    pub last_error: TransportError,
}

/// Health check configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Consecutive failed probes before a connection is declared broken
    pub failure_threshold: u32,
    /// Heartbeat age after which a persistent link is re-probed
    pub heartbeat_interval: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}
