//! Core transport traits and types.
//!
//! The register protocol itself lives behind [`Transport`] / [`AsyncTransport`];
//! everything in this crate only needs the operations declared here.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors that can occur in transport operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connect or handshake failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established session dropped
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The session is closed or was never opened
    #[error("Transport is not connected")]
    NotConnected,

    /// The device answered with an exception response
    #[error("Device exception {code}: {message}")]
    Exception {
        /// Protocol exception code
        code: u8,
        /// Human readable description
        message: String,
    },

    /// The request was rejected before it reached the wire
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No response within the response timeout
    #[error("Operation timed out")]
    Timeout,

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether the error means the session itself is unusable.
    ///
    /// Device exceptions and rejected requests leave the session intact.
    #[must_use]
    pub const fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::ConnectionLost(_)
                | Self::NotConnected
                | Self::Timeout
                | Self::Io(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Register bank addressed by a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    /// Read-only input registers
    Input,
    /// Read/write holding registers
    Holding,
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Holding => f.write_str("holding"),
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Controller host name or address
    pub host: String,

    /// Controller port
    pub port: u16,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Per-request response timeout
    pub response_timeout: Duration,

    /// Disable Nagle's algorithm on the socket
    pub no_delay: bool,

    /// Upper bound for registers in one read
    pub max_registers_per_read: u16,

    /// Upper bound for registers in one write
    pub max_registers_per_write: u16,
}

impl TransportConfig {
    /// `host:port` of the controller
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "192.168.2.100".to_string(),
            port: 502,
            connect_timeout: Duration::from_secs(3),
            response_timeout: Duration::from_secs(2),
            no_delay: true,
            max_registers_per_read: 120,
            max_registers_per_write: 120,
        }
    }
}

/// One blocking session with the controller.
///
/// Implementations are driven from a single thread at a time; the pool
/// guarantees exclusive access through leases.
pub trait Transport: Send + fmt::Debug {
    /// Read `count` registers starting at `address`
    fn read_registers(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> TransportResult<Vec<u16>>;

    /// Write `values` to consecutive holding registers starting at `address`
    fn write_registers(&mut self, address: u16, values: &[u16]) -> TransportResult<()>;

    /// Cached link state as last observed by the transport
    fn is_connected(&self) -> bool;

    /// Real round trip used for health checks.
    ///
    /// A cached flag is not enough: a session can die silently between
    /// operations.
    fn probe(&mut self) -> TransportResult<()> {
        self.read_registers(RegisterKind::Holding, 0, 1).map(|_| ())
    }

    /// Close the session
    fn close(&mut self) -> TransportResult<()>;
}

/// Factory for blocking sessions
pub trait Connector: Send + Sync + fmt::Debug {
    /// Open a new session to the configured endpoint
    fn connect(&self, config: &TransportConfig) -> TransportResult<Box<dyn Transport>>;
}

/// One cooperative session with the controller.
///
/// Methods take `&self` so that several in-flight requests can share one
/// long-lived session.
#[async_trait]
pub trait AsyncTransport: Send + Sync + fmt::Debug {
    /// Read `count` registers starting at `address`
    async fn read_registers(
        &self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> TransportResult<Vec<u16>>;

    /// Write `values` to consecutive holding registers starting at `address`
    async fn write_registers(&self, address: u16, values: &[u16]) -> TransportResult<()>;

    /// Cached link state as last observed by the transport
    fn is_connected(&self) -> bool;

    /// Real round trip used for health checks
    async fn probe(&self) -> TransportResult<()> {
        self.read_registers(RegisterKind::Holding, 0, 1)
            .await
            .map(|_| ())
    }

    /// Close the session
    async fn close(&self) -> TransportResult<()>;
}

/// Factory for cooperative sessions
#[async_trait]
pub trait AsyncConnector: Send + Sync + fmt::Debug {
    /// Open a new session to the configured endpoint
    async fn connect(&self, config: &TransportConfig) -> TransportResult<Arc<dyn AsyncTransport>>;
}
