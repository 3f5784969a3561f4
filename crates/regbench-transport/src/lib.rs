//! # Regbench Transport
//!
//! Connection lifecycle management for load testing a register-based
//! controller over long-lived sessions.
//!
//! The register protocol itself is not implemented here; it is consumed
//! through the [`Transport`] and [`AsyncTransport`] traits.
//!
//! ## Connection Sources
//!
//! - **Connection Pool**: bounded idle set for worker threads, validated on
//!   release and lazily refilled on acquire
//! - **Async Connection Pool**: shared sessions for cooperative tasks with
//!   timed rebuild rounds
//! - **Persistent Connection**: one session kept alive by heartbeats
//!
//! ## Reliability Features
//!
//! - **Retry Logic**: bounded attempts with fixed or exponential backoff
//! - **Health Checks**: real round-trip probes with a consecutive-failure
//!   threshold
//! - **Simulated Controller**: in-memory stand-in with latency, failure and
//!   link-drop knobs
//!
//! ## Module Organization
//!
//! ```text
//! regbench-transport/
//! ├── core/           # Transport traits and error types
//! ├── config/         # Protocol limits
//! ├── connection/     # Pooled connection wrapper
//! ├── robustness/     # Retry and health-check policies
//! ├── pool/           # Blocking connection pool
//! ├── async_pool/     # Cooperative connection pool
//! ├── persistent/     # Persistent connection manager
//! └── simulator/      # Simulated controller
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
    clippy::cast_possible_truncation,  // register indices fit in u16 by construction
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod async_pool;
pub mod config;
pub mod connection;
pub mod core;
pub mod persistent;
pub mod pool;
pub mod robustness;
pub mod simulator;

// Re-export core transport traits and types
pub use core::{
    AsyncConnector, AsyncTransport, Connector, RegisterKind, Transport, TransportConfig,
    TransportError, TransportResult,
};

// Re-export connection sources
pub use async_pool::{AsyncConnectionPool, AsyncPoolConfig};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use persistent::{HeartbeatOutcome, LinkState, PersistentConfig, PersistentConnection};
pub use pool::{ConnectionPool, ConnectionSource, PoolConfig, PoolError, PoolStats};

// Re-export utilities
pub use robustness::{Backoff, HealthCheckConfig, RetryConfig, RetryExhausted};
pub use simulator::{SimulatedController, SimulatedFailure, SimulatorConfig};
