//! A single transport session plus the health bookkeeping the pools need.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::core::{RegisterKind, Transport, TransportResult};
use crate::robustness::HealthCheckConfig;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque connection identity, unique within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Idle in a pool
    Free,
    /// Exclusively held by one caller
    Leased,
    /// Known or suspected dead; must be validated or closed
    Broken,
}

/// Pooled connection wrapper
pub struct Connection {
    id: ConnectionId,
    transport: Box<dyn Transport>,
    state: ConnectionState,
    created_at: Instant,
    last_health_check: Option<Instant>,
    consecutive_failures: u32,
    closed: bool,
}

impl Connection {
    /// Wrap a freshly opened transport session
    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            id: ConnectionId::next(),
            transport,
            state: ConnectionState::Free,
            created_at: Instant::now(),
            last_health_check: None,
            consecutive_failures: 0,
            closed: false,
        }
    }

    /// Connection identity
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Creation time
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time of the last probe, if any
    #[must_use]
    pub const fn last_health_check(&self) -> Option<Instant> {
        self.last_health_check
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Flag the connection so the next owner validates it before use
    pub fn mark_broken(&mut self) {
        self.state = ConnectionState::Broken;
    }

    /// Cheap, cached health view; no I/O
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state != ConnectionState::Broken && self.transport.is_connected()
    }

    /// Read registers, flagging the connection broken on link failures
    pub fn read_registers(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> TransportResult<Vec<u16>> {
        let result = self.transport.read_registers(kind, address, count);
        self.observe(&result);
        result
    }

    /// Write registers, flagging the connection broken on link failures
    pub fn write_registers(&mut self, address: u16, values: &[u16]) -> TransportResult<()> {
        let result = self.transport.write_registers(address, values);
        self.observe(&result);
        result
    }

    fn observe<T>(&mut self, result: &TransportResult<T>) {
        if let Err(e) = result
            && e.is_connection_level()
        {
            debug!(conn = %self.id, "link failure during operation: {}", e);
            self.state = ConnectionState::Broken;
        }
    }

    /// One real round trip.
    ///
    /// Returns whether the probe succeeded and updates the consecutive
    /// failure count.
    pub fn probe(&mut self) -> bool {
        self.last_health_check = Some(Instant::now());
        match self.transport.probe() {
            Ok(()) => {
                self.consecutive_failures = 0;
                true
            }
            Err(e) => {
                self.consecutive_failures += 1;
                trace!(conn = %self.id, failures = self.consecutive_failures, "probe failed: {}", e);
                false
            }
        }
    }

    /// Probe until one round trip succeeds or `failure_threshold` probes in a
    /// row have failed; in the latter case the connection is flagged broken.
    pub fn verify(&mut self, config: &HealthCheckConfig) -> bool {
        let threshold = config.failure_threshold.max(1);
        self.consecutive_failures = 0;
        while self.consecutive_failures < threshold {
            if self.probe() {
                if self.state == ConnectionState::Broken {
                    self.state = ConnectionState::Free;
                }
                return true;
            }
        }
        self.state = ConnectionState::Broken;
        false
    }

    /// Close the underlying session
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.transport.close() {
            warn!(conn = %self.id, "Error closing connection: {}", e);
        } else {
            trace!(conn = %self.id, "connection closed");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}
