//! Connection pooling for worker threads.
//!
//! The idle collection is the only shared mutable state and sits behind a
//! single mutex whose critical sections are a push or a pop. Connects,
//! retries and health probes always run with the lock released.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::connection::{Connection, ConnectionState};
use crate::core::{Connector, TransportConfig, TransportError};
use crate::robustness::{HealthCheckConfig, RetryConfig, RetryExhausted};

/// Errors surfaced by connection sources
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// No usable connection could be produced within the retry budget
    #[error("no usable connection after {attempts} attempts{}", describe_last(.last_error))]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt, if one was observed
        last_error: Option<TransportError>,
    },

    /// Reconnecting a persistent link failed
    #[error("could not establish connection after {attempts} attempts: {last_error}")]
    Connect {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: TransportError,
    },

    /// The single persistent connection is already leased out
    #[error("persistent connection is already in use")]
    Busy,
}

fn describe_last(last_error: &Option<TransportError>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(": {e}"))
        .unwrap_or_default()
}

impl PoolError {
    pub(crate) fn exhausted(err: RetryExhausted) -> Self {
        Self::Exhausted {
            attempts: err.attempts,
            last_error: Some(err.last_error),
        }
    }
}

/// Anything a worker can lease connections from
pub trait ConnectionSource: Send + Sync {
    /// Lease a connection for exclusive use
    fn acquire(&self) -> Result<Connection, PoolError>;

    /// Hand a lease back; the source decides whether to keep it
    fn release(&self, conn: Connection);

    /// Close a lease that is known to be broken
    fn discard(&self, conn: Connection);

    /// Create a fresh connection to stand in for a discarded one
    fn replenish(&self) -> Result<(), PoolError>;

    /// Tear down every connection the source currently holds
    fn close_all(&self) -> usize;

    /// Open connections ahead of the first lease. Returns how many were
    /// opened.
    fn warm_up(&self) -> usize {
        0
    }

    /// Time-driven upkeep, called between cycles while nothing is leased
    fn heartbeat(&self) {}
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of idle connections kept
    pub capacity: usize,

    /// Endpoint and session settings
    pub transport: TransportConfig,

    /// Retry policy for creating connections
    pub connect_retry: RetryConfig,

    /// Probe policy for validation
    pub health: HealthCheckConfig,

    /// Whether a new session must answer a test read before it is used
    pub probe_on_connect: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            transport: TransportConfig::default(),
            connect_retry: RetryConfig::default(),
            health: HealthCheckConfig::default(),
            probe_on_connect: true,
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total connections created
    pub connections_created: u64,

    /// Total connections closed by the pool
    pub connections_destroyed: u64,

    /// Individual connect attempts that failed
    pub failed_connects: u64,

    /// Successful leases
    pub total_acquires: u64,

    /// Leases that could not be served
    pub failed_acquires: u64,

    /// Leases returned to the idle collection
    pub total_returns: u64,

    /// Idle connections dropped because validation failed
    pub validation_failures: u64,
}

/// Bounded pool of transport connections to one endpoint
#[derive(Debug)]
pub struct ConnectionPool {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    idle: Mutex<Vec<Connection>>,
    stats: Mutex<PoolStats>,
}

impl ConnectionPool {
    /// Create an empty pool; no connection is opened until [`warm_up`] or the
    /// first [`acquire`].
    ///
    /// [`warm_up`]: ConnectionPool::warm_up
    /// [`acquire`]: ConnectionPool::acquire
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(config.capacity)),
            config,
            connector,
            stats: Mutex::new(PoolStats::default()),
        }
    }

    /// Pool configuration
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Maximum number of idle connections
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Current number of idle connections
    #[must_use]
    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    /// Whether no idle connection is available
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.idle.lock().is_empty()
    }

    /// Get pool statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.stats.lock().clone()
    }

    /// Fill the pool up to capacity. Returns how many connections were added.
    ///
    /// Stops at the first connect failure; the pool refills lazily later.
    pub fn warm_up(&self) -> usize {
        let missing = self.config.capacity.saturating_sub(self.idle_len());
        let mut added = 0;

        for _ in 0..missing {
            match self.create_connection() {
                Ok(conn) => {
                    if let Some(extra) = self.park(conn) {
                        self.update_stats(|stats| stats.connections_destroyed += 1);
                        extra.close();
                        break;
                    }
                    added += 1;
                }
                Err(e) => {
                    warn!("Pool warm-up stopped early: {}", e);
                    break;
                }
            }
        }

        info!(
            endpoint = %self.config.transport.endpoint(),
            idle = self.idle_len(),
            "Connection pool initialized"
        );
        added
    }

    /// Lease a connection.
    ///
    /// Idle connections are handed out without a round trip unless they were
    /// flagged broken. An empty pool creates a new connection with bounded
    /// retries.
    pub fn acquire(&self) -> Result<Connection, PoolError> {
        // Each pass removes one idle connection, so this ends after at most
        // `capacity` passes.
        for _ in 0..=self.config.capacity {
            let candidate = self.idle.lock().pop();
            let Some(mut conn) = candidate else {
                break;
            };

            if conn.state() == ConnectionState::Broken && !conn.verify(&self.config.health) {
                debug!(conn = %conn.id(), "Idle connection failed validation, discarding");
                self.update_stats(|stats| {
                    stats.validation_failures += 1;
                    stats.connections_destroyed += 1;
                });
                conn.close();
                continue;
            }

            conn.set_state(ConnectionState::Leased);
            self.update_stats(|stats| stats.total_acquires += 1);
            trace!(conn = %conn.id(), "Reusing idle connection");
            return Ok(conn);
        }

        match self.create_connection() {
            Ok(mut conn) => {
                conn.set_state(ConnectionState::Leased);
                self.update_stats(|stats| stats.total_acquires += 1);
                Ok(conn)
            }
            Err(e) => {
                self.update_stats(|stats| stats.failed_acquires += 1);
                Err(e)
            }
        }
    }

    /// Return a lease.
    ///
    /// Kept only if the pool has room and a real round trip succeeds;
    /// otherwise closed.
    pub fn release(&self, mut conn: Connection) {
        let healthy =
            conn.state() != ConnectionState::Broken && conn.verify(&self.config.health);

        let rejected = if healthy { self.park(conn) } else { Some(conn) };

        match rejected {
            None => self.update_stats(|stats| stats.total_returns += 1),
            Some(conn) => {
                debug!(conn = %conn.id(), healthy, "Closing returned connection");
                self.update_stats(|stats| stats.connections_destroyed += 1);
                conn.close();
            }
        }
    }

    /// Close a broken lease and put a freshly created connection in its place
    pub fn replace(&self, broken: Connection) -> Result<(), PoolError> {
        ConnectionSource::discard(self, broken);
        ConnectionSource::replenish(self)
    }

    /// Open and validate a new connection, retrying with a fixed backoff
    pub fn create_connection(&self) -> Result<Connection, PoolError> {
        let endpoint = self.config.transport.endpoint();

        let result = self.config.connect_retry.run_blocking("connect", |attempt| {
            trace!(endpoint = %endpoint, attempt, "Opening connection");
            let transport = self.connector.connect(&self.config.transport).inspect_err(|_| {
                self.update_stats(|stats| stats.failed_connects += 1);
            })?;

            let mut conn = Connection::new(transport);
            if self.config.probe_on_connect && !conn.probe() {
                self.update_stats(|stats| stats.failed_connects += 1);
                conn.close();
                return Err(TransportError::ConnectionFailed(format!(
                    "{endpoint} accepted the connection but the test read failed"
                )));
            }
            Ok(conn)
        });

        match result {
            Ok(conn) => {
                self.update_stats(|stats| stats.connections_created += 1);
                debug!(conn = %conn.id(), endpoint = %endpoint, "Connection established");
                Ok(conn)
            }
            Err(e) => Err(PoolError::exhausted(e)),
        }
    }

    /// Flag every idle connection for validation on its next lease.
    /// Returns the number of connections flagged.
    pub fn flag_idle_broken(&self) -> usize {
        let mut idle = self.idle.lock();
        for conn in idle.iter_mut() {
            conn.mark_broken();
        }
        idle.len()
    }

    /// Close all idle connections in the pool
    pub fn close_all(&self) -> usize {
        let drained: Vec<Connection> = std::mem::take(&mut *self.idle.lock());
        let count = drained.len();

        for conn in drained {
            conn.close();
        }

        self.update_stats(|stats| stats.connections_destroyed += count as u64);
        debug!("Closed {} connections from pool", count);
        count
    }

    /// Push into the idle collection if there is room, otherwise hand back
    fn park(&self, mut conn: Connection) -> Option<Connection> {
        let mut idle = self.idle.lock();
        if idle.len() < self.config.capacity {
            conn.set_state(ConnectionState::Free);
            idle.push(conn);
            None
        } else {
            Some(conn)
        }
    }

    fn update_stats<F>(&self, updater: F)
    where
        F: FnOnce(&mut PoolStats),
    {
        let mut stats = self.stats.lock();
        updater(&mut stats);
    }
}

impl ConnectionSource for ConnectionPool {
    fn acquire(&self) -> Result<Connection, PoolError> {
        Self::acquire(self)
    }

    fn release(&self, conn: Connection) {
        Self::release(self, conn);
    }

    fn discard(&self, conn: Connection) {
        self.update_stats(|stats| stats.connections_destroyed += 1);
        conn.close();
    }

    fn replenish(&self) -> Result<(), PoolError> {
        let conn = self.create_connection()?;
        self.release(conn);
        Ok(())
    }

    fn close_all(&self) -> usize {
        Self::close_all(self)
    }

    fn warm_up(&self) -> usize {
        Self::warm_up(self)
    }
}
