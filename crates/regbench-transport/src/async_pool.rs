//! Connection pool for cooperative tasks.
//!
//! Sessions are shared, not leased: [`AsyncTransport`] methods take `&self`,
//! so several in-flight requests of one task can use the same connection.
//! Connects and closes run with the slot lock released.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::{AsyncConnector, AsyncTransport, TransportConfig, TransportError};
use crate::pool::PoolError;
use crate::robustness::RetryConfig;

type Slot = Option<Arc<dyn AsyncTransport>>;

/// Async pool configuration
#[derive(Debug, Clone)]
pub struct AsyncPoolConfig {
    /// Number of connection slots
    pub size: usize,
    /// Endpoint and session settings
    pub transport: TransportConfig,
    /// Rebuild rounds before giving up
    pub rebuild_attempts: u32,
    /// Pause before each rebuild round
    pub rebuild_delay: Duration,
}

impl Default for AsyncPoolConfig {
    fn default() -> Self {
        Self {
            size: 3,
            transport: TransportConfig::default(),
            rebuild_attempts: 3,
            rebuild_delay: Duration::from_secs(1),
        }
    }
}

/// Fixed set of shared cooperative sessions
#[derive(Debug)]
pub struct AsyncConnectionPool {
    config: AsyncPoolConfig,
    connector: Arc<dyn AsyncConnector>,
    slots: Mutex<Vec<Slot>>,
    init_lock: Mutex<()>,
    initialized: AtomicBool,
    cursor: AtomicUsize,
}

impl AsyncConnectionPool {
    /// Create an uninitialized pool
    #[must_use]
    pub fn new(connector: Arc<dyn AsyncConnector>, config: AsyncPoolConfig) -> Self {
        Self {
            config,
            connector,
            slots: Mutex::new(Vec::new()),
            init_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Pool configuration
    #[must_use]
    pub const fn config(&self) -> &AsyncPoolConfig {
        &self.config
    }

    /// Whether [`initialize`](Self::initialize) has completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Open every slot once. Returns the number of sessions opened.
    ///
    /// Concurrent callers wait for the first one; later calls are no-ops. A
    /// failed connect leaves its slot empty.
    pub async fn initialize(&self) -> usize {
        if self.is_initialized() {
            return 0;
        }
        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return 0;
        }

        let mut fresh = Vec::with_capacity(self.config.size);
        for index in 0..self.config.size {
            match self.connector.connect(&self.config.transport).await {
                Ok(conn) => fresh.push(Some(conn)),
                Err(e) => {
                    warn!(slot = index, "Async pool connect failed: {}", e);
                    fresh.push(None);
                }
            }
        }
        let opened = fresh.iter().flatten().count();

        *self.slots.lock().await = fresh;
        self.initialized.store(true, Ordering::Release);
        info!(
            endpoint = %self.config.transport.endpoint(),
            opened,
            size = self.config.size,
            "Async connection pool initialized"
        );
        opened
    }

    /// Number of slots holding a session that still reports connected
    pub async fn live_connections(&self) -> usize {
        self.slots
            .lock()
            .await
            .iter()
            .flatten()
            .filter(|conn| conn.is_connected())
            .count()
    }

    /// Get a connected session.
    ///
    /// When no slot is usable the task yields, waits `rebuild_delay` and
    /// rebuilds the dead slots, up to `rebuild_attempts` rounds.
    pub async fn get_connection(&self) -> Result<Arc<dyn AsyncTransport>, PoolError> {
        self.initialize().await;

        let rounds = RetryConfig::fixed(
            self.config.rebuild_attempts.saturating_add(1),
            self.config.rebuild_delay,
        );
        let result = rounds
            .run_async("async pool lookup", |round| async move {
                let rebuilt = if round > 0 {
                    tokio::task::yield_now().await;
                    debug!(round, "No live async connection, rebuilding");
                    self.rebuild().await.map(|_| ())
                } else {
                    Ok(())
                };
                match self.next_live().await {
                    Some(conn) => Ok(conn),
                    None => Err(rebuilt.err().unwrap_or(TransportError::NotConnected)),
                }
            })
            .await;

        result.map_err(|e| PoolError::Exhausted {
            attempts: self.config.rebuild_attempts,
            last_error: Some(e.last_error),
        })
    }

    /// Close every session. Returns how many were closed cleanly.
    ///
    /// Empty or never-initialized slots are skipped and one failing close does
    /// not stop the others.
    pub async fn close_all(&self) -> usize {
        let _guard = self.init_lock.lock().await;
        let drained = std::mem::take(&mut *self.slots.lock().await);
        self.initialized.store(false, Ordering::Release);

        let mut closed = 0;
        for conn in drained.into_iter().flatten() {
            match conn.close().await {
                Ok(()) => closed += 1,
                Err(e) => warn!("Error closing async connection: {}", e),
            }
        }
        debug!("Closed {} async connections", closed);
        closed
    }

    /// Round-robin scan for a connected slot
    async fn next_live(&self) -> Option<Arc<dyn AsyncTransport>> {
        let slots = self.slots.lock().await;
        let len = slots.len();
        if len == 0 {
            return None;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        (0..len)
            .map(|offset| (start + offset) % len)
            .find_map(|index| {
                slots[index]
                    .as_ref()
                    .filter(|conn| conn.is_connected())
                    .map(Arc::clone)
            })
    }

    /// Replace dead or empty slots with fresh sessions
    async fn rebuild(&self) -> Result<usize, TransportError> {
        let dead: Vec<usize> = {
            let slots = self.slots.lock().await;
            slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.as_ref().is_none_or(|conn| !conn.is_connected()))
                .map(|(index, _)| index)
                .collect()
        };

        let mut rebuilt = 0;
        let mut last_error = None;
        for index in dead {
            let fresh = match self.connector.connect(&self.config.transport).await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    warn!(slot = index, "Async pool rebuild failed: {}", e);
                    last_error = Some(e);
                    None
                }
            };

            let Some(conn) = fresh else {
                continue;
            };
            let (stale, orphan) = {
                let mut slots = self.slots.lock().await;
                match slots.get_mut(index) {
                    Some(slot) => {
                        rebuilt += 1;
                        (slot.replace(conn), None)
                    }
                    // Drained by close_all while connecting
                    None => (None, Some(conn)),
                }
            };
            if let Some(orphan) = orphan
                && let Err(e) = orphan.close().await
            {
                debug!(slot = index, "Closing orphaned async connection: {}", e);
            }
            if let Some(stale) = stale
                && let Err(e) = stale.close().await
            {
                debug!(slot = index, "Closing dead async connection: {}", e);
            }
        }

        match last_error {
            Some(e) if rebuilt == 0 => Err(e),
            _ => Ok(rebuilt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SimulatedController, SimulatorConfig};

    fn pool() -> (SimulatedController, AsyncConnectionPool) {
        let controller = SimulatedController::new(SimulatorConfig::default());
        let pool = AsyncConnectionPool::new(Arc::new(controller.clone()), AsyncPoolConfig::default());
        (controller, pool)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (controller, pool) = pool();
        assert_eq!(pool.initialize().await, 3);
        assert_eq!(pool.initialize().await, 0);
        assert_eq!(controller.open_sessions(), 3);
    }

    #[tokio::test]
    async fn test_close_all_before_initialize() {
        let (_, pool) = pool();
        assert_eq!(pool.close_all().await, 0);
        assert!(!pool.is_initialized());
    }
}
