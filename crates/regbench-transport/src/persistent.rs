//! One long-lived connection with heartbeat-driven recovery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionState};
use crate::core::{Connector, TransportConfig, TransportError, TransportResult};
use crate::pool::{ConnectionSource, PoolError};
use crate::robustness::{HealthCheckConfig, RetryConfig};

/// Link lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No session
    Disconnected,
    /// First connect in progress
    Connecting,
    /// Session established and verified
    Connected,
    /// Session failed a health check
    Degraded,
    /// Replacing a failed session
    Reconnecting,
}

/// Result of a heartbeat check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The last heartbeat is recent; nothing was sent
    Fresh,
    /// A probe succeeded
    Verified,
    /// The session was closed and replaced
    Rebuilt,
    /// The session is leased out; acquire verifies it on every lease
    Leased,
}

/// Persistent connection configuration
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Endpoint and session settings
    pub transport: TransportConfig,
    /// Reconnect policy
    pub reconnect: RetryConfig,
    /// Probe thresholds and heartbeat interval
    pub health: HealthCheckConfig,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            reconnect: RetryConfig::exponential(3, Duration::from_secs(1)),
            health: HealthCheckConfig::default(),
        }
    }
}

#[derive(Debug)]
struct Link {
    conn: Option<Connection>,
    state: LinkState,
    last_heartbeat: Option<Instant>,
    rebuilds: u64,
}

/// Manager for a single persistent session
#[derive(Debug)]
pub struct PersistentConnection {
    config: PersistentConfig,
    connector: Arc<dyn Connector>,
    link: Mutex<Link>,
    leased: AtomicBool,
}

impl PersistentConnection {
    /// Create a disconnected manager; the first use connects
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: PersistentConfig) -> Self {
        Self {
            config,
            connector,
            link: Mutex::new(Link {
                conn: None,
                state: LinkState::Disconnected,
                last_heartbeat: None,
                rebuilds: 0,
            }),
            leased: AtomicBool::new(false),
        }
    }

    /// Current link state
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.link.lock().state
    }

    /// Time of the last successful heartbeat
    #[must_use]
    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.link.lock().last_heartbeat
    }

    /// Sessions opened to replace a previous one
    #[must_use]
    pub fn rebuilds(&self) -> u64 {
        self.link.lock().rebuilds
    }

    /// Borrow the live session, reconnecting if it fails its health check.
    ///
    /// The returned guard holds the manager lock; drop it before calling
    /// other methods of the manager. Fails with [`PoolError::Busy`] while the
    /// session is leased through [`ConnectionSource::acquire`].
    pub fn get_persistent_connection(&self) -> Result<MappedMutexGuard<'_, Connection>, PoolError> {
        let mut link = self.link.lock();
        if self.leased.load(Ordering::Acquire) {
            return Err(PoolError::Busy);
        }
        self.ensure_live(&mut link)?;
        link.last_heartbeat = Some(Instant::now());

        MutexGuard::try_map(link, |link| link.conn.as_mut()).map_err(|_| PoolError::Connect {
            attempts: 0,
            last_error: TransportError::NotConnected,
        })
    }

    /// Re-probe the session once the heartbeat interval has passed and
    /// rebuild it if the probe fails.
    ///
    /// A leased session is left alone.
    pub fn check_persistent_connection(&self) -> Result<HeartbeatOutcome, PoolError> {
        let mut link = self.link.lock();
        if self.leased.load(Ordering::Acquire) {
            return Ok(HeartbeatOutcome::Leased);
        }
        let interval = self.config.health.heartbeat_interval;
        let stale = link
            .last_heartbeat
            .is_none_or(|beat| beat.elapsed() >= interval);

        if !stale && link.conn.is_some() {
            return Ok(HeartbeatOutcome::Fresh);
        }

        if let Some(conn) = link.conn.as_mut()
            && conn.verify(&self.config.health)
        {
            link.last_heartbeat = Some(Instant::now());
            return Ok(HeartbeatOutcome::Verified);
        }

        warn!(endpoint = %self.config.transport.endpoint(), "Heartbeat failed, rebuilding persistent connection");
        link.state = LinkState::Degraded;
        self.reconnect(&mut link)?;
        link.last_heartbeat = Some(Instant::now());
        Ok(HeartbeatOutcome::Rebuilt)
    }

    /// Close the session. Returns whether one was open.
    pub fn close_persistent_connection(&self) -> bool {
        let mut link = self.link.lock();
        link.state = LinkState::Disconnected;
        link.last_heartbeat = None;
        match link.conn.take() {
            Some(conn) => {
                conn.close();
                info!(endpoint = %self.config.transport.endpoint(), "Persistent connection closed");
                true
            }
            None => false,
        }
    }

    fn ensure_live(&self, link: &mut Link) -> Result<(), PoolError> {
        let healthy = match link.conn.as_mut() {
            Some(conn) => conn.is_healthy() && conn.verify(&self.config.health),
            None => false,
        };
        if healthy {
            link.state = LinkState::Connected;
            return Ok(());
        }
        if link.conn.is_some() {
            link.state = LinkState::Degraded;
        }
        self.reconnect(link)
    }

    /// Close whatever is left of the old session and open a new one with
    /// exponential backoff
    fn reconnect(&self, link: &mut Link) -> Result<(), PoolError> {
        let replacing = link.conn.is_some() || link.state == LinkState::Degraded;
        if let Some(old) = link.conn.take() {
            old.close();
        }
        link.state = if replacing {
            LinkState::Reconnecting
        } else {
            LinkState::Connecting
        };

        match self
            .config
            .reconnect
            .run_blocking("persistent connect", |_| self.open_verified())
        {
            Ok(conn) => {
                if replacing {
                    link.rebuilds += 1;
                }
                debug!(conn = %conn.id(), rebuilds = link.rebuilds, "Persistent connection established");
                link.conn = Some(conn);
                link.state = LinkState::Connected;
                Ok(())
            }
            Err(e) => {
                link.state = LinkState::Disconnected;
                Err(PoolError::Connect {
                    attempts: e.attempts,
                    last_error: e.last_error,
                })
            }
        }
    }

    fn open_verified(&self) -> TransportResult<Connection> {
        let mut conn = Connection::new(self.connector.connect(&self.config.transport)?);
        if conn.probe() {
            Ok(conn)
        } else {
            conn.close();
            Err(TransportError::ConnectionFailed(
                "test read on the new session failed".to_string(),
            ))
        }
    }
}

/// Lets a worker drive its loop through one persistent session. Only one
/// lease can be outstanding.
impl ConnectionSource for PersistentConnection {
    fn acquire(&self) -> Result<Connection, PoolError> {
        if self.leased.swap(true, Ordering::AcqRel) {
            return Err(PoolError::Busy);
        }

        let mut link = self.link.lock();
        let leased = self.ensure_live(&mut link).map(|()| link.conn.take());
        match leased {
            Ok(Some(mut conn)) => {
                link.last_heartbeat = Some(Instant::now());
                conn.set_state(ConnectionState::Leased);
                Ok(conn)
            }
            Ok(None) => {
                self.leased.store(false, Ordering::Release);
                Err(PoolError::Connect {
                    attempts: 0,
                    last_error: TransportError::NotConnected,
                })
            }
            Err(e) => {
                self.leased.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn release(&self, mut conn: Connection) {
        let mut link = self.link.lock();
        if conn.state() == ConnectionState::Broken || link.conn.is_some() {
            conn.close();
            if link.conn.is_none() {
                link.state = LinkState::Disconnected;
            }
        } else {
            conn.set_state(ConnectionState::Free);
            link.conn = Some(conn);
        }
        self.leased.store(false, Ordering::Release);
    }

    fn discard(&self, conn: Connection) {
        conn.close();
        let mut link = self.link.lock();
        if link.conn.is_none() {
            link.state = LinkState::Disconnected;
        }
        self.leased.store(false, Ordering::Release);
    }

    fn replenish(&self) -> Result<(), PoolError> {
        if self.leased.load(Ordering::Acquire) {
            return Err(PoolError::Busy);
        }
        let mut link = self.link.lock();
        if link.conn.is_some() {
            return Ok(());
        }
        link.state = LinkState::Degraded;
        self.reconnect(&mut link)?;
        link.last_heartbeat = Some(Instant::now());
        Ok(())
    }

    fn close_all(&self) -> usize {
        usize::from(self.close_persistent_connection())
    }

    fn heartbeat(&self) {
        match self.check_persistent_connection() {
            Ok(outcome) => debug!(?outcome, "Persistent connection heartbeat"),
            Err(e) => warn!("Persistent connection heartbeat failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SimulatedController, SimulatorConfig};

    fn manager() -> (SimulatedController, PersistentConnection) {
        let controller = SimulatedController::new(SimulatorConfig::default());
        let config = PersistentConfig {
            reconnect: RetryConfig::exponential(3, Duration::ZERO),
            ..PersistentConfig::default()
        };
        let manager = PersistentConnection::new(Arc::new(controller.clone()), config);
        (controller, manager)
    }

    #[test]
    fn test_starts_disconnected() {
        let (_, manager) = manager();
        assert_eq!(manager.state(), LinkState::Disconnected);
        assert!(manager.last_heartbeat().is_none());
    }

    #[test]
    fn test_first_use_connects() {
        let (controller, manager) = manager();
        {
            let conn = manager.get_persistent_connection().unwrap();
            assert!(conn.is_healthy());
        }
        assert_eq!(manager.state(), LinkState::Connected);
        assert_eq!(manager.rebuilds(), 0);
        assert_eq!(controller.open_sessions(), 1);
    }

    #[test]
    fn test_second_lease_is_busy() {
        let (_, manager) = manager();
        let conn = ConnectionSource::acquire(&manager).unwrap();
        assert!(matches!(
            ConnectionSource::acquire(&manager),
            Err(PoolError::Busy)
        ));
        ConnectionSource::release(&manager, conn);
        assert!(ConnectionSource::acquire(&manager).is_ok());
    }
}
