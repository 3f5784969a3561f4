//! In-memory stand-in for a register controller.
//!
//! The simulator exposes the same connector/transport traits as a real
//! endpoint and adds knobs for latency, periodic failures, refused connects
//! and forced link drops. It has no wire format; requests are served straight
//! from two register banks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::core::{
    AsyncConnector, AsyncTransport, Connector, RegisterKind, Transport, TransportConfig,
    TransportError, TransportResult,
};

/// Exception code for an address range outside the register bank
pub const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
/// Exception code used for injected device failures
pub const SERVER_DEVICE_FAILURE: u8 = 0x04;

/// How an injected operation failure manifests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFailure {
    /// The device answers with an exception; the session survives
    Exception,
    /// The session drops mid-request
    LinkDrop,
}

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Size of the input register bank
    pub input_registers: usize,
    /// Size of the holding register bank
    pub holding_registers: usize,
    /// Service time added to every read/write
    pub latency: Duration,
    /// Fail every n-th read/write across all sessions
    pub fail_every: Option<u64>,
    /// Kind of injected failure
    pub failure: SimulatedFailure,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            input_registers: 10,
            holding_registers: 1000,
            latency: Duration::ZERO,
            fail_every: None,
            failure: SimulatedFailure::Exception,
        }
    }
}

#[derive(Debug)]
struct ControllerState {
    config: SimulatorConfig,
    input: Mutex<Vec<u16>>,
    holding: Mutex<Vec<u16>>,
    operations: AtomicU64,
    probes: AtomicU64,
    connects: AtomicU64,
    open_sessions: AtomicUsize,
    offline: AtomicBool,
    refuse_connects: AtomicU32,
    failing_probes: AtomicU32,
    link_generation: AtomicU64,
}

/// Shared handle to one simulated controller
#[derive(Debug, Clone)]
pub struct SimulatedController {
    state: Arc<ControllerState>,
}

impl SimulatedController {
    /// Create a controller with zeroed holding registers and input register
    /// `i` holding the value `i`
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let input = (0..config.input_registers).map(|i| i as u16).collect();
        let holding = vec![0; config.holding_registers];
        Self {
            state: Arc::new(ControllerState {
                config,
                input: Mutex::new(input),
                holding: Mutex::new(holding),
                operations: AtomicU64::new(0),
                probes: AtomicU64::new(0),
                connects: AtomicU64::new(0),
                open_sessions: AtomicUsize::new(0),
                offline: AtomicBool::new(false),
                refuse_connects: AtomicU32::new(0),
                failing_probes: AtomicU32::new(0),
                link_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Sessions opened and not yet closed by their owner
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    /// Reads and writes served, failed ones included; probes excluded
    #[must_use]
    pub fn operations(&self) -> u64 {
        self.state.operations.load(Ordering::SeqCst)
    }

    /// Health probes served
    #[must_use]
    pub fn probes(&self) -> u64 {
        self.state.probes.load(Ordering::SeqCst)
    }

    /// Successful connects
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Refuse every connect while `offline` is set
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Refuse the next `count` connects
    pub fn refuse_next_connects(&self, count: u32) {
        self.state.refuse_connects.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` health probes
    pub fn fail_next_probes(&self, count: u32) {
        self.state.failing_probes.store(count, Ordering::SeqCst);
    }

    /// Silently kill every established session
    pub fn drop_all_links(&self) {
        self.state.link_generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Current value of a holding register
    #[must_use]
    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.state.holding.lock().get(address as usize).copied()
    }

    fn open_session(&self, config: &TransportConfig) -> TransportResult<SessionCore> {
        let state = &self.state;
        if state.offline.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(format!(
                "{} unreachable",
                config.endpoint()
            )));
        }
        let refused = state
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectionFailed(format!(
                "{} refused the connection",
                config.endpoint()
            )));
        }

        state.connects.fetch_add(1, Ordering::SeqCst);
        state.open_sessions.fetch_add(1, Ordering::SeqCst);
        trace!(endpoint = %config.endpoint(), "simulated session opened");
        Ok(SessionCore {
            state: Arc::clone(state),
            generation: state.link_generation.load(Ordering::SeqCst),
            open: AtomicBool::new(true),
            max_read: config.max_registers_per_read,
            max_write: config.max_registers_per_write,
        })
    }
}

impl Connector for SimulatedController {
    fn connect(&self, config: &TransportConfig) -> TransportResult<Box<dyn Transport>> {
        Ok(Box::new(SimulatedSession {
            core: self.open_session(config)?,
        }))
    }
}

#[async_trait]
impl AsyncConnector for SimulatedController {
    async fn connect(&self, config: &TransportConfig) -> TransportResult<Arc<dyn AsyncTransport>> {
        Ok(Arc::new(SimulatedAsyncSession {
            core: self.open_session(config)?,
        }))
    }
}

/// Request handling shared by the blocking and cooperative sessions
#[derive(Debug)]
struct SessionCore {
    state: Arc<ControllerState>,
    generation: u64,
    open: AtomicBool,
    max_read: u16,
    max_write: u16,
}

impl SessionCore {
    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
            && self.generation == self.state.link_generation.load(Ordering::SeqCst)
    }

    fn check_live(&self) -> TransportResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if self.generation != self.state.link_generation.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost(
                "connection reset by peer".to_string(),
            ));
        }
        Ok(())
    }

    /// Count the operation and decide whether it is one of the injected
    /// failures
    fn next_operation(&self) -> TransportResult<()> {
        let index = self.state.operations.fetch_add(1, Ordering::SeqCst) + 1;
        match self.state.config.fail_every {
            Some(n) if n > 0 && index % n == 0 => match self.state.config.failure {
                SimulatedFailure::Exception => Err(TransportError::Exception {
                    code: SERVER_DEVICE_FAILURE,
                    message: "server device failure".to_string(),
                }),
                SimulatedFailure::LinkDrop => {
                    self.close();
                    Err(TransportError::ConnectionLost(
                        "link dropped mid-request".to_string(),
                    ))
                }
            },
            _ => Ok(()),
        }
    }

    fn read(&self, kind: RegisterKind, address: u16, count: u16) -> TransportResult<Vec<u16>> {
        self.check_live()?;
        if count == 0 || count > self.max_read {
            return Err(TransportError::InvalidRequest(format!(
                "read count {count} outside 1..={}",
                self.max_read
            )));
        }
        self.next_operation()?;

        let bank = match kind {
            RegisterKind::Input => self.state.input.lock(),
            RegisterKind::Holding => self.state.holding.lock(),
        };
        let start = address as usize;
        let end = start + count as usize;
        bank.get(start..end)
            .map(<[u16]>::to_vec)
            .ok_or_else(|| TransportError::Exception {
                code: ILLEGAL_DATA_ADDRESS,
                message: format!("{kind} registers {start}..{end} out of range"),
            })
    }

    fn write(&self, address: u16, values: &[u16]) -> TransportResult<()> {
        self.check_live()?;
        if values.is_empty() || values.len() > self.max_write as usize {
            return Err(TransportError::InvalidRequest(format!(
                "write count {} outside 1..={}",
                values.len(),
                self.max_write
            )));
        }
        self.next_operation()?;

        let mut bank = self.state.holding.lock();
        let start = address as usize;
        let end = start + values.len();
        let Some(slot) = bank.get_mut(start..end) else {
            return Err(TransportError::Exception {
                code: ILLEGAL_DATA_ADDRESS,
                message: format!("holding registers {start}..{end} out of range"),
            });
        };
        slot.copy_from_slice(values);
        Ok(())
    }

    fn probe(&self) -> TransportResult<()> {
        self.check_live()?;
        self.state.probes.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .state
            .failing_probes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Timeout);
        }
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        self.close();
    }
}

/// Blocking session with a simulated controller
#[derive(Debug)]
pub struct SimulatedSession {
    core: SessionCore,
}

impl SimulatedSession {
    fn service_time(&self) {
        let latency = self.core.state.config.latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
    }
}

impl Transport for SimulatedSession {
    fn read_registers(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> TransportResult<Vec<u16>> {
        self.service_time();
        self.core.read(kind, address, count)
    }

    fn write_registers(&mut self, address: u16, values: &[u16]) -> TransportResult<()> {
        self.service_time();
        self.core.write(address, values)
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    fn probe(&mut self) -> TransportResult<()> {
        self.core.probe()
    }

    fn close(&mut self) -> TransportResult<()> {
        self.core.close();
        Ok(())
    }
}

/// Cooperative session with a simulated controller
#[derive(Debug)]
pub struct SimulatedAsyncSession {
    core: SessionCore,
}

impl SimulatedAsyncSession {
    async fn service_time(&self) {
        let latency = self.core.state.config.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl AsyncTransport for SimulatedAsyncSession {
    async fn read_registers(
        &self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> TransportResult<Vec<u16>> {
        self.service_time().await;
        self.core.read(kind, address, count)
    }

    async fn write_registers(&self, address: u16, values: &[u16]) -> TransportResult<()> {
        self.service_time().await;
        self.core.write(address, values)
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    async fn probe(&self) -> TransportResult<()> {
        self.core.probe()
    }

    async fn close(&self) -> TransportResult<()> {
        self.core.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn connect(controller: &SimulatedController) -> Box<dyn Transport> {
        Connector::connect(controller, &TransportConfig::default()).unwrap()
    }

    #[test]
    fn test_write_then_read_holding() {
        let controller = SimulatedController::new(SimulatorConfig::default());
        let mut session = connect(&controller);
        session.write_registers(10, &[7, 8, 9]).unwrap();
        let values = session.read_registers(RegisterKind::Holding, 10, 3).unwrap();
        assert_eq!(values, vec![7, 8, 9]);
        assert_eq!(controller.holding_register(11), Some(8));
        assert_eq!(controller.operations(), 2);
    }

    #[test]
    fn test_out_of_range_is_device_exception() {
        let controller = SimulatedController::new(SimulatorConfig::default());
        let mut session = connect(&controller);
        let err = session
            .read_registers(RegisterKind::Input, 8, 5)
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Exception {
                code: ILLEGAL_DATA_ADDRESS,
                ..
            }
        ));
        assert!(session.is_connected());
    }

    #[test]
    fn test_fail_every_counts_operations_only() {
        let controller = SimulatedController::new(SimulatorConfig {
            fail_every: Some(3),
            ..SimulatorConfig::default()
        });
        let mut session = connect(&controller);
        session.probe().unwrap();
        assert!(session.read_registers(RegisterKind::Holding, 0, 1).is_ok());
        assert!(session.read_registers(RegisterKind::Holding, 0, 1).is_ok());
        session.probe().unwrap();
        assert!(session.read_registers(RegisterKind::Holding, 0, 1).is_err());
        assert_eq!(controller.probes(), 2);
    }

    #[test]
    fn test_drop_all_links_kills_sessions() {
        let controller = SimulatedController::new(SimulatorConfig::default());
        let mut session = connect(&controller);
        controller.drop_all_links();
        assert!(!session.is_connected());
        assert!(matches!(
            session.probe(),
            Err(TransportError::ConnectionLost(_))
        ));
        // New sessions are unaffected
        let mut fresh = connect(&controller);
        assert!(fresh.probe().is_ok());
    }

    #[test]
    fn test_refused_connects() {
        let controller = SimulatedController::new(SimulatorConfig::default());
        controller.refuse_next_connects(1);
        assert!(Connector::connect(&controller, &TransportConfig::default()).is_err());
        assert!(Connector::connect(&controller, &TransportConfig::default()).is_ok());
    }

    #[test]
    fn test_open_sessions_tracks_close_and_drop() {
        let controller = SimulatedController::new(SimulatorConfig::default());
        let mut a = connect(&controller);
        let b = connect(&controller);
        assert_eq!(controller.open_sessions(), 2);
        a.close().unwrap();
        a.close().unwrap();
        drop(b);
        assert_eq!(controller.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_async_session_round_trip() {
        let controller = SimulatedController::new(SimulatorConfig::default());
        let session = AsyncConnector::connect(&controller, &TransportConfig::default())
            .await
            .unwrap();
        session.write_registers(0, &[42]).await.unwrap();
        let values = session
            .read_registers(RegisterKind::Holding, 0, 1)
            .await
            .unwrap();
        assert_eq!(values, vec![42]);
        session.close().await.unwrap();
        assert!(!session.is_connected());
    }
}
