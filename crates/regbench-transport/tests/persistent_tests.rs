//! Persistent connection manager: heartbeats, rebuilds and teardown

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use regbench_transport::*;

fn manager(heartbeat_interval: Duration) -> (SimulatedController, PersistentConnection) {
    let controller = SimulatedController::new(SimulatorConfig::default());
    let config = PersistentConfig {
        reconnect: RetryConfig::exponential(3, Duration::ZERO),
        health: HealthCheckConfig {
            heartbeat_interval,
            ..HealthCheckConfig::default()
        },
        ..PersistentConfig::default()
    };
    let manager = PersistentConnection::new(Arc::new(controller.clone()), config);
    (controller, manager)
}

#[test]
fn test_default_reconnect_backoff_is_exponential() {
    let config = PersistentConfig::default();
    assert_eq!(config.reconnect.max_attempts, 3);
    assert_eq!(config.reconnect.delay_for(0), Duration::from_secs(1));
    assert_eq!(config.reconnect.delay_for(1), Duration::from_secs(2));
    assert_eq!(config.health.heartbeat_interval, Duration::from_secs(30));
}

#[test]
fn test_recent_heartbeat_skips_probe() {
    let (controller, manager) = manager(Duration::from_secs(30));
    drop(manager.get_persistent_connection().unwrap());
    let probes = controller.probes();

    assert_eq!(
        manager.check_persistent_connection().unwrap(),
        HeartbeatOutcome::Fresh
    );
    assert_eq!(controller.probes(), probes);
}

#[test]
fn test_stale_heartbeat_probes() {
    let (controller, manager) = manager(Duration::ZERO);
    drop(manager.get_persistent_connection().unwrap());
    let before = manager.last_heartbeat().unwrap();
    let probes = controller.probes();

    assert_eq!(
        manager.check_persistent_connection().unwrap(),
        HeartbeatOutcome::Verified
    );
    assert_eq!(controller.probes(), probes + 1);
    assert!(manager.last_heartbeat().unwrap() >= before);
}

#[test]
fn test_failed_heartbeat_rebuilds() {
    let (controller, manager) = manager(Duration::ZERO);
    drop(manager.get_persistent_connection().unwrap());
    controller.drop_all_links();

    assert_eq!(
        manager.check_persistent_connection().unwrap(),
        HeartbeatOutcome::Rebuilt
    );
    assert_eq!(manager.state(), LinkState::Connected);
    assert_eq!(manager.rebuilds(), 1);
    assert_eq!(controller.open_sessions(), 1);
}

#[test]
fn test_get_reconnects_dead_session() {
    let (controller, manager) = manager(Duration::from_secs(30));
    drop(manager.get_persistent_connection().unwrap());
    controller.drop_all_links();

    let mut conn = manager.get_persistent_connection().unwrap();
    assert!(conn.read_registers(RegisterKind::Input, 0, 2).is_ok());
    drop(conn);
    assert_eq!(manager.rebuilds(), 1);
    assert_eq!(controller.connects(), 2);
}

#[test]
fn test_reconnect_exhaustion_is_connect_error() {
    let (controller, manager) = manager(Duration::from_secs(30));
    controller.set_offline(true);

    let err = manager.get_persistent_connection().unwrap_err();
    assert!(matches!(err, PoolError::Connect { attempts: 3, .. }));
    assert_eq!(manager.state(), LinkState::Disconnected);
}

#[test]
fn test_close_is_idempotent() {
    let (controller, manager) = manager(Duration::from_secs(30));
    drop(manager.get_persistent_connection().unwrap());

    assert!(manager.close_persistent_connection());
    assert!(!manager.close_persistent_connection());
    assert_eq!(manager.state(), LinkState::Disconnected);
    assert_eq!(controller.open_sessions(), 0);
}

#[test]
fn test_manager_as_connection_source() {
    let (controller, manager) = manager(Duration::from_secs(30));
    let source: &dyn ConnectionSource = &manager;

    let mut conn = source.acquire().unwrap();
    conn.mark_broken();
    source.discard(conn);
    assert_eq!(manager.state(), LinkState::Disconnected);

    source.replenish().unwrap();
    assert_eq!(manager.state(), LinkState::Connected);
    assert_eq!(controller.open_sessions(), 1);
    assert_eq!(source.close_all(), 1);
}

#[test]
fn test_leased_session_is_not_duplicated() {
    let (controller, manager) = manager(Duration::ZERO);
    let conn = ConnectionSource::acquire(&manager).unwrap();
    assert_eq!(controller.open_sessions(), 1);

    assert_eq!(
        manager.check_persistent_connection().unwrap(),
        HeartbeatOutcome::Leased
    );
    assert!(matches!(
        manager.get_persistent_connection(),
        Err(PoolError::Busy)
    ));
    assert_eq!(controller.open_sessions(), 1);
    assert_eq!(controller.connects(), 1);

    ConnectionSource::release(&manager, conn);
    assert_eq!(
        manager.check_persistent_connection().unwrap(),
        HeartbeatOutcome::Verified
    );
    assert_eq!(controller.open_sessions(), 1);
    assert_eq!(manager.rebuilds(), 0);
}
