//! Blocking connection pool behaviour against the simulated controller

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use regbench_transport::*;

fn pool(capacity: usize) -> (SimulatedController, Arc<ConnectionPool>) {
    let controller = SimulatedController::new(SimulatorConfig::default());
    let config = PoolConfig {
        capacity,
        connect_retry: RetryConfig::fixed(3, Duration::ZERO),
        ..PoolConfig::default()
    };
    let pool = Arc::new(ConnectionPool::new(Arc::new(controller.clone()), config));
    (controller, pool)
}

// ============================================================================
// Lease / Release
// ============================================================================

#[test]
fn test_acquire_release_round_trip() {
    let (_, pool) = pool(3);
    pool.warm_up();

    let conn = pool.acquire().unwrap();
    assert_eq!(pool.idle_len(), 2);
    pool.release(conn);
    assert_eq!(pool.idle_len(), 3);
}

#[test]
fn test_idle_reuse_does_not_probe() {
    let (controller, pool) = pool(1);
    pool.warm_up();
    let probes = controller.probes();

    let conn = pool.acquire().unwrap();
    assert_eq!(controller.probes(), probes);

    // Release performs one real round trip
    pool.release(conn);
    assert_eq!(controller.probes(), probes + 1);
}

#[test]
fn test_release_of_dead_connection_closes_it() {
    let (controller, pool) = pool(2);
    let conn = pool.acquire().unwrap();
    controller.drop_all_links();
    pool.release(conn);

    assert_eq!(pool.idle_len(), 0);
    assert_eq!(controller.open_sessions(), 0);
    assert_eq!(pool.stats().connections_destroyed, 1);
}

#[test]
fn test_pool_shrinks_then_replenishes_lazily() {
    let (controller, pool) = pool(3);
    pool.warm_up();
    let leases: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();

    controller.drop_all_links();
    for conn in leases {
        pool.release(conn);
    }
    assert!(pool.is_empty());

    let conn = pool.acquire().unwrap();
    assert!(conn.is_healthy());
    assert_eq!(pool.stats().connections_created, 4);
}

#[test]
fn test_operation_failure_marks_lease_broken() {
    let controller = SimulatedController::new(SimulatorConfig {
        fail_every: Some(1),
        failure: SimulatedFailure::LinkDrop,
        ..SimulatorConfig::default()
    });
    let pool = ConnectionPool::new(
        Arc::new(controller.clone()),
        PoolConfig {
            connect_retry: RetryConfig::fixed(1, Duration::ZERO),
            ..PoolConfig::default()
        },
    );

    let mut conn = pool.acquire().unwrap();
    let err = conn.read_registers(RegisterKind::Holding, 0, 4).unwrap_err();
    assert!(err.is_connection_level());
    assert_eq!(conn.state(), ConnectionState::Broken);

    pool.replace(conn).unwrap();
    assert_eq!(pool.idle_len(), 1);
}

// ============================================================================
// Connect Retries
// ============================================================================

#[test]
fn test_connect_retries_until_success() {
    let (controller, pool) = pool(1);
    controller.refuse_next_connects(2);

    let conn = pool.acquire().unwrap();
    assert!(conn.is_healthy());
    assert_eq!(pool.stats().failed_connects, 2);
}

#[test]
fn test_failed_test_read_rejects_new_session() {
    let (controller, pool) = pool(1);
    controller.fail_next_probes(3);

    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, PoolError::Exhausted { attempts: 3, .. }));
    assert!(err.to_string().contains("test read failed"));
    assert_eq!(controller.open_sessions(), 0);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_parallel_workers_share_pool() {
    let (controller, pool) = pool(3);
    pool.warm_up();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..50u16 {
                    let mut conn = pool.acquire().unwrap();
                    conn.write_registers(i, &[i]).unwrap();
                    pool.release(conn);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(pool.idle_len() <= pool.capacity());
    assert_eq!(controller.open_sessions(), pool.idle_len());
    assert_eq!(controller.operations(), 300);
}

#[test]
fn test_close_all_closes_every_idle_session() {
    let (controller, pool) = pool(3);
    pool.warm_up();
    assert_eq!(pool.close_all(), 3);
    assert_eq!(controller.open_sessions(), 0);
    assert_eq!(pool.close_all(), 0);
}
