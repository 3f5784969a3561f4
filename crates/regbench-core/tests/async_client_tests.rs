//! Cooperative long-connection client

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use regbench_core::{AsyncClientConfig, AsyncLongConnectionClient, SchedulerConfig, StopSignal};
use regbench_transport::{
    AsyncConnectionPool, AsyncPoolConfig, SimulatedController, SimulatedFailure, SimulatorConfig,
};

fn client(controller: &SimulatedController, max_cycles: u64) -> AsyncLongConnectionClient {
    let pool = AsyncConnectionPool::new(
        Arc::new(controller.clone()),
        AsyncPoolConfig {
            size: 1,
            rebuild_attempts: 1,
            rebuild_delay: Duration::ZERO,
            ..AsyncPoolConfig::default()
        },
    );
    let config = AsyncClientConfig {
        scheduler: SchedulerConfig {
            warmup_cycles: 0,
            ..SchedulerConfig::with_target(Duration::from_millis(1))
        },
        max_cycles: Some(max_cycles),
        seed: Some(5),
        ..AsyncClientConfig::default()
    };
    AsyncLongConnectionClient::new(config, Arc::new(pool))
}

#[tokio::test]
async fn test_batches_run_concurrently_on_one_session() {
    let controller = SimulatedController::new(SimulatorConfig {
        latency: Duration::from_millis(2),
        ..SimulatorConfig::default()
    });

    let report = client(&controller, 20).run(StopSignal::new()).await;

    assert_eq!(report.cycles_run, 20);
    assert_eq!(report.stats.total_operations, 60);
    assert_eq!(report.success_rate, 100.0);
    assert_eq!(report.stats.cycles.count, 20);
    // Three 2 ms operations overlap, so a cycle stays well below 6 ms
    assert!(report.stats.cycles.mean_ms < 5.0, "{}", report.stats.cycles.mean_ms);
    assert_eq!(controller.connects(), 1);
    assert_eq!(controller.open_sessions(), 0);
}

#[tokio::test]
async fn test_dropped_link_is_rebuilt() {
    let controller = SimulatedController::new(SimulatorConfig {
        fail_every: Some(4),
        failure: SimulatedFailure::LinkDrop,
        ..SimulatorConfig::default()
    });

    let report = client(&controller, 12).run(StopSignal::new()).await;

    assert!(report.completed());
    assert_eq!(report.stats.total_operations, 36);
    assert!(report.stats.failed_operations > 0);
    assert_eq!(report.stats.connection_failures, 0);
    assert!(controller.connects() > 1);
    assert_eq!(controller.open_sessions(), 0);
}

#[tokio::test]
async fn test_unreachable_controller_counts_connection_failures() {
    let controller = SimulatedController::new(SimulatorConfig::default());
    controller.set_offline(true);

    let report = client(&controller, 3).run(StopSignal::new()).await;

    assert!(report.completed());
    assert_eq!(report.cycles_run, 3);
    assert_eq!(report.stats.connection_failures, 3);
    assert_eq!(report.stats.total_operations, 0);
}

#[tokio::test]
async fn test_stopped_client_runs_no_cycles() {
    let controller = SimulatedController::new(SimulatorConfig::default());
    let stop = StopSignal::new();
    stop.stop();

    let report = client(&controller, 100).run(stop).await;
    assert_eq!(report.cycles_run, 0);
    assert_eq!(report.stats.total_operations, 0);
}
