//! Cycle pacing against the real clock

use std::time::{Duration, Instant};

use regbench_core::{CycleScheduler, SchedulerConfig};

fn scheduler(target: Duration) -> CycleScheduler {
    CycleScheduler::new(SchedulerConfig {
        warmup_cycles: 0,
        ..SchedulerConfig::with_target(target)
    })
}

#[test]
fn test_cycles_never_end_early() {
    let target = Duration::from_millis(5);
    let mut scheduler = scheduler(target);

    let mut durations = Vec::new();
    for _ in 0..20 {
        let start = scheduler.begin();
        std::thread::sleep(Duration::from_micros(200));
        durations.push(scheduler.finish(start).unwrap().duration);
    }

    assert!(durations.iter().all(|d| *d >= target), "{durations:?}");
    durations.sort();
    assert!(durations[10] < target + Duration::from_millis(3), "{durations:?}");
}

#[test]
fn test_one_millisecond_cycles_stay_tight() {
    let target = Duration::from_millis(1);
    let mut scheduler = scheduler(target);

    let mut durations: Vec<Duration> = (0..200)
        .map(|_| {
            let start = scheduler.begin();
            scheduler.finish(start).unwrap().duration
        })
        .collect();

    assert!(durations.iter().all(|d| *d >= target));
    durations.sort();
    let median = durations[durations.len() / 2];
    assert!(median <= Duration::from_micros(1500), "median {median:?}");
}

#[test]
fn test_sub_millisecond_target_spins() {
    let target = Duration::from_micros(500);
    let mut scheduler = scheduler(target);
    for _ in 0..50 {
        let start = scheduler.begin();
        let outcome = scheduler.finish(start).unwrap();
        assert!(outcome.duration >= target);
        assert!(!outcome.overran);
    }
    assert_eq!(scheduler.completed(), 50);
}

#[test]
fn test_overrun_returns_immediately() {
    let mut scheduler = scheduler(Duration::from_millis(2));
    let start = scheduler.begin();
    std::thread::sleep(Duration::from_millis(10));

    let waited = Instant::now();
    let outcome = scheduler.finish(start).unwrap();
    assert!(waited.elapsed() < Duration::from_millis(1));
    assert!(outcome.overran);
    assert!(outcome.duration >= Duration::from_millis(10));
}

#[tokio::test]
async fn test_cooperative_variant_paces_too() {
    let target = Duration::from_millis(4);
    let mut scheduler = scheduler(target);
    let started = Instant::now();
    for _ in 0..5 {
        let start = scheduler.begin();
        let outcome = scheduler.finish_async(start).await.unwrap();
        assert!(outcome.duration >= target);
    }
    assert!(started.elapsed() >= target * 5);
}
