//! Statistics collection
//!
//! A worker appends raw events to a [`StatsRecorder`]; everything reported at
//! the end of a run is derived from that log by [`StatsRecorder::finalize`].
//! The recorder keeps a few running counters for the periodic status line.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::duration_ms;
use crate::workload::OperationKind;

/// Trailing cycles used for jitter unless configured otherwise
pub const DEFAULT_JITTER_WINDOW: usize = 100;

/// Latency and outcome of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySample {
    /// Operation kind
    pub kind: OperationKind,
    /// Time from request to outcome
    pub latency: Duration,
    /// Whether the operation succeeded
    pub success: bool,
}

/// One entry of the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsEvent {
    /// A register operation completed or failed
    Operation(LatencySample),
    /// A measured (post warm-up) cycle
    Cycle(Duration),
    /// No connection could be leased for a cycle
    ConnectionFailure,
    /// The fault injector tore down every connection
    InjectedDisconnect,
}

/// Append-only statistics log owned by one worker
#[derive(Debug)]
pub struct StatsRecorder {
    jitter_window: usize,
    events: Vec<StatsEvent>,
    total: u64,
    successful: u64,
    recent_cycles: VecDeque<f64>,
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_JITTER_WINDOW)
    }
}

impl StatsRecorder {
    /// Create an empty recorder
    #[must_use]
    pub fn new(jitter_window: usize) -> Self {
        let jitter_window = jitter_window.max(2);
        Self {
            jitter_window,
            events: Vec::new(),
            total: 0,
            successful: 0,
            recent_cycles: VecDeque::with_capacity(jitter_window),
        }
    }

    /// Record an operation outcome
    pub fn record_operation(&mut self, kind: OperationKind, latency: Duration, success: bool) {
        self.total += 1;
        if success {
            self.successful += 1;
        }
        self.events.push(StatsEvent::Operation(LatencySample {
            kind,
            latency,
            success,
        }));
    }

    /// Record a measured cycle
    pub fn record_cycle(&mut self, duration: Duration) {
        if self.recent_cycles.len() == self.jitter_window {
            self.recent_cycles.pop_front();
        }
        self.recent_cycles.push_back(duration_ms(duration));
        self.events.push(StatsEvent::Cycle(duration));
    }

    /// Record a cycle without a usable connection
    pub fn record_connection_failure(&mut self) {
        self.events.push(StatsEvent::ConnectionFailure);
    }

    /// Record a forced disconnect
    pub fn record_injected_disconnect(&mut self) {
        self.events.push(StatsEvent::InjectedDisconnect);
    }

    /// The raw event log
    #[must_use]
    pub fn events(&self) -> &[StatsEvent] {
        &self.events
    }

    /// Operations recorded so far
    #[must_use]
    pub const fn total_operations(&self) -> u64 {
        self.total
    }

    /// Successful operations recorded so far
    #[must_use]
    pub const fn successful_operations(&self) -> u64 {
        self.successful
    }

    /// Running success rate in percent
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        rate(self.successful, self.total)
    }

    /// Mean of the trailing cycle window in milliseconds
    #[must_use]
    pub fn recent_cycle_mean_ms(&self) -> f64 {
        let (front, back) = self.recent_cycles.as_slices();
        if self.recent_cycles.is_empty() {
            return 0.0;
        }
        (front.iter().sum::<f64>() + back.iter().sum::<f64>()) / self.recent_cycles.len() as f64
    }

    /// Derive the run summary from the event log
    #[must_use]
    pub fn finalize(&self) -> StatsAggregate {
        let mut aggregate = StatsAggregate::default();
        let mut latencies = Vec::new();
        let mut per_kind: BTreeMap<OperationKind, Vec<f64>> = BTreeMap::new();
        let mut cycles = Vec::new();

        for event in &self.events {
            match *event {
                StatsEvent::Operation(sample) => {
                    aggregate.total_operations += 1;
                    let kind = aggregate.per_kind.entry(sample.kind).or_default();
                    kind.operations += 1;
                    if sample.success {
                        aggregate.successful_operations += 1;
                        let ms = duration_ms(sample.latency);
                        latencies.push(ms);
                        per_kind.entry(sample.kind).or_default().push(ms);
                    } else {
                        aggregate.failed_operations += 1;
                        kind.failures += 1;
                    }
                }
                StatsEvent::Cycle(duration) => cycles.push(duration_ms(duration)),
                StatsEvent::ConnectionFailure => aggregate.connection_failures += 1,
                StatsEvent::InjectedDisconnect => aggregate.injected_disconnects += 1,
            }
        }

        for (kind, samples) in per_kind {
            let summary = aggregate.per_kind.entry(kind).or_default();
            summary.samples = samples.len() as u64;
            summary.mean_ms = mean(&samples);
        }

        aggregate.cycles = CycleSummary {
            count: cycles.len() as u64,
            mean_ms: mean(&cycles),
            max_ms: cycles.iter().copied().fold(0.0, f64::max),
            min_ms: min_or_zero(&cycles),
            jitter_ms: jitter(&cycles, self.jitter_window),
        };

        latencies.sort_by(f64::total_cmp);
        aggregate.latency = LatencySummary {
            count: latencies.len() as u64,
            mean_ms: mean(&latencies),
            min_ms: latencies.first().copied().unwrap_or(0.0),
            max_ms: latencies.last().copied().unwrap_or(0.0),
            p50_ms: percentile(&latencies, 0.50),
            p95_ms: percentile(&latencies, 0.95),
            p99_ms: percentile(&latencies, 0.99),
        };

        aggregate
    }
}

/// Finalized statistics of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatsAggregate {
    /// Operations attempted
    pub total_operations: u64,
    /// Operations that succeeded
    pub successful_operations: u64,
    /// Operations that failed
    pub failed_operations: u64,
    /// Cycles without a usable connection
    pub connection_failures: u64,
    /// Forced disconnects
    pub injected_disconnects: u64,
    /// Cycle timing
    pub cycles: CycleSummary,
    /// Latency of successful operations
    pub latency: LatencySummary,
    /// Breakdown per operation kind
    pub per_kind: BTreeMap<OperationKind, KindSummary>,
}

impl StatsAggregate {
    /// Success rate in percent; zero for an empty run
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        rate(self.successful_operations, self.total_operations)
    }
}

/// Cycle timing summary, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CycleSummary {
    /// Measured cycles
    pub count: u64,
    /// Mean duration
    pub mean_ms: f64,
    /// Longest cycle
    pub max_ms: f64,
    /// Shortest cycle
    pub min_ms: f64,
    /// Sample standard deviation over the trailing window
    pub jitter_ms: f64,
}

/// Latency summary, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LatencySummary {
    /// Samples
    pub count: u64,
    /// Mean
    pub mean_ms: f64,
    /// Minimum
    pub min_ms: f64,
    /// Maximum
    pub max_ms: f64,
    /// Median
    pub p50_ms: f64,
    /// 95th percentile
    pub p95_ms: f64,
    /// 99th percentile
    pub p99_ms: f64,
}

/// Per-kind breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct KindSummary {
    /// Operations attempted
    pub operations: u64,
    /// Operations that failed
    pub failures: u64,
    /// Latency samples (successful operations)
    pub samples: u64,
    /// Mean latency of the samples
    pub mean_ms: f64,
}

fn rate(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn min_or_zero(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::min).unwrap_or(0.0)
}

/// Arithmetic mean; zero for an empty slice
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// `sorted[floor(n * k)]`, clamped to the last element; zero when empty.
///
/// `sorted` must be in ascending order.
#[must_use]
pub fn percentile(sorted: &[f64], k: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (sorted.len() as f64 * k).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Sample standard deviation (n - 1 denominator); zero below two values
#[must_use]
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Sample standard deviation of the last `window` cycles
#[must_use]
pub fn jitter(cycles: &[f64], window: usize) -> f64 {
    let start = cycles.len().saturating_sub(window);
    sample_std_dev(&cycles[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_percentile_floor_index() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 0.50), 51.0);
        assert_eq!(percentile(&sorted, 0.95), 96.0);
        assert_eq!(percentile(&sorted, 0.99), 100.0);
        assert_eq!(percentile(&sorted, 1.0), 100.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_std_dev_uses_bessel_correction() {
        // mean 5, squared deviations sum to 32, n - 1 = 7
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((sample_std_dev(&values) - expected).abs() < 1e-12);
        assert_eq!(sample_std_dev(&[3.0]), 0.0);
    }

    #[test]
    fn test_jitter_uses_trailing_window() {
        let mut cycles = vec![100.0, 0.0];
        cycles.extend(std::iter::repeat_n(1.0, 10));
        assert_eq!(jitter(&cycles, 10), 0.0);
        assert!(jitter(&cycles, 12) > 0.0);
    }

    #[test]
    fn test_failures_are_counted_but_not_sampled() {
        let mut recorder = StatsRecorder::default();
        recorder.record_operation(OperationKind::Write, Duration::from_millis(2), true);
        recorder.record_operation(OperationKind::Write, Duration::from_millis(900), false);

        let aggregate = recorder.finalize();
        assert_eq!(aggregate.total_operations, 2);
        assert_eq!(aggregate.failed_operations, 1);
        assert_eq!(aggregate.latency.count, 1);
        assert_eq!(aggregate.latency.max_ms, 2.0);

        let write = &aggregate.per_kind[&OperationKind::Write];
        assert_eq!((write.operations, write.failures, write.samples), (2, 1, 1));
        assert_eq!(recorder.events().len(), 2);
    }

    #[test]
    fn test_recent_cycle_mean_rolls() {
        let mut recorder = StatsRecorder::new(2);
        for ms in [10, 1, 3] {
            recorder.record_cycle(Duration::from_millis(ms));
        }
        assert_eq!(recorder.recent_cycle_mean_ms(), 2.0);
        assert_eq!(recorder.finalize().cycles.max_ms, 10.0);
    }
}
