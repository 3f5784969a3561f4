//! End-of-run reports and where they go.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::stats::StatsAggregate;

/// Summary of one worker's run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Worker label
    pub label: String,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end
    pub finished_at: DateTime<Utc>,
    /// Run length in seconds
    pub duration_secs: f64,
    /// Cycles executed, warm-up included
    pub cycles_run: u64,
    /// Operations per second over the whole run
    pub qps: f64,
    /// Success rate in percent
    pub success_rate: f64,
    /// Finalized statistics
    pub stats: StatsAggregate,
    /// Error that ended the worker early, if any
    pub fatal_error: Option<String>,
}

impl RunReport {
    /// Assemble a report from finalized statistics
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_secs: f64,
        cycles_run: u64,
        stats: StatsAggregate,
    ) -> Self {
        let qps = if duration_secs > 0.0 {
            stats.total_operations as f64 / duration_secs
        } else {
            0.0
        };
        Self {
            label: label.into(),
            started_at,
            finished_at: Utc::now(),
            duration_secs,
            cycles_run,
            qps,
            success_rate: stats.success_rate(),
            stats,
            fatal_error: None,
        }
    }

    /// Report for a worker that died before producing statistics
    #[must_use]
    pub fn failed(label: impl Into<String>, started_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        let finished_at = Utc::now();
        let duration_secs = (finished_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            label: label.into(),
            started_at,
            finished_at,
            duration_secs,
            cycles_run: 0,
            qps: 0.0,
            success_rate: 0.0,
            stats: StatsAggregate::default(),
            fatal_error: Some(error.into()),
        }
    }

    /// Whether the worker ran to its limit
    #[must_use]
    pub const fn completed(&self) -> bool {
        self.fatal_error.is_none()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.stats;
        writeln!(f, "=== Load test report: {} ===", self.label)?;
        writeln!(f, "Finished:        {}", self.finished_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "Duration:        {:.2}s", self.duration_secs)?;
        writeln!(f, "Total requests:  {}", stats.total_operations)?;
        writeln!(f, "Successful:      {}", stats.successful_operations)?;
        writeln!(f, "Failed:          {}", stats.failed_operations)?;
        writeln!(f, "QPS:             {:.2}", self.qps)?;
        writeln!(f, "Success rate:    {:.2}%", self.success_rate)?;
        writeln!(f, "No connection:   {}", stats.connection_failures)?;
        writeln!(f, "Forced drops:    {}", stats.injected_disconnects)?;
        writeln!(f, "--- Cycles ({}) ---", stats.cycles.count)?;
        writeln!(f, "Mean:            {:.6}ms", stats.cycles.mean_ms)?;
        writeln!(f, "Max:             {:.6}ms", stats.cycles.max_ms)?;
        writeln!(f, "Min:             {:.6}ms", stats.cycles.min_ms)?;
        writeln!(f, "Jitter:          {:.6}ms", stats.cycles.jitter_ms)?;
        writeln!(f, "--- Latency ({}) ---", stats.latency.count)?;
        writeln!(f, "Mean:            {:.3}ms", stats.latency.mean_ms)?;
        writeln!(f, "Min / Max:       {:.3}ms / {:.3}ms", stats.latency.min_ms, stats.latency.max_ms)?;
        writeln!(
            f,
            "p50 / p95 / p99: {:.3}ms / {:.3}ms / {:.3}ms",
            stats.latency.p50_ms, stats.latency.p95_ms, stats.latency.p99_ms
        )?;
        for (kind, summary) in &stats.per_kind {
            writeln!(
                f,
                "  {kind:<13} {:>8} ops {:>6} failed  mean {:.3}ms",
                summary.operations, summary.failures, summary.mean_ms
            )?;
        }
        if let Some(error) = &self.fatal_error {
            writeln!(f, "Stopped early:   {error}")?;
        }
        Ok(())
    }
}

/// Destination for finished reports.
///
/// Publishing never fails the run; sinks log their own errors.
pub trait ReportSink: Send + Sync {
    /// Hand over one report
    fn publish(&self, report: &RunReport);
}

impl ReportSink for Vec<Box<dyn ReportSink>> {
    fn publish(&self, report: &RunReport) {
        for sink in self {
            sink.publish(report);
        }
    }
}

/// Logs each report through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn publish(&self, report: &RunReport) {
        info!(
            worker = %report.label,
            total = report.stats.total_operations,
            success_rate = report.success_rate,
            qps = report.qps,
            p99_ms = report.stats.latency.p99_ms,
            jitter_ms = report.stats.cycles.jitter_ms,
            "\n{}",
            report
        );
    }
}

/// Appends one JSON object per report to a file
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    /// Sink writing to `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append(&self, report: &RunReport) -> std::io::Result<()> {
        let line = serde_json::to_string(report)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl ReportSink for JsonLinesSink {
    fn publish(&self, report: &RunReport) {
        if let Err(e) = self.append(report) {
            warn!(path = %self.path.display(), "Failed to append report: {}", e);
        }
    }
}

/// Writes each report as a timestamped text file
#[derive(Debug, Clone)]
pub struct TextFileSink {
    dir: PathBuf,
}

impl TextFileSink {
    /// Sink writing into `dir`, created on first use
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write(&self, report: &RunReport) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let name = format!(
            "report_{}_{}.txt",
            report.label,
            report.finished_at.format("%Y%m%d_%H%M%S")
        );
        let path = self.dir.join(name);
        fs::write(&path, report.to_string())?;
        Ok(path)
    }
}

impl ReportSink for TextFileSink {
    fn publish(&self, report: &RunReport) {
        match self.write(report) {
            Ok(path) => info!(worker = %report.label, "Report saved to {}", path.display()),
            Err(e) => warn!(dir = %self.dir.display(), "Failed to save report: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsRecorder;
    use crate::workload::OperationKind;
    use std::time::Duration;

    fn sample_report() -> RunReport {
        let mut recorder = StatsRecorder::default();
        for _ in 0..9 {
            recorder.record_operation(OperationKind::ReadHolding, Duration::from_millis(1), true);
        }
        recorder.record_operation(OperationKind::Write, Duration::from_millis(1), false);
        RunReport::new("master-1", Utc::now(), 2.0, 10, recorder.finalize())
    }

    #[test]
    fn test_derived_rates() {
        let report = sample_report();
        assert_eq!(report.qps, 5.0);
        assert_eq!(report.success_rate, 90.0);
        assert!(report.completed());
    }

    #[test]
    fn test_display_mentions_key_figures() {
        let text = sample_report().to_string();
        assert!(text.contains("master-1"));
        assert!(text.contains("Success rate:    90.00%"));
        assert!(text.contains("read-holding"));
    }

    #[test]
    fn test_failed_report() {
        let report = RunReport::failed("m", Utc::now(), "worker panicked");
        assert!(!report.completed());
        assert_eq!(report.stats, StatsAggregate::default());
        assert!(report.to_string().contains("Stopped early:   worker panicked"));
    }

    #[test]
    fn test_json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.jsonl");
        let sink = JsonLinesSink::new(&path);
        sink.publish(&sample_report());
        sink.publish(&sample_report());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: RunReport = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.label, "master-1");
        assert_eq!(parsed.stats.total_operations, 10);
    }

    #[test]
    fn test_text_sink_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("reports");
        TextFileSink::new(&target).publish(&sample_report());
        let files: Vec<_> = std::fs::read_dir(&target).unwrap().collect();
        assert_eq!(files.len(), 1);
    }
}
