//! Tests for CLI structure and flag handling

use clap::Parser;
use pretty_assertions::assert_eq;
use regbench_cli::{Cli, Commands, RunArgs, SimulatorArgs, build_sinks, summary_table};
use regbench_core::{HarnessConfig, ReportSettings, RunReport, StatsAggregate};

#[test]
fn test_cli_parsing_help() {
    assert!(Cli::try_parse_from(["regbench", "--help"]).is_err());
}

#[test]
fn test_commands_are_recognized() {
    for command in ["multi-master", "precision", "long-connection", "show-config"] {
        let err = Cli::try_parse_from(["regbench", command, "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp, "{command}");
    }
    assert!(Cli::try_parse_from(["regbench", "tools-list"]).is_err());
}

#[test]
fn test_multi_master_flags() {
    let cli = Cli::try_parse_from([
        "regbench",
        "multi-master",
        "--duration",
        "90",
        "--seed",
        "4",
        "--sim-latency-ms",
        "1.5",
        "--sim-fail-every",
        "100",
        "--sim-link-drops",
    ])
    .unwrap();

    let Commands::MultiMaster(run) = cli.command else {
        panic!("expected multi-master");
    };
    assert_eq!(run.duration, Some(90.0));
    assert_eq!(run.seed, Some(4));
    assert_eq!(run.cycles, None);
    assert_eq!(
        run.simulator,
        SimulatorArgs {
            latency_ms: 1.5,
            fail_every: Some(100),
            link_drops: true,
        }
    );
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "regbench",
        "precision",
        "--cycle-ms",
        "50",
        "--log-level",
        "debug",
        "--json-logs",
        "--config",
        "bench.toml",
    ])
    .unwrap();

    assert_eq!(cli.log_level.as_deref(), Some("debug"));
    assert!(cli.json_logs);
    assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("bench.toml")));
    match cli.command {
        Commands::Precision { cycle_ms, .. } => assert_eq!(cycle_ms, 50.0),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_long_connection_concurrency() {
    let cli = Cli::try_parse_from(["regbench", "long-connection", "--concurrency", "5"]).unwrap();
    match cli.command {
        Commands::LongConnection { concurrency, run } => {
            assert_eq!(concurrency, Some(5));
            assert_eq!(run, RunArgs::default());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_cycles_alone_replace_the_duration_limit() {
    let mut config = HarnessConfig::default();
    RunArgs {
        cycles: Some(500),
        ..RunArgs::default()
    }
    .apply(&mut config);
    assert_eq!(config.run.max_cycles, Some(500));
    assert_eq!(config.run.duration_secs, 0.0);
    config.validate().unwrap();

    let mut config = HarnessConfig::default();
    RunArgs {
        cycles: Some(500),
        duration: Some(20.0),
        seed: Some(1),
        ..RunArgs::default()
    }
    .apply(&mut config);
    assert_eq!(config.run.duration_secs, 20.0);
    assert_eq!(config.run.seed, Some(1));
}

#[test]
fn test_simulated_controller_covers_register_ranges() {
    let config = HarnessConfig::default();
    let controller = SimulatorArgs::default().controller(&config);
    assert_eq!(controller.holding_register(999), Some(0));
    assert_eq!(controller.holding_register(1000), None);
}

#[test]
fn test_sinks_follow_report_settings() {
    assert_eq!(build_sinks(&ReportSettings::default()).len(), 1);

    let dir = tempfile::tempdir().unwrap();
    let settings = ReportSettings {
        json_lines: Some(dir.path().join("runs.jsonl")),
        text_dir: Some(dir.path().join("reports")),
    };
    assert_eq!(build_sinks(&settings).len(), 3);
}

#[test]
fn test_summary_table_lists_every_report() {
    let ok = RunReport::new("master-1", chrono_now(), 1.0, 10, StatsAggregate::default());
    let failed = RunReport::failed("master-2", chrono_now(), "worker panicked: boom");

    let table = summary_table(&[ok, failed]);
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("master-1"));
    assert!(lines[1].ends_with("ok"));
    assert!(lines[2].ends_with("worker panicked: boom"));
}

fn chrono_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
