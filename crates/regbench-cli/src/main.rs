//! `regbench` binary

use clap::Parser;
use regbench_cli::Cli;

fn main() -> anyhow::Result<()> {
    regbench_cli::run(Cli::parse())
}
