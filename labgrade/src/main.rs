//! Grader for the xv6 lazy page allocation lab.
//!
//! Boots the kernel through `make qemu`, scripts its shell, and prints one
//! line per test plus the total score. Test outcomes never change the exit
//! code; only harness failures (bad configuration, a broken build) do.

#![forbid(unsafe_code)]

mod lazy;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use labgrade_common::{
    GradeConfig, LogConfig, ReportMode, Runner, Scheduler, TestRegistry, init_logging,
    report_schema,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "grade-lab-lazy")]
#[command(author, version, about = "Grade the xv6 lazy page allocation lab")]
struct Cli {
    /// Also write the JSON report to this path
    json: Option<PathBuf>,

    /// Only run tests whose id or name starts with this (repeatable)
    #[arg(long = "only", value_name = "TEST")]
    only: Vec<String>,

    /// Directory holding the xv6 Makefile
    #[arg(short = 'C', long, default_value = ".")]
    dir: PathBuf,

    /// Print the JSON schema of the report and exit
    #[arg(long)]
    schema: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    if cli.schema {
        println!("{}", serde_json::to_string_pretty(&report_schema())?);
        return Ok(());
    }

    let mut config = GradeConfig::from_env().context("invalid GRADE_* environment")?;
    if config.save_path.value.is_relative() {
        config.save_path.value = cli.dir.join(&config.save_path.value);
    }

    let mut registry = TestRegistry::new();
    lazy::register(&mut registry).context("declaring lab tests")?;

    let mut runner = Runner::new(&config, &cli.dir);
    let report = Scheduler::new(registry)
        .with_filters(cli.only)
        .run(&mut runner)
        .context("grading aborted")?;

    print!("{}", report.render(ReportMode::Human)?);

    if let Some(path) = cli.json {
        std::fs::write(&path, report.render(ReportMode::Json)?)
            .with_context(|| format!("writing JSON report to {}", path.display()))?;
        info!(path = %path.display(), "Wrote JSON report");
    }

    Ok(())
}
