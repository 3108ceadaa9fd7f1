// src/cli.rs

//! Command-line arguments for the `suiteflow` binary.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "suiteflow")]
#[command(about = "Run a test-management job graph with retries and recovery", long_about = None)]
pub struct CliArgs {
    /// Orchestrator configuration (defaults are used when the file is missing)
    #[arg(short, long, default_value = "suiteflow.toml")]
    pub config: PathBuf,

    /// Job definition: a job spec with `[[node]]` tables
    #[arg(short, long)]
    pub job: PathBuf,

    /// Validate the graph and print the execution plan without running it
    #[arg(long)]
    pub dry_run: bool,

    /// Recorded as the job's `triggered_by`
    #[arg(long, default_value = "cli")]
    pub triggered_by: String,

    /// Overrides SUITEFLOW_LOG
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,
}
