// src/main.rs

use std::process::ExitCode;

use clap::Parser;

use suiteflow::cli::CliArgs;
use suiteflow::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = CliArgs::parse();
    init_logging(args.log_level)?;
    suiteflow::run(args).await
}
