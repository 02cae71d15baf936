mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

const LOG_ENV: &str = "CTDLABEL_LOG";
const DEFAULT_LOG_FILTER: &str = "ctdlabel=info";

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();
    let operation = cli.command.name();
    match commands::run(cli) {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            commands::report_error(operation, &err);
            ExitCode::FAILURE
        }
    }
}

// stdout carries JSON only; logs go to stderr.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
