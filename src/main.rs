mod archive;
mod classify;
mod cli;
mod config;
mod error;
mod fetch;
mod manifest;
mod reconcile;
mod update;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let parsed = cli::parse_args(&args)?;
    init_tracing(parsed.verbosity());
    cli::run(parsed)
}

fn init_tracing(verbosity: cli::CliVerbosity) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.filter()));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
