//! # spikegrad CLI
//!
//! Builds the experiment network from a TOML file, rolls it out on synthetic
//! Poisson spike trains and trains it with surrogate gradients.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spikegrad_cli::SpikegradCli;

fn main() {
    let cli = SpikegradCli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    if let Err(err) = cli.execute() {
        error!("Command failed: {}", err);
        std::process::exit(1);
    }
}
