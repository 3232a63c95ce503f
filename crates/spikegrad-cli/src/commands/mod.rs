//! CLI command implementations for spikegrad

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::error::CliResult;

pub mod init;
pub mod run;
pub mod train;

/// spikegrad - surrogate-gradient training of spiking networks
#[derive(Parser, Debug)]
#[command(
    name = "spikegrad",
    version,
    about = "Simulate and train LIF spiking networks with surrogate gradients",
    long_about = "spikegrad builds a small LIF network from a TOML experiment file, \
                  drives it with synthetic Poisson spike trains and trains its synaptic \
                  weights end-to-end with backpropagation through time."
)]
pub struct SpikegradCli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Experiment configuration file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the default experiment file
    Init(init::InitCommand),

    /// Roll the untrained network out on synthetic data
    Run(run::RunCommand),

    /// Train the network with surrogate gradients
    Train(train::TrainCommand),
}

impl SpikegradCli {
    /// Execute the CLI command
    pub fn execute(self) -> CliResult<()> {
        let config = self.config;
        match self.command {
            Commands::Init(cmd) => cmd.execute(),
            Commands::Run(cmd) => cmd.execute(config),
            Commands::Train(cmd) => cmd.execute(config),
        }
    }
}

/// Write a pretty JSON report
pub(crate) fn write_report(path: &std::path::Path, report: &serde_json::Value) -> CliResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    tracing::info!("Saved report to {}", path.display());
    Ok(())
}
