//! Experiment file initialisation

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::{
    config::ExperimentConfig,
    error::{CliError, CliResult},
};

/// Write the default experiment file
#[derive(Args, Debug)]
pub struct InitCommand {
    /// Destination path
    #[arg(short, long, default_value = "spikegrad.toml")]
    pub output: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

impl InitCommand {
    pub fn execute(self) -> CliResult<()> {
        if self.output.exists() && !self.force {
            return Err(CliError::invalid_args(format!(
                "{} already exists (use --force to overwrite)",
                self.output.display()
            )));
        }
        ExperimentConfig::default().save_to_file(&self.output)?;
        info!("Wrote default experiment to {}", self.output.display());
        Ok(())
    }
}
