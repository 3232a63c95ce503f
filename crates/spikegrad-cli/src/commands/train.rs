//! Surrogate-gradient training command

use std::path::PathBuf;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use spikegrad_runtime::Trainer;

use crate::{
    commands::write_report,
    config::ExperimentConfig,
    error::CliResult,
};

/// Train the network with surrogate gradients
#[derive(Args, Debug)]
pub struct TrainCommand {
    /// Override the number of epochs
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Override the weight initialisation seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the number of samples
    #[arg(long)]
    pub samples: Option<usize>,

    /// Override the number of time steps
    #[arg(long)]
    pub steps: Option<usize>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Output file for the JSON report
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl TrainCommand {
    pub fn execute(self, config: Option<PathBuf>) -> CliResult<()> {
        let mut experiment = ExperimentConfig::load_or_default(config.as_deref())?;
        if let Some(epochs) = self.epochs {
            experiment.training.epochs = epochs;
        }
        if let Some(seed) = self.seed {
            experiment.network.seed = seed;
        }
        if let Some(samples) = self.samples {
            experiment.data.samples = samples;
        }
        if let Some(steps) = self.steps {
            experiment.data.steps = steps;
        }

        let network = experiment.build_network()?;
        let (inputs, labels) = experiment.generate_data()?;
        let epochs = experiment.training.epochs;
        info!(
            "Training {} -> {} -> {} network for {} epochs",
            experiment.network.input_size,
            experiment.network.hidden_size,
            experiment.network.output_size,
            epochs
        );

        let mut trainer = Trainer::new(network, experiment.training.trainer_config())?;
        let accuracy_before = trainer.evaluate(inputs.view(), &labels)?;
        info!("Accuracy before training: {:.2}%", accuracy_before * 100.0);

        let progress = if self.no_progress {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(epochs as u64)
        };
        match ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} loss {msg}") {
            Ok(style) => progress.set_style(style),
            Err(e) => warn!("Progress style rejected: {}", e),
        }

        let losses = trainer.fit_with(inputs.view(), &labels, epochs, |_, loss| {
            progress.set_message(format!("{:.4}", loss));
            progress.inc(1);
        })?;
        progress.finish_and_clear();

        let accuracy_after = trainer.evaluate(inputs.view(), &labels)?;
        info!("Accuracy after training: {:.2}%", accuracy_after * 100.0);

        if let Some(path) = &self.output {
            let report = serde_json::json!({
                "epochs": epochs,
                "loss_history": losses,
                "final_loss": losses.last(),
                "accuracy_before": accuracy_before,
                "accuracy_after": accuracy_after,
            });
            write_report(path, &report)?;
        }
        Ok(())
    }
}
