//! Forward rollout of the untrained network

use std::path::PathBuf;

use clap::Args;
use ndarray::Axis;
use tracing::info;

use spikegrad_runtime::{classification_accuracy, Runner};

use crate::{
    commands::write_report,
    config::{ExperimentConfig, HIDDEN},
    error::{CliError, CliResult},
};

/// Roll the untrained network out on synthetic data
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Override the number of samples
    #[arg(long)]
    pub samples: Option<usize>,

    /// Override the number of time steps
    #[arg(long)]
    pub steps: Option<usize>,

    /// Output file for the JSON report
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunCommand {
    pub fn execute(self, config: Option<PathBuf>) -> CliResult<()> {
        let mut experiment = ExperimentConfig::load_or_default(config.as_deref())?;
        if let Some(samples) = self.samples {
            experiment.data.samples = samples;
        }
        if let Some(steps) = self.steps {
            experiment.data.steps = steps;
        }

        let network = experiment.build_network()?;
        let (inputs, labels) = experiment.generate_data()?;
        info!(
            "Running {} samples x {} steps (dt={} ms)",
            experiment.data.samples, experiment.data.steps, experiment.network.dt
        );

        let spike_monitor = format!("{}.spike", HIDDEN);
        let potential_monitor = format!("{}.V", HIDDEN);
        let out = Runner::new(&network)
            .with_monitors([spike_monitor.clone(), potential_monitor.clone()])?
            .run(inputs.view(), true)?;

        let spikes = out
            .mon(&spike_monitor)
            .ok_or_else(|| CliError::config("hidden spike monitor missing"))?;
        // Total spikes per hidden unit over samples and time
        let counts: Vec<f32> = spikes.sum_axis(Axis(0)).sum_axis(Axis(0)).to_vec();
        let mean_v = out
            .mon(&potential_monitor)
            .and_then(|v| v.mean())
            .unwrap_or(0.0);
        let accuracy = classification_accuracy(out.output.view(), &labels)?;

        info!("Hidden spike counts: {:?}", counts);
        info!("Mean hidden potential: {:.4}", mean_v);
        info!("Accuracy (untrained): {:.2}%", accuracy * 100.0);

        if let Some(path) = &self.output {
            let report = serde_json::json!({
                "samples": experiment.data.samples,
                "steps": experiment.data.steps,
                "hidden_spike_counts": counts,
                "mean_hidden_potential": mean_v,
                "accuracy": accuracy,
            });
            write_report(path, &report)?;
        }
        Ok(())
    }
}
