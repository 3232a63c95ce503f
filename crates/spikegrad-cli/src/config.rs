//! Experiment configuration for the spikegrad CLI

use std::path::Path;

use anyhow::Context;
use ndarray::Array3;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use spikegrad_runtime::{
    poisson_spike_train, random_labels, ExpSynParams, LeakyParams, LifParams, Network, Readout, TrainerConfig,
    WeightInit,
};

use crate::error::{CliError, CliResult};

/// Name of the hidden group; monitors refer to it
pub const HIDDEN: &str = "r";

/// Whole experiment: network, synthetic data and training
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Network topology and neuron parameters
    pub network: NetworkSection,
    /// Synthetic dataset
    pub data: DataSection,
    /// Optimiser and loop settings
    pub training: TrainingSection,
}

/// `[network]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Input channels
    pub input_size: usize,
    /// Hidden LIF units
    pub hidden_size: usize,
    /// Readout units, one per class
    pub output_size: usize,
    /// Integration step (ms)
    pub dt: f32,
    /// Weight initialisation seed
    pub seed: u64,
    /// Add a hidden-to-hidden projection
    pub recurrent: bool,
    /// Hidden LIF parameters
    pub lif: LifParams,
    /// Readout integrator parameters
    pub readout: LeakyParams,
    /// Reported readout variable
    pub readout_kind: Readout,
    /// Parameters shared by every projection
    pub synapse: ExpSynParams,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            input_size: 100,
            hidden_size: 4,
            output_size: 2,
            dt: 0.1,
            seed: 42,
            recurrent: false,
            lif: LifParams::default(),
            readout: LeakyParams { tau: 5.0, v_rest: 0.0 },
            readout_kind: Readout::Potential,
            synapse: ExpSynParams {
                tau: 10.0,
                g_max: WeightInit::KaimingNormal { scale: 20.0 },
                ..Default::default()
            },
        }
    }
}

/// `[data]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    /// Number of samples
    pub samples: usize,
    /// Time steps per sample
    pub steps: usize,
    /// Poisson firing rate (Hz)
    pub freq_hz: f32,
    /// Data generation seed
    pub seed: u64,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            samples: 256,
            steps: 2000,
            freq_hz: 5.0,
            seed: 0,
        }
    }
}

/// `[training]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSection {
    /// Adam learning rate
    pub lr: f32,
    /// Number of full-batch steps
    pub epochs: usize,
    /// Epochs between progress log lines
    pub log_every: usize,
    /// Shuffle key seed
    pub seed: u64,
    /// Permute the batch every step
    pub shuffle: bool,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            lr: 2e-3,
            epochs: 3000,
            log_every: 100,
            seed: 0,
            shuffle: true,
        }
    }
}

impl TrainingSection {
    /// Runtime trainer settings
    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            lr: self.lr,
            log_every: self.log_every,
            seed: self.seed,
            shuffle: self.shuffle,
        }
    }
}

impl ExperimentConfig {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content).map_err(|e| CliError::config(format!("Invalid config file: {}", e)))
    }

    /// Load `path` if given, otherwise the defaults
    pub fn load_or_default(path: Option<&Path>) -> CliResult<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CliError::config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        std::fs::write(path, content).with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Build the input -> hidden -> readout network
    pub fn build_network(&self) -> CliResult<Network> {
        let net = &self.network;
        let mut builder = Network::builder()
            .with_dt(net.dt)
            .with_seed(net.seed)
            .add_input("i", net.input_size)
            .add_lif(HIDDEN, net.hidden_size, net.lif.clone())
            .add_leaky("o", net.output_size, net.readout.clone())
            .connect("i2r", "i", HIDDEN, net.synapse.clone());
        if net.recurrent {
            builder = builder.connect("r2r", HIDDEN, HIDDEN, net.synapse.clone());
        }
        let network = builder
            .connect("r2o", HIDDEN, "o", net.synapse.clone())
            .output("o")
            .readout(net.readout_kind)
            .build()?;
        Ok(network)
    }

    /// Poisson inputs and uniform labels for every sample
    pub fn generate_data(&self) -> CliResult<(Array3<f32>, Vec<usize>)> {
        let data = &self.data;
        if data.samples == 0 || data.steps == 0 {
            return Err(CliError::config("data.samples and data.steps must be > 0"));
        }
        let mut rng = StdRng::seed_from_u64(data.seed);
        let inputs = poisson_spike_train(
            &mut rng,
            data.samples,
            data.steps,
            self.network.input_size,
            data.freq_hz,
            self.network.dt,
        )?;
        let labels = random_labels(&mut rng, data.samples, self.network.output_size)?;
        Ok((inputs, labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = ExperimentConfig::default();
        assert_eq!(config.network.input_size, 100);
        assert_eq!(config.network.hidden_size, 4);
        assert_eq!(config.network.readout.tau, 5.0);
        assert_eq!(config.data.steps, 2000);
        assert_eq!(config.training.epochs, 3000);
        let network = config.build_network().unwrap();
        assert_eq!(network.projections().len(), 2);
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exp.toml");
        let mut config = ExperimentConfig::default();
        config.network.recurrent = true;
        config.network.synapse.g_max = WeightInit::Normal { mean: 0.0, std: 0.5 };
        config.save_to_file(&path).unwrap();
        let loaded = ExperimentConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.build_network().unwrap().projections().len(), 3);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: ExperimentConfig = toml::from_str(
            r#"
            [network]
            hidden_size = 8

            [network.lif]
            v_th = 2.0

            [training]
            epochs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.network.hidden_size, 8);
        assert_eq!(config.network.lif.v_th, 2.0);
        assert_eq!(config.network.lif.tau, 10.0);
        assert_eq!(config.network.input_size, 100);
        assert_eq!(config.training.epochs, 5);
        assert_eq!(config.training.lr, 2e-3);
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = ExperimentConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, CliError::Generic(_)));
        assert!(err.to_string().contains("absent.toml"), "{}", err);
    }

    #[test]
    fn test_invalid_network_reported() {
        let mut config = ExperimentConfig::default();
        config.network.dt = 0.0;
        assert!(matches!(config.build_network(), Err(CliError::Runtime(_))));
    }

    #[test]
    fn test_generate_data_shapes() {
        let mut config = ExperimentConfig::default();
        config.data.samples = 6;
        config.data.steps = 30;
        let (inputs, labels) = config.generate_data().unwrap();
        assert_eq!(inputs.dim(), (6, 30, 100));
        assert_eq!(labels.len(), 6);
        assert!(labels.iter().all(|&l| l < 2));
    }
}
