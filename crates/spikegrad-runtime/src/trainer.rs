//! Surrogate-gradient training loop
//!
//! Each [`Trainer::train_step`] draws a fresh key from the trainer's
//! [`KeyStream`], permutes inputs and labels with that single key, computes
//! the loss and gradients through the configured [`GradientEngine`] and lets
//! [`Adam`] update the network weights in place.

use std::time::Instant;

use ndarray::{Array3, ArrayView3, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::{
    error::*,
    grad::{Bptt, GradientEngine},
    loss::classification_accuracy,
    network::Network,
    optim::Adam,
    runner::Runner,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainerConfig {
    /// Adam learning rate
    pub lr: f32,
    /// Epochs between progress log lines, 0 disables them
    pub log_every: usize,
    /// Seed of the shuffle key stream
    pub seed: u64,
    /// Permute the batch before each step
    pub shuffle: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            lr: 2e-3,
            log_every: 100,
            seed: 0,
            shuffle: true,
        }
    }
}

/// Key used for one paired permutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShuffleKey(pub u64);

impl ShuffleKey {
    /// Permutation of `0..n` derived from this key
    pub fn permutation(&self, n: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(self.0));
        order
    }
}

/// Deterministic source of shuffle keys
#[derive(Debug, Clone)]
pub struct KeyStream {
    rng: StdRng,
}

impl KeyStream {
    /// Stream seeded with `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Split off the next key
    pub fn next_key(&mut self) -> ShuffleKey {
        ShuffleKey(self.rng.gen())
    }
}

/// Apply one permutation to both the batch axis of `inputs` and `labels`
pub fn permute_paired(
    inputs: ArrayView3<f32>,
    labels: &[usize],
    key: ShuffleKey,
) -> Result<(Array3<f32>, Vec<usize>)> {
    let samples = inputs.len_of(Axis(0));
    if samples != labels.len() {
        return Err(RuntimeError::ShuffleDesync {
            inputs: samples,
            labels: labels.len(),
        });
    }
    let order = key.permutation(samples);
    let shuffled = inputs.select(Axis(0), &order);
    let labels = order.iter().map(|&i| labels[i]).collect();
    Ok((shuffled, labels))
}

/// Trains the weights of a network
#[derive(Debug)]
pub struct Trainer<E: GradientEngine = Bptt> {
    network: Network,
    engine: E,
    optimizer: Adam,
    keys: KeyStream,
    config: TrainerConfig,
    history: Vec<f32>,
}

impl Trainer<Bptt> {
    /// Trainer using backpropagation through time
    pub fn new(network: Network, config: TrainerConfig) -> Result<Self> {
        Self::with_engine(network, config, Bptt::new())
    }
}

impl<E: GradientEngine> Trainer<E> {
    /// Trainer with a custom gradient engine
    pub fn with_engine(network: Network, config: TrainerConfig, engine: E) -> Result<Self> {
        let optimizer = Adam::new(&network, config.lr)?;
        log::info!(
            "Trainer ready: {} trainable tensors, lr={}",
            network.trainable_vars().len(),
            config.lr
        );
        Ok(Self {
            keys: KeyStream::new(config.seed),
            network,
            engine,
            optimizer,
            config,
            history: Vec::new(),
        })
    }

    /// Network being trained
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Give up the trained network
    pub fn into_network(self) -> Network {
        self.network
    }

    /// Optimiser state
    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    /// Configuration
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Loss of every completed step
    pub fn history(&self) -> &[f32] {
        &self.history
    }

    /// One shuffled gradient step over the whole batch; returns the loss
    pub fn train_step(&mut self, inputs: ArrayView3<f32>, labels: &[usize]) -> Result<f32> {
        let key = self.keys.next_key();
        let (loss, grads) = if self.config.shuffle {
            let (inputs, labels) = permute_paired(inputs, labels, key)?;
            self.engine.value_and_grad(&self.network, inputs.view(), &labels)?
        } else {
            self.engine.value_and_grad(&self.network, inputs, labels)?
        };
        if !loss.is_finite() {
            return Err(RuntimeError::NonFinite {
                step: self.history.len(),
                variable: "loss".to_string(),
            });
        }

        self.optimizer.step(&mut self.network, &grads)?;
        self.history.push(loss);
        Ok(loss)
    }

    /// Run `epochs` steps, calling `on_epoch(epoch, loss)` after each
    pub fn fit_with<F>(
        &mut self,
        inputs: ArrayView3<f32>,
        labels: &[usize],
        epochs: usize,
        mut on_epoch: F,
    ) -> Result<Vec<f32>>
    where
        F: FnMut(usize, f32),
    {
        log::info!(
            "Training for {} epochs on {} samples",
            epochs,
            labels.len()
        );
        let start = Instant::now();
        let mut window = Instant::now();
        let mut losses = Vec::with_capacity(epochs);

        for epoch in 0..epochs {
            let loss = self.train_step(inputs, labels)?;
            losses.push(loss);
            on_epoch(epoch, loss);

            let every = self.config.log_every;
            if every > 0 && (epoch + 1) % every == 0 {
                let recent = &losses[losses.len() - every..];
                let mean = recent.iter().sum::<f32>() / recent.len() as f32;
                log::info!(
                    "Epoch {}: mean loss {:.4}, {:.2}s",
                    epoch + 1,
                    mean,
                    window.elapsed().as_secs_f32()
                );
                window = Instant::now();
            }
        }

        log::info!(
            "Training completed in {:.2}s",
            start.elapsed().as_secs_f32()
        );
        Ok(losses)
    }

    /// Run `epochs` steps; returns the per-epoch losses
    pub fn fit(&mut self, inputs: ArrayView3<f32>, labels: &[usize], epochs: usize) -> Result<Vec<f32>> {
        self.fit_with(inputs, labels, epochs, |_, _| {})
    }

    /// Classification accuracy of the current weights
    pub fn evaluate(&self, inputs: ArrayView3<f32>, labels: &[usize]) -> Result<f32> {
        let out = Runner::new(&self.network).run(inputs, true)?;
        classification_accuracy(out.output.view(), labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grad::Gradients,
        neuron::{LeakyParams, LifParams},
        synapse::{ExpSynParams, WeightInit},
    };

    fn classifier() -> Network {
        Network::builder()
            .with_dt(1.0)
            .with_seed(3)
            .add_input("i", 2)
            .add_leaky("o", 2, LeakyParams::new(5.0, 0.0).unwrap())
            .connect(
                "i2o",
                "i",
                "o",
                ExpSynParams {
                    g_max: WeightInit::Normal { mean: 0.0, std: 0.1 },
                    ..Default::default()
                },
            )
            .output("o")
            .build()
            .unwrap()
    }

    /// Class `c` drives feature `c`
    fn dataset() -> (Array3<f32>, Vec<usize>) {
        let labels = vec![0, 1, 1, 0, 1, 0];
        let inputs = Array3::from_shape_fn((6, 10, 2), |(b, _, f)| (f == labels[b]) as u8 as f32);
        (inputs, labels)
    }

    #[test]
    fn test_train_step_changes_weights() {
        let (inputs, labels) = dataset();
        let mut trainer = Trainer::new(classifier(), TrainerConfig::default()).unwrap();
        let before = trainer.network().projections()[0].weights().clone();
        let loss = trainer.train_step(inputs.view(), &labels).unwrap();
        assert!(loss.is_finite());
        assert_ne!(trainer.network().projections()[0].weights(), &before);
        assert_eq!(trainer.optimizer().steps(), 1);
        assert_eq!(trainer.history(), &[loss]);
    }

    #[test]
    fn test_fit_reduces_loss() {
        let (inputs, labels) = dataset();
        let config = TrainerConfig {
            lr: 0.01,
            log_every: 10,
            ..Default::default()
        };
        let mut trainer = Trainer::new(classifier(), config).unwrap();
        let losses = trainer.fit(inputs.view(), &labels, 60).unwrap();
        assert_eq!(losses.len(), 60);
        assert!(losses[59] < losses[0], "{} !< {}", losses[59], losses[0]);
        assert_eq!(trainer.evaluate(inputs.view(), &labels).unwrap(), 1.0);
    }

    #[test]
    fn test_fit_with_reports_every_epoch() {
        let (inputs, labels) = dataset();
        let mut trainer = Trainer::new(classifier(), TrainerConfig::default()).unwrap();
        let mut seen = Vec::new();
        trainer
            .fit_with(inputs.view(), &labels, 3, |epoch, _| seen.push(epoch))
            .unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    struct NoGradients;

    impl GradientEngine for NoGradients {
        fn value_and_grad(&self, _: &Network, _: ArrayView3<f32>, _: &[usize]) -> Result<(f32, Gradients)> {
            Ok((1.0, Gradients::new()))
        }
    }

    #[test]
    fn test_missing_gradient_is_an_error() {
        let (inputs, labels) = dataset();
        let mut trainer = Trainer::with_engine(classifier(), TrainerConfig::default(), NoGradients).unwrap();
        let result = trainer.train_step(inputs.view(), &labels);
        assert!(matches!(result, Err(RuntimeError::UnregisteredParameter { .. })));
        assert!(trainer.history().is_empty());
    }

    #[test]
    fn test_permutation_keeps_pairs() {
        let labels: Vec<usize> = (0..16).collect();
        let inputs = Array3::from_shape_fn((16, 3, 1), |(b, _, _)| b as f32);
        let mut keys = KeyStream::new(7);
        let (shuffled, shuffled_labels) = permute_paired(inputs.view(), &labels, keys.next_key()).unwrap();

        assert_ne!(shuffled_labels, labels);
        for (b, &label) in shuffled_labels.iter().enumerate() {
            assert!(shuffled.index_axis(Axis(0), b).iter().all(|&v| v == label as f32));
        }
        let mut sorted = shuffled_labels.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, labels);
    }

    #[test]
    fn test_desync_detected() {
        let inputs = Array3::<f32>::zeros((4, 2, 1));
        let result = permute_paired(inputs.view(), &[0, 1, 0], ShuffleKey(1));
        assert!(matches!(
            result,
            Err(RuntimeError::ShuffleDesync { inputs: 4, labels: 3 })
        ));
    }

    #[test]
    fn test_key_stream_deterministic_and_fresh() {
        let mut a = KeyStream::new(1);
        let mut b = KeyStream::new(1);
        let first = a.next_key();
        assert_eq!(first, b.next_key());
        assert_ne!(first, a.next_key());
        assert_eq!(first.permutation(10), ShuffleKey(first.0).permutation(10));
    }

    #[test]
    fn test_recurrent_lif_training_step() {
        let syn = ExpSynParams {
            g_max: WeightInit::KaimingNormal { scale: 20.0 },
            ..Default::default()
        };
        let net = Network::builder()
            .with_dt(1.0)
            .add_input("i", 4)
            .add_lif("r", 3, LifParams::default())
            .add_leaky("o", 2, LeakyParams::default())
            .connect("i2r", "i", "r", syn.clone())
            .connect("r2r", "r", "r", syn.clone())
            .connect("r2o", "r", "o", syn)
            .output("o")
            .build()
            .unwrap();
        let inputs = Array3::from_shape_fn((4, 15, 4), |(b, t, f)| ((b + t + f) % 3 == 0) as u8 as f32);
        let mut trainer = Trainer::new(net, TrainerConfig::default()).unwrap();
        let losses = trainer.fit(inputs.view(), &[0, 1, 0, 1], 2).unwrap();
        assert!(losses.iter().all(|l| l.is_finite()));
    }
}
