//! Discrete-time spiking network simulation and surrogate-gradient training
//!
//! Networks are built from LIF and leaky-integrator groups joined by
//! exponential current synapses, rolled out over batched spike trains by a
//! [`Runner`], and trained end-to-end by a [`Trainer`] that backpropagates
//! through time with a smooth surrogate in place of the spike threshold's
//! derivative.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod error;
pub mod grad;
pub mod input;
pub mod loss;
pub mod network;
pub mod neuron;
pub mod optim;
pub mod runner;
pub mod surrogate;
pub mod synapse;
pub mod trainer;

// Re-export essential types
pub use error::{Result, RuntimeError};
pub use grad::{Bptt, GradientEngine, Gradients};
pub use input::{poisson_spike_train, random_labels};
pub use loss::{classification_accuracy, max_over_time, max_over_time_cross_entropy};
pub use network::{GroupId, Network, NetworkBuilder, NetworkState, Readout, StepOutcome};
pub use neuron::{LeakyParams, LifParams, NeuronGroup, NeuronKind};
pub use optim::Adam;
pub use runner::{RunOutput, Runner, Tape};
pub use surrogate::Surrogate;
pub use synapse::{Connectivity, ExpSynParams, SynapseProjection, WeightInit};
pub use trainer::{permute_paired, KeyStream, ShuffleKey, Trainer, TrainerConfig};

/// Default integration step (ms)
pub const DEFAULT_DT_MS: f32 = 0.1;
