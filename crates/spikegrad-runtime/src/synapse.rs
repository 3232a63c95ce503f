//! Exponential current synapses

use std::borrow::Cow;

use ndarray::{Array2, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::{error::*, network::GroupId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Normalises the standard deviation of a normal truncated at two sigma
const TRUNCATED_NORMAL_STD: f32 = 0.879_625_66;

/// Weight initialisation schemes
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum WeightInit {
    /// Fan-in variance scaling, `Var[w] = scale / fan_in`, truncated at 2 sigma
    KaimingNormal {
        /// Variance scale
        scale: f32,
    },
    /// Plain normal distribution
    Normal {
        /// Mean
        mean: f32,
        /// Standard deviation
        std: f32,
    },
    /// Every weight set to `value`
    Constant {
        /// Weight value
        value: f32,
    },
    /// All zeros
    Zeros,
}

impl Default for WeightInit {
    fn default() -> Self {
        WeightInit::KaimingNormal { scale: 2.0 }
    }
}

impl WeightInit {
    /// Validate the distribution parameters
    pub fn validate(&self) -> Result<()> {
        match *self {
            WeightInit::KaimingNormal { scale } => ensure_positive("g_max.scale", scale),
            WeightInit::Normal { mean, std } => {
                ensure_finite("g_max.mean", mean)?;
                ensure_positive("g_max.std", std)
            }
            WeightInit::Constant { value } => ensure_finite("g_max.value", value),
            WeightInit::Zeros => Ok(()),
        }
    }

    /// Draw a (fan_in, fan_out) weight matrix
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, fan_in: usize, fan_out: usize) -> Array2<f32> {
        match *self {
            WeightInit::KaimingNormal { scale } => {
                let std = (scale / fan_in as f32).sqrt() / TRUNCATED_NORMAL_STD;
                Array2::from_shape_simple_fn((fan_in, fan_out), || {
                    truncated_standard_normal(rng) * std
                })
            }
            WeightInit::Normal { mean, std } => Array2::from_shape_simple_fn((fan_in, fan_out), || {
                let z: f32 = StandardNormal.sample(rng);
                mean + z * std
            }),
            WeightInit::Constant { value } => Array2::from_elem((fan_in, fan_out), value),
            WeightInit::Zeros => Array2::zeros((fan_in, fan_out)),
        }
    }
}

fn truncated_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    loop {
        let z: f32 = StandardNormal.sample(rng);
        if z.abs() <= 2.0 {
            return z;
        }
    }
}

/// Connection pattern between two groups
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Connectivity {
    /// Every source unit reaches every target unit
    #[default]
    AllToAll,
    /// Each pair is connected independently with probability `prob`
    FixedProb {
        /// Connection probability
        prob: f32,
    },
}

impl Connectivity {
    /// Validate the pattern
    pub fn validate(&self) -> Result<()> {
        if let Connectivity::FixedProb { prob } = *self {
            if !(0.0..=1.0).contains(&prob) {
                return Err(RuntimeError::invalid_parameter(
                    "connectivity.prob",
                    prob.to_string(),
                    "within [0, 1]",
                ));
            }
        }
        Ok(())
    }

    /// Binary mask, `None` when dense
    pub fn mask<R: Rng + ?Sized>(&self, rng: &mut R, pre: usize, post: usize) -> Option<Array2<f32>> {
        match *self {
            Connectivity::AllToAll => None,
            Connectivity::FixedProb { prob } => Some(Array2::from_shape_simple_fn((pre, post), || {
                if rng.gen::<f32>() < prob {
                    1.0
                } else {
                    0.0
                }
            })),
        }
    }
}

/// Parameters of an exponential synapse projection
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ExpSynParams {
    /// Conductance decay time constant (ms)
    pub tau: f32,
    /// Weight initialiser
    pub g_max: WeightInit,
    /// Connection pattern
    pub connectivity: Connectivity,
}

impl Default for ExpSynParams {
    fn default() -> Self {
        Self {
            tau: 10.0,
            g_max: WeightInit::default(),
            connectivity: Connectivity::AllToAll,
        }
    }
}

impl ExpSynParams {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        ensure_positive("tau", self.tau)?;
        self.g_max.validate()?;
        self.connectivity.validate()
    }
}

/// Gradients leaving a projection update
#[derive(Debug, Clone)]
pub struct SynapseGrad {
    /// Gradient with respect to the previous conductance
    pub dg_prev: Array2<f32>,
    /// Gradient with respect to the presynaptic vector
    pub d_pre: Array2<f32>,
    /// Gradient with respect to the weight matrix
    pub d_weights: Array2<f32>,
}

/// Weighted, exponentially decaying projection from one group onto another
#[derive(Debug, Clone)]
pub struct SynapseProjection {
    name: String,
    source: GroupId,
    target: GroupId,
    tau: f32,
    weights: Array2<f32>,
    mask: Option<Array2<f32>>,
}

impl SynapseProjection {
    /// Create a projection and draw its initial weights
    pub fn new<R: Rng + ?Sized>(
        name: impl Into<String>,
        source: (GroupId, usize),
        target: (GroupId, usize),
        params: &ExpSynParams,
        rng: &mut R,
    ) -> Result<Self> {
        params.validate()?;
        let (source, pre) = source;
        let (target, post) = target;
        let weights = params.g_max.sample(rng, pre, post);
        let mask = params.connectivity.mask(rng, pre, post);

        Ok(Self {
            name: name.into(),
            source,
            target,
            tau: params.tau,
            weights,
            mask,
        })
    }

    /// Projection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Presynaptic group
    pub fn source(&self) -> GroupId {
        self.source
    }

    /// Postsynaptic group
    pub fn target(&self) -> GroupId {
        self.target
    }

    /// Decay time constant
    pub fn tau(&self) -> f32 {
        self.tau
    }

    /// Number of postsynaptic units
    pub fn post_size(&self) -> usize {
        self.weights.ncols()
    }

    /// Per-step conductance decay factor
    pub fn decay(&self, dt: f32) -> f32 {
        (-dt / self.tau).exp()
    }

    /// Trainable weight matrix, (source_size, target_size)
    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    /// Mutable weight matrix
    pub fn weights_mut(&mut self) -> &mut Array2<f32> {
        &mut self.weights
    }

    /// Connection mask, if sparse
    pub fn mask(&self) -> Option<&Array2<f32>> {
        self.mask.as_ref()
    }

    /// Replace the weight matrix, keeping its shape
    pub fn set_weights(&mut self, weights: Array2<f32>) -> Result<()> {
        if weights.dim() != self.weights.dim() {
            return Err(RuntimeError::shape_mismatch(
                format!("{}.g_max", self.name),
                self.weights.dim(),
                weights.dim(),
            ));
        }
        self.weights = weights;
        Ok(())
    }

    fn effective_weights(&self) -> Cow<'_, Array2<f32>> {
        match &self.mask {
            None => Cow::Borrowed(&self.weights),
            Some(mask) => Cow::Owned(&self.weights * mask),
        }
    }

    /// Zero conductance for a batch
    pub fn baseline(&self, batch: usize) -> Array2<f32> {
        Array2::zeros((batch, self.post_size()))
    }

    /// `g_next = g_prev * decay + pre @ W`
    pub fn update(&self, g_prev: ArrayView2<f32>, pre: ArrayView2<f32>, dt: f32) -> Array2<f32> {
        let mut g = pre.dot(&*self.effective_weights());
        g.scaled_add(self.decay(dt), &g_prev);
        g
    }

    /// Vector-Jacobian product of [`SynapseProjection::update`]
    pub fn vjp(&self, pre: ArrayView2<f32>, dg: ArrayView2<f32>, dt: f32) -> SynapseGrad {
        let mut d_weights = pre.t().dot(&dg);
        if let Some(mask) = &self.mask {
            d_weights *= mask;
        }
        let d_pre = dg.dot(&self.effective_weights().t());
        let decay = self.decay(dt);
        SynapseGrad {
            dg_prev: dg.mapv(|g| g * decay),
            d_pre,
            d_weights,
        }
    }
}
