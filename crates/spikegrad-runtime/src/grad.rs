//! Loss gradients with respect to trainable weights
//!
//! [`GradientEngine`] is the seam between the trainer and whatever computes
//! `(loss, dLoss/dW)`. [`Bptt`] is the built-in engine: it runs the network
//! once with a [`Tape`] and walks that tape backwards through time, using the
//! LIF surrogate derivative in place of the spike threshold's.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2, ArrayView3, Axis};

use crate::{
    error::*,
    loss::max_over_time_cross_entropy,
    network::{Network, Readout},
    runner::{Runner, Tape},
};

/// Gradient tensors keyed by trainable variable name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gradients {
    grads: BTreeMap<String, Array2<f32>>,
}

impl Gradients {
    /// Empty gradient set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a gradient
    pub fn insert(&mut self, name: impl Into<String>, grad: Array2<f32>) {
        self.grads.insert(name.into(), grad);
    }

    /// Gradient for `name`
    pub fn get(&self, name: &str) -> Option<&Array2<f32>> {
        self.grads.get(name)
    }

    /// Iterate in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array2<f32>)> {
        self.grads.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of tensors
    pub fn len(&self) -> usize {
        self.grads.len()
    }

    /// Whether no tensors are present
    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    /// L2 norm over every tensor
    pub fn global_norm(&self) -> f32 {
        self.grads
            .values()
            .map(|g| g.iter().map(|x| x * x).sum::<f32>())
            .sum::<f32>()
            .sqrt()
    }

    /// Whether every entry is zero
    pub fn is_zero(&self) -> bool {
        self.grads.values().all(|g| g.iter().all(|&x| x == 0.0))
    }
}

impl FromIterator<(String, Array2<f32>)> for Gradients {
    fn from_iter<I: IntoIterator<Item = (String, Array2<f32>)>>(iter: I) -> Self {
        Self {
            grads: iter.into_iter().collect(),
        }
    }
}

/// Computes the classification loss and its weight gradients
pub trait GradientEngine {
    /// Loss of `network` on a batch and `dLoss/dW` for every trainable variable
    ///
    /// `inputs` is batch-major, (batch, time, input_size).
    fn value_and_grad(
        &self,
        network: &Network,
        inputs: ArrayView3<f32>,
        labels: &[usize],
    ) -> Result<(f32, Gradients)>;
}

/// Backpropagation through time with surrogate spike derivatives
#[derive(Debug, Clone)]
pub struct Bptt {
    check_finite: bool,
}

impl Default for Bptt {
    fn default() -> Self {
        Self { check_finite: true }
    }
}

impl Bptt {
    /// Engine with the per-step NaN/Inf check enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle the per-step NaN/Inf check of the forward pass
    pub fn check_finite(mut self, enabled: bool) -> Self {
        self.check_finite = enabled;
        self
    }

    /// Propagate `d_output`, (batch, time, output_size), back through a recorded rollout
    pub fn backward(
        &self,
        network: &Network,
        inputs: ArrayView3<f32>,
        tape: &Tape,
        d_output: ArrayView3<f32>,
    ) -> Result<Gradients> {
        let (batch, steps, _) = inputs.dim();
        if tape.len() != steps {
            return Err(RuntimeError::shape_mismatch("tape length", steps, tape.len()));
        }
        let expected = (batch, steps, network.output_size());
        if d_output.dim() != expected {
            return Err(RuntimeError::shape_mismatch("output gradient", expected, d_output.dim()));
        }

        let dt = network.dt();
        let groups = network.groups();
        let projections = network.projections();
        let input = network.input_group();
        let output = network.output_group();

        let zeros_per_group = || -> Vec<Array2<f32>> {
            groups.iter().map(|g| Array2::zeros((batch, g.size()))).collect()
        };
        let mut dv = zeros_per_group();
        let mut ds = zeros_per_group();
        let mut dg: Vec<Array2<f32>> = projections.iter().map(|p| p.baseline(batch)).collect();
        let mut dw: Vec<Array2<f32>> = projections
            .iter()
            .map(|p| Array2::zeros(p.weights().raw_dim()))
            .collect();

        for t in (0..steps).rev() {
            let dy = d_output.index_axis(Axis(1), t);
            match network.readout() {
                Readout::Potential => dv[output.0] += &dy,
                Readout::Spike => ds[output.0] += &dy,
            }

            let mut dv_prev = zeros_per_group();
            let mut d_current = zeros_per_group();
            for (index, group) in groups.iter().enumerate() {
                if group.is_input() {
                    continue;
                }
                let grad = group.vjp(tape.record(t, index), dv[index].view(), ds[index].view(), dt)?;
                dv_prev[index] = grad.dv_prev;
                d_current[index] = grad.d_current;
            }

            // Spikes of step t-1 only reach step t through projections
            let mut ds_prev = zeros_per_group();
            for (index, projection) in projections.iter().enumerate() {
                let source = projection.source();
                let dg_total = &dg[index] + &d_current[projection.target().0];
                let pre: ArrayView2<f32> = if source == input {
                    inputs.index_axis(Axis(1), t)
                } else {
                    tape.spikes(t.checked_sub(1), source.0).ok_or_else(|| {
                        RuntimeError::invalid_config(format!(
                            "no recorded spikes for '{}' at step {}",
                            network.group(source).name(),
                            t
                        ))
                    })?
                };

                let grad = projection.vjp(pre, dg_total.view(), dt);
                dw[index] += &grad.d_weights;
                if source != input {
                    ds_prev[source.0] += &grad.d_pre;
                }
                dg[index] = grad.dg_prev;
            }

            dv = dv_prev;
            ds = ds_prev;
        }

        Ok(projections
            .iter()
            .map(Network::param_name)
            .zip(dw)
            .collect())
    }
}

impl GradientEngine for Bptt {
    fn value_and_grad(
        &self,
        network: &Network,
        inputs: ArrayView3<f32>,
        labels: &[usize],
    ) -> Result<(f32, Gradients)> {
        let (out, tape) = Runner::new(network)
            .check_finite(self.check_finite)
            .rollout_recorded(inputs)?;
        let (loss, d_output) = max_over_time_cross_entropy(out.output.view(), labels)?;
        let grads = self.backward(network, inputs, &tape, d_output.view())?;
        log::trace!("loss={:.6} grad_norm={:.6}", loss, grads.global_norm());
        Ok((loss, grads))
    }
}
