//! Neuron groups for batched SNN simulation
//!
//! A group holds no state of its own; its [`GroupState`] is owned by the
//! caller and threaded through [`NeuronGroup::update`], which keeps the step
//! a pure function of the previous state and the incoming current.

use ndarray::{Array2, ArrayView2, Zip};

use crate::{
    error::*,
    surrogate::Surrogate,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
macro_rules! for_each_elem {
    ($zip:expr, $f:expr) => {
        $zip.par_for_each($f)
    };
}

#[cfg(not(feature = "parallel"))]
macro_rules! for_each_elem {
    ($zip:expr, $f:expr) => {
        $zip.for_each($f)
    };
}

/// Parameters for Leaky Integrate-and-Fire groups
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LifParams {
    /// Membrane time constant (ms)
    pub tau: f32,
    /// Resting potential
    pub v_rest: f32,
    /// Reset potential
    pub v_reset: f32,
    /// Threshold potential
    pub v_th: f32,
    /// Surrogate derivative used in the backward pass
    pub surrogate: Surrogate,
}

impl Default for LifParams {
    fn default() -> Self {
        Self {
            tau: 10.0,
            v_rest: 0.0,
            v_reset: 0.0,
            v_th: 1.0,
            surrogate: Surrogate::default(),
        }
    }
}

impl LifParams {
    /// Create new LIF parameters with validation
    pub fn new(tau: f32, v_rest: f32, v_reset: f32, v_th: f32, surrogate: Surrogate) -> Result<Self> {
        ensure_positive("tau", tau)?;
        ensure_finite("v_rest", v_rest)?;
        ensure_finite("v_reset", v_reset)?;
        ensure_finite("v_th", v_th)?;
        if v_th <= v_rest {
            return Err(RuntimeError::invalid_parameter(
                "v_th",
                format!("{} (with v_rest={})", v_th, v_rest),
                "> v_rest",
            ));
        }
        surrogate.validate()?;

        Ok(Self {
            tau,
            v_rest,
            v_reset,
            v_th,
            surrogate,
        })
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        Self::new(self.tau, self.v_rest, self.v_reset, self.v_th, self.surrogate)?;
        Ok(())
    }
}

/// Parameters for non-spiking leaky integrator groups
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LeakyParams {
    /// Membrane time constant (ms)
    pub tau: f32,
    /// Resting potential
    pub v_rest: f32,
}

impl Default for LeakyParams {
    fn default() -> Self {
        Self {
            tau: 10.0,
            v_rest: 0.0,
        }
    }
}

impl LeakyParams {
    /// Create new leaky integrator parameters with validation
    pub fn new(tau: f32, v_rest: f32) -> Result<Self> {
        ensure_positive("tau", tau)?;
        ensure_finite("v_rest", v_rest)?;
        Ok(Self { tau, v_rest })
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        Self::new(self.tau, self.v_rest)?;
        Ok(())
    }
}

/// Dynamics of a neuron group
#[derive(Debug, Clone, PartialEq)]
pub enum NeuronKind {
    /// Relays the external input as its spike vector
    Input,
    /// Spiking leaky integrate-and-fire
    Lif(LifParams),
    /// Leaky integrator without threshold, used as readout
    Leaky(LeakyParams),
}

/// Mutable state of one group for a whole batch
#[derive(Debug, Clone, PartialEq)]
pub struct GroupState {
    /// Membrane potential, (batch, size)
    pub v: Array2<f32>,
    /// Spike output, (batch, size)
    pub spike: Array2<f32>,
}

/// Values of a LIF update needed again in the backward pass
#[derive(Debug, Clone, PartialEq)]
pub struct LifRecord {
    /// Spikes emitted this step
    pub spike: Array2<f32>,
    /// Pre-reset candidate potential
    pub v_candidate: Array2<f32>,
}

/// Result of updating a group for one step
#[derive(Debug, Clone)]
pub struct GroupUpdate {
    /// Next state
    pub state: GroupState,
    /// Present for spiking groups
    pub record: Option<LifRecord>,
}

/// Gradients leaving a group update
#[derive(Debug, Clone)]
pub struct GroupGrad {
    /// Gradient with respect to the previous membrane potential
    pub dv_prev: Array2<f32>,
    /// Gradient with respect to this step's input current
    pub d_current: Array2<f32>,
}

/// A population of identical neurons
#[derive(Debug, Clone)]
pub struct NeuronGroup {
    name: String,
    size: usize,
    kind: NeuronKind,
}

impl NeuronGroup {
    /// Create a group, validating its parameters
    pub fn new(name: impl Into<String>, size: usize, kind: NeuronKind) -> Result<Self> {
        let name = name.into();
        if size == 0 {
            return Err(RuntimeError::invalid_parameter(
                format!("{}.size", name),
                "0",
                "> 0",
            ));
        }
        match &kind {
            NeuronKind::Input => {}
            NeuronKind::Lif(p) => p.validate()?,
            NeuronKind::Leaky(p) => p.validate()?,
        }
        Ok(Self { name, size, kind })
    }

    /// Group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of units
    pub fn size(&self) -> usize {
        self.size
    }

    /// Dynamics
    pub fn kind(&self) -> &NeuronKind {
        &self.kind
    }

    /// Whether the group emits spikes
    pub fn is_spiking(&self) -> bool {
        matches!(self.kind, NeuronKind::Input | NeuronKind::Lif(_))
    }

    /// Whether this is an input relay
    pub fn is_input(&self) -> bool {
        matches!(self.kind, NeuronKind::Input)
    }

    /// Membrane time constant, if the group integrates
    pub fn tau(&self) -> Option<f32> {
        match &self.kind {
            NeuronKind::Input => None,
            NeuronKind::Lif(p) => Some(p.tau),
            NeuronKind::Leaky(p) => Some(p.tau),
        }
    }

    /// Baseline potential
    pub fn v_rest(&self) -> f32 {
        match &self.kind {
            NeuronKind::Input => 0.0,
            NeuronKind::Lif(p) => p.v_rest,
            NeuronKind::Leaky(p) => p.v_rest,
        }
    }

    /// Attributes that can be monitored
    pub fn observables(&self) -> &'static [&'static str] {
        match self.kind {
            NeuronKind::Input => &["spike"],
            NeuronKind::Lif(_) => &["V", "spike"],
            NeuronKind::Leaky(_) => &["V"],
        }
    }

    /// State at the start of a rollout
    pub fn baseline(&self, batch: usize) -> GroupState {
        GroupState {
            v: Array2::from_elem((batch, self.size), self.v_rest()),
            spike: Array2::zeros((batch, self.size)),
        }
    }

    /// State of an input group presenting `input`
    pub fn present(&self, input: ArrayView2<f32>) -> GroupState {
        GroupState {
            v: Array2::zeros(input.raw_dim()),
            spike: input.to_owned(),
        }
    }

    /// Advance one step with the summed incoming current
    pub fn update(&self, prev: &GroupState, current: ArrayView2<f32>, dt: f32) -> GroupUpdate {
        match &self.kind {
            NeuronKind::Input => GroupUpdate {
                state: self.present(current),
                record: None,
            },
            NeuronKind::Leaky(p) => {
                let v = integrate(prev.v.view(), current, p.v_rest, p.tau, dt);
                let spike = Array2::zeros(v.raw_dim());
                GroupUpdate {
                    state: GroupState { v, spike },
                    record: None,
                }
            }
            NeuronKind::Lif(p) => {
                let v_candidate = integrate(prev.v.view(), current, p.v_rest, p.tau, dt);
                let mut v = Array2::zeros(v_candidate.raw_dim());
                let mut spike = Array2::zeros(v_candidate.raw_dim());
                let (v_th, v_reset, surrogate) = (p.v_th, p.v_reset, p.surrogate);

                // Reset reads the spike as a plain value
                for_each_elem!(
                    Zip::from(&mut v).and(&mut spike).and(&v_candidate),
                    |v, s, &vc| {
                        let fired = surrogate.spike(vc - v_th);
                        *s = fired;
                        *v = if fired > 0.0 { v_reset } else { vc };
                    }
                );

                GroupUpdate {
                    record: Some(LifRecord {
                        spike: spike.clone(),
                        v_candidate,
                    }),
                    state: GroupState { v, spike },
                }
            }
        }
    }

    /// Vector-Jacobian product of [`NeuronGroup::update`]
    ///
    /// `dv` and `ds` are the gradients arriving at this step's potential and
    /// spike output. For LIF groups the reset is treated as a constant
    /// selection, so `dV/dVc = 1 - spike`, and the threshold contributes the
    /// surrogate derivative at the pre-reset candidate.
    pub fn vjp(
        &self,
        record: Option<&LifRecord>,
        dv: ArrayView2<f32>,
        ds: ArrayView2<f32>,
        dt: f32,
    ) -> Result<GroupGrad> {
        let (dv_candidate, tau) = match &self.kind {
            NeuronKind::Input => {
                return Ok(GroupGrad {
                    dv_prev: Array2::zeros(dv.raw_dim()),
                    d_current: Array2::zeros(dv.raw_dim()),
                })
            }
            NeuronKind::Leaky(p) => (dv.to_owned(), p.tau),
            NeuronKind::Lif(p) => {
                let record = record.ok_or_else(|| {
                    RuntimeError::invalid_config(format!(
                        "missing spike record for LIF group '{}'",
                        self.name
                    ))
                })?;
                let mut dvc = Array2::zeros(dv.raw_dim());
                let (v_th, surrogate) = (p.v_th, p.surrogate);
                for_each_elem!(
                    Zip::from(&mut dvc)
                        .and(dv)
                        .and(ds)
                        .and(&record.spike)
                        .and(&record.v_candidate),
                    |out, &dv, &ds, &s, &vc| {
                        *out = dv * (1.0 - s) + ds * surrogate.grad(vc - v_th);
                    }
                );
                (dvc, p.tau)
            }
        };

        let leak = 1.0 - dt / tau;
        Ok(GroupGrad {
            dv_prev: dv_candidate.mapv(|g| g * leak),
            d_current: dv_candidate.mapv(|g| g * dt),
        })
    }
}

/// Forward Euler step of `dV/dt = I - (V - V_rest) / tau`
fn integrate(
    v_prev: ArrayView2<f32>,
    current: ArrayView2<f32>,
    v_rest: f32,
    tau: f32,
    dt: f32,
) -> Array2<f32> {
    let mut out = Array2::zeros(v_prev.raw_dim());
    for_each_elem!(
        Zip::from(&mut out).and(v_prev).and(current),
        |o, &v, &i| {
            *o = v + (i - (v - v_rest) / tau) * dt;
        }
    );
    out
}
