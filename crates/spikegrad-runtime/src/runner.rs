//! Batched multi-step execution of a network

use std::collections::BTreeMap;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::{
    error::*,
    network::{GroupId, Network, NetworkState},
    neuron::LifRecord,
};

/// Result of one rollout
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Readout, (batch, time, output_size)
    pub output: Array3<f32>,
    /// Recorded observables, each (batch, time, size)
    pub monitors: BTreeMap<String, Array3<f32>>,
}

impl RunOutput {
    /// Recorded tensor for an observable
    pub fn mon(&self, name: &str) -> Option<&Array3<f32>> {
        self.monitors.get(name)
    }
}

/// Everything the backward pass needs from a rollout
#[derive(Debug, Clone)]
pub struct Tape {
    /// Spikes of every group before the first step
    pub(crate) initial_spikes: Vec<Array2<f32>>,
    /// Per step, per group LIF records
    pub(crate) steps: Vec<Vec<Option<LifRecord>>>,
}

impl Tape {
    /// Number of recorded steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// LIF record of `group` at step `t`
    pub fn record(&self, t: usize, group: usize) -> Option<&LifRecord> {
        self.steps.get(t).and_then(|s| s[group].as_ref())
    }

    /// Spikes of `group` emitted at step `t`, or before the first step for `None`
    pub(crate) fn spikes(&self, t: Option<usize>, group: usize) -> Option<ArrayView2<'_, f32>> {
        match t {
            None => Some(self.initial_spikes[group].view()),
            Some(t) => self.record(t, group).map(|r| r.spike.view()),
        }
    }
}

/// Drives a network over time-series input
#[derive(Debug)]
pub struct Runner<'n> {
    network: &'n Network,
    monitors: Vec<String>,
    inputs_are_batching: bool,
    check_finite: bool,
    state: Option<NetworkState>,
}

impl<'n> Runner<'n> {
    /// Create a runner without monitors
    pub fn new(network: &'n Network) -> Self {
        Self {
            network,
            monitors: Vec::new(),
            inputs_are_batching: true,
            check_finite: true,
            state: None,
        }
    }

    /// Record these observables, e.g. `"r.spike"`
    pub fn with_monitors<I, S>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.network.is_observable(&name) {
                return Err(RuntimeError::UnknownObservable { name });
            }
            if !self.monitors.contains(&name) {
                self.monitors.push(name);
            }
        }
        Ok(self)
    }

    /// `true`: inputs are (batch, time, feature); `false`: (time, batch, feature)
    pub fn inputs_are_batching(mut self, batching: bool) -> Self {
        self.inputs_are_batching = batching;
        self
    }

    /// Toggle the per-step NaN/Inf check
    pub fn check_finite(mut self, enabled: bool) -> Self {
        self.check_finite = enabled;
        self
    }

    /// State left by the last run
    pub fn state(&self) -> Option<&NetworkState> {
        self.state.as_ref()
    }

    /// Run the network over `inputs`
    pub fn run(&mut self, inputs: ArrayView3<f32>, reset_state: bool) -> Result<RunOutput> {
        self.rollout(inputs, reset_state, None)
    }

    /// Run with reset and keep the tape for the backward pass
    pub fn rollout_recorded(&mut self, inputs: ArrayView3<f32>) -> Result<(RunOutput, Tape)> {
        let mut tape = Tape {
            initial_spikes: Vec::new(),
            steps: Vec::new(),
        };
        let output = self.rollout(inputs, true, Some(&mut tape))?;
        Ok((output, tape))
    }

    fn rollout(
        &mut self,
        inputs: ArrayView3<f32>,
        reset_state: bool,
        mut tape: Option<&mut Tape>,
    ) -> Result<RunOutput> {
        let network = self.network;
        let (time_axis, batch_axis) = if self.inputs_are_batching {
            (Axis(1), Axis(0))
        } else {
            (Axis(0), Axis(1))
        };
        let batch = inputs.len_of(batch_axis);
        let steps = inputs.len_of(time_axis);
        let features = inputs.len_of(Axis(2));

        if features != network.input_size() {
            return Err(RuntimeError::shape_mismatch(
                "input features",
                network.input_size(),
                features,
            ));
        }
        if steps == 0 {
            return Err(RuntimeError::invalid_parameter("time steps", "0", "> 0"));
        }
        if batch == 0 {
            return Err(RuntimeError::invalid_parameter("batch size", "0", "> 0"));
        }

        // A failed rollout leaves the carried state untouched
        let fresh;
        let start = match &self.state {
            Some(state) if !reset_state => {
                if state.batch_size() != batch {
                    return Err(RuntimeError::shape_mismatch(
                        "batch size of carried state",
                        state.batch_size(),
                        batch,
                    ));
                }
                state
            }
            _ => {
                fresh = network.reset_state(batch);
                &fresh
            }
        };

        if let Some(tape) = tape.as_deref_mut() {
            tape.initial_spikes = network
                .groups()
                .iter()
                .enumerate()
                .map(|(i, _)| start.group(GroupId(i)).spike.clone())
                .collect();
            tape.steps = Vec::with_capacity(steps);
        }

        log::debug!(
            "Running {} steps for batch of {} ({} monitors)",
            steps,
            batch,
            self.monitors.len()
        );

        let mut outputs: Vec<Array2<f32>> = Vec::with_capacity(steps);
        let mut recorded: Vec<Vec<Array2<f32>>> = vec![Vec::with_capacity(steps); self.monitors.len()];
        let progress_every = (steps / 10).max(1);
        let mut current: Option<NetworkState> = None;

        for t in 0..steps {
            let x = inputs.index_axis(time_axis, t);
            let outcome = network.step(current.as_ref().unwrap_or(start), x)?;

            if self.check_finite {
                check_finite(network, &outcome.state, t)?;
            }

            for (slot, name) in recorded.iter_mut().zip(&self.monitors) {
                slot.push(network.observe(&outcome.state, name)?.to_owned());
            }
            outputs.push(outcome.output);
            if let Some(tape) = tape.as_deref_mut() {
                tape.steps.push(outcome.records);
            }
            current = Some(outcome.state);

            if t % progress_every == 0 {
                log::debug!("Rollout progress: {:.1}%", t as f32 / steps as f32 * 100.0);
            }
        }

        if current.is_some() {
            self.state = current;
        }

        let output = stack_time(&outputs)?;
        let mut monitors = BTreeMap::new();
        for (name, slots) in self.monitors.iter().zip(recorded) {
            monitors.insert(name.clone(), stack_time(&slots)?);
        }

        Ok(RunOutput { output, monitors })
    }
}

/// Stack per-step (batch, feature) slices into (batch, time, feature)
fn stack_time(slots: &[Array2<f32>]) -> Result<Array3<f32>> {
    let views: Vec<ArrayView2<f32>> = slots.iter().map(|a| a.view()).collect();
    ndarray::stack(Axis(1), &views)
        .map_err(|e| RuntimeError::invalid_config(format!("cannot stack time slices: {}", e)))
}

fn check_finite(network: &Network, state: &NetworkState, step: usize) -> Result<()> {
    for (name, values) in network.state_vars(state) {
        if !values.iter().all(|v| v.is_finite()) {
            log::error!("Non-finite value in {} at step {}", name, step);
            return Err(RuntimeError::NonFinite {
                step,
                variable: name,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        neuron::{LeakyParams, LifParams},
        synapse::{ExpSynParams, WeightInit},
    };
    use ndarray::Array3;

    fn network(scale: f32) -> Network {
        let params = ExpSynParams {
            g_max: WeightInit::KaimingNormal { scale },
            ..Default::default()
        };
        Network::builder()
            .with_dt(1.0)
            .with_seed(11)
            .add_input("i", 3)
            .add_lif("r", 4, LifParams::default())
            .add_leaky("o", 2, LeakyParams::default())
            .connect("i2r", "i", "r", params.clone())
            .connect("r2o", "r", "o", params)
            .output("o")
            .build()
            .unwrap()
    }

    fn spikes(batch: usize, time: usize) -> Array3<f32> {
        Array3::from_shape_fn((batch, time, 3), |(b, t, f)| ((b + 2 * t + f) % 3 == 0) as u8 as f32)
    }

    #[test]
    fn test_output_shape_independent_of_monitors() {
        let net = network(20.0);
        let x = spikes(5, 12);

        let bare = Runner::new(&net).run(x.view(), true).unwrap();
        assert_eq!(bare.output.dim(), (5, 12, 2));
        assert!(bare.monitors.is_empty());

        let mut runner = Runner::new(&net)
            .with_monitors(["r.spike", "r.V", "i2r.g"])
            .unwrap();
        let out = runner.run(x.view(), true).unwrap();
        assert_eq!(out.output.dim(), (5, 12, 2));
        assert_eq!(out.mon("r.spike").unwrap().dim(), (5, 12, 4));
        assert_eq!(out.mon("i2r.g").unwrap().dim(), (5, 12, 4));
        assert_eq!(out.output, bare.output);
    }

    #[test]
    fn test_unknown_monitor_rejected() {
        let net = network(2.0);
        let result = Runner::new(&net).with_monitors(["r.current"]);
        assert!(matches!(result, Err(RuntimeError::UnknownObservable { .. })));
    }

    #[test]
    fn test_shape_mismatch_fails_before_running() {
        let net = network(2.0);
        let mut runner = Runner::new(&net);
        let x = Array3::<f32>::zeros((2, 5, 4));
        assert!(matches!(
            runner.run(x.view(), true),
            Err(RuntimeError::ShapeMismatch { .. })
        ));
        assert!(runner.state().is_none());

        let empty = Array3::<f32>::zeros((2, 0, 3));
        assert!(runner.run(empty.view(), true).is_err());
    }

    #[test]
    fn test_determinism_with_reset() {
        let net = network(20.0);
        let x = spikes(3, 30);
        let mut runner = Runner::new(&net).with_monitors(["r.spike"]).unwrap();
        let a = runner.run(x.view(), true).unwrap();
        let b = runner.run(x.view(), true).unwrap();
        assert_eq!(a.output, b.output);
        assert_eq!(a.mon("r.spike"), b.mon("r.spike"));
    }

    #[test]
    fn test_continue_without_reset() {
        let net = network(20.0);
        let x = spikes(2, 20);
        let mut whole = Runner::new(&net);
        let full = whole.run(x.view(), true).unwrap();

        let mut split = Runner::new(&net);
        let first = split.run(x.slice(ndarray::s![.., ..10, ..]), true).unwrap();
        let second = split.run(x.slice(ndarray::s![.., 10.., ..]), false).unwrap();
        assert_eq!(first.output, full.output.slice(ndarray::s![.., ..10, ..]));
        assert_eq!(second.output, full.output.slice(ndarray::s![.., 10.., ..]));

        // Carried state must match the batch
        let other = spikes(3, 4);
        assert!(split.run(other.view(), false).is_err());
        assert!(split.state().is_some());
    }

    #[test]
    fn test_time_major_inputs() {
        let net = network(20.0);
        let x = spikes(3, 8);
        let batch_major = Runner::new(&net).run(x.view(), true).unwrap();

        let time_major = x.view().permuted_axes([1, 0, 2]);
        let out = Runner::new(&net)
            .inputs_are_batching(false)
            .run(time_major, true)
            .unwrap();
        assert_eq!(out.output, batch_major.output);
    }

    #[test]
    fn test_non_finite_detected() {
        let mut net = network(2.0);
        net.trainable_var_mut("i2r.g_max").unwrap().fill(f32::INFINITY);
        let x = Array3::<f32>::ones((1, 4, 3));
        let result = Runner::new(&net).run(x.view(), true);
        // Hidden potential is reset after firing, the conductance is not
        match result {
            Err(RuntimeError::NonFinite { step, variable }) => {
                assert_eq!(step, 0);
                assert_eq!(variable, "i2r.g");
            }
            other => panic!("expected NonFinite, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_rollout_keeps_carried_state() {
        let net = network(20.0);
        // Same layout, but any continuation blows up on its first step
        let mut diverging = net.clone();
        diverging.trainable_var_mut("i2r.g_max").unwrap().fill(f32::INFINITY);

        let x = spikes(2, 5);
        let mut runner = Runner::new(&net);
        runner.run(x.view(), true).unwrap();
        let carried = runner.state().cloned().unwrap();

        let mut broken = Runner::new(&diverging);
        broken.state = Some(carried.clone());
        let result = broken.run(Array3::<f32>::ones((2, 3, 3)).view(), false);
        assert!(matches!(result, Err(RuntimeError::NonFinite { .. })));
        assert_eq!(broken.state(), Some(&carried));

        let other = spikes(3, 4);
        assert!(runner.run(other.view(), false).is_err());
        assert_eq!(runner.state(), Some(&carried));
    }

    #[test]
    fn test_tape_records_every_step() {
        let net = network(20.0);
        let x = spikes(2, 6);
        let (out, tape) = Runner::new(&net).rollout_recorded(x.view()).unwrap();
        assert_eq!(tape.len(), 6);
        assert!(tape.record(0, 1).is_some());
        assert!(tape.record(0, 0).is_none());
        assert!(tape.record(0, 2).is_none());
        assert_eq!(tape.spikes(None, 1).unwrap().dim(), (2, 4));
        assert_eq!(out.output.dim(), (2, 6, 2));
    }
}
