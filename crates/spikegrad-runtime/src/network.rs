//! Network composition
//!
//! A [`Network`] owns every neuron group and synapse projection and defines a
//! single pure step. State lives in [`NetworkState`], which the caller threads
//! through [`Network::step`].
//!
//! Within a step all projections run first, then every group is updated once
//! with the sum of its incoming conductances. A projection reads the current
//! external input when its source is the input group and the source group's
//! spikes from the previous step otherwise, so recurrent projections need no
//! special ordering.

use ndarray::{Array2, ArrayView2};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    error::*,
    neuron::{GroupState, LeakyParams, LifParams, LifRecord, NeuronGroup, NeuronKind},
    synapse::{ExpSynParams, SynapseProjection},
    DEFAULT_DT_MS,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Index of a neuron group inside its network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub usize);

/// What the output group contributes as the step output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Readout {
    /// Membrane potential
    #[default]
    Potential,
    /// Spike vector
    Spike,
}

/// Every mutable variable of a network for one batch size
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkState {
    batch: usize,
    groups: Vec<GroupState>,
    synapses: Vec<Array2<f32>>,
}

impl NetworkState {
    /// Number of independent batch elements
    pub fn batch_size(&self) -> usize {
        self.batch
    }

    /// State of a group
    pub fn group(&self, id: GroupId) -> &GroupState {
        &self.groups[id.0]
    }

    /// Conductance of the `index`-th projection
    pub fn conductance(&self, index: usize) -> &Array2<f32> {
        &self.synapses[index]
    }
}

/// Result of one network step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Next state
    pub state: NetworkState,
    /// Output group readout, (batch, output_size)
    pub output: Array2<f32>,
    /// Per group, the LIF record of this step
    pub records: Vec<Option<LifRecord>>,
}

/// A composed spiking network
#[derive(Debug, Clone)]
pub struct Network {
    dt: f32,
    groups: Vec<NeuronGroup>,
    projections: Vec<SynapseProjection>,
    input: GroupId,
    output: GroupId,
    readout: Readout,
}

impl Network {
    /// Start building a network
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::new()
    }

    /// Integration time step (ms)
    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// All groups in update order
    pub fn groups(&self) -> &[NeuronGroup] {
        &self.groups
    }

    /// All projections in update order
    pub fn projections(&self) -> &[SynapseProjection] {
        &self.projections
    }

    /// Group by id
    pub fn group(&self, id: GroupId) -> &NeuronGroup {
        &self.groups[id.0]
    }

    /// Look a group up by name
    pub fn group_id(&self, name: &str) -> Option<GroupId> {
        self.groups.iter().position(|g| g.name() == name).map(GroupId)
    }

    /// The input relay group
    pub fn input_group(&self) -> GroupId {
        self.input
    }

    /// The readout group
    pub fn output_group(&self) -> GroupId {
        self.output
    }

    /// Readout kind
    pub fn readout(&self) -> Readout {
        self.readout
    }

    /// Expected feature size of the external input
    pub fn input_size(&self) -> usize {
        self.group(self.input).size()
    }

    /// Feature size of the step output
    pub fn output_size(&self) -> usize {
        self.group(self.output).size()
    }

    /// Baseline state for `batch` independent elements
    pub fn reset_state(&self, batch: usize) -> NetworkState {
        NetworkState {
            batch,
            groups: self.groups.iter().map(|g| g.baseline(batch)).collect(),
            synapses: self.projections.iter().map(|p| p.baseline(batch)).collect(),
        }
    }

    /// Presynaptic vector a projection sees during the step that starts from `prev`
    pub(crate) fn presynaptic<'s>(
        &self,
        projection: &SynapseProjection,
        prev: &'s NetworkState,
        input: &'s ArrayView2<'_, f32>,
    ) -> ArrayView2<'s, f32> {
        if projection.source() == self.input {
            input.view()
        } else {
            prev.groups[projection.source().0].spike.view()
        }
    }

    fn check_state(&self, state: &NetworkState) -> Result<()> {
        if state.groups.len() != self.groups.len() || state.synapses.len() != self.projections.len() {
            return Err(RuntimeError::invalid_config(
                "state was not created by this network",
            ));
        }
        let batch = state.batch;
        for (group, gs) in self.groups.iter().zip(&state.groups) {
            let expected = (batch, group.size());
            for (attr, value) in [("V", &gs.v), ("spike", &gs.spike)] {
                if value.dim() != expected {
                    return Err(RuntimeError::shape_mismatch(
                        format!("state of {}.{}", group.name(), attr),
                        expected,
                        value.dim(),
                    ));
                }
            }
        }
        for (projection, g) in self.projections.iter().zip(&state.synapses) {
            let expected = (batch, projection.post_size());
            if g.dim() != expected {
                return Err(RuntimeError::shape_mismatch(
                    format!("state of {}.g", projection.name()),
                    expected,
                    g.dim(),
                ));
            }
        }
        Ok(())
    }

    /// Advance one time step
    pub fn step(&self, prev: &NetworkState, input: ArrayView2<f32>) -> Result<StepOutcome> {
        self.check_state(prev)?;
        let batch = prev.batch;
        let expected = (batch, self.input_size());
        if input.dim() != expected {
            return Err(RuntimeError::shape_mismatch("step input", expected, input.dim()));
        }

        let mut currents: Vec<Array2<f32>> = self
            .groups
            .iter()
            .map(|g| Array2::zeros((batch, g.size())))
            .collect();

        // Projections first, so every group sees all of its drive
        let mut synapses = Vec::with_capacity(self.projections.len());
        for (index, projection) in self.projections.iter().enumerate() {
            let pre = self.presynaptic(projection, prev, &input);
            let g = projection.update(prev.synapses[index].view(), pre, self.dt);
            currents[projection.target().0] += &g;
            synapses.push(g);
        }

        let mut groups = Vec::with_capacity(self.groups.len());
        let mut records = Vec::with_capacity(self.groups.len());
        for (index, group) in self.groups.iter().enumerate() {
            if group.is_input() {
                groups.push(group.present(input));
                records.push(None);
                continue;
            }
            let update = group.update(&prev.groups[index], currents[index].view(), self.dt);
            groups.push(update.state);
            records.push(update.record);
        }

        let out = &groups[self.output.0];
        let output = match self.readout {
            Readout::Potential => out.v.clone(),
            Readout::Spike => out.spike.clone(),
        };

        Ok(StepOutcome {
            state: NetworkState {
                batch,
                groups,
                synapses,
            },
            output,
            records,
        })
    }

    /// Names of every monitorable state variable
    pub fn observables(&self) -> Vec<String> {
        let mut names = Vec::new();
        for group in &self.groups {
            for attr in group.observables() {
                names.push(format!("{}.{}", group.name(), attr));
            }
        }
        for projection in &self.projections {
            names.push(format!("{}.g", projection.name()));
        }
        names
    }

    /// Whether `name` is a known observable
    pub fn is_observable(&self, name: &str) -> bool {
        self.observables().iter().any(|n| n == name)
    }

    /// Read an observable from a state
    pub fn observe<'s>(&self, state: &'s NetworkState, name: &str) -> Result<ArrayView2<'s, f32>> {
        let unknown = || RuntimeError::UnknownObservable {
            name: name.to_string(),
        };
        let (module, attr) = name.rsplit_once('.').ok_or_else(unknown)?;

        if let Some(id) = self.group_id(module) {
            if !self.group(id).observables().contains(&attr) {
                return Err(unknown());
            }
            let group = state.group(id);
            return match attr {
                "V" => Ok(group.v.view()),
                _ => Ok(group.spike.view()),
            };
        }

        match self.projections.iter().position(|p| p.name() == module) {
            Some(index) if attr == "g" => Ok(state.synapses[index].view()),
            _ => Err(unknown()),
        }
    }

    /// Every stateful variable of `state`, by name
    pub fn state_vars<'s>(&self, state: &'s NetworkState) -> Vec<(String, ArrayView2<'s, f32>)> {
        let mut vars = Vec::new();
        for (group, gs) in self.groups.iter().zip(&state.groups) {
            for attr in group.observables() {
                let view = if *attr == "V" { gs.v.view() } else { gs.spike.view() };
                vars.push((format!("{}.{}", group.name(), attr), view));
            }
        }
        for (projection, g) in self.projections.iter().zip(&state.synapses) {
            vars.push((format!("{}.g", projection.name()), g.view()));
        }
        vars
    }

    /// Registry name of a projection's weight tensor
    pub fn param_name(projection: &SynapseProjection) -> String {
        format!("{}.g_max", projection.name())
    }

    /// Every trainable tensor, by name
    pub fn trainable_vars(&self) -> Vec<(String, &Array2<f32>)> {
        self.projections
            .iter()
            .map(|p| (Self::param_name(p), p.weights()))
            .collect()
    }

    /// Mutable access to a trainable tensor
    pub fn trainable_var_mut(&mut self, name: &str) -> Option<&mut Array2<f32>> {
        self.projections
            .iter_mut()
            .find(|p| Self::param_name(p) == name)
            .map(|p| p.weights_mut())
    }

    /// Mutable access to a projection by name
    pub fn projection_mut(&mut self, name: &str) -> Option<&mut SynapseProjection> {
        self.projections.iter_mut().find(|p| p.name() == name)
    }
}

/// Builder for constructing networks
#[derive(Debug)]
pub struct NetworkBuilder {
    dt: f32,
    seed: u64,
    groups: Vec<(String, usize, NeuronKind)>,
    projections: Vec<(String, String, String, ExpSynParams)>, // (name, source, target, params)
    output: Option<String>,
    readout: Readout,
}

impl NetworkBuilder {
    /// Create a new network builder
    pub fn new() -> Self {
        Self {
            dt: DEFAULT_DT_MS,
            seed: 42,
            groups: Vec::new(),
            projections: Vec::new(),
            output: None,
            readout: Readout::Potential,
        }
    }

    /// Set the integration time step (ms)
    pub fn with_dt(mut self, dt: f32) -> Self {
        self.dt = dt;
        self
    }

    /// Seed for weight initialisation and connectivity masks
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Add a group of any kind
    pub fn add_group(mut self, name: impl Into<String>, size: usize, kind: NeuronKind) -> Self {
        self.groups.push((name.into(), size, kind));
        self
    }

    /// Add the external input relay
    pub fn add_input(self, name: impl Into<String>, size: usize) -> Self {
        self.add_group(name, size, NeuronKind::Input)
    }

    /// Add a LIF group
    pub fn add_lif(self, name: impl Into<String>, size: usize, params: LifParams) -> Self {
        self.add_group(name, size, NeuronKind::Lif(params))
    }

    /// Add a leaky integrator group
    pub fn add_leaky(self, name: impl Into<String>, size: usize, params: LeakyParams) -> Self {
        self.add_group(name, size, NeuronKind::Leaky(params))
    }

    /// Connect `source` to `target` through an exponential synapse
    pub fn connect(
        mut self,
        name: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        params: ExpSynParams,
    ) -> Self {
        self.projections
            .push((name.into(), source.into(), target.into(), params));
        self
    }

    /// Choose the readout group
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.output = Some(name.into());
        self
    }

    /// Choose what the readout group reports
    pub fn readout(mut self, readout: Readout) -> Self {
        self.readout = readout;
        self
    }

    /// Build the network
    pub fn build(self) -> Result<Network> {
        ensure_positive("dt", self.dt)?;

        let mut groups: Vec<NeuronGroup> = Vec::with_capacity(self.groups.len());
        for (name, size, kind) in self.groups {
            if groups.iter().any(|g| g.name() == name) {
                return Err(RuntimeError::invalid_config(format!(
                    "Group {} already exists",
                    name
                )));
            }
            if name.contains('.') {
                return Err(RuntimeError::invalid_config(format!(
                    "Group name '{}' must not contain '.'",
                    name
                )));
            }
            groups.push(NeuronGroup::new(name, size, kind)?);
        }

        let find = |name: &str| groups.iter().position(|g| g.name() == name).map(GroupId);

        let inputs: Vec<usize> = groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.is_input())
            .map(|(i, _)| i)
            .collect();
        if inputs.len() != 1 {
            return Err(RuntimeError::network_topology(format!(
                "expected exactly one input group, found {}",
                inputs.len()
            )));
        }
        let input = GroupId(inputs[0]);

        let output_name = self
            .output
            .ok_or_else(|| RuntimeError::invalid_config("no output group selected"))?;
        let output = find(&output_name).ok_or_else(|| {
            RuntimeError::network_topology(format!("output group '{}' not found", output_name))
        })?;
        if output == input {
            return Err(RuntimeError::network_topology(
                "the input group cannot be the output group",
            ));
        }
        if self.readout == Readout::Spike && !matches!(groups[output.0].kind(), NeuronKind::Lif(_)) {
            return Err(RuntimeError::network_topology(format!(
                "spike readout requires a spiking output group, '{}' does not spike",
                output_name
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut projections: Vec<SynapseProjection> = Vec::with_capacity(self.projections.len());
        for (name, source_name, target_name, params) in self.projections {
            if projections.iter().any(|p| p.name() == name) || find(&name).is_some() {
                return Err(RuntimeError::invalid_config(format!(
                    "Projection name {} already in use",
                    name
                )));
            }
            let source = find(&source_name).ok_or_else(|| {
                RuntimeError::network_topology(format!(
                    "projection '{}': source '{}' not found",
                    name, source_name
                ))
            })?;
            let target = find(&target_name).ok_or_else(|| {
                RuntimeError::network_topology(format!(
                    "projection '{}': target '{}' not found",
                    name, target_name
                ))
            })?;
            if groups[target.0].is_input() {
                return Err(RuntimeError::network_topology(format!(
                    "projection '{}' targets the input group",
                    name
                )));
            }
            if !groups[source.0].is_spiking() {
                return Err(RuntimeError::network_topology(format!(
                    "projection '{}': source '{}' does not spike",
                    name, source_name
                )));
            }
            if params.tau <= self.dt {
                log::warn!(
                    "projection '{}': dt ({}) is not smaller than tau ({})",
                    name,
                    self.dt,
                    params.tau
                );
            }
            let pre = groups[source.0].size();
            let post = groups[target.0].size();
            projections.push(SynapseProjection::new(
                name,
                (source, pre),
                (target, post),
                &params,
                &mut rng,
            )?);
        }

        for group in &groups {
            if let Some(tau) = group.tau() {
                if tau <= self.dt {
                    log::warn!(
                        "group '{}': dt ({}) is not smaller than tau ({}); integration may diverge",
                        group.name(),
                        self.dt,
                        tau
                    );
                }
            }
        }

        log::debug!(
            "Built network: {} groups, {} projections, dt={}ms",
            groups.len(),
            projections.len(),
            self.dt
        );

        Ok(Network {
            dt: self.dt,
            groups,
            projections,
            input,
            output,
            readout: self.readout,
        })
    }
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}
