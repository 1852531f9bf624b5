//! Functionality for running a simulation.
//!
//! At every step of the horizon, the entities of the plant first compute their predicted values.
//! The recourse action then observes a snapshot of the plant and decides the realised flows and
//! states, which every entity checks and commits.
use crate::commodity::CommodityID;
use crate::edge::{EdgeKey, EdgeMap, EdgeView};
use crate::id::NodeID;
use crate::node::NodeView;
use crate::output::SimulationOutput;
use crate::plan::{Plan, StepPlan, check_plan, process_plan};
use crate::plant::Plant;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;

/// The edges entering and leaving each node.
///
/// The topology is frozen during a run, so this is computed once at the start.
#[derive(Clone, Debug, Default)]
pub struct Wiring {
    inputs: IndexMap<NodeID, Vec<EdgeKey>>,
    outputs: IndexMap<NodeID, Vec<(EdgeKey, CommodityID)>>,
}

impl Wiring {
    /// Index the given edges, each with the commodity it carries
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (EdgeKey, CommodityID)>,
    {
        let mut wiring = Self::default();
        for (key, commodity) in edges {
            wiring
                .inputs
                .entry(key.destination.clone())
                .or_default()
                .push(key.clone());
            wiring
                .outputs
                .entry(key.source.clone())
                .or_default()
                .push((key, commodity));
        }

        wiring
    }

    /// Index the edges of a plant
    pub fn new(edges: &EdgeMap) -> Self {
        Self::from_edges(
            edges
                .values()
                .map(|edge| (edge.key().clone(), edge.commodity().clone())),
        )
    }
}

/// The realised flows and states of one step, as seen by the entities committing them
pub struct StepContext<'a> {
    step: usize,
    assignment: &'a StepPlan,
    wiring: &'a Wiring,
}

impl<'a> StepContext<'a> {
    /// Create a context for the given step
    pub fn new(step: usize, assignment: &'a StepPlan, wiring: &'a Wiring) -> Self {
        Self {
            step,
            assignment,
            wiring,
        }
    }

    /// The index of the step being committed
    pub fn step(&self) -> usize {
        self.step
    }

    /// The realised flow through an edge, `None` if null
    pub fn flow(&self, key: &EdgeKey) -> Option<f64> {
        self.assignment.flows.get(key).copied().flatten()
    }

    /// The realised state of a machine, `None` if null
    pub fn state(&self, name: &NodeID) -> Option<f64> {
        self.assignment.states.get(name).copied().flatten()
    }

    /// Whether the given node is a machine which is switched off in this step
    pub fn is_machine_off(&self, name: &NodeID) -> bool {
        match self.assignment.states.get(name) {
            Some(state) => state.is_none_or(|x| x.is_nan() || x == 0.0),
            // Not a machine
            None => false,
        }
    }

    /// The total flow into a node, counting null flows as zero
    pub fn in_flow(&self, name: &NodeID) -> f64 {
        self.wiring
            .inputs
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|key| self.flow(key))
            .sum()
    }

    /// The total flow out of a node, counting null flows as zero
    pub fn out_flow(&self, name: &NodeID) -> f64 {
        self.out_flows_by_commodity(name).values().sum()
    }

    /// The total flow out of a node for each commodity it sends
    pub fn out_flows_by_commodity(&self, name: &NodeID) -> IndexMap<CommodityID, f64> {
        let mut flows = IndexMap::new();
        for (key, commodity) in self.wiring.outputs.get(name).into_iter().flatten() {
            *flows.entry(commodity.clone()).or_insert(0.0) += self.flow(key).unwrap_or(0.0);
        }

        flows
    }
}

/// A copy of the plant handed to the recourse action at each step.
///
/// The views carry the values predicted for the current step (`current_price`, `current_flow`,
/// etc.) next to the realised histories.
#[derive(Clone, Debug)]
pub struct PlantSnapshot {
    step: usize,
    label: String,
    nodes: IndexMap<NodeID, NodeView>,
    edges: IndexMap<EdgeKey, EdgeView>,
    predicted: StepPlan,
}

impl PlantSnapshot {
    fn new(plant: &Plant, step: usize, predicted: &StepPlan) -> Self {
        Self {
            step,
            label: plant.horizon().label(step).to_string(),
            nodes: plant.nodes(),
            edges: plant
                .edges_map()
                .iter()
                .map(|(key, edge)| (key.clone(), edge.exposed()))
                .collect(),
            predicted: predicted.clone(),
        }
    }

    /// The index of the current step
    pub fn step(&self) -> usize {
        self.step
    }

    /// The time label of the current step
    pub fn label(&self) -> &str {
        &self.label
    }

    /// All nodes
    pub fn nodes(&self) -> &IndexMap<NodeID, NodeView> {
        &self.nodes
    }

    /// All edges
    pub fn edges(&self) -> &IndexMap<EdgeKey, EdgeView> {
        &self.edges
    }

    /// The node with the given name, if any
    pub fn node(&self, name: &str) -> Option<&NodeView> {
        self.nodes.get(name)
    }

    /// The edge between the given nodes, if any
    pub fn edge(&self, source: &str, destination: &str) -> Option<&EdgeView> {
        self.edges.get(&EdgeKey::new(source, destination))
    }

    /// The predicted flows and states for the current step, as a plan
    pub fn predicted_plan(&self) -> Plan {
        Plan::from(&self.predicted)
    }
}

/// Run the simulation.
///
/// # Arguments
///
/// * `plant` - The plant to simulate, which must not have been run before
/// * `plan` - The predicted flows and states over the horizon
/// * `recourse` - Called at every step with the step index and a snapshot of the plant, returns
///   the realised flows and states
/// * `seed` - Seed for the random number generator shared by all variance models
pub fn run<R>(plant: &mut Plant, plan: &Plan, mut recourse: R, seed: u64) -> Result<SimulationOutput>
where
    R: FnMut(usize, &PlantSnapshot) -> Result<Plan>,
{
    // A plant can only be run once
    plant.start_run()?;
    let horizon = plant.horizon().clone();
    let machines = plant.machine_names();
    let edge_keys = plant.edge_keys();
    let predicted = process_plan(plan, &machines, &edge_keys, &horizon)
        .context("Invalid predicted plan")?;
    let wiring = Wiring::new(plant.edges_map());
    let mut rng = StdRng::seed_from_u64(seed);

    info!(
        "Simulating {} nodes and {} edges over {} steps (seed {seed})",
        plant.nodes().len(),
        edge_keys.len(),
        horizon.len()
    );

    for (step, predicted) in predicted.iter().enumerate() {
        let label = horizon.label(step);

        // Draw this step's prices and demands and store the predicted flows and states
        {
            let (nodes, edges) = plant.entities_mut();
            for node in nodes.values_mut() {
                node.update(&mut rng, predicted)?;
            }
            for edge in edges.values_mut() {
                edge.update(predicted.flows.get(edge.key()).copied().flatten())?;
            }
        }

        // Let the recourse action decide the realised flows and states
        let snapshot = PlantSnapshot::new(plant, step, predicted);
        let realised = recourse(step, &snapshot)
            .with_context(|| format!("Recourse action failed at step {label}"))?;
        let assignment = check_plan(&realised, step, &machines, &edge_keys, &horizon)
            .with_context(|| format!("Invalid output of the recourse action at step {label}"))?;

        // Check the edge bounds first, then the physics of each node
        let context = StepContext::new(step, &assignment, &wiring);
        let (nodes, edges) = plant.entities_mut();
        for edge in edges.values_mut() {
            edge.step(&context)
                .with_context(|| format!("Infeasible flows at step {label}"))?;
        }
        for node in nodes.values_mut() {
            node.step(&context)
                .with_context(|| format!("Infeasible flows at step {label}"))?;
        }
        debug!("Committed step {label}");
    }

    plant.finish_run();
    info!("Simulation complete");

    Ok(SimulationOutput::from_plant(plant))
}
