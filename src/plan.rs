//! Plans assign a flow to every edge and a state to every machine.
//!
//! A plan can be written as a map from keys to scalars or full-horizon vectors, or as a table
//! indexed by the horizon. Both forms are normalised into one [`StepPlan`] per time step, after
//! checking that the plan covers exactly the edges and machines of the plant.
use crate::edge::EdgeKey;
use crate::horizon::Horizon;
use crate::id::NodeID;
use anyhow::{Result, ensure};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

/// Separator between source and destination in textual edge keys
pub const EDGE_SEPARATOR: &str = "->";

/// A key of a plan: either an edge or a machine
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlanKey {
    /// The flow through an edge
    Edge(EdgeKey),
    /// The state of a machine
    Machine(NodeID),
}

impl PlanKey {
    /// Key for the flow through the given edge
    pub fn edge(source: &str, destination: &str) -> Self {
        Self::Edge(EdgeKey::new(source, destination))
    }

    /// Key for the state of the given machine
    pub fn machine(name: &str) -> Self {
        Self::Machine(name.into())
    }

    /// The name of the column holding this key in tabular files
    pub fn column_name(&self) -> String {
        match self {
            Self::Edge(key) => key.column_name(),
            Self::Machine(name) => name.to_string(),
        }
    }
}

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Edge(key) => write!(f, "{key}"),
            Self::Machine(name) => write!(f, "'{name}'"),
        }
    }
}

/// Parse `source -> destination` as an edge key and anything else as a machine name
impl FromStr for PlanKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        ensure!(!s.is_empty(), "Plan keys cannot be empty");
        match s.split_once(EDGE_SEPARATOR) {
            Some((source, destination)) => {
                let (source, destination) = (source.trim(), destination.trim());
                ensure!(
                    !source.is_empty() && !destination.is_empty(),
                    "Invalid edge key '{s}'"
                );
                Ok(Self::edge(source, destination))
            }
            None => Ok(Self::machine(s)),
        }
    }
}

impl<'de> Deserialize<'de> for PlanKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The value assigned to a plan key.
///
/// Null entries (e.g. the state of a machine which is off) are written as `NaN`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PlanValue {
    /// The same value for every step
    Scalar(f64),
    /// One value per step of the horizon
    Vector(Vec<f64>),
}

impl PlanValue {
    /// The value at the given step
    fn at(&self, step: usize) -> f64 {
        match self {
            Self::Scalar(value) => *value,
            Self::Vector(values) => values[step],
        }
    }
}

/// A plan in map form
pub type Plan = IndexMap<PlanKey, PlanValue>;

/// A plan in table form: one row per time step, one column per key
#[derive(Clone, Debug, PartialEq)]
pub struct PlanTable {
    /// The row labels, which must match the horizon
    pub index: Vec<String>,
    /// The columns of the table
    pub columns: IndexMap<PlanKey, Vec<f64>>,
}

impl PlanTable {
    /// Convert into map form, checking that the rows match the horizon
    pub fn into_plan(self, horizon: &Horizon) -> Result<Plan> {
        ensure!(
            self.index == horizon.labels(),
            "The index of the plan should match the horizon {horizon}, got [{}]",
            self.index.iter().join(", ")
        );

        Ok(self
            .columns
            .into_iter()
            .map(|(key, values)| (key, PlanValue::Vector(values)))
            .collect())
    }
}

/// The flows and states assigned for a single time step
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepPlan {
    /// Flow through each edge, `None` when null
    pub flows: IndexMap<EdgeKey, Option<f64>>,
    /// State of each machine, `None` when the machine is off
    pub states: IndexMap<NodeID, Option<f64>>,
}

/// Treat `NaN` as a null value
fn to_option(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}

/// Check that the keys of a plan are exactly the edges and machines of the plant
fn check_keys<'a, I>(keys: I, machines: &IndexSet<NodeID>, edges: &IndexSet<EdgeKey>) -> Result<()>
where
    I: IntoIterator<Item = &'a PlanKey>,
{
    let mut seen_machines = IndexSet::new();
    let mut seen_edges = IndexSet::new();
    for key in keys {
        // A key is rejected if it is unknown or repeated
        let known = match key {
            PlanKey::Edge(edge) => edges.contains(edge) && seen_edges.insert(edge),
            PlanKey::Machine(name) => machines.contains(name) && seen_machines.insert(name),
        };
        ensure!(known, "Key {key} is not present in the plant");
    }

    // Every machine needs a state
    let missing = machines
        .iter()
        .filter(|name| !seen_machines.contains(name))
        .map(|name| format!("'{name}'"))
        .collect_vec();
    ensure!(
        missing.is_empty(),
        "No states vector has been passed for machines [{}]",
        missing.join(", ")
    );

    // Every edge needs a flow
    let missing = edges.iter().filter(|key| !seen_edges.contains(key)).collect_vec();
    ensure!(
        missing.is_empty(),
        "No flows vector has been passed for edges [{}]",
        missing.iter().join(", ")
    );

    Ok(())
}

/// Check that every vector of a plan covers the whole horizon
fn check_lengths(plan: &Plan, horizon: &Horizon) -> Result<()> {
    for (key, value) in plan {
        if let PlanValue::Vector(values) = value {
            ensure!(
                values.len() == horizon.len(),
                "Vector for key {key} has length {}, expected {}",
                values.len(),
                horizon.len()
            );
        }
    }

    Ok(())
}

/// Extract the assignment for one step from a plan whose keys have already been checked
fn extract_step(plan: &Plan, step: usize) -> StepPlan {
    let mut out = StepPlan::default();
    for (key, value) in plan {
        // Scalars hold for every step
        let value = to_option(value.at(step));
        match key {
            PlanKey::Edge(edge) => {
                out.flows.insert(edge.clone(), value);
            }
            PlanKey::Machine(name) => {
                out.states.insert(name.clone(), value);
            }
        }
    }

    out
}

/// Normalise a predicted plan into one assignment per step of the horizon.
///
/// # Arguments
///
/// * `plan` - The plan, with a scalar or a full-horizon vector per key
/// * `machines` - Names of all machines of the plant
/// * `edges` - Keys of all edges of the plant
/// * `horizon` - The horizon of the plant
pub fn process_plan(
    plan: &Plan,
    machines: &IndexSet<NodeID>,
    edges: &IndexSet<EdgeKey>,
    horizon: &Horizon,
) -> Result<Vec<StepPlan>> {
    check_lengths(plan, horizon)?;
    check_keys(plan.keys(), machines, edges)?;

    Ok((0..horizon.len())
        .map(|step| extract_step(plan, step))
        .collect())
}

/// Check the output of a recourse action for one step and extract its assignment.
///
/// Scalars are the values for this step. Vectors cover the full horizon, of which the entry for
/// this step is used.
pub fn check_plan(
    plan: &Plan,
    step: usize,
    machines: &IndexSet<NodeID>,
    edges: &IndexSet<EdgeKey>,
    horizon: &Horizon,
) -> Result<StepPlan> {
    check_lengths(plan, horizon)?;
    check_keys(plan.keys(), machines, edges)?;

    Ok(extract_step(plan, step))
}

impl From<&StepPlan> for Plan {
    fn from(step: &StepPlan) -> Self {
        let flows = step.flows.iter().map(|(key, flow)| {
            (
                PlanKey::Edge(key.clone()),
                PlanValue::Scalar(flow.unwrap_or(f64::NAN)),
            )
        });
        let states = step.states.iter().map(|(name, state)| {
            (
                PlanKey::Machine(name.clone()),
                PlanValue::Scalar(state.unwrap_or(f64::NAN)),
            )
        });
        flows.chain(states).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use rstest::{fixture, rstest};

    #[fixture]
    fn machines() -> IndexSet<NodeID> {
        ["mac".into()].into_iter().collect()
    }

    #[fixture]
    fn edges() -> IndexSet<EdgeKey> {
        [EdgeKey::new("sup", "mac"), EdgeKey::new("mac", "cus")]
            .into_iter()
            .collect()
    }

    #[fixture]
    fn horizon() -> Horizon {
        Horizon::new(3).unwrap()
    }

    #[fixture]
    fn plan() -> Plan {
        [
            (PlanKey::edge("sup", "mac"), PlanValue::Vector(vec![1.0, 2.0, 3.0])),
            (PlanKey::edge("mac", "cus"), PlanValue::Scalar(1.0)),
            (
                PlanKey::machine("mac"),
                PlanValue::Vector(vec![1.0, f64::NAN, 3.0]),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[rstest]
    #[case("sup -> mac", PlanKey::edge("sup", "mac"))]
    #[case("sup->mac", PlanKey::edge("sup", "mac"))]
    #[case(" mac ", PlanKey::machine("mac"))]
    fn test_plan_key_parse(#[case] s: &str, #[case] expected: PlanKey) {
        assert_eq!(s.parse::<PlanKey>().unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("sup ->")]
    fn test_plan_key_parse_invalid(#[case] s: &str) {
        assert!(s.parse::<PlanKey>().is_err());
    }

    #[rstest]
    fn test_process_plan(
        plan: Plan,
        machines: IndexSet<NodeID>,
        edges: IndexSet<EdgeKey>,
        horizon: Horizon,
    ) {
        let steps = process_plan(&plan, &machines, &edges, &horizon).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].flows[&EdgeKey::new("sup", "mac")], Some(2.0));
        assert_eq!(steps[2].flows[&EdgeKey::new("mac", "cus")], Some(1.0)); // scalar
        assert_eq!(steps[1].states[&NodeID::new("mac")], None); // NaN means off
        assert_eq!(steps[2].states[&NodeID::new("mac")], Some(3.0));
    }

    #[rstest]
    fn test_process_plan_wrong_length(
        mut plan: Plan,
        machines: IndexSet<NodeID>,
        edges: IndexSet<EdgeKey>,
        horizon: Horizon,
    ) {
        plan.insert(PlanKey::machine("mac"), PlanValue::Vector(vec![1.0]));
        assert_error!(
            process_plan(&plan, &machines, &edges, &horizon),
            "Vector for key 'mac' has length 1, expected 3"
        );
    }

    #[rstest]
    fn test_process_plan_unknown_key(
        mut plan: Plan,
        machines: IndexSet<NodeID>,
        edges: IndexSet<EdgeKey>,
        horizon: Horizon,
    ) {
        plan.insert(PlanKey::edge("x", "y"), PlanValue::Scalar(0.0));
        assert_error!(
            process_plan(&plan, &machines, &edges, &horizon),
            "Key ('x', 'y') is not present in the plant"
        );
    }

    #[rstest]
    fn test_process_plan_missing_keys(
        plan: Plan,
        machines: IndexSet<NodeID>,
        edges: IndexSet<EdgeKey>,
        horizon: Horizon,
    ) {
        let mut without_state = plan.clone();
        without_state.shift_remove(&PlanKey::machine("mac"));
        assert_error!(
            process_plan(&without_state, &machines, &edges, &horizon),
            "No states vector has been passed for machines ['mac']"
        );

        let mut without_flow = plan;
        without_flow.shift_remove(&PlanKey::edge("mac", "cus"));
        assert_error!(
            process_plan(&without_flow, &machines, &edges, &horizon),
            "No flows vector has been passed for edges [('mac', 'cus')]"
        );
    }

    #[rstest]
    fn test_check_plan(
        plan: Plan,
        machines: IndexSet<NodeID>,
        edges: IndexSet<EdgeKey>,
        horizon: Horizon,
    ) {
        let step = check_plan(&plan, 2, &machines, &edges, &horizon).unwrap();
        assert_eq!(step.flows[&EdgeKey::new("sup", "mac")], Some(3.0));
        assert_eq!(step.states[&NodeID::new("mac")], Some(3.0));

        // A plan of scalars gives the same assignment at any step
        let round_trip = Plan::from(&step);
        assert_eq!(
            check_plan(&round_trip, 0, &machines, &edges, &horizon).unwrap(),
            step
        );
    }

    #[rstest]
    fn test_plan_table_into_plan(horizon: Horizon) {
        let table = PlanTable {
            index: vec!["0".into(), "1".into(), "2".into()],
            columns: [(PlanKey::machine("mac"), vec![1.0, 2.0, 3.0])]
                .into_iter()
                .collect(),
        };
        let plan = table.clone().into_plan(&horizon).unwrap();
        assert_eq!(
            plan[&PlanKey::machine("mac")],
            PlanValue::Vector(vec![1.0, 2.0, 3.0])
        );

        // One row short
        let table = PlanTable {
            index: vec!["0".into(), "1".into()],
            ..table
        };
        assert_error!(
            table.into_plan(&horizon),
            "The index of the plan should match the horizon [0, 1, 2], got [0, 1]"
        );
    }
}
