//! Edges carry a single commodity from a source node to a destination node.
use crate::commodity::CommodityID;
use crate::horizon::Horizon;
use crate::id::NodeID;
use crate::runtime::Runtime;
use crate::series::Series;
use crate::simulation::StepContext;
use anyhow::{Result, ensure};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// The identity of an edge: the ordered pair of node names it connects
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EdgeKey {
    /// Name of the source node
    pub source: NodeID,
    /// Name of the destination node
    pub destination: NodeID,
}

impl EdgeKey {
    /// Create a new edge key
    pub fn new(source: &str, destination: &str) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// The name of the column holding this edge in tabular files, e.g. `sup -> mac`
    pub fn column_name(&self) -> String {
        format!("{} -> {}", self.source, self.destination)
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "('{}', '{}')", self.source, self.destination)
    }
}

/// A map of edges, keyed by source and destination
pub type EdgeMap = IndexMap<EdgeKey, Edge>;

fn default_max_flow() -> f64 {
    f64::INFINITY
}

/// Bounds on the flow through an edge
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct EdgeBounds {
    /// Minimum flow at every step
    #[serde(default)]
    pub min_flow: f64,
    /// Maximum flow at every step
    #[serde(default = "default_max_flow")]
    pub max_flow: f64,
    /// Whether the flow must be a whole number
    #[serde(default)]
    pub integer: bool,
}

impl Default for EdgeBounds {
    fn default() -> Self {
        Self {
            min_flow: 0.0,
            max_flow: f64::INFINITY,
            integer: false,
        }
    }
}

impl EdgeBounds {
    /// Check that the bounds are consistent
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.min_flow >= 0.0,
            "The minimum flow cannot be negative, got {:?}",
            self.min_flow
        );
        ensure!(
            self.max_flow >= self.min_flow,
            "The maximum flow cannot be lower than the minimum, got {:?} < {:?}",
            self.max_flow,
            self.min_flow
        );

        Ok(())
    }

    /// Check a realised flow against the bounds
    fn check(&self, key: &EdgeKey, flow: f64) -> Result<()> {
        ensure!(flow.is_finite(), "Flow {flow:?} on edge {key} must be finite");
        ensure!(
            flow >= self.min_flow,
            "Flow {flow:?} on edge {key} is lower than the minimum flow {:?}",
            self.min_flow
        );
        ensure!(
            flow <= self.max_flow,
            "Flow {flow:?} on edge {key} exceeds the maximum flow {:?}",
            self.max_flow
        );
        ensure!(
            !self.integer || flow.fract() == 0.0,
            "Flow {flow:?} on edge {key} should be integer"
        );

        Ok(())
    }
}

/// An edge of the plant, together with its realised flows
#[derive(Clone, Debug)]
pub struct Edge {
    key: EdgeKey,
    commodity: CommodityID,
    bounds: EdgeBounds,
    horizon: Horizon,
    runtime: Runtime<Option<f64>>,
}

impl Edge {
    /// Create a new edge, validating its bounds.
    ///
    /// The commodity must already have been resolved against the two endpoints.
    pub fn new(
        key: EdgeKey,
        commodity: CommodityID,
        bounds: EdgeBounds,
        horizon: Horizon,
    ) -> Result<Self> {
        bounds.validate()?;

        Ok(Self {
            key,
            commodity,
            bounds,
            horizon,
            runtime: Runtime::default(),
        })
    }

    /// The source and destination of the edge
    pub fn key(&self) -> &EdgeKey {
        &self.key
    }

    /// The commodity carried by the edge
    pub fn commodity(&self) -> &CommodityID {
        &self.commodity
    }

    /// The flow bounds of the edge
    pub fn bounds(&self) -> &EdgeBounds {
        &self.bounds
    }

    /// Store the predicted flow for the current step
    pub fn update(&mut self, predicted: Option<f64>) -> Result<()> {
        self.runtime
            .begin(format_args!("edge {}", self.key), self.horizon.len(), predicted)
    }

    /// Validate the realised flow for the current step and commit it.
    ///
    /// A null flow is only accepted when the destination is a machine which is switched off.
    pub fn step(&mut self, context: &StepContext) -> Result<()> {
        self.runtime.take(format_args!("edge {}", self.key))?;

        let flow = match context.flow(&self.key) {
            Some(flow) => {
                self.bounds.check(&self.key, flow)?;
                flow
            }
            // Recorded as NaN in the history
            None => {
                ensure!(
                    context.is_machine_off(&self.key.destination),
                    "Null flow on edge {} is only allowed when the destination is a machine \
                     which is switched off",
                    self.key
                );
                f64::NAN
            }
        };
        self.runtime.commit(flow);

        Ok(())
    }

    /// A deep copy of the public properties of the edge
    pub fn exposed(&self) -> EdgeView {
        EdgeView {
            source: self.key.source.clone(),
            destination: self.key.destination.clone(),
            commodity: self.commodity.clone(),
            min_flow: self.bounds.min_flow,
            max_flow: self.bounds.max_flow,
            integer: self.bounds.integer,
            flows: self.runtime.history().to_series(&self.horizon),
            current_flow: self.runtime.pending().flatten(),
        }
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Edge {}

impl Hash for Edge {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// A read-only copy of an edge
#[derive(Clone, Debug, Serialize)]
pub struct EdgeView {
    /// Name of the source node
    pub source: NodeID,
    /// Name of the destination node
    pub destination: NodeID,
    /// The commodity carried by the edge
    pub commodity: CommodityID,
    /// Minimum flow at every step
    pub min_flow: f64,
    /// Maximum flow at every step
    pub max_flow: f64,
    /// Whether the flow must be a whole number
    pub integer: bool,
    /// Realised flows so far
    pub flows: Series,
    /// Predicted flow for the step being simulated
    pub current_flow: Option<f64>,
}

impl EdgeView {
    /// The properties included in the serialised form
    pub const PROPERTIES: &[&str] = &[
        "source",
        "destination",
        "commodity",
        "min_flow",
        "max_flow",
        "integer",
        "flows",
        "current_flow",
    ];

    /// The source and destination of the edge
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source.clone(),
            destination: self.destination.clone(),
        }
    }
}

impl PartialEq for EdgeView {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.destination == other.destination
    }
}

impl Eq for EdgeView {}

impl Hash for EdgeView {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.destination.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use crate::plan::StepPlan;
    use crate::simulation::Wiring;
    use rstest::{fixture, rstest};

    #[fixture]
    fn edge() -> Edge {
        Edge::new(
            EdgeKey::new("sup", "cus"),
            "in".into(),
            EdgeBounds {
                min_flow: 1.0,
                max_flow: 5.0,
                integer: true,
            },
            Horizon::new(3).unwrap(),
        )
        .unwrap()
    }

    fn step_with(edge: &mut Edge, flow: Option<f64>) -> Result<()> {
        let wiring = Wiring::from_edges([(edge.key().clone(), edge.commodity().clone())]);
        let mut plan = StepPlan::default();
        plan.flows.insert(edge.key().clone(), flow);
        edge.update(flow)?;
        edge.step(&StepContext::new(0, &plan, &wiring))
    }

    #[test]
    fn test_edge_key_display() {
        let key = EdgeKey::new("a", "b");
        assert_eq!(key.to_string(), "('a', 'b')");
        assert_eq!(key.column_name(), "a -> b");
    }

    #[rstest]
    #[case(-1.0, 2.0, "The minimum flow cannot be negative, got -1.0")]
    #[case(3.0, 2.0, "The maximum flow cannot be lower than the minimum, got 2.0 < 3.0")]
    fn test_edge_bounds_invalid(#[case] min_flow: f64, #[case] max_flow: f64, #[case] msg: &str) {
        let bounds = EdgeBounds {
            min_flow,
            max_flow,
            integer: false,
        };
        assert_error!(bounds.validate(), msg);
    }

    #[rstest]
    fn test_edge_step_valid(mut edge: Edge) {
        step_with(&mut edge, Some(3.0)).unwrap();
        assert_eq!(edge.exposed().flows.values(), [3.0]);
    }

    #[rstest]
    #[case(Some(0.5), "Flow 0.5 on edge ('sup', 'cus') is lower than the minimum flow 1.0")]
    #[case(Some(6.0), "Flow 6.0 on edge ('sup', 'cus') exceeds the maximum flow 5.0")]
    #[case(Some(2.5), "Flow 2.5 on edge ('sup', 'cus') should be integer")]
    #[case(Some(f64::INFINITY), "Flow inf on edge ('sup', 'cus') must be finite")]
    #[case(
        None,
        "Null flow on edge ('sup', 'cus') is only allowed when the destination is a machine which \
         is switched off"
    )]
    fn test_edge_step_invalid(mut edge: Edge, #[case] flow: Option<f64>, #[case] msg: &str) {
        assert_error!(step_with(&mut edge, flow), msg);
    }

    #[test]
    fn test_edge_step_infinite_with_default_bounds() {
        let mut edge = Edge::new(
            EdgeKey::new("sup", "sto"),
            "in".into(),
            EdgeBounds::default(),
            Horizon::new(1).unwrap(),
        )
        .unwrap();
        assert_error!(
            step_with(&mut edge, Some(f64::INFINITY)),
            "Flow inf on edge ('sup', 'sto') must be finite"
        );
    }

    #[rstest]
    fn test_edge_equality_by_key(edge: Edge) {
        let other = Edge::new(
            EdgeKey::new("sup", "cus"),
            "other".into(),
            EdgeBounds::default(),
            Horizon::new(3).unwrap(),
        )
        .unwrap();
        assert_eq!(edge, other);
        assert_eq!(edge.exposed(), other.exposed());
    }

    #[rstest]
    fn test_edge_view_properties(edge: Edge) {
        let value = serde_json::to_value(edge.exposed()).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), EdgeView::PROPERTIES.len());
        for key in EdgeView::PROPERTIES {
            assert!(keys.iter().any(|k| k == key));
        }
    }
}
