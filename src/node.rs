//! The nodes of a plant.
//!
//! Each kind of node owns its immutable configuration plus the runtime state used by the
//! two-phase simulation protocol: `update` computes the pending value for the current step, then
//! `step` checks the realised flows against the physics of the node and commits a value to its
//! history.
use crate::commodity::{CommodityID, CommoditySet};
use crate::horizon::Horizon;
use crate::id::NodeID;
use crate::plan::StepPlan;
use crate::runtime::Runtime;
use crate::series::Series;
use crate::simulation::StepContext;
use crate::variance::VarianceModel;
use anyhow::{Result, ensure};
use float_cmp::approx_eq;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub mod client;
pub mod machine;
pub mod storage;
pub mod supplier;
pub use client::{Client, ClientKind, CustomerView, PurchaserView};
pub use machine::{Machine, MachineOptions, MachineView, MaxStarting, Setpoint};
pub use storage::{Storage, StorageOptions, StorageView};
pub use supplier::{Supplier, SupplierView};

/// Absolute tolerance used when comparing flows
pub const FLOW_TOLERANCE: f64 = 1e-6;

/// Whether two flows are equal within [`FLOW_TOLERANCE`]
pub fn is_close(a: f64, b: f64) -> bool {
    approx_eq!(f64, a, b, epsilon = FLOW_TOLERANCE)
}

/// Implement equality and hashing based on the `name` field only
macro_rules! identify_by_name {
    ($($t:ty),+) => {
        $(
            crate::id::define_id_getter! {$t, NodeID}

            impl PartialEq for $t {
                fn eq(&self, other: &Self) -> bool {
                    use crate::id::HasID;
                    self.get_id() == other.get_id()
                }
            }

            impl Eq for $t {}

            impl std::hash::Hash for $t {
                fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                    use crate::id::HasID;
                    self.get_id().hash(state);
                }
            }
        )+
    };
}
pub(crate) use identify_by_name;

/// The kinds of node, which partition the node names of a plant
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeKind {
    /// Sells a commodity to the plant
    Supplier,
    /// Buys a commodity from the plant
    Client,
    /// Converts one commodity into others
    Machine,
    /// Stores and releases a commodity
    Storage,
}

impl NodeKind {
    /// The capitalised name of the kind, for the start of messages
    pub fn title(self) -> &'static str {
        match self {
            Self::Supplier => "Supplier",
            Self::Client => "Client",
            Self::Machine => "Machine",
            Self::Storage => "Storage",
        }
    }
}

/// Predicted values over the horizon, given either as a constant or one value per step
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Predictions {
    /// The same value at every step
    Constant(f64),
    /// One value per step
    Values(Vec<f64>),
}

impl Predictions {
    /// Expand into a series over the horizon, checking the length
    pub fn into_series(self, horizon: &Horizon) -> Result<Series> {
        match self {
            Self::Constant(value) => Ok(Series::constant(horizon.clone(), value)),
            Self::Values(values) => {
                ensure!(
                    values.len() == horizon.len(),
                    "Predictions should match length of horizon, got {} instead of {}",
                    values.len(),
                    horizon.len()
                );
                Series::new(horizon.clone(), values)
            }
        }
    }
}

impl From<f64> for Predictions {
    fn from(value: f64) -> Self {
        Self::Constant(value)
    }
}

impl From<Vec<f64>> for Predictions {
    fn from(values: Vec<f64>) -> Self {
        Self::Values(values)
    }
}

impl<const N: usize> From<[f64; N]> for Predictions {
    fn from(values: [f64; N]) -> Self {
        Self::Values(values.to_vec())
    }
}

/// Predicted values perturbed by a variance model, as used by suppliers and clients
#[derive(Clone, Debug)]
pub struct Forecast {
    predictions: Series,
    variance: VarianceModel,
    runtime: Runtime<f64>,
}

impl Forecast {
    /// Create a new forecast over the horizon
    pub fn new(predictions: Predictions, variance: VarianceModel, horizon: &Horizon) -> Result<Self> {
        Ok(Self {
            predictions: predictions.into_series(horizon)?,
            variance,
            runtime: Runtime::default(),
        })
    }

    /// Compute the current value as the prediction plus a sampled deviation
    pub fn update(&mut self, entity: impl Display, rng: &mut StdRng) -> Result<()> {
        let horizon = self.predictions.horizon().clone();
        let history = self.runtime.history().to_series(&horizon);
        // The variance model sees the realised values so far
        let value = match self.predictions.get(self.runtime.step()) {
            Some(prediction) => prediction + self.variance.sample(rng, &history),
            // Past the horizon: `begin` reports the error
            None => f64::NAN,
        };

        self.runtime.begin(entity, horizon.len(), value)
    }

    /// Take the current value and commit it
    pub fn step(&mut self, entity: impl Display) -> Result<f64> {
        let value = self.runtime.take(entity)?;
        self.runtime.commit(value);
        Ok(value)
    }

    /// The value computed in the last update, if not yet committed
    pub fn current(&self) -> Option<f64> {
        self.runtime.pending()
    }

    /// A copy of the predictions
    pub fn predictions(&self) -> Series {
        self.predictions.clone()
    }

    /// A copy of the realised values
    pub fn realised(&self) -> Series {
        self.runtime.history().to_series(self.predictions.horizon())
    }
}

/// A node of the plant
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Node {
    /// A supplier
    Supplier(Supplier),
    /// A customer or purchaser
    Client(Client),
    /// A machine
    Machine(Machine),
    /// A storage
    Storage(Storage),
}

impl Node {
    /// The unique name of the node
    pub fn name(&self) -> &NodeID {
        match self {
            Self::Supplier(node) => &node.name,
            Self::Client(node) => &node.name,
            Self::Machine(node) => &node.name,
            Self::Storage(node) => &node.name,
        }
    }

    /// The kind of the node
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Supplier(_) => NodeKind::Supplier,
            Self::Client(_) => NodeKind::Client,
            Self::Machine(_) => NodeKind::Machine,
            Self::Storage(_) => NodeKind::Storage,
        }
    }

    /// The commodity accepted by the node, if any
    pub fn commodity_in(&self) -> Option<&CommodityID> {
        match self {
            Self::Supplier(_) => None,
            Self::Client(node) => Some(node.commodity()),
            Self::Machine(node) => Some(node.commodity()),
            Self::Storage(node) => Some(node.commodity()),
        }
    }

    /// The commodities produced by the node
    pub fn commodities_out(&self) -> &CommoditySet {
        match self {
            Self::Supplier(node) => node.commodities_out(),
            Self::Client(node) => node.commodities_out(),
            Self::Machine(node) => node.commodities_out(),
            Self::Storage(node) => node.commodities_out(),
        }
    }

    /// Compute the pending value of the node for the current step.
    ///
    /// # Arguments
    ///
    /// * `rng` - The random number generator of the run
    /// * `predicted` - The predicted plan for the current step
    pub fn update(&mut self, rng: &mut StdRng, predicted: &StepPlan) -> Result<()> {
        match self {
            Self::Supplier(node) => node.update(rng),
            Self::Client(node) => node.update(rng),
            Self::Machine(node) => node.update(predicted),
            Self::Storage(node) => node.update(),
        }
    }

    /// Check the realised flows and states of the current step and commit the node's value
    pub fn step(&mut self, context: &StepContext) -> Result<()> {
        match self {
            Self::Supplier(node) => node.step(),
            Self::Client(node) => node.step(context),
            Self::Machine(node) => node.step(context),
            Self::Storage(node) => node.step(context),
        }
    }

    /// A deep copy of the public properties of the node
    pub fn exposed(&self) -> NodeView {
        match self {
            Self::Supplier(node) => NodeView::Supplier(node.exposed()),
            Self::Client(node) => node.exposed(),
            Self::Machine(node) => NodeView::Machine(node.exposed()),
            Self::Storage(node) => NodeView::Storage(node.exposed()),
        }
    }
}

/// A read-only copy of a node
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum NodeView {
    /// A supplier
    Supplier(SupplierView),
    /// A customer
    Customer(CustomerView),
    /// A purchaser
    Purchaser(PurchaserView),
    /// A machine
    Machine(MachineView),
    /// A storage
    Storage(StorageView),
}

impl NodeView {
    /// The unique name of the node
    pub fn name(&self) -> &NodeID {
        match self {
            Self::Supplier(view) => &view.name,
            Self::Customer(view) => &view.name,
            Self::Purchaser(view) => &view.name,
            Self::Machine(view) => &view.name,
            Self::Storage(view) => &view.name,
        }
    }

    /// The kind of the node
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Supplier(_) => NodeKind::Supplier,
            Self::Customer(_) | Self::Purchaser(_) => NodeKind::Client,
            Self::Machine(_) => NodeKind::Machine,
            Self::Storage(_) => NodeKind::Storage,
        }
    }

    /// The commodity accepted by the node, if any
    pub fn commodity_in(&self) -> Option<&CommodityID> {
        match self {
            Self::Supplier(view) => view.commodity_in.as_ref(),
            Self::Customer(view) => view.commodity_in.as_ref(),
            Self::Purchaser(view) => view.commodity_in.as_ref(),
            Self::Machine(view) => view.commodity_in.as_ref(),
            Self::Storage(view) => view.commodity_in.as_ref(),
        }
    }

    /// The commodities produced by the node
    pub fn commodities_out(&self) -> &CommoditySet {
        match self {
            Self::Supplier(view) => &view.commodities_out,
            Self::Customer(view) => &view.commodities_out,
            Self::Purchaser(view) => &view.commodities_out,
            Self::Machine(view) => &view.commodities_out,
            Self::Storage(view) => &view.commodities_out,
        }
    }

    /// The properties included in the serialised form
    pub fn properties(&self) -> &'static [&'static str] {
        match self {
            Self::Supplier(_) => SupplierView::PROPERTIES,
            Self::Customer(_) => CustomerView::PROPERTIES,
            Self::Purchaser(_) => PurchaserView::PROPERTIES,
            Self::Machine(_) => MachineView::PROPERTIES,
            Self::Storage(_) => StorageView::PROPERTIES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use rand::SeedableRng;
    use rstest::rstest;

    #[test]
    fn test_node_kind_display() {
        assert_eq!(NodeKind::Supplier.to_string(), "supplier");
        assert_eq!(NodeKind::Storage.title(), "Storage");
    }

    #[test]
    fn test_predictions_into_series() {
        let horizon = Horizon::new(3).unwrap();
        assert_eq!(
            Predictions::from(2.0).into_series(&horizon).unwrap().values(),
            [2.0, 2.0, 2.0]
        );
        assert_error!(
            Predictions::from([1.0, 2.0]).into_series(&horizon),
            "Predictions should match length of horizon, got 2 instead of 3"
        );
    }

    #[rstest]
    #[case(1.0, 1.0, true)]
    #[case(1.0, 1.0 + 1e-9, true)]
    #[case(1.0, 1.1, false)]
    fn test_is_close(#[case] a: f64, #[case] b: f64, #[case] expected: bool) {
        assert_eq!(is_close(a, b), expected);
    }

    #[test]
    fn test_forecast_with_variance() {
        let horizon = Horizon::new(2).unwrap();
        let variance = VarianceModel::new(|_, history| history.len() as f64 + 0.5);
        let mut forecast = Forecast::new([1.0, 2.0].into(), variance, &horizon).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        forecast.update("x", &mut rng).unwrap();
        assert_eq!(forecast.current(), Some(1.5));
        assert_eq!(forecast.step("x").unwrap(), 1.5);
        forecast.update("x", &mut rng).unwrap();
        assert_eq!(forecast.step("x").unwrap(), 3.5);

        assert_eq!(forecast.realised().values(), [1.5, 3.5]);
        assert_eq!(forecast.predictions().values(), [1.0, 2.0]);
        assert!(forecast.update("x", &mut rng).is_err());
    }
}
