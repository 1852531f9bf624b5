//! Clients buy a single commodity from the plant.
//!
//! A customer has a demand which the plant may meet, but never exceed. A purchaser accepts any
//! amount of the commodity at its current buying price.
use super::{Forecast, NodeView, Predictions, is_close};
use crate::commodity::{CommodityID, CommoditySet};
use crate::horizon::Horizon;
use crate::id::NodeID;
use crate::series::Series;
use crate::simulation::StepContext;
use crate::variance::VarianceModel;
use anyhow::{Result, ensure};
use log::debug;
use rand::rngs::StdRng;
use serde::Serialize;

/// The two kinds of client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ClientKind {
    /// Has a demand which bounds the flow it receives
    Customer,
    /// Accepts any flow at its buying price
    Purchaser,
}

/// A node which takes a commodity out of the plant
#[derive(Clone, Debug)]
pub struct Client {
    pub(super) name: NodeID,
    kind: ClientKind,
    commodity: CommodityID,
    commodities_out: CommoditySet,
    /// Demands for a customer, buying prices for a purchaser
    forecast: Forecast,
}
crate::node::identify_by_name! {Client}

impl Client {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique name of the node
    /// * `kind` - Whether this is a customer or a purchaser
    /// * `commodity` - The commodity bought
    /// * `predictions` - Predicted demands (customer) or buying prices (purchaser)
    /// * `variance` - Deviation of the realised values from the predictions
    /// * `horizon` - The horizon of the plant
    pub fn new(
        name: NodeID,
        kind: ClientKind,
        commodity: CommodityID,
        predictions: Predictions,
        variance: VarianceModel,
        horizon: &Horizon,
    ) -> Result<Self> {
        Ok(Self {
            name,
            kind,
            commodity,
            commodities_out: CommoditySet::new(),
            forecast: Forecast::new(predictions, variance, horizon)?,
        })
    }

    /// Whether this is a customer or a purchaser
    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    /// The commodity bought
    pub fn commodity(&self) -> &CommodityID {
        &self.commodity
    }

    /// Always empty
    pub fn commodities_out(&self) -> &CommoditySet {
        &self.commodities_out
    }

    pub(super) fn update(&mut self, rng: &mut StdRng) -> Result<()> {
        let entity = format!("{} node '{}'", self.kind, self.name);
        self.forecast.update(entity, rng)
    }

    pub(super) fn step(&mut self, context: &StepContext) -> Result<()> {
        let entity = format!("{} node '{}'", self.kind, self.name);

        // Purchasers take whatever they are given
        if self.kind == ClientKind::Customer {
            let flow = context.in_flow(&self.name);
            if let Some(demand) = self.forecast.current() {
                ensure!(
                    flow <= demand || is_close(flow, demand),
                    "Customer node '{}' can accept at most {demand:?} units, got {flow:?}",
                    self.name
                );
                // Unmet demand is allowed
                if !is_close(flow, demand) {
                    debug!(
                        "Customer node '{}' receives {flow:?} of a demand of {demand:?} units",
                        self.name
                    );
                }
            }
        }
        self.forecast.step(entity)?;

        Ok(())
    }

    /// A deep copy of the public properties of the client
    pub fn exposed(&self) -> NodeView {
        match self.kind {
            ClientKind::Customer => NodeView::Customer(CustomerView {
                name: self.name.clone(),
                commodity_in: Some(self.commodity.clone()),
                commodities_out: self.commodities_out.clone(),
                predictions: self.forecast.predictions(),
                demands: self.forecast.realised(),
                current_demand: self.forecast.current(),
            }),
            ClientKind::Purchaser => NodeView::Purchaser(PurchaserView {
                name: self.name.clone(),
                commodity_in: Some(self.commodity.clone()),
                commodities_out: self.commodities_out.clone(),
                predictions: self.forecast.predictions(),
                prices: self.forecast.realised(),
                current_price: self.forecast.current(),
            }),
        }
    }
}

/// A read-only copy of a customer
#[derive(Clone, Debug, Serialize)]
pub struct CustomerView {
    /// Unique name of the node
    pub name: NodeID,
    /// The commodity bought
    pub commodity_in: Option<CommodityID>,
    /// Always empty
    pub commodities_out: CommoditySet,
    /// Predicted demands
    pub predictions: Series,
    /// Realised demands so far
    pub demands: Series,
    /// Demand for the step being simulated
    pub current_demand: Option<f64>,
}
crate::node::identify_by_name! {CustomerView}

impl CustomerView {
    /// The properties included in the serialised form
    pub const PROPERTIES: &[&str] = &[
        "name",
        "commodity_in",
        "commodities_out",
        "predictions",
        "demands",
        "current_demand",
    ];
}

/// A read-only copy of a purchaser
#[derive(Clone, Debug, Serialize)]
pub struct PurchaserView {
    /// Unique name of the node
    pub name: NodeID,
    /// The commodity bought
    pub commodity_in: Option<CommodityID>,
    /// Always empty
    pub commodities_out: CommoditySet,
    /// Predicted buying prices
    pub predictions: Series,
    /// Realised buying prices so far
    pub prices: Series,
    /// Buying price for the step being simulated
    pub current_price: Option<f64>,
}
crate::node::identify_by_name! {PurchaserView}

impl PurchaserView {
    /// The properties included in the serialised form
    pub const PROPERTIES: &[&str] = &[
        "name",
        "commodity_in",
        "commodities_out",
        "predictions",
        "prices",
        "current_price",
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeKey;
    use crate::fixture::{assert_error, assert_properties, horizon};
    use crate::plan::StepPlan;
    use crate::simulation::Wiring;
    use rand::SeedableRng;
    use rstest::rstest;

    fn client(kind: ClientKind, horizon: &Horizon) -> Client {
        Client::new(
            "cus".into(),
            kind,
            "out".into(),
            [5.0, 5.0, 5.0].into(),
            VarianceModel::zero(),
            horizon,
        )
        .unwrap()
    }

    fn step_with_flow(client: &mut Client, flow: f64) -> Result<()> {
        let key = EdgeKey::new("mac", "cus");
        let wiring = Wiring::from_edges([(key.clone(), "out".into())]);
        let mut plan = StepPlan::default();
        plan.flows.insert(key, Some(flow));
        client.update(&mut StdRng::seed_from_u64(0))?;
        client.step(&StepContext::new(0, &plan, &wiring))
    }

    #[rstest]
    #[case(3.0)]
    #[case(5.0)]
    fn test_customer_accepts_flow_up_to_demand(horizon: Horizon, #[case] flow: f64) {
        let mut customer = client(ClientKind::Customer, &horizon);
        step_with_flow(&mut customer, flow).unwrap();
        let NodeView::Customer(view) = customer.exposed() else {
            panic!("Expected a customer")
        };
        assert_eq!(view.demands.values(), [5.0]);
        assert_properties(&view, CustomerView::PROPERTIES);
    }

    #[rstest]
    fn test_customer_flow_exceeds_demand(horizon: Horizon) {
        let mut customer = client(ClientKind::Customer, &horizon);
        assert_error!(
            step_with_flow(&mut customer, 7.0),
            "Customer node 'cus' can accept at most 5.0 units, got 7.0"
        );
    }

    #[rstest]
    fn test_purchaser_accepts_any_flow(horizon: Horizon) {
        let mut purchaser = client(ClientKind::Purchaser, &horizon);
        step_with_flow(&mut purchaser, 70.0).unwrap();
        let NodeView::Purchaser(view) = purchaser.exposed() else {
            panic!("Expected a purchaser")
        };
        assert_eq!(view.prices.values(), [5.0]);
        assert_properties(&view, PurchaserView::PROPERTIES);
    }

    #[rstest]
    fn test_client_equality_by_name(horizon: Horizon) {
        let customer = client(ClientKind::Customer, &horizon);
        let other = Client::new(
            "cus".into(),
            ClientKind::Customer,
            "heat".into(),
            1.0.into(),
            VarianceModel::zero(),
            &horizon,
        )
        .unwrap();
        assert_eq!(customer, other);
        assert_eq!(customer.exposed(), other.exposed());
    }
}
