//! Suppliers sell a single commodity to the plant at a (possibly uncertain) price.
use super::{Forecast, Predictions};
use crate::commodity::{CommodityID, CommoditySet};
use crate::horizon::Horizon;
use crate::id::NodeID;
use crate::series::Series;
use crate::variance::VarianceModel;
use anyhow::Result;
use rand::rngs::StdRng;
use serde::Serialize;

/// A node which provides a commodity at the current selling price
#[derive(Clone, Debug)]
pub struct Supplier {
    pub(super) name: NodeID,
    commodity: CommodityID,
    commodities_out: CommoditySet,
    prices: Forecast,
}
crate::node::identify_by_name! {Supplier}

impl Supplier {
    /// Create a new supplier.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique name of the node
    /// * `commodity` - The commodity supplied
    /// * `prices` - Predicted selling prices over the horizon
    /// * `variance` - Deviation of the realised prices from the predictions
    /// * `horizon` - The horizon of the plant
    pub fn new(
        name: NodeID,
        commodity: CommodityID,
        prices: Predictions,
        variance: VarianceModel,
        horizon: &Horizon,
    ) -> Result<Self> {
        Ok(Self {
            name,
            commodities_out: [commodity.clone()].into_iter().collect(),
            commodity,
            prices: Forecast::new(prices, variance, horizon)?,
        })
    }

    /// The commodity supplied
    pub fn commodity(&self) -> &CommodityID {
        &self.commodity
    }

    /// The singleton set of the commodity supplied
    pub fn commodities_out(&self) -> &CommoditySet {
        &self.commodities_out
    }

    pub(super) fn update(&mut self, rng: &mut StdRng) -> Result<()> {
        self.prices
            .update(format_args!("supplier node '{}'", self.name), rng)
    }

    pub(super) fn step(&mut self) -> Result<()> {
        self.prices
            .step(format_args!("supplier node '{}'", self.name))?;
        Ok(())
    }

    /// A deep copy of the public properties of the supplier
    pub fn exposed(&self) -> SupplierView {
        SupplierView {
            name: self.name.clone(),
            commodity_in: None,
            commodities_out: self.commodities_out.clone(),
            predictions: self.prices.predictions(),
            prices: self.prices.realised(),
            current_price: self.prices.current(),
        }
    }
}

/// A read-only copy of a supplier
#[derive(Clone, Debug, Serialize)]
pub struct SupplierView {
    /// Unique name of the node
    pub name: NodeID,
    /// Always empty
    pub commodity_in: Option<CommodityID>,
    /// The commodity supplied
    pub commodities_out: CommoditySet,
    /// Predicted selling prices
    pub predictions: Series,
    /// Realised selling prices so far
    pub prices: Series,
    /// Selling price for the step being simulated
    pub current_price: Option<f64>,
}
crate::node::identify_by_name! {SupplierView}

impl SupplierView {
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
    use crate::fixture::{assert_properties, horizon};
    use rand::SeedableRng;
    use rstest::rstest;

    #[rstest]
    fn test_supplier_realises_prices(horizon: Horizon) {
        let mut supplier = Supplier::new(
            "sup".into(),
            "in".into(),
            [1.0, 2.0, 3.0].into(),
            VarianceModel::zero(),
            &horizon,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        for _ in 0..3 {
            supplier.update(&mut rng).unwrap();
            supplier.step().unwrap();
        }

        let view = supplier.exposed();
        assert_eq!(view.prices.values(), [1.0, 2.0, 3.0]);
        assert_eq!(view.current_price, None);
        assert_properties(&view, SupplierView::PROPERTIES);
    }

    #[rstest]
    fn test_supplier_step_before_update(horizon: Horizon) {
        let mut supplier = Supplier::new(
            "sup".into(),
            "in".into(),
            1.0.into(),
            VarianceModel::zero(),
            &horizon,
        )
        .unwrap();
        assert_eq!(
            supplier.step().unwrap_err().to_string(),
            "Step called before update on supplier node 'sup'"
        );
    }

    #[rstest]
    fn test_supplier_exposed_is_a_copy(horizon: Horizon) {
        let supplier = Supplier::new(
            "sup".into(),
            "in".into(),
            [1.0, 2.0, 3.0].into(),
            VarianceModel::zero(),
            &horizon,
        )
        .unwrap();
        let mut view = supplier.exposed();
        view.predictions.values_mut()[0] = 100.0;
        assert_eq!(supplier.exposed().predictions.values(), [1.0, 2.0, 3.0]);
    }
}
