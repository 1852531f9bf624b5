//! Storages hold a single commodity and release it in later steps.
use super::is_close;
use crate::commodity::{CommodityID, CommoditySet};
use crate::horizon::Horizon;
use crate::id::NodeID;
use crate::runtime::Runtime;
use crate::series::Series;
use crate::simulation::StepContext;
use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

fn infinity() -> f64 {
    f64::INFINITY
}

/// Physical properties of a storage
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct StorageOptions {
    /// Maximum amount stored
    #[serde(default = "infinity")]
    pub capacity: f64,
    /// Fraction of the stored amount lost at every step
    #[serde(default)]
    pub dissipation: f64,
    /// Maximum input flow per step
    #[serde(default = "infinity")]
    pub charge_rate: f64,
    /// Maximum output flow per step
    #[serde(default = "infinity")]
    pub discharge_rate: f64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            capacity: f64::INFINITY,
            dissipation: 0.0,
            charge_rate: f64::INFINITY,
            discharge_rate: f64::INFINITY,
        }
    }
}

impl StorageOptions {
    /// Check that the properties are in range
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.capacity > 0.0,
            "The capacity must be strictly positive, got {:?}",
            self.capacity
        );
        ensure!(
            (0.0..=1.0).contains(&self.dissipation),
            "The dissipation must be between 0 and 1, got {:?}",
            self.dissipation
        );
        ensure!(
            self.charge_rate > 0.0,
            "The charge rate must be strictly positive, got {:?}",
            self.charge_rate
        );
        ensure!(
            self.discharge_rate > 0.0,
            "The discharge rate must be strictly positive, got {:?}",
            self.discharge_rate
        );

        Ok(())
    }
}

/// A node which stores a commodity and releases the same commodity
#[derive(Clone, Debug)]
pub struct Storage {
    pub(super) name: NodeID,
    commodity: CommodityID,
    commodities_out: CommoditySet,
    options: StorageOptions,
    horizon: Horizon,
    /// The amount carried over from the previous step, after dissipation
    runtime: Runtime<f64>,
}
crate::node::identify_by_name! {Storage}

impl Storage {
    /// Create a new storage, validating its properties
    pub fn new(
        name: NodeID,
        commodity: CommodityID,
        options: StorageOptions,
        horizon: &Horizon,
    ) -> Result<Self> {
        options.validate()?;

        Ok(Self {
            name,
            commodities_out: [commodity.clone()].into_iter().collect(),
            commodity,
            options,
            horizon: horizon.clone(),
            runtime: Runtime::default(),
        })
    }

    /// The commodity stored
    pub fn commodity(&self) -> &CommodityID {
        &self.commodity
    }

    /// The singleton set of the commodity stored
    pub fn commodities_out(&self) -> &CommoditySet {
        &self.commodities_out
    }

    /// Physical properties
    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub(super) fn update(&mut self) -> Result<()> {
        let previous = self
            .runtime
            .history()
            .last()
            .map_or(0.0, |last| (1.0 - self.options.dissipation) * last);
        self.runtime.begin(
            format_args!("storage node '{}'", self.name),
            self.horizon.len(),
            previous,
        )
    }

    pub(super) fn step(&mut self, context: &StepContext) -> Result<()> {
        let name = &self.name;
        // The pending value is the level left after dissipation; without one, `take` reports
        // the missing update
        let Some(previous) = self.runtime.pending() else {
            return self
                .runtime
                .take(format_args!("storage node '{name}'"))
                .map(|_| ());
        };
        let StorageOptions {
            capacity,
            charge_rate,
            discharge_rate,
            ..
        } = self.options;

        // Charging and discharging are exclusive within a step
        let input = context.in_flow(name);
        let output = context.out_flow(name);
        ensure!(
            is_close(input, 0.0) || is_close(output, 0.0),
            "Storage node '{name}' cannot have both input ({input:?}) and output ({output:?}) \
             flows"
        );
        ensure!(
            input <= charge_rate || is_close(input, charge_rate),
            "Storage node '{name}' can accept at most {charge_rate:?} units per step, got {input:?}"
        );
        ensure!(
            output <= discharge_rate || is_close(output, discharge_rate),
            "Storage node '{name}' can release at most {discharge_rate:?} units per step, got \
             {output:?}"
        );

        // The new level must lie within [0, capacity]
        let amount = previous + input - output;
        ensure!(
            amount >= 0.0 || is_close(amount, 0.0),
            "Storage node '{name}' holds {previous:?} units, so it cannot release {output:?}"
        );
        ensure!(
            amount <= capacity || is_close(amount, capacity),
            "Storage node '{name}' has a capacity of {capacity:?}, but it would hold {amount:?}"
        );

        // Rounding errors may leave the level just outside its bounds
        self.runtime.take(format_args!("storage node '{name}'"))?;
        self.runtime.commit(amount.clamp(0.0, capacity));

        Ok(())
    }

    /// A deep copy of the public properties of the storage
    pub fn exposed(&self) -> StorageView {
        StorageView {
            name: self.name.clone(),
            commodity_in: Some(self.commodity.clone()),
            commodities_out: self.commodities_out.clone(),
            capacity: self.options.capacity,
            dissipation: self.options.dissipation,
            charge_rate: self.options.charge_rate,
            discharge_rate: self.options.discharge_rate,
            storage: self.runtime.history().to_series(&self.horizon),
            current_storage: self.runtime.pending(),
        }
    }
}

/// A read-only copy of a storage
#[derive(Clone, Debug, Serialize)]
pub struct StorageView {
    /// Unique name of the node
    pub name: NodeID,
    /// The commodity stored
    pub commodity_in: Option<CommodityID>,
    /// The commodity released
    pub commodities_out: CommoditySet,
    /// Maximum amount stored
    pub capacity: f64,
    /// Fraction of the stored amount lost at every step
    pub dissipation: f64,
    /// Maximum input flow per step
    pub charge_rate: f64,
    /// Maximum output flow per step
    pub discharge_rate: f64,
    /// Stored amounts at the end of each step so far
    pub storage: Series,
    /// Amount carried into the step being simulated, after dissipation
    pub current_storage: Option<f64>,
}
crate::node::identify_by_name! {StorageView}

impl StorageView {
    /// The properties included in the serialised form
    pub const PROPERTIES: &[&str] = &[
        "name",
        "commodity_in",
        "commodities_out",
        "capacity",
        "dissipation",
        "charge_rate",
        "discharge_rate",
        "storage",
        "current_storage",
    ];
}
