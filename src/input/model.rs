//! The schema of `plant.toml`, which describes the horizon and topology of a plant.
//!
//! Nodes are added in the order in which they appear, so parents must come before their
//! children. Extra edges between existing nodes can be listed under `[[edges]]`.
use crate::commodity::CommodityID;
use crate::edge::EdgeBounds;
use crate::horizon::HorizonSpec;
use crate::node::{ClientKind, MachineOptions, Predictions, Setpoint, StorageOptions};
use crate::plant::Plant;
use crate::variance::VarianceConfig;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;

/// The contents of `plant.toml`
#[derive(Debug, Deserialize)]
pub struct PlantFile {
    /// Number of steps, or explicit time labels
    pub horizon: HorizonSpec,
    /// Seed of the random number generator
    #[serde(default)]
    pub seed: u64,
    /// Nodes, in the order in which they are added
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    /// Edges between nodes which already exist
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
}

/// A setpoint table as written in a model file
#[derive(Debug, Deserialize)]
pub struct SetpointConfig {
    breakpoints: Vec<f64>,
    /// Output flows of each commodity at every breakpoint
    outputs: IndexMap<CommodityID, Vec<f64>>,
}

/// A node, tagged by its `kind`
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeConfig {
    #[allow(missing_docs)]
    Supplier {
        name: String,
        commodity: String,
        prices: Predictions,
        #[serde(default)]
        variance: VarianceConfig,
    },
    #[allow(missing_docs)]
    Customer {
        name: String,
        commodity: String,
        parents: Vec<String>,
        demands: Predictions,
        #[serde(default)]
        variance: VarianceConfig,
        #[serde(flatten)]
        bounds: EdgeBounds,
    },
    #[allow(missing_docs)]
    Purchaser {
        name: String,
        commodity: String,
        parents: Vec<String>,
        prices: Predictions,
        #[serde(default)]
        variance: VarianceConfig,
        #[serde(flatten)]
        bounds: EdgeBounds,
    },
    #[allow(missing_docs)]
    Machine {
        name: String,
        commodity: String,
        parents: Vec<String>,
        setpoint: SetpointConfig,
        #[serde(flatten)]
        options: MachineOptions,
        #[serde(flatten)]
        bounds: EdgeBounds,
    },
    #[allow(missing_docs)]
    Storage {
        name: String,
        commodity: String,
        parents: Vec<String>,
        #[serde(flatten)]
        options: StorageOptions,
        #[serde(flatten)]
        bounds: EdgeBounds,
    },
}

impl NodeConfig {
    fn name(&self) -> &str {
        match self {
            Self::Supplier { name, .. }
            | Self::Customer { name, .. }
            | Self::Purchaser { name, .. }
            | Self::Machine { name, .. }
            | Self::Storage { name, .. } => name,
        }
    }

    /// Add the node to the plant
    fn add_to(self, plant: &mut Plant) -> Result<()> {
        fn as_strs(parents: &[String]) -> Vec<&str> {
            parents.iter().map(String::as_str).collect_vec()
        }

        match self {
            Self::Supplier {
                name,
                commodity,
                prices,
                variance,
            } => {
                plant.add_supplier(&name, &commodity, prices, variance.into_model()?)?;
            }
            Self::Customer {
                name,
                commodity,
                parents,
                demands,
                variance,
                bounds,
            } => {
                plant.add_client(
                    &name,
                    ClientKind::Customer,
                    &commodity,
                    &as_strs(&parents),
                    demands,
                    variance.into_model()?,
                    bounds,
                )?;
            }
            Self::Purchaser {
                name,
                commodity,
                parents,
                prices,
                variance,
                bounds,
            } => {
                plant.add_client(
                    &name,
                    ClientKind::Purchaser,
                    &commodity,
                    &as_strs(&parents),
                    prices,
                    variance.into_model()?,
                    bounds,
                )?;
            }
            Self::Machine {
                name,
                commodity,
                parents,
                setpoint,
                options,
                bounds,
            } => {
                let setpoint = Setpoint::new(setpoint.breakpoints, setpoint.outputs)?;
                plant.add_machine(
                    &name,
                    &commodity,
                    &as_strs(&parents),
                    setpoint,
                    options,
                    bounds,
                )?;
            }
            Self::Storage {
                name,
                commodity,
                parents,
                options,
                bounds,
            } => {
                plant.add_storage(&name, &commodity, &as_strs(&parents), options, bounds)?;
            }
        }

        Ok(())
    }
}

/// An edge between two existing nodes
#[derive(Debug, Deserialize)]
pub struct EdgeConfig {
    source: String,
    destination: String,
    /// Defaults to the input commodity of the destination
    #[serde(default)]
    commodity: Option<String>,
    #[serde(flatten)]
    bounds: EdgeBounds,
}

impl PlantFile {
    /// Build the plant described by the file
    pub fn into_plant(self) -> Result<Plant> {
        let mut plant = Plant::new(self.horizon.into_horizon()?);
        // Nodes first, in file order, then the extra edges between them
        for node in self.nodes {
            let name = node.name().to_string();
            node.add_to(&mut plant)
                .with_context(|| format!("Could not add node '{name}'"))?;
        }
        for edge in self.edges {
            plant
                .add_edge(
                    &edge.source,
                    &edge.destination,
                    edge.commodity.as_deref(),
                    edge.bounds,
                )
                .with_context(|| {
                    format!(
                        "Could not add edge from '{}' to '{}'",
                        edge.source, edge.destination
                    )
                })?;
        }

        Ok(plant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{MaxStarting, NodeView};

    const PLANT_TOML: &str = r#"
horizon = ["mon", "tue"]
seed = 7

[[nodes]]
kind = "supplier"
name = "grid"
commodity = "power"
prices = [10, 12]
variance = { kind = "normal", std_dev = 0.5 }

[[nodes]]
kind = "storage"
name = "battery"
commodity = "power"
parents = ["grid"]
capacity = 4
max_flow = 2

[[nodes]]
kind = "machine"
name = "boiler"
commodity = "power"
parents = ["grid"]
max_starting = [1, 2]

[nodes.setpoint]
breakpoints = [1, 2]
outputs = { heat = [0.9, 1.8] }

[[nodes]]
kind = "customer"
name = "house"
commodity = "heat"
parents = ["boiler"]
demands = 1.5

[[edges]]
source = "battery"
destination = "boiler"
"#;

    #[test]
    fn test_into_plant() {
        let file: PlantFile = toml::from_str(PLANT_TOML).unwrap();
        assert_eq!(file.seed, 7);
        let plant = file.into_plant().unwrap();
        plant.validate().unwrap();

        assert_eq!(plant.horizon().labels(), ["mon", "tue"]);
        // Edge bounds are given alongside the node
        assert_eq!(plant.edge("grid", "battery").unwrap().max_flow, 2.0);
        assert_eq!(
            plant.edge("battery", "boiler").unwrap().commodity,
            CommodityID::new("power")
        );
        let Ok(NodeView::Storage(battery)) = plant.node("battery") else {
            panic!("Expected a storage")
        };
        assert_eq!(battery.capacity, 4.0);
        assert!(battery.charge_rate.is_infinite()); // default
        let Ok(NodeView::Machine(boiler)) = plant.node("boiler") else {
            panic!("Expected a machine")
        };
        assert_eq!(boiler.max_starting, Some(MaxStarting::new(1, 2).unwrap()));
    }

    #[test]
    fn test_into_plant_unknown_parent() {
        let file: PlantFile = toml::from_str(
            r#"
horizon = 2

[[nodes]]
kind = "customer"
name = "house"
commodity = "heat"
parents = ["boiler"]
demands = 1.0
"#,
        )
        .unwrap();
        let err = file.into_plant().unwrap_err();
        assert_eq!(err.to_string(), "Could not add node 'house'");
        assert_eq!(
            err.root_cause().to_string(),
            "Parent node 'boiler' has not been added yet"
        );
    }
}
