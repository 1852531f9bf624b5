//! Fixtures for tests

use crate::edge::EdgeBounds;
use crate::horizon::Horizon;
use crate::node::{ClientKind, MachineOptions, Setpoint};
use crate::plan::{Plan, PlanKey, PlanValue};
use crate::plant::Plant;
use crate::variance::VarianceModel;
use indexmap::{IndexSet, indexmap};
use itertools::Itertools;
use rstest::fixture;
use serde::Serialize;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// Assert that the value serialises to an object with exactly the given properties
pub fn assert_properties(value: &impl Serialize, properties: &[&str]) {
    let value = serde_json::to_value(value).unwrap();
    let keys: IndexSet<&str> = value
        .as_object()
        .expect("Value should serialise to an object")
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(
        keys.iter().sorted().collect_vec(),
        properties.iter().sorted().collect_vec()
    );
}

#[fixture]
pub fn horizon() -> Horizon {
    Horizon::new(3).unwrap()
}

/// A supplier feeding a machine feeding a customer
#[fixture]
pub fn simple_plant() -> Plant {
    let mut plant = Plant::with_length(3).unwrap();
    plant
        .add_supplier("sup", "in", [1.0, 2.0, 3.0], VarianceModel::zero())
        .unwrap();
    let setpoint = Setpoint::new(vec![1.0, 3.0], indexmap! {"out".into() => vec![1.0, 3.0]})
        .unwrap();
    plant
        .add_machine(
            "mac",
            "in",
            &["sup"],
            setpoint,
            MachineOptions::default(),
            EdgeBounds::default(),
        )
        .unwrap();
    plant
        .add_client(
            "cus",
            ClientKind::Customer,
            "out",
            &["mac"],
            [1.0, 2.0, 3.0],
            VarianceModel::zero(),
            EdgeBounds::default(),
        )
        .unwrap();

    plant
}

/// A plan which meets the demand of [`simple_plant`] at every step
#[fixture]
pub fn simple_plan() -> Plan {
    let values = || PlanValue::Vector(vec![1.0, 2.0, 3.0]);
    indexmap! {
        PlanKey::edge("sup", "mac") => values(),
        PlanKey::edge("mac", "cus") => values(),
        PlanKey::machine("mac") => values(),
    }
}
