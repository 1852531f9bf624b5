//! Recourse actions decide the realised flows and states at each step of a simulation.
//!
//! A recourse action is any `FnMut(usize, &PlantSnapshot) -> Result<Plan>`. It is called once
//! per step with the index of the step and a snapshot of the plant carrying the predicted values
//! of the step. The returned plan must have exactly one entry per edge and one per machine, either
//! as a scalar for the current step or as a vector covering the whole horizon.
use crate::plan::Plan;
use crate::simulation::PlantSnapshot;
use anyhow::Result;

/// A recourse action which realises a fixed plan.
///
/// Vectors of the plan are indexed by the current step, scalars are used at every step.
pub fn follow_plan(plan: Plan) -> impl FnMut(usize, &PlantSnapshot) -> Result<Plan> {
    move |_, _| Ok(plan.clone())
}

/// A recourse action which realises the predicted flows and states of each step
pub fn follow_prediction() -> impl FnMut(usize, &PlantSnapshot) -> Result<Plan> {
    |_, snapshot| Ok(snapshot.predicted_plan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeKey;
    use crate::fixture::{simple_plan, simple_plant};
    use crate::plan::{PlanKey, PlanValue};
    use crate::plant::Plant;
    use rstest::rstest;

    #[rstest]
    fn test_follow_prediction(mut simple_plant: Plant, simple_plan: Plan) {
        let output = simple_plant
            .run(&simple_plan, follow_prediction(), 0)
            .unwrap();
        assert_eq!(
            output.flows[&EdgeKey::new("mac", "cus")].values(),
            [1.0, 2.0, 3.0]
        );
    }

    #[rstest]
    fn test_follow_plan_scalar(mut simple_plant: Plant, simple_plan: Plan) {
        let mut realised = simple_plan.clone();
        realised.insert(PlanKey::edge("sup", "mac"), PlanValue::Scalar(1.0));
        realised.insert(PlanKey::edge("mac", "cus"), PlanValue::Scalar(1.0));
        realised.insert(PlanKey::machine("mac"), PlanValue::Scalar(1.0));

        // The customer may receive less than its demand

        let output = simple_plant
            .run(&simple_plan, follow_plan(realised), 0)
            .unwrap();
        assert_eq!(output.states["mac"].values(), [1.0, 1.0, 1.0]);
    }
}
