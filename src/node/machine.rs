//! Machines convert an input commodity into one or more output commodities.
//!
//! The conversion is described by a setpoint table mapping input flows (breakpoints) to output
//! flows. With a discrete setpoint, the machine can only run at one of the breakpoints. Otherwise
//! the outputs are interpolated linearly between neighbouring breakpoints.
//!
//! The state of a machine at each step is its input flow. A state of zero or null means that the
//! machine is switched off, which is recorded as `NaN` in its history.
use super::is_close;
use crate::commodity::{CommodityID, CommoditySet};
use crate::horizon::Horizon;
use crate::id::NodeID;
use crate::plan::StepPlan;
use crate::runtime::Runtime;
use crate::series::Series;
use crate::simulation::StepContext;
use anyhow::{Context, Result, bail, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::iter;

/// Whether a state means that the machine is running
fn is_on(state: f64) -> bool {
    !state.is_nan() && state != 0.0
}

/// The setpoint table of a machine, sorted by breakpoint
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Setpoint {
    breakpoints: Vec<f64>,
    outputs: IndexMap<CommodityID, Vec<f64>>,
}

impl Setpoint {
    /// Create a new setpoint table.
    ///
    /// # Arguments
    ///
    /// * `breakpoints` - Input flows, in any order
    /// * `outputs` - For each output commodity, the output flow at each breakpoint
    pub fn new(breakpoints: Vec<f64>, outputs: IndexMap<CommodityID, Vec<f64>>) -> Result<Self> {
        ensure!(
            !breakpoints.is_empty(),
            "The setpoint must have at least one breakpoint"
        );
        for &breakpoint in &breakpoints {
            ensure!(
                breakpoint.is_finite() && breakpoint >= 0.0,
                "Setpoint breakpoints must be non-negative, got {breakpoint:?}"
            );
        }
        ensure!(
            breakpoints.iter().map(|x| x.to_bits()).all_unique(),
            "Setpoint breakpoints must be unique, got {breakpoints:?}"
        );
        for (commodity, values) in &outputs {
            ensure!(
                values.len() == breakpoints.len(),
                "Setpoint for commodity '{commodity}' has {} values, but there are {} breakpoints",
                values.len(),
                breakpoints.len()
            );
            for &value in values {
                ensure!(
                    value.is_finite() && value >= 0.0,
                    "Output flows in setpoint must be non-negative, got {value:?} for commodity \
                     '{commodity}'"
                );
            }
        }

        // Sort the breakpoints, moving the output values along with them
        let order = (0..breakpoints.len())
            .sorted_by(|&a, &b| breakpoints[a].total_cmp(&breakpoints[b]))
            .collect_vec();
        let reorder = |values: &[f64]| order.iter().map(|&i| values[i]).collect_vec();

        Ok(Self {
            breakpoints: reorder(&breakpoints),
            outputs: outputs
                .iter()
                .map(|(commodity, values)| (commodity.clone(), reorder(values)))
                .collect(),
        })
    }

    /// The sorted breakpoints
    pub fn breakpoints(&self) -> &[f64] {
        &self.breakpoints
    }

    /// The output flows at each breakpoint, per commodity
    pub fn outputs(&self) -> &IndexMap<CommodityID, Vec<f64>> {
        &self.outputs
    }

    /// The lowest breakpoint
    pub fn min(&self) -> f64 {
        self.breakpoints[0]
    }

    /// The highest breakpoint
    pub fn max(&self) -> f64 {
        self.breakpoints[self.breakpoints.len() - 1]
    }

    fn at_index(&self, index: usize) -> IndexMap<CommodityID, f64> {
        self.outputs
            .iter()
            .map(|(commodity, values)| (commodity.clone(), values[index]))
            .collect()
    }

    fn interpolate(&self, x: f64) -> IndexMap<CommodityID, f64> {
        // Index of the first breakpoint >= x, which exists as x <= max
        let upper = self.breakpoints.partition_point(|&b| b < x);
        if upper == 0 || self.breakpoints[upper] == x {
            return self.at_index(upper);
        }

        // Linear interpolation between the neighbouring breakpoints
        let (x0, x1) = (self.breakpoints[upper - 1], self.breakpoints[upper]);
        let weight = (x - x0) / (x1 - x0);
        self.outputs
            .iter()
            .map(|(commodity, values)| {
                let (y0, y1) = (values[upper - 1], values[upper]);
                (commodity.clone(), y0 + weight * (y1 - y0))
            })
            .collect()
    }
}

/// A bound on how often a machine can be switched on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "(usize, usize)", into = "(usize, usize)")]
pub struct MaxStarting {
    /// Maximum number of times the machine can be switched on within the window
    pub count: usize,
    /// Length of the trailing window, in steps
    pub window: usize,
}

impl MaxStarting {
    /// Create a new bound, checking that `0 < count < window`
    pub fn new(count: usize, window: usize) -> Result<Self> {
        ensure!(
            count > 0 && count < window,
            "The maximum number of starts must be a pair (n, t) with 0 < n < t, got ({count}, \
             {window})"
        );

        Ok(Self { count, window })
    }

    /// Count the times the machine was switched on in the trailing window ending with `current`.
    ///
    /// A start at the first step of the window is judged against the state just before it. While
    /// the window still covers the whole history, the machine counts as switched off before the
    /// first step.
    fn count_starts(&self, history: &[f64], current: f64) -> usize {
        // The committed states followed by the one being committed
        let states = history
            .iter()
            .copied()
            .chain(iter::once(current))
            .map(is_on)
            .collect_vec();
        let first = states.len().saturating_sub(self.window);
        let preceding = first > 0 && states[first - 1];

        iter::once(preceding)
            .chain(states[first..].iter().copied())
            .tuple_windows()
            .filter(|&(before, after)| !before && after)
            .count()
    }
}

impl TryFrom<(usize, usize)> for MaxStarting {
    type Error = anyhow::Error;

    fn try_from((count, window): (usize, usize)) -> Result<Self> {
        Self::new(count, window)
    }
}

impl From<MaxStarting> for (usize, usize) {
    fn from(value: MaxStarting) -> Self {
        (value.count, value.window)
    }
}

/// Optional properties of a machine
#[derive(Clone, Copy, Debug, PartialEq, Default, Deserialize)]
pub struct MachineOptions {
    /// Whether the machine can only run at one of its breakpoints
    #[serde(default)]
    pub discrete_setpoint: bool,
    /// Bound on how often the machine can be switched on
    #[serde(default)]
    pub max_starting: Option<MaxStarting>,
    /// Cost of running the machine for one step
    #[serde(default)]
    pub cost: f64,
}

/// A node which converts its input commodity according to a setpoint table
#[derive(Clone, Debug)]
pub struct Machine {
    pub(super) name: NodeID,
    commodity: CommodityID,
    commodities_out: CommoditySet,
    setpoint: Setpoint,
    options: MachineOptions,
    horizon: Horizon,
    /// The predicted state for the current step
    runtime: Runtime<Option<f64>>,
}
crate::node::identify_by_name! {Machine}

impl Machine {
    /// Create a new machine, validating its options
    pub fn new(
        name: NodeID,
        commodity: CommodityID,
        setpoint: Setpoint,
        options: MachineOptions,
        horizon: &Horizon,
    ) -> Result<Self> {
        ensure!(
            options.cost >= 0.0,
            "The cost of machine '{name}' cannot be negative, got {:?}",
            options.cost
        );

        Ok(Self {
            name,
            commodity,
            commodities_out: setpoint.outputs.keys().cloned().collect(),
            setpoint,
            options,
            horizon: horizon.clone(),
            runtime: Runtime::default(),
        })
    }

    /// The input commodity
    pub fn commodity(&self) -> &CommodityID {
        &self.commodity
    }

    /// The output commodities, i.e. the columns of the setpoint table
    pub fn commodities_out(&self) -> &CommoditySet {
        &self.commodities_out
    }

    /// The setpoint table
    pub fn setpoint(&self) -> &Setpoint {
        &self.setpoint
    }

    /// Optional properties
    pub fn options(&self) -> &MachineOptions {
        &self.options
    }

    /// Compute the output flows for the given input flow.
    ///
    /// A zero input means the machine is off, in which case all outputs are zero.
    pub fn operate(&self, x: f64) -> Result<IndexMap<CommodityID, f64>> {
        if x == 0.0 {
            return Ok(self
                .commodities_out
                .iter()
                .map(|commodity| (commodity.clone(), 0.0))
                .collect());
        }

        let breakpoints = &self.setpoint.breakpoints;

        // Only exact breakpoints are allowed
        if self.options.discrete_setpoint {
            let index = breakpoints.iter().position(|&b| b == x).with_context(|| {
                format!("Unsupported flow {x:?} for discrete setpoint {breakpoints:?}")
            })?;
            return Ok(self.setpoint.at_index(index));
        }

        let (min, max) = (self.setpoint.min(), self.setpoint.max());
        if !(min..=max).contains(&x) {
            bail!("Unsupported flow {x:?} for continuous setpoint {min:?} <= flow <= {max:?}");
        }

        Ok(self.setpoint.interpolate(x))
    }

    pub(super) fn update(&mut self, predicted: &StepPlan) -> Result<()> {
        let state = predicted.states.get(&self.name).copied().flatten();
        self.runtime.begin(
            format_args!("machine node '{}'", self.name),
            self.horizon.len(),
            state,
        )
    }

    pub(super) fn step(&mut self, context: &StepContext) -> Result<()> {
        let name = &self.name;
        let entity = format!("machine node '{name}'");
        ensure!(
            self.runtime.pending().is_some(),
            "Step called before update on {entity}"
        );

        let input = context.in_flow(name);
        let outputs = context.out_flows_by_commodity(name);
        let state = context.state(name).filter(|&x| is_on(x));
        let Some(x) = state else {
            // Switched off: nothing may flow through the machine
            ensure!(
                is_close(input, 0.0),
                "Machine node '{name}' is off, but it receives an input flow of {input:?}"
            );
            for (commodity, &flow) in &outputs {
                ensure!(
                    is_close(flow, 0.0),
                    "Machine node '{name}' is off, but it returns {flow:?} units of commodity \
                     '{commodity}'"
                );
            }
            self.runtime.take(entity)?;
            self.runtime.commit(f64::NAN);
            return Ok(());
        };

        // Outputs must match the setpoint table for the commanded state
        let expected = self.operate(x)?;
        ensure!(
            is_close(input, x),
            "Machine node '{name}' has state {x:?}, but it receives an input flow of {input:?}"
        );
        for (commodity, &flow) in &expected {
            let actual = outputs.get(commodity).copied().unwrap_or(0.0);
            ensure!(
                is_close(actual, flow),
                "Machine node '{name}' should return {flow:?} units of commodity '{commodity}', \
                 got {actual:?}"
            );
        }

        // Count the start-ups in the trailing window, including this step
        if let Some(max_starting) = self.options.max_starting {
            let starts = max_starting.count_starts(self.runtime.history().as_slice(), x);
            ensure!(
                starts <= max_starting.count,
                "Machine node '{name}' can be switched on at most {} times in {} steps, got {starts}",
                max_starting.count,
                max_starting.window
            );
        }

        self.runtime.take(entity)?;
        self.runtime.commit(x);

        Ok(())
    }

    /// A deep copy of the public properties of the machine
    pub fn exposed(&self) -> MachineView {
        MachineView {
            name: self.name.clone(),
            commodity_in: Some(self.commodity.clone()),
            commodities_out: self.commodities_out.clone(),
            setpoint: self.setpoint.clone(),
            discrete_setpoint: self.options.discrete_setpoint,
            max_starting: self.options.max_starting,
            cost: self.options.cost,
            states: self.runtime.history().to_series(&self.horizon),
            current_state: self.runtime.pending().flatten(),
        }
    }
}

/// A read-only copy of a machine
#[derive(Clone, Debug, Serialize)]
pub struct MachineView {
    /// Unique name of the node
    pub name: NodeID,
    /// The input commodity
    pub commodity_in: Option<CommodityID>,
    /// The output commodities
    pub commodities_out: CommoditySet,
    /// The setpoint table
    pub setpoint: Setpoint,
    /// Whether the machine can only run at one of its breakpoints
    pub discrete_setpoint: bool,
    /// Bound on how often the machine can be switched on
    pub max_starting: Option<MaxStarting>,
    /// Cost of running the machine for one step
    pub cost: f64,
    /// Realised states so far, `NaN` when off
    pub states: Series,
    /// Predicted state for the step being simulated
    pub current_state: Option<f64>,
}
crate::node::identify_by_name! {MachineView}

impl MachineView {
    /// The properties included in the serialised form
    pub const PROPERTIES: &[&str] = &[
        "name",
        "commodity_in",
        "commodities_out",
        "setpoint",
        "discrete_setpoint",
        "max_starting",
        "cost",
        "states",
        "current_state",
    ];
}
