//! Mutable simulation state owned by each stateful entity.
//!
//! Every entity keeps its immutable configuration separate from a [`Runtime`], which holds the
//! pending value computed during the `update` phase and the history of values committed during
//! the `step` phase. The runtime enforces the two-phase protocol: each step must be preceded by
//! exactly one update, and no update may happen once the horizon is exhausted.
use crate::series::History;
use anyhow::{Context, Result, ensure};
use std::fmt::Display;

/// The runtime state of an entity, generic over the type of its pending value
#[derive(Clone, Debug, PartialEq)]
pub struct Runtime<T> {
    pending: Option<T>,
    history: History,
}

impl<T> Default for Runtime<T> {
    fn default() -> Self {
        Self {
            pending: None,
            history: History::default(),
        }
    }
}

impl<T: Copy> Runtime<T> {
    /// Store the pending value for the current step.
    ///
    /// # Arguments
    ///
    /// * `entity` - Description of the entity, used in error messages
    /// * `horizon_len` - Length of the simulation horizon
    /// * `value` - The pending value
    pub fn begin(&mut self, entity: impl Display, horizon_len: usize, value: T) -> Result<()> {
        ensure!(
            self.pending.is_none(),
            "Update called twice without a step on {entity}"
        );
        // One committed value per step
        ensure!(
            self.history.len() < horizon_len,
            "Simulation horizon of {horizon_len} steps already exhausted on {entity}"
        );
        self.pending = Some(value);

        Ok(())
    }

    /// The pending value, if an update has happened since the last step
    pub fn pending(&self) -> Option<T> {
        self.pending
    }

    /// Take the pending value, failing if no update has happened since the last step
    pub fn take(&mut self, entity: impl Display) -> Result<T> {
        self.pending
            .take()
            .with_context(|| format!("Step called before update on {entity}"))
    }

    /// Append a validated value to the history
    pub fn commit(&mut self, value: f64) {
        self.history.push(value);
    }

    /// The index of the step currently being simulated
    pub fn step(&self) -> usize {
        self.history.len()
    }

    /// The committed values
    pub fn history(&self) -> &History {
        &self.history
    }
}
