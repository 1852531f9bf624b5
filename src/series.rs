//! Time-indexed series of values.
//!
//! A [`Series`] is an owned, indexed copy of values over a prefix of the plant [`Horizon`]. It is
//! what entities hand out to callers. A [`History`] is the append-only buffer of committed values
//! which entities keep internally; reading it always produces a fresh [`Series`], so callers can
//! never mutate the internal state through the value they receive.
use crate::horizon::Horizon;
use anyhow::{Result, ensure};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// A sequence of values indexed by the first `len` labels of a horizon.
///
/// Null values (e.g. the state of a machine which is switched off) are stored as `NaN`.
#[derive(Clone, Debug)]
pub struct Series {
    horizon: Horizon,
    values: Vec<f64>,
}

impl Series {
    /// Create a new series, checking that it does not exceed the horizon
    pub fn new(horizon: Horizon, values: Vec<f64>) -> Result<Self> {
        ensure!(
            values.len() <= horizon.len(),
            "Series of length {} exceeds the horizon of length {}",
            values.len(),
            horizon.len()
        );

        Ok(Self { horizon, values })
    }

    /// Create a series with the same value for every step of the horizon
    pub fn constant(horizon: Horizon, value: f64) -> Self {
        let values = vec![value; horizon.len()];
        Self { horizon, values }
    }

    /// Create an empty series over the given horizon
    pub fn empty(horizon: Horizon) -> Self {
        Self {
            horizon,
            values: Vec::new(),
        }
    }

    /// The horizon indexing the series
    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    /// The number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the series has no values yet
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The value at the given step, if present
    pub fn get(&self, step: usize) -> Option<f64> {
        self.values.get(step).copied()
    }

    /// The most recent value, if present
    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// The raw values
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Mutable access to the raw values of this copy
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// The labels which index the values
    pub fn labels(&self) -> &[String] {
        &self.horizon.labels()[..self.values.len()]
    }

    /// Iterate over `(label, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.horizon.iter().zip(self.values.iter().copied())
    }
}

/// Two series are equal if they have the same labels and values, where `NaN` equals `NaN`
impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.labels() == other.labels()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a == b || (a.is_nan() && b.is_nan()))
    }
}

/// Serialised as a map from label to value so that both index and values survive
impl Serialize for Series {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (label, value) in self.iter() {
            map.serialize_entry(label, &value)?;
        }
        map.end()
    }
}

/// The append-only buffer of values committed by an entity during a simulation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct History(Vec<f64>);

impl History {
    /// Append a committed value
    pub fn push(&mut self, value: f64) {
        self.0.push(value);
    }

    /// The number of committed values, i.e. the current step index
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing has been committed yet
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The last committed value
    pub fn last(&self) -> Option<f64> {
        self.0.last().copied()
    }

    /// The committed values
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// A deep copy of the committed values indexed by the horizon
    pub fn to_series(&self, horizon: &Horizon) -> Series {
        Series {
            horizon: horizon.clone(),
            values: self.0.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizon() -> Horizon {
        Horizon::new(3).unwrap()
    }

    #[test]
    fn test_series_new() {
        let series = Series::new(horizon(), vec![1.0, 2.0]).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.labels(), ["0", "1"]);
        assert_eq!(series.last(), Some(2.0));
        assert!(Series::new(horizon(), vec![0.0; 4]).is_err());
    }

    #[test]
    fn test_series_nan_equality() {
        let a = Series::new(horizon(), vec![1.0, f64::NAN]).unwrap();
        let b = Series::new(horizon(), vec![1.0, f64::NAN]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Series::new(horizon(), vec![1.0]).unwrap());
    }

    #[test]
    fn test_history_copy_is_independent() {
        let mut history = History::default();
        history.push(1.0);
        history.push(2.0);

        let mut series = history.to_series(&horizon());
        series.values_mut()[0] = 10.0;

        assert_eq!(series.values(), [10.0, 2.0]);
        assert_eq!(history.as_slice(), [1.0, 2.0]);
        assert_eq!(history.to_series(&horizon()).values(), [1.0, 2.0]);
    }

    #[test]
    fn test_series_serialize() {
        let series = Series::new(horizon(), vec![1.5, f64::NAN]).unwrap();
        assert_eq!(
            serde_json::to_string(&series).unwrap(),
            r#"{"0":1.5,"1":null}"#
        );
    }
}
