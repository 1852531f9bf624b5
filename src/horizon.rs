//! The time horizon over which a plant is simulated.
use anyhow::{Result, ensure};
use itertools::Itertools;
use serde::Deserialize;
use std::fmt;
use std::rc::Rc;

/// An ordered, immutable sequence of time labels.
///
/// All time-indexed series of a plant share the same horizon. Cloning is cheap, as the labels are
/// reference counted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Horizon(Rc<[String]>);

impl Horizon {
    /// Create a horizon with labels `0..len`
    pub fn new(len: i64) -> Result<Self> {
        ensure!(
            len > 0,
            "The time horizon must be a strictly positive integer, got {len}"
        );

        Ok(Self((0..len).map(|i| i.to_string()).collect()))
    }

    /// Create a horizon from explicit labels, which must be non-empty and unique
    pub fn from_labels<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        ensure!(!labels.is_empty(), "The time horizon cannot be empty");
        ensure!(
            labels.iter().all_unique(),
            "The time horizon labels must be unique"
        );

        Ok(Self(labels.into()))
    }

    /// The number of time steps
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// A horizon is never empty, but clippy insists
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The label of the given step
    pub fn label(&self, step: usize) -> &str {
        &self.0[step]
    }

    /// The labels in order
    pub fn labels(&self) -> &[String] {
        &self.0
    }

    /// Iterate over the labels in order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join(", "))
    }
}

/// A single time label as written in a model file
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(untagged)]
pub enum TimeLabel {
    /// Integer label
    Integer(i64),
    /// Free-text label (e.g. a timestamp)
    Text(String),
}

impl fmt::Display for TimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// The horizon as written in a model file: either a length or an explicit list of labels
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(untagged)]
pub enum HorizonSpec {
    /// Labels `0..n`
    Length(i64),
    /// Explicit labels
    Labels(Vec<TimeLabel>),
}

impl HorizonSpec {
    /// Convert into a [`Horizon`], validating it
    pub fn into_horizon(self) -> Result<Horizon> {
        match self {
            Self::Length(len) => Horizon::new(len),
            Self::Labels(labels) => Horizon::from_labels(labels.iter().map(ToString::to_string)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_horizon_new() {
        let horizon = Horizon::new(3).unwrap();
        assert_eq!(horizon.len(), 3);
        assert_eq!(horizon.labels(), ["0", "1", "2"]);
        assert_eq!(horizon.label(2), "2");
    }

    #[rstest]
    #[case(0)]
    #[case(-1)]
    fn test_horizon_new_invalid(#[case] len: i64) {
        assert_eq!(
            Horizon::new(len).unwrap_err().to_string(),
            format!("The time horizon must be a strictly positive integer, got {len}")
        );
    }

    #[test]
    fn test_horizon_from_labels() {
        let horizon = Horizon::from_labels(["mon", "tue"]).unwrap();
        assert_eq!(horizon.iter().collect::<Vec<_>>(), ["mon", "tue"]);
        assert!(Horizon::from_labels(Vec::<String>::new()).is_err());
        assert!(Horizon::from_labels(["mon", "mon"]).is_err());
    }

    #[test]
    fn test_horizon_spec() {
        let spec: HorizonSpec = toml::from_str::<toml::Table>("h = 4").unwrap()["h"]
            .clone()
            .try_into()
            .unwrap();
        assert_eq!(spec.into_horizon().unwrap(), Horizon::new(4).unwrap());

        let spec = HorizonSpec::Labels(vec![TimeLabel::Integer(10), TimeLabel::Text("b".into())]);
        assert_eq!(spec.into_horizon().unwrap().labels(), ["10", "b"]);
    }
}
