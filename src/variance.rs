//! Variance models describing how realised values deviate from predictions.
//!
//! A variance model is a function `f(rng, history) -> eps`. At every step, the current value of a
//! supplier or client is computed as `prediction[step] + eps`, where `history` holds the values
//! realised so far. All randomness must come from `rng`, which is the single seeded generator of
//! the simulation run, so that runs are reproducible.
use crate::series::Series;
use anyhow::{Result, ensure};
use rand::Rng;
use rand::rngs::StdRng;
use serde::Deserialize;
use std::fmt;
use std::rc::Rc;

/// Signature of a user-supplied variance function
pub type VarianceFn = dyn Fn(&mut StdRng, &Series) -> f64;

/// A variance model, shared between copies of the entity which owns it
#[derive(Clone)]
pub struct VarianceModel(Rc<VarianceFn>);

impl VarianceModel {
    /// Wrap a user-supplied variance function
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut StdRng, &Series) -> f64 + 'static,
    {
        Self(Rc::new(f))
    }

    /// The zero variance model, which makes the simulation follow the predictions exactly
    pub fn zero() -> Self {
        Self::new(|_, _| 0.0)
    }

    /// Sample the deviation for the next value given the realised history
    pub fn sample(&self, rng: &mut StdRng, history: &Series) -> f64 {
        (self.0)(rng, history)
    }
}

impl Default for VarianceModel {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for VarianceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VarianceModel")
    }
}

/// Random value from a Gaussian distribution with mean 0 and the given standard deviation.
///
/// Uses the Box-Muller transform.
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    // Avoid ln(0)
    let u1: f64 = rng.random::<f64>().clamp(1e-12, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z0 * std_dev
}

/// A built-in variance model, as specified in a model file
#[derive(Debug, Deserialize, PartialEq, Clone, Copy, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VarianceConfig {
    /// No deviation from the predictions
    #[default]
    Zero,
    /// Gaussian noise with mean zero
    Normal {
        /// Standard deviation of the noise
        std_dev: f64,
    },
    /// Uniform noise in `[low, high]`
    Uniform {
        /// Lower bound of the noise
        low: f64,
        /// Upper bound of the noise
        high: f64,
    },
}

impl VarianceConfig {
    /// Check the parameters and build the corresponding [`VarianceModel`]
    pub fn into_model(self) -> Result<VarianceModel> {
        Ok(match self {
            Self::Zero => VarianceModel::zero(),
            Self::Normal { std_dev } => {
                ensure!(
                    std_dev.is_finite() && std_dev >= 0.0,
                    "Standard deviation must be a non-negative number, got {std_dev:?}"
                );
                VarianceModel::new(move |rng, _| gaussian_noise(rng, std_dev))
            }
            Self::Uniform { low, high } => {
                ensure!(
                    low.is_finite() && high.is_finite() && low <= high,
                    "Uniform bounds must be finite with low <= high, got [{low:?}, {high:?}]"
                );
                VarianceModel::new(move |rng, _| rng.random_range(low..=high))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::horizon::Horizon;
    use rand::SeedableRng;

    fn history() -> Series {
        Series::empty(Horizon::new(3).unwrap())
    }

    #[test]
    fn test_zero_variance() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(VarianceModel::zero().sample(&mut rng, &history()), 0.0);
    }

    #[test]
    fn test_variance_is_reproducible() {
        let model = VarianceConfig::Normal { std_dev: 1.0 }.into_model().unwrap();
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..5)
                .map(|_| model.sample(&mut rng, &history()))
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
        assert_ne!(draw(42), draw(43));
    }

    #[test]
    fn test_uniform_variance_bounds() {
        let model = VarianceConfig::Uniform {
            low: -0.5,
            high: 0.5,
        }
        .into_model()
        .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let eps = model.sample(&mut rng, &history());
            assert!((-0.5..=0.5).contains(&eps));
        }
    }

    #[test]
    fn test_invalid_variance_config() {
        assert!(VarianceConfig::Normal { std_dev: -1.0 }.into_model().is_err());
        assert!(
            VarianceConfig::Uniform {
                low: 1.0,
                high: 0.0
            }
            .into_model()
            .is_err()
        );
    }

    #[test]
    fn test_variance_config_deserialize() {
        let config: VarianceConfig = toml::from_str("kind = \"normal\"\nstd_dev = 0.5").unwrap();
        assert_eq!(config, VarianceConfig::Normal { std_dev: 0.5 });
    }
}
