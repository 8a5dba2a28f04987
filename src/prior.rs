//! Univariate priors over orbital parameters.
//!
//! Every random draw goes through a caller supplied [`rand::Rng`], so a run is
//! fully determined by the seed of the generator handed to the sampler.

use std::f64::consts::{LN_2, PI, TAU};

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::{OrbitError, Result};

/// Prior distribution of a single parameter.
///
/// Supports are closed intervals. A [`Prior::Fixed`] entry is a constant, not a
/// distribution: sampling it or asking for its density fails with
/// [`OrbitError::NotSamplable`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prior {
    Fixed { value: f64 },
    Uniform { min: f64, max: f64 },
    /// Jeffreys prior, uniform in `ln(x)`.
    LogUniform { min: f64, max: f64 },
    Gaussian { mu: f64, sigma: f64 },
    /// `p(x) = sin(x) / 2` on `[0, pi]`, the isotropic inclination prior.
    Sine,
}

impl Prior {
    pub fn fixed(value: f64) -> Result<Self> {
        let prior = Prior::Fixed { value };
        prior.validate()?;
        Ok(prior)
    }

    pub fn uniform(min: f64, max: f64) -> Result<Self> {
        let prior = Prior::Uniform { min, max };
        prior.validate()?;
        Ok(prior)
    }

    pub fn log_uniform(min: f64, max: f64) -> Result<Self> {
        let prior = Prior::LogUniform { min, max };
        prior.validate()?;
        Ok(prior)
    }

    pub fn gaussian(mu: f64, sigma: f64) -> Result<Self> {
        let prior = Prior::Gaussian { mu, sigma };
        prior.validate()?;
        Ok(prior)
    }

    pub fn sine() -> Self {
        Prior::Sine
    }

    /// Check the numeric parameters of the variant.
    ///
    /// Priors built through the constructors are always valid, this is for
    /// values that arrive through deserialization or direct construction.
    pub fn validate(&self) -> Result<()> {
        let name = self.name();
        match *self {
            Prior::Fixed { value } => {
                if !value.is_finite() {
                    return Err(OrbitError::config(name, "fixed value must be finite"));
                }
            }
            Prior::Uniform { min, max } | Prior::LogUniform { min, max } => {
                if !(min.is_finite() && max.is_finite()) {
                    return Err(OrbitError::config(name, "bounds must be finite"));
                }
                if min >= max {
                    return Err(OrbitError::config(
                        name,
                        format!("lower bound {min} must be below upper bound {max}"),
                    ));
                }
                if matches!(self, Prior::LogUniform { .. }) && min <= 0. {
                    return Err(OrbitError::config(name, "lower bound must be positive"));
                }
            }
            Prior::Gaussian { mu, sigma } => {
                if !mu.is_finite() {
                    return Err(OrbitError::config(name, "mean must be finite"));
                }
                if !(sigma.is_finite() && sigma > 0.) {
                    return Err(OrbitError::config(
                        name,
                        format!("standard deviation must be positive, got {sigma}"),
                    ));
                }
            }
            Prior::Sine => {}
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Prior::Fixed { .. } => "fixed",
            Prior::Uniform { .. } => "uniform",
            Prior::LogUniform { .. } => "log-uniform",
            Prior::Gaussian { .. } => "gaussian",
            Prior::Sine => "sine",
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Prior::Fixed { .. })
    }

    pub fn fixed_value(&self) -> Option<f64> {
        match *self {
            Prior::Fixed { value } => Some(value),
            _ => None,
        }
    }

    /// Named numeric fields of the variant, for diagnostics.
    pub fn describe(&self) -> Vec<(&'static str, f64)> {
        match *self {
            Prior::Fixed { value } => vec![("value", value)],
            Prior::Uniform { min, max } | Prior::LogUniform { min, max } => {
                vec![("min", min), ("max", max)]
            }
            Prior::Gaussian { mu, sigma } => vec![("mu", mu), ("sigma", sigma)],
            Prior::Sine => vec![("min", 0.), ("max", PI)],
        }
    }

    /// Inclusive support of the distribution.
    pub fn support(&self) -> (f64, f64) {
        match *self {
            Prior::Fixed { value } => (value, value),
            Prior::Uniform { min, max } | Prior::LogUniform { min, max } => (min, max),
            Prior::Gaussian { .. } => (f64::NEG_INFINITY, f64::INFINITY),
            Prior::Sine => (0., PI),
        }
    }

    fn check_support(&self, x: f64) -> Result<()> {
        let (lower, upper) = self.support();
        if x.is_nan() || x < lower || x > upper {
            return Err(OrbitError::Domain {
                value: x,
                prior: self.name(),
            });
        }
        Ok(())
    }

    /// Draw one value.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        let value = match *self {
            Prior::Fixed { value } => return Err(OrbitError::NotSamplable { value }),
            Prior::Uniform { min, max } => min + (max - min) * rng.random::<f64>(),
            Prior::LogUniform { min, max } => {
                let (ln_min, ln_max) = (min.ln(), max.ln());
                (ln_min + (ln_max - ln_min) * rng.random::<f64>()).exp()
            }
            Prior::Gaussian { mu, sigma } => {
                let z: f64 = StandardNormal.sample(rng);
                mu + sigma * z
            }
            Prior::Sine => (1. - 2. * rng.random::<f64>()).acos(),
        };
        Ok(value)
    }

    /// Natural logarithm of the normalized density at `x`.
    pub fn log_density(&self, x: f64) -> Result<f64> {
        let ln_p = match *self {
            Prior::Fixed { value } => return Err(OrbitError::NotSamplable { value }),
            Prior::Uniform { min, max } => -(max - min).ln(),
            Prior::LogUniform { min, max } => -x.ln() - (max / min).ln().ln(),
            Prior::Gaussian { mu, sigma } => {
                let z = (x - mu) / sigma;
                -0.5 * z * z - sigma.ln() - 0.5 * TAU.ln()
            }
            // the endpoints are in the support with zero density
            Prior::Sine if x == 0. || x == PI => f64::NEG_INFINITY,
            Prior::Sine => x.sin().max(0.).ln() - LN_2,
        };
        self.check_support(x)?;
        Ok(ln_p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn invalid_parameters() {
        assert!(Prior::uniform(1., 1.).is_err());
        assert!(Prior::uniform(2., 1.).is_err());
        assert!(Prior::log_uniform(0., 1.).is_err());
        assert!(Prior::gaussian(0., 0.).is_err());
        assert!(Prior::gaussian(0., -1.).is_err());
        assert!(Prior::fixed(f64::NAN).is_err());
        let err = Prior::uniform(3., 1.).unwrap_err();
        assert!(matches!(err, OrbitError::Config { ref field, .. } if field == "uniform"));
    }

    #[test]
    fn fixed_is_not_samplable() {
        let prior = Prior::fixed(51.44).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(
            prior.sample(&mut rng),
            Err(OrbitError::NotSamplable { value: 51.44 })
        );
        assert!(matches!(
            prior.log_density(51.44),
            Err(OrbitError::NotSamplable { .. })
        ));
        assert_eq!(prior.fixed_value(), Some(51.44));
    }

    #[test]
    fn sine_boundaries() {
        let prior = Prior::sine();
        assert_eq!(prior.log_density(0.).unwrap(), f64::NEG_INFINITY);
        assert_eq!(prior.log_density(PI).unwrap(), f64::NEG_INFINITY);
        assert_abs_diff_eq!(
            prior.log_density(PI / 2.).unwrap(),
            -LN_2,
            epsilon = 1e-12
        );
        assert!(matches!(
            prior.log_density(-1e-9),
            Err(OrbitError::Domain { prior: "sine", .. })
        ));
        assert!(prior.log_density(PI + 1e-9).is_err());
    }

    #[test]
    fn densities_are_normalized() {
        let uniform = Prior::uniform(0., 4.).unwrap();
        assert_abs_diff_eq!(uniform.log_density(4.).unwrap(), -(4f64.ln()));

        let jeffreys = Prior::log_uniform(1., 100.).unwrap();
        // integral of 1/(x ln(100)) over [1, 100] is 1, so p(10) = 1/(10 ln 100)
        assert_abs_diff_eq!(
            jeffreys.log_density(10.).unwrap(),
            -(10. * 100f64.ln()).ln(),
            epsilon = 1e-12
        );

        let gauss = Prior::gaussian(1.8, 0.5).unwrap();
        assert_abs_diff_eq!(
            gauss.log_density(1.8).unwrap(),
            -(0.5 * TAU.sqrt()).ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn sample_moments() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let prior = Prior::gaussian(3., 2.).unwrap();
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| prior.sample(&mut rng).unwrap()).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert_abs_diff_eq!(mean, 3., epsilon = 0.05);
        assert_abs_diff_eq!(var.sqrt(), 2., epsilon = 0.05);

        // E[cos(i)] = 0 and E[cos(i)^2] = 1/3 for an isotropic inclination
        let sine = Prior::sine();
        let cos2 = (0..n)
            .map(|_| sine.sample(&mut rng).unwrap().cos().powi(2))
            .sum::<f64>()
            / n as f64;
        assert_abs_diff_eq!(cos2, 1. / 3., epsilon = 0.01);
    }

    #[test]
    fn serde_shape() {
        let prior = Prior::uniform(0., 1.).unwrap();
        let json = serde_json::to_string(&prior).unwrap();
        assert_eq!(json, r#"{"kind":"uniform","min":0.0,"max":1.0}"#);
        let back: Prior = serde_json::from_str(r#"{"kind":"sine"}"#).unwrap();
        assert_eq!(back, Prior::Sine);
    }

    fn any_prior() -> impl Strategy<Value = Prior> {
        prop_oneof![
            (-100f64..100., 0.01f64..50.)
                .prop_map(|(min, w)| Prior::Uniform { min, max: min + w }),
            (1e-3f64..10., 1.01f64..1e4)
                .prop_map(|(min, r)| Prior::LogUniform { min, max: min * r }),
            Just(Prior::Sine),
        ]
    }

    proptest! {
        #[test]
        fn draws_stay_in_support(prior in any_prior(), seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let (lower, upper) = prior.support();
            for _ in 0..20 {
                let x = prior.sample(&mut rng).unwrap();
                prop_assert!(x >= lower && x <= upper);
                prop_assert!(prior.log_density(x).is_ok());
            }
        }

        #[test]
        fn outside_support_is_a_domain_error(prior in any_prior(), offset in 1e-6f64..1e3) {
            let (lower, upper) = prior.support();
            let below = prior.log_density(lower - offset);
            let above = prior.log_density(upper + offset);
            prop_assert!(matches!(below, Err(OrbitError::Domain { .. })), "{:?}", below);
            prop_assert!(matches!(above, Err(OrbitError::Domain { .. })), "{:?}", above);
        }
    }
}
