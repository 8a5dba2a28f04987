//! Data, priors and the orbit model of one planetary system.

use std::f64::consts::TAU;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{OrbitError, Result};
use crate::lnlike::chi2_lnlike;
use crate::model::{OrbitModel, OrbitalElements};
use crate::observations::{radec_to_seppa, ObservationTable, QuantityType};
use crate::parameters::ParameterSet;
use crate::prior::Prior;

/// Names of the per-body elements, suffixed with the body number.
pub const ELEMENT_NAMES: [&str; 6] = ["sma", "ecc", "inc", "aop", "pan", "epp"];

pub(crate) const SMA: usize = 0;
pub(crate) const PAN: usize = 4;
pub(crate) const EPP: usize = 5;

/// Physical constants of a system.
///
/// An error of zero keeps the value fixed during the fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub num_secondary_bodies: usize,
    /// Total mass in solar masses.
    pub system_mass: f64,
    /// Parallax in mas.
    pub plx: f64,
    #[serde(default)]
    pub mass_err: f64,
    #[serde(default)]
    pub plx_err: f64,
    #[serde(default = "default_tau_ref_epoch")]
    pub tau_ref_epoch: f64,
}

fn default_tau_ref_epoch() -> f64 {
    58_849.
}

impl SystemConfig {
    pub fn new(num_secondary_bodies: usize, system_mass: f64, plx: f64) -> Self {
        Self {
            num_secondary_bodies,
            system_mass,
            plx,
            mass_err: 0.,
            plx_err: 0.,
            tau_ref_epoch: default_tau_ref_epoch(),
        }
    }

    pub fn with_mass_err(self, mass_err: f64) -> Self {
        Self { mass_err, ..self }
    }

    pub fn with_plx_err(self, plx_err: f64) -> Self {
        Self { plx_err, ..self }
    }

    fn constant_prior(field: &str, value: f64, err_field: &str, err: f64) -> Result<Prior> {
        if !(value.is_finite() && value > 0.) {
            return Err(OrbitError::config(field, format!("must be positive, got {value}")));
        }
        if err.is_nan() || err < 0. {
            return Err(OrbitError::config(
                err_field,
                format!("must be zero (fixed) or positive, got {err}"),
            ));
        }
        if err == 0. {
            Prior::fixed(value)
        } else {
            Prior::gaussian(value, err)
        }
    }

    /// The default parameter layout: six elements per body, then `plx` and `mtot`.
    pub fn default_parameters(&self) -> Result<ParameterSet> {
        if self.num_secondary_bodies == 0 {
            return Err(OrbitError::config(
                "num_secondary_bodies",
                "need at least one orbiting body",
            ));
        }
        let plx = Self::constant_prior("plx", self.plx, "plx_err", self.plx_err)?;
        let mtot =
            Self::constant_prior("system_mass", self.system_mass, "mass_err", self.mass_err)?;

        let mut params = ParameterSet::new();
        for body in 1..=self.num_secondary_bodies {
            let priors = [
                Prior::log_uniform(0.001, 1e7)?,
                Prior::uniform(0., 1.)?,
                Prior::sine(),
                Prior::uniform(0., TAU)?,
                Prior::uniform(0., TAU)?,
                Prior::uniform(0., 1.)?,
            ];
            for (name, prior) in ELEMENT_NAMES.iter().zip(priors) {
                params.push(format!("{name}{body}"), prior)?;
            }
        }
        params.push("plx", plx)?;
        params.push("mtot", mtot)?;
        Ok(params)
    }
}

/// Observations, priors and orbit model of a system.
///
/// Cloning is cheap for the model (shared) and copies the data and priors, so a
/// clone is an independent snapshot.
pub struct System<M> {
    num_secondary_bodies: usize,
    tau_ref_epoch: f64,
    observations: ObservationTable,
    params: ParameterSet,
    model: Arc<M>,
}

impl<M> Clone for System<M> {
    fn clone(&self) -> Self {
        Self {
            num_secondary_bodies: self.num_secondary_bodies,
            tau_ref_epoch: self.tau_ref_epoch,
            observations: self.observations.clone(),
            params: self.params.clone(),
            model: self.model.clone(),
        }
    }
}

impl<M: OrbitModel> System<M> {
    pub fn new(config: SystemConfig, observations: ObservationTable, model: M) -> Result<Self> {
        Self::with_shared_model(config, observations, Arc::new(model))
    }

    pub fn with_shared_model(
        config: SystemConfig,
        observations: ObservationTable,
        model: Arc<M>,
    ) -> Result<Self> {
        let params = config.default_parameters()?;
        if !config.tau_ref_epoch.is_finite() {
            return Err(OrbitError::config("tau_ref_epoch", "must be finite"));
        }
        for (row, record) in observations.iter().enumerate() {
            record.validate().map_err(|err| match err {
                OrbitError::Config { field, reason } => {
                    OrbitError::config(format!("observations[{row}].{field}"), reason)
                }
                other => other,
            })?;
            if record.object_id == 0 {
                return Err(OrbitError::config(
                    format!("observations[{row}].object_id"),
                    "measurements of the primary are not supported",
                ));
            }
            if record.object_id as usize > config.num_secondary_bodies {
                return Err(OrbitError::config(
                    format!("observations[{row}].object_id"),
                    format!(
                        "object {} but the system has {} secondary bodies",
                        record.object_id, config.num_secondary_bodies
                    ),
                ));
            }
        }
        Ok(Self {
            num_secondary_bodies: config.num_secondary_bodies,
            tau_ref_epoch: config.tau_ref_epoch,
            observations,
            params,
            model,
        })
    }

    pub fn num_secondary_bodies(&self) -> usize {
        self.num_secondary_bodies
    }

    pub fn tau_ref_epoch(&self) -> f64 {
        self.tau_ref_epoch
    }

    pub fn observations(&self) -> &ObservationTable {
        &self.observations
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn labels(&self) -> Vec<String> {
        self.params.labels()
    }

    pub fn param_index(&self, label: &str) -> Option<usize> {
        self.params.index_of(label)
    }

    pub fn set_prior(&mut self, label: &str, prior: Prior) -> Result<Prior> {
        self.params.set_prior_by_label(label, prior)
    }

    /// Column of element `element` (an index into [`ELEMENT_NAMES`]) of `body`.
    pub(crate) fn element_index(&self, body: usize, element: usize) -> usize {
        (body - 1) * ELEMENT_NAMES.len() + element
    }

    pub(crate) fn plx_index(&self) -> usize {
        self.num_secondary_bodies * ELEMENT_NAMES.len()
    }

    pub(crate) fn mtot_index(&self) -> usize {
        self.plx_index() + 1
    }

    /// Elements of body `body` (1-based) from a full parameter vector.
    ///
    /// # Panics
    ///
    /// If `full` does not hold one value per parameter.
    pub fn elements(&self, full: &[f64], body: usize) -> OrbitalElements {
        assert!(full.len() == self.params.len());
        assert!(body >= 1 && body <= self.num_secondary_bodies);
        let el = |k| full[self.element_index(body, k)];
        OrbitalElements {
            sma: el(0),
            ecc: el(1),
            inc: el(2),
            aop: el(3),
            pan: el(4),
            tau: el(5),
            plx: full[self.plx_index()],
            mtot: full[self.mtot_index()],
            tau_ref_epoch: self.tau_ref_epoch,
        }
    }

    /// Model prediction for every observation, in the units of the record.
    pub fn compute_model(&self, full: &[f64]) -> Vec<[f64; 2]> {
        self.observations
            .iter()
            .map(|record| {
                let elements = self.elements(full, record.object_id as usize);
                let pos = self.model.predict(&elements, record.epoch);
                match record.quant_type {
                    QuantityType::RaDec => [pos.ra, pos.dec],
                    QuantityType::SepPa => {
                        let (sep, pa) = radec_to_seppa(pos.ra, pos.dec);
                        [sep, pa]
                    }
                    QuantityType::Rv => [pos.rv, f64::NAN],
                }
            })
            .collect()
    }

    pub fn log_likelihood(&self, full: &[f64]) -> f64 {
        if self.observations.is_empty() {
            return 0.;
        }
        chi2_lnlike(&self.observations, &self.compute_model(full))
    }

    pub fn log_prior(&self, full: &[f64]) -> Result<f64> {
        self.params.log_prior(full)
    }

    /// Log posterior density up to a constant, `-inf` outside the prior support.
    pub fn log_posterior(&self, full: &[f64]) -> f64 {
        self.log_probability(full).0
    }

    /// Returns `(log_posterior, log_prior, log_likelihood)`.
    ///
    /// The likelihood is skipped for points outside the prior support.
    pub(crate) fn log_probability(&self, full: &[f64]) -> (f64, f64, f64) {
        let log_prior = match self.log_prior(full) {
            Ok(lp) if lp.is_finite() => lp,
            _ => return (f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        };
        let log_like = self.log_likelihood(full);
        let log_post = log_prior + log_like;
        if log_post.is_finite() {
            (log_post, log_prior, log_like)
        } else {
            (f64::NEG_INFINITY, log_prior, log_like)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SkyPosition;
    use crate::observations::ObservationRecord;
    use pretty_assertions::assert_eq;

    /// Places the body at (sma * plx, 0) regardless of the epoch.
    struct StaticModel;

    impl OrbitModel for StaticModel {
        fn predict(&self, elements: &OrbitalElements, _epoch: f64) -> SkyPosition {
            SkyPosition {
                ra: elements.sma * elements.plx,
                dec: 0.,
                rv: elements.ecc,
            }
        }
    }

    fn observations() -> ObservationTable {
        [
            ObservationRecord::radec(58_000., 1, (100., 10.), (0., 10.)).unwrap(),
            ObservationRecord::seppa(58_100., 1, (100., 10.), (90., 1.)).unwrap(),
            ObservationRecord::rv(58_200., 1, (0.5, 0.1)).unwrap(),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn default_layout() {
        let config = SystemConfig::new(2, 1.8, 51.44).with_mass_err(0.04);
        let system = System::new(config, ObservationTable::default(), StaticModel).unwrap();
        assert_eq!(
            system.labels(),
            vec![
                "sma1", "ecc1", "inc1", "aop1", "pan1", "epp1", "sma2", "ecc2", "inc2", "aop2",
                "pan2", "epp2", "plx", "mtot"
            ]
        );
        assert_eq!(system.param_index("plx"), Some(12));
        assert_eq!(
            system.parameters().prior_by_label("plx"),
            Some(&Prior::Fixed { value: 51.44 })
        );
        assert_eq!(
            system.parameters().prior_by_label("mtot"),
            Some(&Prior::Gaussian {
                mu: 1.8,
                sigma: 0.04
            })
        );
    }

    #[test]
    fn invalid_config() {
        let make = |config| System::new(config, ObservationTable::default(), StaticModel);
        let err = make(SystemConfig::new(1, 1.8, 51.44).with_plx_err(-0.1)).err();
        assert_eq!(
            err,
            Some(OrbitError::Config {
                field: "plx_err".into(),
                reason: "must be zero (fixed) or positive, got -0.1".into()
            })
        );
        assert!(make(SystemConfig::new(0, 1.8, 51.44)).is_err());
        assert!(make(SystemConfig::new(1, -1., 51.44)).is_err());
    }

    #[test]
    fn rejects_unknown_objects() {
        let table: ObservationTable =
            [ObservationRecord::radec(58_000., 2, (1., 1.), (1., 1.)).unwrap()]
                .into_iter()
                .collect();
        let err = System::new(SystemConfig::new(1, 1., 10.), table, StaticModel).err();
        assert!(matches!(
            err,
            Some(OrbitError::Config { ref field, .. }) if field == "observations[0].object_id"
        ));
    }

    #[test]
    fn rejects_records_that_bypass_validation() {
        let mut record = ObservationRecord::seppa(58_000., 1, (100., 1.), (90., 1.)).unwrap();
        record.quant1_err = 0.;
        let table = ObservationTable::new(vec![observations().records()[0], record]);
        let err = System::new(SystemConfig::new(1, 1., 10.), table, StaticModel).err();
        assert!(matches!(
            err,
            Some(OrbitError::Config { ref field, .. }) if field == "observations[1].quant1_err"
        ));
    }

    #[test]
    fn short_vectors_are_impossible() {
        let system = System::new(SystemConfig::new(1, 1., 10.), observations(), StaticModel)
            .unwrap();
        assert!(matches!(
            system.log_prior(&[10., 0.5]),
            Err(OrbitError::Config { .. })
        ));
        assert_eq!(system.log_posterior(&[10., 0.5]), f64::NEG_INFINITY);
    }

    #[test]
    fn model_in_record_units() {
        let system = System::new(SystemConfig::new(1, 1., 10.), observations(), StaticModel)
            .unwrap();
        let full = [10., 0.5, 1., 1., 1., 0.5, 10., 1.];
        let model = system.compute_model(&full);
        assert_eq!(model[0], [100., 0.]);
        assert_eq!(model[1][0], 100.);
        assert!((model[1][1] - 90.).abs() < 1e-12);
        assert_eq!(model[2][0], 0.5);
        assert!(system.log_likelihood(&full).abs() < 1e-12);
        assert!(system.log_posterior(&full).is_finite());
    }

    #[test]
    fn outside_prior_is_impossible() {
        let system = System::new(SystemConfig::new(1, 1., 10.), observations(), StaticModel)
            .unwrap();
        // eccentricity above one
        let full = [10., 1.5, 1., 1., 1., 0.5, 10., 1.];
        assert_eq!(system.log_posterior(&full), f64::NEG_INFINITY);
    }

    #[test]
    fn clone_is_a_snapshot() {
        let mut system = System::new(SystemConfig::new(1, 1., 10.), observations(), StaticModel)
            .unwrap();
        let snapshot = system.clone();
        system
            .set_prior("ecc1", Prior::fixed(0.1).unwrap())
            .unwrap();
        assert_eq!(
            snapshot.parameters().prior_by_label("ecc1"),
            Some(&Prior::Uniform { min: 0., max: 1. })
        );
    }
}
