//! The seam to orbit propagation.
//!
//! Solving Kepler's equation and projecting an orbit on the sky is left to an
//! implementation of [`OrbitModel`]. The samplers only rely on its contract: a
//! pure function from orbital elements and an epoch to a sky position.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

pub const DAYS_PER_YEAR: f64 = 365.25;

/// Keplerian elements of one secondary body plus the system constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitalElements {
    /// Semi-major axis in AU.
    pub sma: f64,
    pub ecc: f64,
    /// Inclination in radians.
    pub inc: f64,
    /// Argument of periastron in radians.
    pub aop: f64,
    /// Position angle of the ascending node in radians.
    pub pan: f64,
    /// Epoch of periastron as a fraction of the period after `tau_ref_epoch`.
    pub tau: f64,
    /// Parallax in mas.
    pub plx: f64,
    /// Total mass in solar masses.
    pub mtot: f64,
    /// MJD that `tau` is measured from.
    pub tau_ref_epoch: f64,
}

impl OrbitalElements {
    /// Orbital period in days from Kepler's third law.
    pub fn period_days(&self) -> f64 {
        period_days(self.sma, self.mtot)
    }

    /// Mean anomaly in radians (not wrapped) at `epoch` (MJD).
    pub fn mean_anomaly(&self, epoch: f64) -> f64 {
        TAU * ((epoch - self.tau_ref_epoch) / self.period_days() - self.tau)
    }
}

pub fn period_days(sma: f64, mtot: f64) -> f64 {
    (sma.powi(3) / mtot).sqrt() * DAYS_PER_YEAR
}

/// Position of a secondary relative to the primary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    /// RA offset in mas.
    pub ra: f64,
    /// Dec offset in mas.
    pub dec: f64,
    /// Radial velocity in km/s.
    pub rv: f64,
}

pub trait OrbitModel: Send + Sync {
    /// Predict the position of the body described by `elements` at `epoch` (MJD).
    ///
    /// Unphysical elements may produce non-finite values, which the
    /// likelihood treats as an impossible orbit.
    fn predict(&self, elements: &OrbitalElements, epoch: f64) -> SkyPosition;
}

impl<T: OrbitModel + ?Sized> OrbitModel for std::sync::Arc<T> {
    fn predict(&self, elements: &OrbitalElements, epoch: f64) -> SkyPosition {
        (**self).predict(elements, epoch)
    }
}

impl<T: OrbitModel + ?Sized> OrbitModel for Box<T> {
    fn predict(&self, elements: &OrbitalElements, epoch: f64) -> SkyPosition {
        (**self).predict(elements, epoch)
    }
}
