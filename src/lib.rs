//! Posterior sampling of Keplerian orbital elements from relative astrometry
//! and radial velocities.
//!
//! A [`System`] bundles the measurements, one prior per parameter and an
//! [`OrbitModel`] that predicts sky positions. Two samplers draw from the
//! posterior of a system:
//!
//! * [`OftiSampler`], a rejection sampler that scales and rotates prior draws
//!   to pass through one measurement, suited to short orbital arcs;
//! * [`PtSampler`], a parallel-tempered affine-invariant ensemble sampler.
//!
//! Both implement [`StepSampler`] and can be driven to completion with
//! [`StepSampler::run`] or on a background thread with [`BackgroundSampler`].
//!
//! ```ignore
//! let system = System::new(SystemConfig::new(1, 1.8, 51.44), observations, model)?;
//! let results = OftiSampler::new(&system, OftiSettings::default())?.run()?;
//! println!("{:?}", results.summary("sma1"));
//! ```

mod driver;
mod error;
mod lnlike;
mod mcmc;
mod model;
mod observations;
mod ofti;
mod parameters;
mod prior;
mod results;
mod runner;
mod system;

pub use driver::{AnySampler, Driver, DriverConfig, SamplerKind};
pub use error::{OrbitError, Result};
pub use lnlike::{chi2_lnlike, chi2_terms};
pub use mcmc::{swap_acceptance, PtSampler, PtSettings};
pub use model::{period_days, OrbitModel, OrbitalElements, SkyPosition, DAYS_PER_YEAR};
pub use observations::{
    radec_to_seppa, radec_to_seppa_with_errors, seppa_to_radec, wrap_degrees,
    ObservationRecord, ObservationTable, QuantityType, MJD_OFFSET,
};
pub use ofti::{scale_and_rotate, OftiSampler, OftiSettings, ReferenceEpoch};
pub use parameters::{Parameter, ParameterSet};
pub use prior::Prior;
pub use results::{ColumnSummary, Results, Sample};
pub use runner::{BackgroundSampler, Phase, Progress, ProgressCallback, StepSampler};
pub use system::{System, SystemConfig, ELEMENT_NAMES};
