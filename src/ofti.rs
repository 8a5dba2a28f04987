//! Orbits For The Impatient: rejection sampling with scale-and-rotate.
//!
//! Candidate orbits are drawn from the priors and then rescaled (semi-major
//! axis) and rotated (position angle of nodes) so that they pass through the
//! measured position at a reference epoch. Only the remaining mismatch with the
//! other epochs has to be rejected, which makes the method efficient for short
//! observed arcs.

use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{OrbitError, Result};
use crate::model::{period_days, OrbitModel};
use crate::observations::{radec_to_seppa, wrap_radians};
use crate::results::Results;
use crate::runner::{Phase, Progress, StepSampler};
use crate::system::{System, EPP, PAN, SMA};

/// Settings for the OFTI sampler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OftiSettings {
    /// Number of accepted orbits to collect.
    pub num_orbits: u64,
    /// Candidates per batch. Every batch has its own random stream.
    pub batch_size: usize,
    /// Batches evaluated concurrently in one step.
    pub num_threads: usize,
    /// Give up with [`OrbitError::Convergence`] after this many candidates.
    pub max_attempts: Option<u64>,
    pub seed: u64,
}

pub(crate) fn default_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for OftiSettings {
    fn default() -> Self {
        Self {
            num_orbits: 10_000,
            batch_size: 10_000,
            num_threads: default_num_threads(),
            max_attempts: None,
            seed: 0,
        }
    }
}

/// The measurement every candidate is scaled and rotated to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceEpoch {
    pub epoch: f64,
    /// Separation and its error in mas.
    pub sep: (f64, f64),
    /// Position angle and its error in degrees.
    pub pa: (f64, f64),
}

impl ReferenceEpoch {
    /// The astrometric measurement of body 1 with the smallest separation error.
    ///
    /// Measurements at zero separation have no defined position angle and are
    /// never chosen.
    pub fn select<M: OrbitModel>(system: &System<M>) -> Option<Self> {
        system
            .observations()
            .astrometry_for(1)
            .filter_map(|record| {
                let (sep, pa) = record.as_seppa()?;
                Some(ReferenceEpoch {
                    epoch: record.epoch,
                    sep,
                    pa,
                })
            })
            .filter(|r| {
                r.sep.0 > 0.
                    && [r.sep.1, r.pa.1]
                        .iter()
                        .all(|err| err.is_finite() && *err > 0.)
            })
            .min_by(|a, b| a.sep.1.total_cmp(&b.sep.1))
    }
}

/// Scale and rotate the orbit of body 1 in `full` so that it passes through
/// `(sep, pa)` (mas, degrees) at `epoch`.
///
/// The semi-major axis is scaled, the position angle of nodes rotated, and the
/// epoch of periastron moved so that the mean anomaly at `epoch` survives the
/// change of period. Entries with a fixed prior are left untouched.
pub fn scale_and_rotate<M: OrbitModel>(
    system: &System<M>,
    full: &mut [f64],
    epoch: f64,
    sep: f64,
    pa: f64,
) {
    let params = system.parameters();
    let is_free = |idx: usize| params.prior(idx).is_some_and(|p| !p.is_fixed());
    let (sma_idx, pan_idx, epp_idx) = (
        system.element_index(1, SMA),
        system.element_index(1, PAN),
        system.element_index(1, EPP),
    );

    let elements = system.elements(full, 1);
    let position = system.model().predict(&elements, epoch);
    let (model_sep, model_pa) = radec_to_seppa(position.ra, position.dec);

    // orbital phase at the reference epoch, in cycles
    let cycles = (epoch - elements.tau_ref_epoch) / elements.period_days() - elements.tau;

    if is_free(sma_idx) {
        let sma = elements.sma * sep / model_sep;
        full[sma_idx] = sma;
        if is_free(epp_idx) {
            let period = period_days(sma, elements.mtot);
            full[epp_idx] = ((epoch - elements.tau_ref_epoch) / period - cycles).rem_euclid(1.);
        }
    }
    if is_free(pan_idx) {
        full[pan_idx] = wrap_radians(elements.pan + (pa - model_pa).to_radians());
    }
}

struct Candidate {
    params: Vec<f64>,
    lnlike: f64,
    ln_u: f64,
}

/// Rejection sampler over the orbits of a single secondary body.
pub struct OftiSampler<M> {
    system: System<M>,
    settings: OftiSettings,
    reference: ReferenceEpoch,
    pool: ThreadPool,
    results: Results,
    running_max: f64,
    attempts: u64,
    /// Accepted candidates, including those cut off by the final truncation.
    accepted: u64,
    next_batch: u64,
    phase: Phase,
    warned_no_acceptance: bool,
}

impl<M: OrbitModel> OftiSampler<M> {
    /// Build a sampler from a snapshot of `system`.
    ///
    /// Later changes to `system` do not affect the sampler.
    pub fn new(system: &System<M>, settings: OftiSettings) -> Result<Self> {
        if system.num_secondary_bodies() != 1 {
            return Err(OrbitError::config(
                "num_secondary_bodies",
                "OFTI fits exactly one secondary body",
            ));
        }
        if settings.num_orbits == 0 {
            return Err(OrbitError::config("num_orbits", "must be at least 1"));
        }
        if settings.batch_size == 0 {
            return Err(OrbitError::config("batch_size", "must be at least 1"));
        }
        if settings.num_threads == 0 {
            return Err(OrbitError::config("num_threads", "must be at least 1"));
        }
        let reference = ReferenceEpoch::select(system).ok_or_else(|| {
            OrbitError::config(
                "observations",
                "OFTI needs an astrometric measurement of body 1 at nonzero separation",
            )
        })?;

        let params = system.parameters();
        let fixed = |element| {
            params
                .prior(system.element_index(1, element))
                .is_some_and(|p| p.is_fixed())
        };
        if !fixed(SMA) && fixed(EPP) && reference.epoch != system.tau_ref_epoch() {
            warn!(
                "epp1 is fixed while sma1 is free; scaled orbits will not pass exactly through the reference epoch"
            );
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.num_threads)
            .thread_name(|i| format!("orbitfit-ofti-{}", i))
            .build()
            .map_err(|err| OrbitError::config("num_threads", err.to_string()))?;

        Ok(Self {
            system: system.clone(),
            settings,
            reference,
            pool,
            results: Results::new("OFTI", system.labels()),
            running_max: f64::NEG_INFINITY,
            attempts: 0,
            accepted: 0,
            next_batch: 0,
            phase: Phase::Initialized,
            warned_no_acceptance: false,
        })
    }

    pub fn system(&self) -> &System<M> {
        &self.system
    }

    pub fn reference(&self) -> &ReferenceEpoch {
        &self.reference
    }

    pub fn settings(&self) -> &OftiSettings {
        &self.settings
    }

    /// Fraction of candidates accepted so far.
    pub fn acceptance_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.;
        }
        self.accepted as f64 / self.attempts as f64
    }

    fn prepare_batch(&self, batch: u64, size: usize) -> Vec<Candidate> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.settings.seed);
        rng.set_stream(batch);
        let ReferenceEpoch { epoch, sep, pa } = self.reference;

        (0..size)
            .map(|_| {
                let mut params = self.system.parameters().draw(&mut rng);
                let sep_offset: f64 = StandardNormal.sample(&mut rng);
                let pa_offset: f64 = StandardNormal.sample(&mut rng);
                scale_and_rotate(
                    &self.system,
                    &mut params,
                    epoch,
                    sep.0 + sep_offset * sep.1,
                    pa.0 + pa_offset * pa.1,
                );
                let lnlike = match self.system.log_prior(&params) {
                    Ok(lp) if lp.is_finite() => self.system.log_likelihood(&params),
                    _ => f64::NEG_INFINITY,
                };
                let ln_u = rng.random::<f64>().ln();
                Candidate {
                    params,
                    lnlike,
                    ln_u,
                }
            })
            .collect()
    }

    /// Batch indices and sizes for the next step, bounded by `max_attempts`.
    fn plan_round(&self) -> Vec<(u64, usize)> {
        let mut remaining = self
            .settings
            .max_attempts
            .map_or(u64::MAX, |max| max.saturating_sub(self.attempts));
        let mut round = Vec::with_capacity(self.settings.num_threads);
        for i in 0..self.settings.num_threads as u64 {
            if remaining == 0 {
                break;
            }
            let size = (self.settings.batch_size as u64).min(remaining);
            remaining -= size;
            round.push((self.next_batch + i, size as usize));
        }
        round
    }
}

impl<M: OrbitModel> StepSampler for OftiSampler<M> {
    fn step(&mut self) -> Result<bool> {
        if self.phase == Phase::Complete {
            return Ok(true);
        }
        self.phase = Phase::Sampling;
        let requested = self.settings.num_orbits;

        let round = self.plan_round();
        if round.is_empty() {
            return Err(OrbitError::Convergence {
                accepted: self.results.len() as u64,
                requested,
                attempts: self.attempts,
            });
        }

        let batches: Vec<Vec<Candidate>> = self.pool.install(|| {
            round
                .par_iter()
                .map(|&(batch, size)| self.prepare_batch(batch, size))
                .collect()
        });

        for batch in batches {
            self.attempts += batch.len() as u64;
            let batch_max = batch
                .iter()
                .map(|c| c.lnlike)
                .filter(|x| x.is_finite())
                .fold(f64::NEG_INFINITY, f64::max);
            self.running_max = self.running_max.max(batch_max);
            for candidate in batch {
                if candidate.lnlike - self.running_max > candidate.ln_u {
                    self.accepted += 1;
                    self.results.add_sample(candidate.params, candidate.lnlike)?;
                }
            }
        }
        self.next_batch += round.len() as u64;

        let accepted = self.results.len() as u64;
        debug!(
            "OFTI accepted {} of {} orbits after {} candidates",
            accepted.min(requested),
            requested,
            self.attempts
        );

        if accepted >= requested {
            self.results.truncate(requested as usize);
            self.phase = Phase::Complete;
            info!(
                "OFTI collected {} orbits from {} candidates",
                requested, self.attempts
            );
            return Ok(true);
        }
        if accepted == 0
            && !self.warned_no_acceptance
            && self.attempts >= 10 * self.settings.batch_size as u64
        {
            self.warned_no_acceptance = true;
            warn!(
                "OFTI has not accepted any orbit after {} candidates",
                self.attempts
            );
        }
        Ok(false)
    }

    fn progress(&self) -> Progress {
        Progress::new(
            self.phase,
            (self.results.len() as u64).min(self.settings.num_orbits),
            self.settings.num_orbits,
            self.attempts,
        )
    }

    fn results(&self) -> &Results {
        &self.results
    }

    fn into_results(self) -> Results {
        self.results
    }
}
