//! Parallel-tempered affine-invariant ensemble sampler.
//!
//! Every temperature holds its own ensemble of walkers that move with the
//! stretch move of Goodman & Weare. The target at temperature `T` is the log
//! posterior divided by `T`. Neighbouring temperatures exchange walkers every
//! `swap_interval` steps, and only the `T = 1` ensemble is stored.

use log::{debug, info};
use ndarray::{Array2, Array3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{OrbitError, Result};
use crate::model::OrbitModel;
use crate::ofti::default_num_threads;
use crate::results::Results;
use crate::runner::{Phase, Progress, StepSampler};
use crate::system::System;

/// Prior draws tried per walker before initialisation gives up.
const MAX_INIT_DRAWS: usize = 1000;

/// Settings for the parallel-tempered sampler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtSettings {
    pub num_temps: usize,
    /// Walkers per temperature, must be even.
    pub num_walkers: usize,
    /// Ensemble steps discarded before storing samples.
    pub num_burn: u64,
    /// Number of samples to store.
    pub num_orbits: u64,
    /// Store the cold ensemble every `thin` steps.
    pub thin: u64,
    /// Steps between temperature swaps.
    pub swap_interval: u64,
    /// Scale parameter `a` of the stretch move.
    pub stretch: f64,
    /// Temperature of the hottest ensemble.
    pub max_temp: f64,
    pub seed: u64,
    pub num_threads: usize,
}

impl Default for PtSettings {
    fn default() -> Self {
        Self {
            num_temps: 20,
            num_walkers: 1000,
            num_burn: 0,
            num_orbits: 10_000,
            thin: 1,
            swap_interval: 1,
            stretch: 2.,
            max_temp: 1000.,
            seed: 0,
            num_threads: default_num_threads(),
        }
    }
}

impl PtSettings {
    fn validate(&self) -> Result<()> {
        if self.num_temps == 0 {
            return Err(OrbitError::config("num_temps", "must be at least 1"));
        }
        if self.num_walkers < 2 || self.num_walkers % 2 != 0 {
            return Err(OrbitError::config(
                "num_walkers",
                format!("must be even and at least 2, got {}", self.num_walkers),
            ));
        }
        if self.num_orbits == 0 {
            return Err(OrbitError::config("num_orbits", "must be at least 1"));
        }
        if self.thin == 0 {
            return Err(OrbitError::config("thin", "must be at least 1"));
        }
        if self.swap_interval == 0 {
            return Err(OrbitError::config("swap_interval", "must be at least 1"));
        }
        if !(self.stretch > 1.) || !self.stretch.is_finite() {
            return Err(OrbitError::config(
                "stretch",
                format!("must be larger than 1, got {}", self.stretch),
            ));
        }
        if !(self.max_temp >= 1.) || !self.max_temp.is_finite() {
            return Err(OrbitError::config(
                "max_temp",
                format!("must be at least 1, got {}", self.max_temp),
            ));
        }
        if self.num_threads == 0 {
            return Err(OrbitError::config("num_threads", "must be at least 1"));
        }
        Ok(())
    }

    /// Geometric ladder from 1 to `max_temp`.
    pub fn temperatures(&self) -> Vec<f64> {
        if self.num_temps == 1 {
            return vec![1.];
        }
        let last = (self.num_temps - 1) as f64;
        (0..self.num_temps)
            .map(|k| self.max_temp.powf(k as f64 / last))
            .collect()
    }
}

/// Probability of exchanging the states of two walkers at temperatures `t_i`
/// and `t_j` with log posteriors `lp_i` and `lp_j`.
pub fn swap_acceptance(lp_i: f64, t_i: f64, lp_j: f64, t_j: f64) -> f64 {
    if lp_i == lp_j && t_i == t_j {
        return 1.;
    }
    let ln_ratio = (1. / t_i - 1. / t_j) * (lp_j - lp_i);
    if ln_ratio.is_nan() {
        return 0.;
    }
    ln_ratio.exp().min(1.)
}

#[derive(Debug, Clone, PartialEq)]
struct WalkerState {
    free: Vec<f64>,
    log_post: f64,
    log_prior: f64,
    log_like: f64,
}

struct Walker {
    state: WalkerState,
    rng: ChaCha8Rng,
    accepted: u64,
}

/// Context of one half-ensemble update.
struct Move<'a, M> {
    system: &'a System<M>,
    temperature: f64,
    stretch: f64,
}

impl<M: OrbitModel> Move<'_, M> {
    fn evaluate(&self, free: Vec<f64>) -> WalkerState {
        let full = self.system.parameters().fill_fixed(&free);
        let (log_post, log_prior, log_like) = self.system.log_probability(&full);
        WalkerState {
            free,
            log_post,
            log_prior,
            log_like,
        }
    }

    /// Stretch `walker` towards a random member of `others`.
    fn stretch(&self, walker: &mut Walker, others: &[Walker]) {
        let a = self.stretch;
        let rng = &mut walker.rng;
        let z = ((a - 1.) * rng.random::<f64>() + 1.).powi(2) / a;
        let partner = &others[rng.random_range(0..others.len())].state.free;

        let proposal = walker
            .state
            .free
            .iter()
            .zip(partner)
            .map(|(&x, &c)| c + z * (x - c))
            .collect();
        let dim = walker.state.free.len() as f64;
        let ln_u = rng.random::<f64>().ln();

        let proposed = self.evaluate(proposal);
        if !proposed.log_post.is_finite() {
            return;
        }
        let ln_accept =
            (dim - 1.) * z.ln() + (proposed.log_post - walker.state.log_post) / self.temperature;
        if ln_u < ln_accept {
            walker.state = proposed;
            walker.accepted += 1;
        }
    }

    fn update(&self, walkers: &mut [Walker]) {
        let (first, second) = walkers.split_at_mut(walkers.len() / 2);
        let others = &*second;
        first
            .par_iter_mut()
            .for_each(|walker| self.stretch(walker, others));
        let others = &*first;
        second
            .par_iter_mut()
            .for_each(|walker| self.stretch(walker, others));
    }
}

/// Parallel-tempered ensemble MCMC over the free parameters of a system.
pub struct PtSampler<M> {
    system: System<M>,
    settings: PtSettings,
    temperatures: Vec<f64>,
    /// `ensembles[t][w]`, coldest temperature first.
    ensembles: Vec<Vec<Walker>>,
    rng: ChaCha8Rng,
    pool: ThreadPool,
    results: Results,
    phase: Phase,
    steps: u64,
    burned: u64,
    sampled: u64,
    swaps_accepted: Vec<u64>,
    swaps_proposed: Vec<u64>,
}

impl<M: OrbitModel> PtSampler<M> {
    /// Build a sampler from a snapshot of `system` and draw the initial walkers
    /// from the priors.
    pub fn new(system: &System<M>, settings: PtSettings) -> Result<Self> {
        settings.validate()?;
        let system = system.clone();
        if system.parameters().num_free() == 0 {
            return Err(OrbitError::config(
                "priors",
                "all parameters are fixed, there is nothing to sample",
            ));
        }

        let temperatures = settings.temperatures();
        let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
        let n = settings.num_walkers;

        let mut ensembles = Vec::with_capacity(settings.num_temps);
        for (t, &temperature) in temperatures.iter().enumerate() {
            let initial = Move {
                system: &system,
                temperature,
                stretch: settings.stretch,
            };
            let mut walkers = Vec::with_capacity(n);
            for w in 0..n {
                let state = Self::initial_state(&initial, &mut rng)?;
                let mut walker_rng = ChaCha8Rng::seed_from_u64(settings.seed);
                walker_rng.set_stream((t * n + w + 1) as u64);
                walkers.push(Walker {
                    state,
                    rng: walker_rng,
                    accepted: 0,
                });
            }
            ensembles.push(walkers);
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.num_threads)
            .thread_name(|i| format!("orbitfit-mcmc-{}", i))
            .build()
            .map_err(|err| OrbitError::config("num_threads", err.to_string()))?;

        debug!(
            "Initialized {} walkers at each of {} temperatures up to {}",
            n, settings.num_temps, settings.max_temp
        );

        let num_swaps = settings.num_temps - 1;
        Ok(Self {
            results: Results::new("MCMC", system.labels()),
            system,
            settings,
            temperatures,
            ensembles,
            rng,
            pool,
            phase: Phase::Initialized,
            steps: 0,
            burned: 0,
            sampled: 0,
            swaps_accepted: vec![0; num_swaps],
            swaps_proposed: vec![0; num_swaps],
        })
    }

    fn initial_state(init: &Move<'_, M>, rng: &mut ChaCha8Rng) -> Result<WalkerState> {
        let params = init.system.parameters();
        for _ in 0..MAX_INIT_DRAWS {
            let full = params.draw(rng);
            let state = init.evaluate(params.compress(&full));
            if state.log_post.is_finite() {
                return Ok(state);
            }
        }
        Err(OrbitError::config(
            "walkers",
            format!("no prior draw with finite log posterior in {MAX_INIT_DRAWS} attempts"),
        ))
    }

    pub fn system(&self) -> &System<M> {
        &self.system
    }

    pub fn settings(&self) -> &PtSettings {
        &self.settings
    }

    pub fn temperatures(&self) -> &[f64] {
        &self.temperatures
    }

    /// Ensemble steps taken, burn-in included.
    pub fn num_steps(&self) -> u64 {
        self.steps
    }

    /// Full parameter vectors of every walker, shaped `(temps, walkers, params)`.
    pub fn ensemble(&self) -> Array3<f64> {
        let params = self.system.parameters();
        let shape = (self.ensembles.len(), self.settings.num_walkers, params.len());
        let mut out = Array3::zeros(shape);
        for (t, walkers) in self.ensembles.iter().enumerate() {
            for (w, walker) in walkers.iter().enumerate() {
                let full = params.fill_fixed(&walker.state.free);
                for (k, value) in full.into_iter().enumerate() {
                    out[[t, w, k]] = value;
                }
            }
        }
        out
    }

    /// Untempered log posteriors, shaped `(temps, walkers)`.
    pub fn log_posteriors(&self) -> Array2<f64> {
        Array2::from_shape_fn(
            (self.ensembles.len(), self.settings.num_walkers),
            |(t, w)| self.ensembles[t][w].state.log_post,
        )
    }

    /// Log likelihoods of every walker, shaped `(temps, walkers)`.
    pub fn log_likelihoods(&self) -> Array2<f64> {
        Array2::from_shape_fn(
            (self.ensembles.len(), self.settings.num_walkers),
            |(t, w)| self.ensembles[t][w].state.log_like,
        )
    }

    /// Fraction of accepted stretch moves per temperature.
    pub fn acceptance_fraction(&self) -> Vec<f64> {
        let proposed = (self.steps * self.settings.num_walkers as u64) as f64;
        self.ensembles
            .iter()
            .map(|walkers| {
                if self.steps == 0 {
                    return 0.;
                }
                walkers.iter().map(|w| w.accepted).sum::<u64>() as f64 / proposed
            })
            .collect()
    }

    /// Fraction of accepted exchanges between temperature `k` and `k + 1`.
    pub fn swap_acceptance_fraction(&self) -> Vec<f64> {
        self.swaps_accepted
            .iter()
            .zip(&self.swaps_proposed)
            .map(|(&accepted, &proposed)| {
                if proposed == 0 {
                    0.
                } else {
                    accepted as f64 / proposed as f64
                }
            })
            .collect()
    }

    fn advance(&mut self) {
        let system = &self.system;
        let stretch = self.settings.stretch;
        let temperatures = &self.temperatures;
        let ensembles = &mut self.ensembles;
        self.pool.install(|| {
            ensembles
                .par_iter_mut()
                .zip(temperatures.par_iter())
                .for_each(|(walkers, &temperature)| {
                    let update = Move {
                        system,
                        temperature,
                        stretch,
                    };
                    update.update(walkers);
                });
        });
        self.steps += 1;

        if self.steps % self.settings.swap_interval == 0 {
            self.swap_temperatures();
        }
    }

    fn swap_temperatures(&mut self) {
        for hot in (1..self.ensembles.len()).rev() {
            let cold = hot - 1;
            let (t_cold, t_hot) = (self.temperatures[cold], self.temperatures[hot]);
            let (lower, upper) = self.ensembles.split_at_mut(hot);
            for (a, b) in lower[cold].iter_mut().zip(upper[0].iter_mut()) {
                let p = swap_acceptance(a.state.log_post, t_cold, b.state.log_post, t_hot);
                self.swaps_proposed[cold] += 1;
                if self.rng.random::<f64>() < p {
                    std::mem::swap(&mut a.state, &mut b.state);
                    self.swaps_accepted[cold] += 1;
                }
            }
        }
    }

    fn store_cold_ensemble(&mut self) -> Result<()> {
        let params = self.system.parameters();
        for walker in &self.ensembles[0] {
            let full = params.fill_fixed(&walker.state.free);
            self.results.add_sample(full, walker.state.log_post)?;
        }
        Ok(())
    }
}

impl<M: OrbitModel> StepSampler for PtSampler<M> {
    fn step(&mut self) -> Result<bool> {
        match self.phase {
            Phase::Complete => return Ok(true),
            Phase::Initialized if self.settings.num_burn > 0 => {
                info!("Burning in for {} steps", self.settings.num_burn);
                self.phase = Phase::Burning;
            }
            Phase::Initialized => self.phase = Phase::Sampling,
            _ => {}
        }

        self.advance();

        if self.phase == Phase::Burning {
            self.burned += 1;
            if self.burned >= self.settings.num_burn {
                info!(
                    "Burn-in complete, cold acceptance fraction {:.3}",
                    self.acceptance_fraction()[0]
                );
                self.phase = Phase::Sampling;
            }
            return Ok(false);
        }

        self.sampled += 1;
        if self.sampled % self.settings.thin == 0 {
            self.store_cold_ensemble()?;
        }
        let requested = self.settings.num_orbits;
        if self.results.len() as u64 >= requested {
            self.results.truncate(requested as usize);
            self.phase = Phase::Complete;
            info!(
                "MCMC stored {} samples after {} steps",
                requested, self.steps
            );
            return Ok(true);
        }
        Ok(false)
    }

    fn progress(&self) -> Progress {
        Progress::new(
            self.phase,
            (self.results.len() as u64).min(self.settings.num_orbits),
            self.settings.num_orbits,
            self.steps,
        )
    }

    fn results(&self) -> &Results {
        &self.results
    }

    fn into_results(self) -> Results {
        self.results
    }
}
