//! Wiring a configuration, data and an orbit model to a sampler.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{OrbitError, Result};
use crate::mcmc::{PtSampler, PtSettings};
use crate::model::OrbitModel;
use crate::observations::ObservationTable;
use crate::ofti::{OftiSampler, OftiSettings};
use crate::prior::Prior;
use crate::results::Results;
use crate::runner::{BackgroundSampler, Progress, ProgressCallback, StepSampler};
use crate::system::{System, SystemConfig};

/// Sampler names are matched case-insensitively, in code and in configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SamplerKind {
    Ofti,
    Mcmc,
}

impl TryFrom<String> for SamplerKind {
    type Error = OrbitError;

    fn try_from(name: String) -> Result<Self> {
        name.parse()
    }
}

impl From<SamplerKind> for String {
    fn from(kind: SamplerKind) -> Self {
        kind.to_string()
    }
}

impl FromStr for SamplerKind {
    type Err = OrbitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ofti" => Ok(SamplerKind::Ofti),
            "mcmc" => Ok(SamplerKind::Mcmc),
            _ => Err(OrbitError::config(
                "sampler",
                format!("unknown sampler `{s}`, expected OFTI or MCMC"),
            )),
        }
    }
}

impl fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerKind::Ofti => write!(f, "OFTI"),
            SamplerKind::Mcmc => write!(f, "MCMC"),
        }
    }
}

/// Everything needed to set up a fit apart from the data and the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub system: SystemConfig,
    pub sampler: SamplerKind,
    #[serde(default)]
    pub ofti: OftiSettings,
    #[serde(default)]
    pub mcmc: PtSettings,
    /// Replacement priors by parameter label.
    #[serde(default)]
    pub priors: BTreeMap<String, Prior>,
}

impl DriverConfig {
    pub fn new(system: SystemConfig, sampler: SamplerKind) -> Self {
        Self {
            system,
            sampler,
            ofti: OftiSettings::default(),
            mcmc: PtSettings::default(),
            priors: BTreeMap::new(),
        }
    }
}

pub enum AnySampler<M> {
    Ofti(OftiSampler<M>),
    Mcmc(PtSampler<M>),
}

impl<M: OrbitModel> StepSampler for AnySampler<M> {
    fn step(&mut self) -> Result<bool> {
        match self {
            AnySampler::Ofti(sampler) => sampler.step(),
            AnySampler::Mcmc(sampler) => sampler.step(),
        }
    }

    fn progress(&self) -> Progress {
        match self {
            AnySampler::Ofti(sampler) => sampler.progress(),
            AnySampler::Mcmc(sampler) => sampler.progress(),
        }
    }

    fn results(&self) -> &Results {
        match self {
            AnySampler::Ofti(sampler) => sampler.results(),
            AnySampler::Mcmc(sampler) => sampler.results(),
        }
    }

    fn into_results(self) -> Results {
        match self {
            AnySampler::Ofti(sampler) => sampler.into_results(),
            AnySampler::Mcmc(sampler) => sampler.into_results(),
        }
    }
}

/// A configured system together with the sampler that will fit it.
pub struct Driver<M> {
    system: System<M>,
    sampler: AnySampler<M>,
}

impl<M: OrbitModel> Driver<M> {
    pub fn new(config: &DriverConfig, observations: ObservationTable, model: M) -> Result<Self> {
        let mut system = System::new(config.system, observations, model)?;
        for (label, prior) in &config.priors {
            system.set_prior(label, *prior)?;
        }
        let sampler = match config.sampler {
            SamplerKind::Ofti => AnySampler::Ofti(OftiSampler::new(&system, config.ofti)?),
            SamplerKind::Mcmc => AnySampler::Mcmc(PtSampler::new(&system, config.mcmc)?),
        };
        Ok(Self { system, sampler })
    }

    /// Parse a JSON [`DriverConfig`] and build the driver from it.
    pub fn from_json(json: &str, observations: ObservationTable, model: M) -> anyhow::Result<Self> {
        let config: DriverConfig =
            serde_json::from_str(json).context("Could not parse driver configuration")?;
        Self::new(&config, observations, model).context("Could not set up the sampler")
    }

    pub fn system(&self) -> &System<M> {
        &self.system
    }

    pub fn sampler(&self) -> &AnySampler<M> {
        &self.sampler
    }

    pub fn into_sampler(self) -> AnySampler<M> {
        self.sampler
    }

    /// Sample in the calling thread until done.
    pub fn run(self) -> Result<Results> {
        self.sampler.run()
    }
}

impl<M: OrbitModel + 'static> Driver<M> {
    /// Sample on a background thread that can be paused or aborted.
    pub fn spawn(self, callback: Option<ProgressCallback>) -> anyhow::Result<BackgroundSampler> {
        BackgroundSampler::spawn(self.sampler, callback)
    }
}
