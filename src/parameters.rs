use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{OrbitError, Result};
use crate::prior::Prior;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub label: String,
    pub prior: Prior,
}

/// Ordered set of named parameters.
///
/// The position of a parameter is its column in every sample vector, so the
/// ordering is fixed once a parameter has been pushed. Priors can be swapped
/// in place with [`ParameterSet::set_prior`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

fn check_prior(label: &str, prior: &Prior) -> Result<()> {
    prior.validate().map_err(|err| match err {
        OrbitError::Config { reason, .. } => {
            OrbitError::config(label, format!("{} prior: {reason}", prior.name()))
        }
        other => other,
    })
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: impl Into<String>, prior: Prior) -> Result<usize> {
        let label = label.into();
        if label.is_empty() {
            return Err(OrbitError::config("label", "parameter labels must not be empty"));
        }
        if self.index_of(&label).is_some() {
            return Err(OrbitError::config(label, "duplicate parameter label"));
        }
        check_prior(&label, &prior)?;
        self.params.push(Parameter { label, prior });
        Ok(self.params.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn labels(&self) -> Vec<String> {
        self.params.iter().map(|p| p.label.clone()).collect()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.params.iter().position(|p| p.label == label)
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(|p| p.label.as_str())
    }

    pub fn prior(&self, index: usize) -> Option<&Prior> {
        self.params.get(index).map(|p| &p.prior)
    }

    pub fn prior_by_label(&self, label: &str) -> Option<&Prior> {
        self.index_of(label).and_then(|idx| self.prior(idx))
    }

    /// Replace the prior at `index`, returning the previous one.
    pub fn set_prior(&mut self, index: usize, prior: Prior) -> Result<Prior> {
        let len = self.params.len();
        let param = self.params.get_mut(index).ok_or_else(|| {
            OrbitError::config("index", format!("index {index} out of range for {len} parameters"))
        })?;
        check_prior(&param.label, &prior)?;
        Ok(std::mem::replace(&mut param.prior, prior))
    }

    pub fn set_prior_by_label(&mut self, label: &str, prior: Prior) -> Result<Prior> {
        let index = self
            .index_of(label)
            .ok_or_else(|| OrbitError::config(label, "unknown parameter label"))?;
        self.set_prior(index, prior)
    }

    /// Indices of the parameters that are not fixed.
    pub fn free_indices(&self) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.prior.is_fixed())
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn num_free(&self) -> usize {
        self.params.iter().filter(|p| !p.prior.is_fixed()).count()
    }

    /// Draw a full parameter vector, fixed entries take their constant.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        self.params
            .iter()
            .map(|p| match p.prior {
                Prior::Fixed { value } => value,
                // only fixed priors fail to sample
                ref prior => prior.sample(rng).unwrap_or(f64::NAN),
            })
            .collect()
    }

    /// Sum of the log prior densities of the free entries of `full`.
    pub fn log_prior(&self, full: &[f64]) -> Result<f64> {
        self.check_len("full", full.len(), self.params.len())?;
        self.params
            .iter()
            .zip(full)
            .filter(|(p, _)| !p.prior.is_fixed())
            .try_fold(0f64, |acc, (p, &x)| Ok(acc + p.prior.log_density(x)?))
    }

    fn check_len(&self, field: &str, len: usize, expected: usize) -> Result<()> {
        if len != expected {
            return Err(OrbitError::config(
                field,
                format!("expected {expected} values, got {len}"),
            ));
        }
        Ok(())
    }

    /// Insert free values into a full vector, filling in fixed constants.
    pub fn expand(&self, free: &[f64]) -> Result<Vec<f64>> {
        self.check_len("free", free.len(), self.num_free())?;
        Ok(self.fill_fixed(free))
    }

    /// [`ParameterSet::expand`] for vectors known to have one value per free
    /// parameter.
    pub(crate) fn fill_fixed(&self, free: &[f64]) -> Vec<f64> {
        assert!(free.len() == self.num_free());
        let mut free = free.iter();
        self.params
            .iter()
            .map(|p| match p.prior {
                Prior::Fixed { value } => value,
                _ => free.next().copied().unwrap_or(f64::NAN),
            })
            .collect()
    }

    /// The free entries of a full vector.
    pub fn compress(&self, full: &[f64]) -> Vec<f64> {
        self.params
            .iter()
            .zip(full)
            .filter(|(p, _)| !p.prior.is_fixed())
            .map(|(_, &x)| x)
            .collect()
    }
}
