use thiserror::Error;

/// Errors raised while configuring or running an orbit fit.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrbitError {
    /// A prior was evaluated outside of its support.
    #[error("value {value} lies outside the support of the {prior} prior")]
    Domain { value: f64, prior: &'static str },

    /// A fixed prior was treated as a random variable.
    #[error("prior is fixed at {value} and cannot be sampled or evaluated")]
    NotSamplable { value: f64 },

    /// The rejection sampler used up its candidate budget.
    #[error(
        "accepted {accepted} of {requested} orbits after {attempts} candidates (limit reached)"
    )]
    Convergence {
        accepted: u64,
        requested: u64,
        attempts: u64,
    },

    #[error("invalid configuration for `{field}`: {reason}")]
    Config { field: String, reason: String },
}

impl OrbitError {
    pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        OrbitError::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrbitError>;
