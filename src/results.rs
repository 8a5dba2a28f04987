//! Posterior samples produced by a sampler run.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use arrow::array::{ArrayRef, Float64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{OrbitError, Result};

/// One accepted parameter vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub params: Vec<f64>,
    /// Log likelihood (OFTI) or log posterior (MCMC) of the sample.
    pub lnprob: f64,
}

/// Summary statistics of one posterior column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnSummary {
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    /// 16th percentile
    pub lower: f64,
    /// 84th percentile
    pub upper: f64,
}

/// Append-only store of posterior samples.
///
/// Column `j` of every sample belongs to `labels[j]`, the parameter order of
/// the system the sampler was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Results {
    sampler_name: String,
    labels: Vec<String>,
    samples: Vec<Sample>,
}

impl Results {
    pub fn new(sampler_name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            sampler_name: sampler_name.into(),
            labels,
            samples: Vec::new(),
        }
    }

    pub fn sampler_name(&self) -> &str {
        &self.sampler_name
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn add_sample(&mut self, params: Vec<f64>, lnprob: f64) -> Result<()> {
        if params.len() != self.labels.len() {
            return Err(OrbitError::config(
                "params",
                format!(
                    "sample has {} values but there are {} labels",
                    params.len(),
                    self.labels.len()
                ),
            ));
        }
        self.samples.push(Sample { params, lnprob });
        Ok(())
    }

    /// Append rows of `post` with the matching entries of `lnprob`.
    pub fn add_samples(&mut self, post: ArrayView2<f64>, lnprob: &[f64]) -> Result<()> {
        if post.nrows() != lnprob.len() {
            return Err(OrbitError::config(
                "lnprob",
                format!("{} rows but {} log probabilities", post.nrows(), lnprob.len()),
            ));
        }
        if post.ncols() != self.labels.len() {
            return Err(OrbitError::config(
                "post",
                format!(
                    "{} columns but there are {} labels",
                    post.ncols(),
                    self.labels.len()
                ),
            ));
        }
        self.samples.extend(
            post.rows()
                .into_iter()
                .zip(lnprob)
                .map(|(row, &lnprob)| Sample {
                    params: row.to_vec(),
                    lnprob,
                }),
        );
        Ok(())
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.samples.truncate(len);
    }

    /// Posterior matrix, one row per sample.
    pub fn post(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.samples.len(), self.labels.len()), |(i, j)| {
            self.samples[i].params[j]
        })
    }

    pub fn lnlike(&self) -> Array1<f64> {
        self.samples.iter().map(|s| s.lnprob).collect()
    }

    pub fn column(&self, label: &str) -> Option<Array1<f64>> {
        let idx = self.labels.iter().position(|l| l == label)?;
        Some(self.samples.iter().map(|s| s.params[idx]).collect())
    }

    pub fn summary(&self, label: &str) -> Option<ColumnSummary> {
        let column = self.column(label)?;
        if column.is_empty() {
            return None;
        }
        let n = column.len() as f64;
        let mean = column.sum() / n;
        let std = (column.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
        let sorted = column.iter().copied().sorted_by(f64::total_cmp).collect_vec();
        let quantile = |q: f64| {
            let pos = q * (sorted.len() - 1) as f64;
            let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        };
        Some(ColumnSummary {
            mean,
            std,
            median: quantile(0.5),
            lower: quantile(0.16),
            upper: quantile(0.84),
        })
    }

    /// Columnar copy of the samples, one `Float64` column per label plus `lnprob`.
    pub fn to_record_batch(&self) -> anyhow::Result<RecordBatch> {
        let mut fields = self
            .labels
            .iter()
            .map(|label| Field::new(label, DataType::Float64, false))
            .collect_vec();
        fields.push(Field::new("lnprob", DataType::Float64, false));

        let mut columns: Vec<ArrayRef> = (0..self.labels.len())
            .map(|j| {
                let values = self.samples.iter().map(|s| s.params[j]);
                Arc::new(Float64Array::from_iter_values(values)) as ArrayRef
            })
            .collect();
        columns.push(Arc::new(Float64Array::from_iter_values(
            self.samples.iter().map(|s| s.lnprob),
        )));

        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .context("Could not assemble record batch from samples")
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Could not create results file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).context("Could not serialize results")?;
        writer.flush()?;
        Ok(())
    }

    /// Load samples from `path`, either replacing the contents of `self` or
    /// appending to it. Appending requires the same labels.
    pub fn load_json<P: AsRef<Path>>(&mut self, path: P, append: bool) -> anyhow::Result<()> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Could not open results file {}", path.display()))?;
        let loaded: Results = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Could not parse results file {}", path.display()))?;
        if loaded.samples.iter().any(|s| s.params.len() != loaded.labels.len()) {
            bail!("Results file {} has rows that do not match its labels", path.display());
        }

        if !append {
            *self = loaded;
            return Ok(());
        }
        if !self.labels.is_empty() && self.labels != loaded.labels {
            bail!(
                "Cannot append results with labels {:?} to results with labels {:?}",
                loaded.labels,
                self.labels
            );
        }
        if self.labels.is_empty() {
            self.labels = loaded.labels;
            self.sampler_name = loaded.sampler_name;
        }
        self.samples.extend(loaded.samples);
        Ok(())
    }
}
