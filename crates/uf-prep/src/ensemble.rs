//! Ensemble test: the unfolded parameter of many fluctuated pseudo-experiments
//! compared to the stat-only unfolding of the unfluctuated pseudo-data.
//!
//! Two ensembles are supported. Data toys fluctuate the pseudo-data and
//! measure the pull and constraint of the statistical uncertainty. Migration
//! toys fluctuate the migration matrix within its MC statistics and unfold
//! the nominal pseudo-data once per toy matrix.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uf_core::{EnsembleResult, Error, Result, UnfoldedParameter};
use uf_hist::ToyPdf;

use crate::config::{AnalysisConfig, write_json};
use crate::linearity::measured_segments;
use crate::parameter::read_unfolded_parameter;

/// Pseudo-data sample unfolded by the ensemble test.
pub const PSEUDO_DATA: &str = "mcdata";

/// What the toys fluctuate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsembleTarget {
    /// The pseudo-data histogram.
    Data,
    /// The migration matrix.
    Migmat,
}

impl FromStr for EnsembleTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "data" | "mcdata" => Ok(EnsembleTarget::Data),
            "migmat" => Ok(EnsembleTarget::Migmat),
            other => Err(Error::Validation(format!("unknown ensemble target '{other}'"))),
        }
    }
}

impl EnsembleTarget {
    /// Container object that is fluctuated.
    pub fn histogram(self, analysis: &AnalysisConfig) -> String {
        match self {
            EnsembleTarget::Data => PSEUDO_DATA.to_string(),
            EnsembleTarget::Migmat => analysis.migration_matrix_name.clone(),
        }
    }

    /// Fluctuation used when none is requested.
    pub fn default_pdf(self) -> ToyPdf {
        match self {
            EnsembleTarget::Data => ToyPdf::Poisson,
            EnsembleTarget::Migmat => ToyPdf::McStat,
        }
    }

    /// Number of toys used when none is requested.
    pub fn default_ntoys(self) -> usize {
        match self {
            EnsembleTarget::Data => 1000,
            EnsembleTarget::Migmat => 200,
        }
    }
}

/// Name of toy `i` of `histogram`, as written by `make_toys`.
pub fn toy_name(histogram: &str, i: usize) -> String {
    format!("toy{histogram}_{i}")
}

/// Stat-only copy of `analysis`: no systematics, the fitter told to run
/// stat-only and without MINOS or likelihood scans.
pub fn stat_only_config(analysis: &AnalysisConfig) -> AnalysisConfig {
    let mut cfg = analysis.clone();
    cfg.onesided_syst.clear();
    cfg.twosided_syst.clear();

    let job = cfg.extra.entry("job".to_string()).or_insert_with(|| serde_json::json!({}));
    if !job.is_object() {
        tracing::warn!("'job' settings are not an object, replacing them");
        *job = serde_json::json!({});
    }
    if let Some(job) = job.as_object_mut() {
        job.insert("StatOnly".to_string(), serde_json::Value::from("TRUE"));
    }
    if let Some(fit) = cfg.extra.get_mut("fit").and_then(serde_json::Value::as_object_mut) {
        fit.remove("UseMinos");
        fit.remove("doLHscan");
    }
    cfg
}

/// Stat-only configuration unfolding with the toy migration matrix `toy`.
pub fn migration_toy_config(stat_only: &AnalysisConfig, toy: &str) -> AnalysisConfig {
    let mut cfg = stat_only.clone();
    cfg.migration_matrix_name = toy.to_string();
    cfg
}

/// Pull and constraint of the ensemble per measured segment of `segments`.
///
/// Only the upward nominal uncertainty is used: a stat-only unfolding is
/// symmetric. The spread is the population standard deviation.
pub fn ensemble_test(
    nominal: &UnfoldedParameter,
    toys: &[UnfoldedParameter],
    segments: &[Vec<f64>],
) -> Result<EnsembleResult> {
    if toys.is_empty() {
        return Err(Error::Validation("ensemble test needs at least one toy".into()));
    }
    let n_segments = segments.len();
    if nominal.n_segments() != n_segments {
        return Err(Error::Validation(format!(
            "nominal result has {} segments, binning has {n_segments}",
            nominal.n_segments()
        )));
    }
    if let Some((i, t)) = toys.iter().enumerate().find(|(_, t)| t.n_segments() != n_segments) {
        return Err(Error::Validation(format!(
            "toy {i} has {} segments, binning has {n_segments}",
            t.n_segments()
        )));
    }

    let n = toys.len() as f64;
    let mut out = EnsembleResult { n_toys: toys.len(), ..EnsembleResult::default() };
    for i in measured_segments(segments) {
        let sigma = nominal.uncert_up[i];
        if !(sigma.abs() > 0.0 && sigma.is_finite()) {
            return Err(Error::Computation(format!(
                "segment {i}: nominal uncertainty must be non-zero, got {sigma}"
            )));
        }
        let mean = toys.iter().map(|t| t.mean[i]).sum::<f64>() / n;
        let var = toys.iter().map(|t| (t.mean[i] - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        let pull = (mean - nominal.mean[i]) / sigma;
        let constraint = std / sigma.abs();
        tracing::info!(segment = i, mean, std, pull, constraint, "ensemble");

        out.segment.push(i);
        out.ensemble_mean.push(mean);
        out.ensemble_std.push(std);
        out.pull.push(pull);
        out.constraint.push(constraint);
    }
    Ok(out)
}

/// Read `<dir>/<prefix>_<i>/spin_parameter.json` for `i < n`.
///
/// Toys whose result cannot be read (failed fits) are left out with a warning.
pub fn load_ensemble(dir: &Path, prefix: &str, n: usize) -> Vec<UnfoldedParameter> {
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let path = dir.join(format!("{prefix}_{i}")).join("spin_parameter.json");
        match read_unfolded_parameter(&path) {
            Ok(p) => out.push(p),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "toy left out"),
        }
    }
    if out.len() < n {
        tracing::warn!(read = out.len(), requested = n, "incomplete ensemble");
    }
    out
}

/// Write `ensemble_test.json` into `dir`.
pub fn write_ensemble(dir: &Path, result: &EnsembleResult) -> Result<PathBuf> {
    let path = dir.join("ensemble_test.json");
    write_json(&path, result)?;
    Ok(path)
}
