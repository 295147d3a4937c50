//! Candidate binnings for binning optimisation.
//!
//! Candidates live on a regular grid of `[-1, 1]` and always contain the
//! edges `-1`, `0` and `1`. Every combination is enumerated in a fixed order,
//! then filtered against the detector resolution.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uf_core::{Error, Result};

use crate::config::{AnalysisConfig, RebinConfig};

/// Number of grid steps between 0 and 1.
pub const GRID: usize = 20;

/// Fraction of the resolution a bin must be wider than.
pub const RESOLUTION_FRACTION: f64 = 0.85;

/// Candidate layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Edges mirrored around zero.
    Symmetric,
    /// One free edge below zero, the rest above (azimuthal observables).
    Phi,
}

impl std::str::FromStr for ScanMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "symmetric" => Ok(ScanMode::Symmetric),
            "phi" => Ok(ScanMode::Phi),
            other => Err(Error::Validation(format!("unknown scan mode '{other}'"))),
        }
    }
}

/// A named candidate binning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinningCandidate {
    /// `<n>bin<k>`.
    pub name: String,
    /// Bin edges.
    pub edges: Vec<f64>,
}

/// Resolution of the observable as a step function.
///
/// Stored on disk as `[[edges...], [values...]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(Vec<f64>, Vec<f64>)", into = "(Vec<f64>, Vec<f64>)")]
pub struct Resolution {
    /// Step edges.
    pub edges: Vec<f64>,
    /// Resolution on `(edges[i], edges[i + 1]]`.
    pub values: Vec<f64>,
}

impl From<(Vec<f64>, Vec<f64>)> for Resolution {
    fn from((edges, values): (Vec<f64>, Vec<f64>)) -> Self {
        Self { edges, values }
    }
}

impl From<Resolution> for (Vec<f64>, Vec<f64>) {
    fn from(r: Resolution) -> Self {
        (r.edges, r.values)
    }
}

impl Resolution {
    /// Resolution at `x`, if `x` falls in one of the steps.
    pub fn at(&self, x: f64) -> Option<f64> {
        self.edges
            .windows(2)
            .position(|w| x > w[0] && x <= w[1])
            .and_then(|i| self.values.get(i).copied())
    }

    /// Whether every bin of `edges` is wider than the resolution fraction
    /// at its centre. Bins outside the tabulated range are unconstrained.
    pub fn accepts(&self, edges: &[f64]) -> bool {
        edges.windows(2).all(|w| match self.at(0.5 * (w[0] + w[1])) {
            Some(res) => w[1] - w[0] > RESOLUTION_FRACTION * res,
            None => true,
        })
    }
}

// k-combinations of 1..n in lexicographic order
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k > n {
        return out;
    }
    let mut idx: Vec<usize> = (1..=k).collect();
    loop {
        out.push(idx.clone());
        let mut i = k;
        loop {
            if i == 0 {
                return out;
            }
            i -= 1;
            if idx[i] < n - (k - 1 - i) {
                break;
            }
        }
        idx[i] += 1;
        for j in i + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

fn grid_value(i: usize) -> f64 {
    i as f64 / GRID as f64
}

/// Every binning with `n_bins` bins of the given layout.
pub fn enumerate_binnings(n_bins: usize, mode: ScanMode) -> Result<Vec<Vec<f64>>> {
    let positions = GRID - 1;
    match mode {
        ScanMode::Symmetric => {
            if n_bins < 2 || n_bins % 2 != 0 {
                return Err(Error::Validation(format!(
                    "symmetric binnings need an even number of bins, got {n_bins}"
                )));
            }
            let k = n_bins / 2 - 1;
            Ok(combinations(positions, k)
                .into_iter()
                .map(|inner| {
                    let mut edges = vec![-1.0];
                    edges.extend(inner.iter().rev().map(|&i| -grid_value(i)));
                    edges.push(0.0);
                    edges.extend(inner.iter().map(|&i| grid_value(i)));
                    edges.push(1.0);
                    edges
                })
                .collect())
        }
        ScanMode::Phi => {
            if n_bins < 3 {
                return Err(Error::Validation(format!(
                    "phi binnings need at least 3 bins, got {n_bins}"
                )));
            }
            let upper = combinations(positions, n_bins - 3);
            let mut out = Vec::with_capacity(upper.len() * positions);
            for neg in (1..=positions).rev() {
                for inner in &upper {
                    let mut edges = vec![-1.0, -grid_value(neg), 0.0];
                    edges.extend(inner.iter().map(|&i| grid_value(i)));
                    edges.push(1.0);
                    out.push(edges);
                }
            }
            Ok(out)
        }
    }
}

/// Enumerate, filter and name the candidates for every requested bin count.
pub fn scan_candidates(
    n_bins: &[usize],
    mode: ScanMode,
    resolution: Option<&Resolution>,
) -> Result<Vec<BinningCandidate>> {
    let mut out = Vec::new();
    for &n in n_bins {
        let all = enumerate_binnings(n, mode)?;
        let total = all.len();
        let kept: Vec<Vec<f64>> =
            all.into_iter().filter(|b| resolution.is_none_or(|r| r.accepts(b))).collect();
        tracing::info!(n_bins = n, total, kept = kept.len(), "binning candidates");
        out.extend(
            kept.into_iter()
                .enumerate()
                .map(|(k, edges)| BinningCandidate { name: format!("{n}bin{k}"), edges }),
        );
    }
    Ok(out)
}

/// Configurations of one candidate: the same binning in every differential
/// segment, pseudo-data plus matching reweighted truths as 1-D inputs, and no
/// systematics.
pub fn candidate_configs(
    analysis: &AnalysisConfig,
    rebin: &RebinConfig,
    candidate: &BinningCandidate,
    samples: &[String],
    rebin_path: PathBuf,
) -> (AnalysisConfig, RebinConfig) {
    let mut rebin = rebin.clone();
    let n_segments = rebin.binning.len().max(1);
    rebin.binning = vec![candidate.edges.clone(); n_segments];
    rebin.histo_1d = samples
        .iter()
        .cloned()
        .chain(
            samples
                .iter()
                .filter(|s| s.contains("mcdata_rw"))
                .map(|s| s.replace("mcdata", "truth")),
        )
        .collect();

    let mut analysis = analysis.clone();
    analysis.rebin = rebin_path;
    analysis.onesided_syst.clear();
    analysis.twosided_syst.clear();
    (analysis, rebin)
}

/// Min-max normalisation to `[0, 1]`; constant input maps to zeros.
pub fn normalise_feature(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !(range > 0.0) {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / range).collect()
}

/// Candidate with the smallest finite figure of merit (first one on ties).
pub fn best_candidate(merits: &[(String, f64)]) -> Option<(&str, f64)> {
    merits
        .iter()
        .filter(|(_, m)| m.is_finite())
        .fold(None, |best: Option<(&str, f64)>, (name, m)| match best {
            Some((_, b)) if b <= *m => best,
            _ => Some((name.as_str(), *m)),
        })
}
