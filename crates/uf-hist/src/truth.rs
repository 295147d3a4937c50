//! Truth-level parameters: binned means per differential segment and the
//! unbinned mean from the source histogram's native statistics.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use uf_core::{Error, Result};

use crate::binning::validate_binning;
use crate::histogram::Hist1D;

/// Weighted mean of bin centres, `sum(c_i x_i) / sum(c_i)`.
pub fn binned_mean(contents: &[f64], edges: &[f64]) -> Result<f64> {
    if edges.len() != contents.len() + 1 {
        return Err(Error::Validation(format!(
            "{} contents need {} edges, got {}",
            contents.len(),
            contents.len() + 1,
            edges.len()
        )));
    }
    let total: f64 = contents.iter().sum();
    if total == 0.0 {
        return Err(Error::Computation("binned mean of an empty distribution".into()));
    }
    let weighted: f64 = contents
        .iter()
        .zip(edges.windows(2))
        .map(|(c, w)| c * 0.5 * (w[0] + w[1]))
        .sum();
    Ok(weighted / total)
}

/// Truth parameters of one variant, one entry per differential segment.
#[derive(Debug, Clone, PartialEq)]
pub struct TruthParameters {
    /// `factor * binned mean` per segment.
    pub binned: Vec<f64>,
    /// `(factor * mean, |factor * mean error|)` of the source histogram, per segment.
    pub unbinned: Vec<[f64; 2]>,
}

/// Compute truth parameters of `rebinned` (laid out segment after segment)
/// and the native statistics of `source`.
pub fn extract_truth_parameters(
    rebinned: &Hist1D,
    source: &Hist1D,
    segments: &[Vec<f64>],
    factor: f64,
) -> Result<TruthParameters> {
    for seg in segments {
        validate_binning(seg)?;
    }
    let expected: usize = segments.iter().map(|s| s.len().saturating_sub(1)).sum();
    if expected != rebinned.n_bins() {
        return Err(Error::Validation(format!(
            "'{}' has {} bins but the segment binnings describe {}",
            rebinned.name,
            rebinned.n_bins(),
            expected
        )));
    }

    let unbinned = [factor * source.mean(), (factor * source.mean_error()).abs()];
    let mut out = TruthParameters { binned: Vec::new(), unbinned: Vec::new() };
    let mut passed = 0usize;
    for seg in segments {
        let nbin = seg.len() - 1;
        let mean = binned_mean(&rebinned.content[passed..passed + nbin], seg)?;
        out.binned.push(factor * mean);
        out.unbinned.push(unbinned);
        passed += nbin;
    }
    Ok(out)
}

/// Binned and unbinned truth records of all variants of one observable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TruthRecords {
    /// Binned means keyed by variant name.
    pub binned: BTreeMap<String, Vec<f64>>,
    /// Unbinned `(mean, error)` keyed by variant name.
    pub unbinned: BTreeMap<String, Vec<[f64; 2]>>,
}

impl TruthRecords {
    /// Record the parameters of `name`.
    pub fn insert(&mut self, name: &str, params: TruthParameters) {
        self.binned.insert(name.to_string(), params.binned);
        self.unbinned.insert(name.to_string(), params.unbinned);
    }

    /// Write `truth_<stem>_binned.json` and `truth_<stem>_unbinned.json` into `dir`.
    pub fn write(&self, dir: &Path, stem: &str) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let binned = dir.join(format!("truth_{stem}_binned.json"));
        let unbinned = dir.join(format!("truth_{stem}_unbinned.json"));
        std::fs::write(&binned, serde_json::to_string_pretty(&self.binned)?)?;
        std::fs::write(&unbinned, serde_json::to_string_pretty(&self.unbinned)?)?;
        Ok((binned, unbinned))
    }

    /// Read the binned record written by [`TruthRecords::write`].
    pub fn read_binned(path: &Path) -> Result<BTreeMap<String, Vec<f64>>> {
        Ok(serde_json::from_slice(&std::fs::read(path)?)?)
    }
}
