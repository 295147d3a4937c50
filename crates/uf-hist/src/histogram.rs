//! 1-D histograms, 2-D migration matrices and the tagged object variant
//! stored in histogram containers.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use uf_core::{Error, Result};

use crate::axis::Axis;

/// Fill-time moments of a 1-D histogram (ROOT `fTsumw`, `fTsumw2`, `fTsumwx`, `fTsumwx2`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FillStats {
    /// Sum of weights.
    pub sumw: f64,
    /// Sum of squared weights.
    pub sumw2: f64,
    /// Sum of weight times value.
    pub sumwx: f64,
    /// Sum of weight times value squared.
    pub sumwx2: f64,
}

impl FillStats {
    /// Weighted mean of the filled values.
    pub fn mean(&self) -> f64 {
        if self.sumw == 0.0 { 0.0 } else { self.sumwx / self.sumw }
    }

    /// Standard deviation of the filled values.
    pub fn std_dev(&self) -> f64 {
        if self.sumw == 0.0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sumwx2 / self.sumw - mean * mean).max(0.0).sqrt()
    }

    /// Effective number of entries, `sumw^2 / sumw2`.
    pub fn effective_entries(&self) -> f64 {
        if self.sumw2 == 0.0 { 0.0 } else { self.sumw * self.sumw / self.sumw2 }
    }

    /// Statistical uncertainty on the mean, `std_dev / sqrt(neff)`.
    pub fn mean_error(&self) -> f64 {
        let neff = self.effective_entries();
        if neff <= 0.0 { 0.0 } else { self.std_dev() / neff.sqrt() }
    }
}

/// A 1-D histogram with per-bin content and error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist1D {
    /// Histogram name (the container key).
    #[serde(default)]
    pub name: String,
    /// Binning.
    pub axis: Axis,
    /// Bin contents (length = n_bins, no under/overflow).
    pub content: Vec<f64>,
    /// Bin errors (length = n_bins).
    pub error: Vec<f64>,
    /// Native fill statistics, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<FillStats>,
}

impl Hist1D {
    /// Empty histogram on `axis`.
    pub fn new(name: impl Into<String>, axis: Axis) -> Self {
        let n = axis.n_bins();
        Self { name: name.into(), axis, content: vec![0.0; n], error: vec![0.0; n], stats: None }
    }

    /// Histogram from explicit contents and errors.
    pub fn from_parts(
        name: impl Into<String>,
        axis: Axis,
        content: Vec<f64>,
        error: Vec<f64>,
    ) -> Result<Self> {
        let h = Self { name: name.into(), axis, content, error, stats: None };
        h.validate()?;
        Ok(h)
    }

    /// Histogram whose errors are `sqrt(|content|)` (unweighted counts).
    pub fn from_counts(name: impl Into<String>, axis: Axis, content: Vec<f64>) -> Result<Self> {
        let error = content.iter().map(|c| c.abs().sqrt()).collect();
        Self::from_parts(name, axis, content, error)
    }

    /// Check array lengths and error signs.
    pub fn validate(&self) -> Result<()> {
        let n = self.axis.n_bins();
        if self.content.len() != n || self.error.len() != n {
            return Err(Error::Validation(format!(
                "histogram '{}': axis has {} bins but content/error have {}/{}",
                self.name,
                n,
                self.content.len(),
                self.error.len()
            )));
        }
        if let Some(i) = self.error.iter().position(|e| !(*e >= 0.0)) {
            return Err(Error::Validation(format!(
                "histogram '{}': bin {i} has negative or NaN error {}",
                self.name, self.error[i]
            )));
        }
        Ok(())
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.axis.n_bins()
    }

    /// Attach native fill statistics.
    pub fn with_stats(mut self, stats: FillStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Sum of all bin contents.
    pub fn integral(&self) -> f64 {
        self.content.iter().sum()
    }

    /// Sum of contents and quadrature sum of errors over the half-open bin range.
    pub fn integral_and_error(&self, bins: Range<usize>) -> Result<(f64, f64)> {
        if bins.start > bins.end || bins.end > self.n_bins() {
            return Err(Error::Validation(format!(
                "histogram '{}': bin range {}..{} outside 0..{}",
                self.name,
                bins.start,
                bins.end,
                self.n_bins()
            )));
        }
        let sum = self.content[bins.clone()].iter().sum();
        let err2: f64 = self.error[bins].iter().map(|e| e * e).sum();
        Ok((sum, err2.sqrt()))
    }

    /// Native statistics, or the ROOT fallback computed from bin centres.
    pub fn stats(&self) -> FillStats {
        if let Some(s) = self.stats {
            return s;
        }
        let mut s = FillStats::default();
        for (i, (&c, &e)) in self.content.iter().zip(&self.error).enumerate() {
            let x = self.axis.center(i);
            s.sumw += c;
            s.sumw2 += e * e;
            s.sumwx += c * x;
            s.sumwx2 += c * x * x;
        }
        s
    }

    /// Mean of the distribution (see [`FillStats::mean`]).
    pub fn mean(&self) -> f64 {
        self.stats().mean()
    }

    /// Uncertainty on the mean (see [`FillStats::mean_error`]).
    pub fn mean_error(&self) -> f64 {
        self.stats().mean_error()
    }
}

/// A 2-D histogram indexed by (reco bin, truth bin).
///
/// Storage is row-major by reco bin: cell `(r, t)` lives at `r * n_truth + t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist2D {
    /// Histogram name (the container key).
    #[serde(default)]
    pub name: String,
    /// Reconstructed-level axis (x).
    pub reco_axis: Axis,
    /// Truth-level axis (y).
    pub truth_axis: Axis,
    /// Cell contents, row-major by reco bin.
    pub content: Vec<f64>,
    /// Cell errors, same layout as `content`.
    pub error: Vec<f64>,
}

impl Hist2D {
    /// Empty matrix on the two axes.
    pub fn new(name: impl Into<String>, reco_axis: Axis, truth_axis: Axis) -> Self {
        let n = reco_axis.n_bins() * truth_axis.n_bins();
        Self { name: name.into(), reco_axis, truth_axis, content: vec![0.0; n], error: vec![0.0; n] }
    }

    /// Check array lengths and error signs.
    pub fn validate(&self) -> Result<()> {
        let n = self.n_reco() * self.n_truth();
        if self.content.len() != n || self.error.len() != n {
            return Err(Error::Validation(format!(
                "matrix '{}': {}x{} cells but content/error have {}/{}",
                self.name,
                self.n_reco(),
                self.n_truth(),
                self.content.len(),
                self.error.len()
            )));
        }
        if self.error.iter().any(|e| !(*e >= 0.0)) {
            return Err(Error::Validation(format!(
                "matrix '{}' has negative or NaN errors",
                self.name
            )));
        }
        Ok(())
    }

    /// Number of reco bins.
    pub fn n_reco(&self) -> usize {
        self.reco_axis.n_bins()
    }

    /// Number of truth bins.
    pub fn n_truth(&self) -> usize {
        self.truth_axis.n_bins()
    }

    #[inline]
    fn idx(&self, r: usize, t: usize) -> usize {
        r * self.n_truth() + t
    }

    /// Content of cell `(r, t)`.
    pub fn content_at(&self, r: usize, t: usize) -> f64 {
        self.content[self.idx(r, t)]
    }

    /// Error of cell `(r, t)`.
    pub fn error_at(&self, r: usize, t: usize) -> f64 {
        self.error[self.idx(r, t)]
    }

    /// Set content and error of cell `(r, t)`.
    pub fn set(&mut self, r: usize, t: usize, content: f64, error: f64) {
        let i = self.idx(r, t);
        self.content[i] = content;
        self.error[i] = error;
    }

    /// Sum of all cells.
    pub fn integral(&self) -> f64 {
        self.content.iter().sum()
    }

    /// Sum and quadrature error over a rectangle of half-open bin ranges.
    pub fn integral_and_error(&self, reco: Range<usize>, truth: Range<usize>) -> Result<(f64, f64)> {
        if reco.start > reco.end || reco.end > self.n_reco() {
            return Err(Error::Validation(format!(
                "matrix '{}': reco range {}..{} outside 0..{}",
                self.name,
                reco.start,
                reco.end,
                self.n_reco()
            )));
        }
        if truth.start > truth.end || truth.end > self.n_truth() {
            return Err(Error::Validation(format!(
                "matrix '{}': truth range {}..{} outside 0..{}",
                self.name,
                truth.start,
                truth.end,
                self.n_truth()
            )));
        }
        let mut sum = 0.0;
        let mut err2 = 0.0;
        for r in reco {
            for t in truth.clone() {
                let i = self.idx(r, t);
                sum += self.content[i];
                err2 += self.error[i] * self.error[i];
            }
        }
        Ok((sum, err2.sqrt()))
    }

    /// Multiply every cell (and its error) by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for c in &mut self.content {
            *c *= factor;
        }
        for e in &mut self.error {
            *e *= factor.abs();
        }
    }
}

/// Object stored in a histogram container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum HistObject {
    /// 1-D distribution.
    #[serde(rename = "TH1")]
    OneD(Hist1D),
    /// 2-D migration or response matrix.
    #[serde(rename = "TH2")]
    TwoD(Hist2D),
}

impl HistObject {
    /// Object name.
    pub fn name(&self) -> &str {
        match self {
            HistObject::OneD(h) => &h.name,
            HistObject::TwoD(h) => &h.name,
        }
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        match self {
            HistObject::OneD(h) => h.name = name.to_string(),
            HistObject::TwoD(h) => h.name = name.to_string(),
        }
    }

    /// Short kind label (`TH1` / `TH2`).
    pub fn kind(&self) -> &'static str {
        match self {
            HistObject::OneD(_) => "TH1",
            HistObject::TwoD(_) => "TH2",
        }
    }

    /// Borrow as 1-D, if it is one.
    pub fn as_1d(&self) -> Option<&Hist1D> {
        match self {
            HistObject::OneD(h) => Some(h),
            HistObject::TwoD(_) => None,
        }
    }

    /// Borrow as 2-D, if it is one.
    pub fn as_2d(&self) -> Option<&Hist2D> {
        match self {
            HistObject::TwoD(h) => Some(h),
            HistObject::OneD(_) => None,
        }
    }

    /// Validate the wrapped histogram.
    pub fn validate(&self) -> Result<()> {
        match self {
            HistObject::OneD(h) => h.validate(),
            HistObject::TwoD(h) => h.validate(),
        }
    }
}

impl From<Hist1D> for HistObject {
    fn from(h: Hist1D) -> Self {
        HistObject::OneD(h)
    }
}

impl From<Hist2D> for HistObject {
    fn from(h: Hist2D) -> Self {
        HistObject::TwoD(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn h1(content: &[f64], error: &[f64]) -> Hist1D {
        let axis = Axis::uniform(content.len(), 0.0, content.len() as f64).unwrap();
        Hist1D::from_parts("h", axis, content.to_vec(), error.to_vec()).unwrap()
    }

    #[test]
    fn test_integral_and_error_quadrature() {
        let h = h1(&[1.0, 2.0, 3.0, 4.0], &[3.0, 4.0, 0.0, 12.0]);
        let (s, e) = h.integral_and_error(0..2).unwrap();
        assert_relative_eq!(s, 3.0);
        assert_relative_eq!(e, 5.0);
        let (s, e) = h.integral_and_error(0..4).unwrap();
        assert_relative_eq!(s, 10.0);
        assert_relative_eq!(e, 13.0);
        assert!(h.integral_and_error(2..5).is_err());
    }

    #[test]
    fn test_from_parts_rejects_mismatch() {
        let axis = Axis::uniform(3, 0.0, 3.0).unwrap();
        assert!(Hist1D::from_parts("h", axis.clone(), vec![1.0; 2], vec![1.0; 3]).is_err());
        assert!(Hist1D::from_parts("h", axis, vec![1.0; 3], vec![1.0, -1.0, 1.0]).is_err());
    }

    #[test]
    fn test_mean_from_bins_matches_root_fallback() {
        // centres 0.5, 1.5; contents 1, 3 -> mean 1.25
        let h = h1(&[1.0, 3.0], &[1.0, 3.0_f64.sqrt()]);
        assert_relative_eq!(h.mean(), 1.25);
        // rms^2 = (0.25 + 3*2.25)/4 - 1.5625 = 0.1875 ; neff = 16/4 = 4
        assert_relative_eq!(h.mean_error(), 0.1875_f64.sqrt() / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_native_stats_take_precedence() {
        let stats = FillStats { sumw: 10.0, sumw2: 10.0, sumwx: 3.0, sumwx2: 5.0 };
        let h = h1(&[5.0, 5.0], &[1.0, 1.0]).with_stats(stats);
        assert_relative_eq!(h.mean(), 0.3);
        assert_relative_eq!(h.mean_error(), (0.5_f64 - 0.09).sqrt() / 10.0_f64.sqrt());
    }

    #[test]
    fn test_hist2d_layout_and_scale() {
        let reco = Axis::uniform(2, 0.0, 2.0).unwrap();
        let truth = Axis::uniform(3, 0.0, 3.0).unwrap();
        let mut m = Hist2D::new("m", reco, truth);
        m.set(1, 2, 4.0, 2.0);
        assert_eq!(m.content[5], 4.0);
        assert_eq!(m.content_at(1, 2), 4.0);
        m.scale(-0.5);
        assert_eq!(m.content_at(1, 2), -2.0);
        assert_eq!(m.error_at(1, 2), 1.0);
        let (s, e) = m.integral_and_error(0..2, 1..3).unwrap();
        assert_relative_eq!(s, -2.0);
        assert_relative_eq!(e, 1.0);
        assert!(m.integral_and_error(0..3, 0..1).is_err());
    }

    #[test]
    fn test_object_tagging() {
        let obj: HistObject = h1(&[1.0], &[1.0]).into();
        assert_eq!(obj.kind(), "TH1");
        assert!(obj.as_2d().is_none());
        let v = serde_json::to_value(&obj).unwrap();
        assert_eq!(v["kind"], "TH1");
    }
}
