//! Unfolded parameter from fitter outputs.
//!
//! The fitter reports unfolded truth bins with asymmetric uncertainties and
//! their correlation matrix. Uncertainties are propagated to the binned mean
//! of each differential segment by sampling the multivariate normal defined by
//! those bins.

use std::path::{Path, PathBuf};

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::Deserialize;
use uf_core::{Error, Result, UnfoldedParameter};
use uf_hist::binning::validate_binning;

use crate::config::{read_config, write_json};

/// One unfolded truth bin as reported by the fitter.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct UnfoldedBin {
    /// Central value.
    pub mean: f64,
    /// Upward uncertainty.
    #[serde(rename = "uncertaintyUp")]
    pub uncertainty_up: f64,
    /// Downward uncertainty.
    #[serde(rename = "uncertaintyDown")]
    pub uncertainty_down: f64,
}

/// Unfolded bins and their correlations, read from a fit output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutput {
    /// Unfolded truth bins, segment after segment.
    pub bins: Vec<UnfoldedBin>,
    /// Correlation matrix restricted to the truth bins.
    pub correlation: Vec<Vec<f64>>,
}

#[derive(Deserialize)]
struct CorrelationEntry {
    #[serde(default)]
    correlation_rows: Option<Vec<Vec<f64>>>,
}

impl FitOutput {
    /// Read `UnfoldingData.yaml` and `CorrelationMatrix.yaml` from `dir`.
    pub fn read(dir: &Path) -> Result<Self> {
        let bins: Vec<UnfoldedBin> = read_config(&dir.join("UnfoldingData.yaml"))?;
        let entries: Vec<CorrelationEntry> = read_config(&dir.join("CorrelationMatrix.yaml"))?;
        let rows = entries.into_iter().find_map(|e| e.correlation_rows).ok_or_else(|| {
            Error::Validation(format!(
                "{}: no correlation_rows entry",
                dir.join("CorrelationMatrix.yaml").display()
            ))
        })?;
        Self::new(bins, rows)
    }

    /// Keep the leading `bins.len()` block of `correlation`; nuisance
    /// parameters follow the truth bins in the fitter's ordering.
    pub fn new(bins: Vec<UnfoldedBin>, correlation: Vec<Vec<f64>>) -> Result<Self> {
        let n = bins.len();
        if correlation.len() < n || correlation.iter().take(n).any(|r| r.len() < n) {
            return Err(Error::Validation(format!(
                "correlation matrix is smaller than the {n} unfolded bins"
            )));
        }
        let correlation = correlation.into_iter().take(n).map(|r| r[..n].to_vec()).collect();
        Ok(Self { bins, correlation })
    }
}

fn covariance(corr: &[Vec<f64>], offset: usize, sigma: &[f64]) -> DMatrix<f64> {
    let n = sigma.len();
    DMatrix::from_fn(n, n, |i, j| corr[offset + i][offset + j] * sigma[i] * sigma[j])
}

/// Binned means of `n_samples` draws from `N(mean, cov)`.
fn sample_binned_means(
    mean: &DVector<f64>,
    cov: DMatrix<f64>,
    centres: &[f64],
    n_samples: usize,
    rng: &mut StdRng,
) -> Result<Vec<f64>> {
    let chol = cov
        .cholesky()
        .ok_or_else(|| Error::Computation("covariance is not positive definite".into()))?;
    let l = chol.l();
    let n = mean.len();
    let mut out = Vec::with_capacity(n_samples);
    for _ in 0..n_samples {
        let z = DVector::from_fn(n, |_, _| rng.sample::<f64, _>(StandardNormal));
        let draw = mean + &l * z;
        let total: f64 = draw.iter().sum();
        let weighted: f64 = draw.iter().zip(centres).map(|(d, x)| d * x).sum();
        out.push(weighted / total);
    }
    Ok(out)
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Propagate the unfolded bins to the parameter of every segment.
///
/// The reported value is `factor` times the mean of the sampled binned means
/// (from the upward covariance), the uncertainties are `|factor|` times the
/// spread of the samples drawn with the upward and downward covariance.
pub fn extract_unfolded_parameter(
    fit: &FitOutput,
    segments: &[Vec<f64>],
    factor: f64,
    n_samples: usize,
    seed: u64,
) -> Result<UnfoldedParameter> {
    if n_samples < 2 {
        return Err(Error::Validation(format!("need at least 2 samples, got {n_samples}")));
    }
    for seg in segments {
        validate_binning(seg)?;
    }
    let needed: usize = segments.iter().map(|s| s.len().saturating_sub(1)).sum();
    if needed > fit.bins.len() {
        return Err(Error::Validation(format!(
            "binning describes {needed} bins but the fit reports {}",
            fit.bins.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = UnfoldedParameter::default();
    let mut offset = 0usize;
    for (iseg, seg) in segments.iter().enumerate() {
        let nbin = seg.len() - 1;
        let bins = &fit.bins[offset..offset + nbin];
        let centres: Vec<f64> = seg.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
        let mean = DVector::from_iterator(nbin, bins.iter().map(|b| b.mean));
        let up: Vec<f64> = bins.iter().map(|b| b.uncertainty_up.abs()).collect();
        let down: Vec<f64> = bins.iter().map(|b| b.uncertainty_down.abs()).collect();

        let draws_up = sample_binned_means(
            &mean,
            covariance(&fit.correlation, offset, &up),
            &centres,
            n_samples,
            &mut rng,
        )?;
        let draws_down = sample_binned_means(
            &mean,
            covariance(&fit.correlation, offset, &down),
            &centres,
            n_samples,
            &mut rng,
        )?;
        let (m_up, s_up) = mean_and_std(&draws_up);
        let (_, s_down) = mean_and_std(&draws_down);
        out.push(factor * m_up, factor.abs() * s_up, factor.abs() * s_down);
        tracing::info!(
            segment = iseg,
            value = factor * m_up,
            up = factor.abs() * s_up,
            down = factor.abs() * s_down,
            "unfolded parameter"
        );
        offset += nbin;
    }
    Ok(out)
}

/// Write `spin_parameter.json` into `dir`.
pub fn write_unfolded_parameter(dir: &Path, param: &UnfoldedParameter) -> Result<PathBuf> {
    let path = dir.join("spin_parameter.json");
    write_json(&path, param)?;
    Ok(path)
}

/// Read a `spin_parameter.json` file.
pub fn read_unfolded_parameter(path: &Path) -> Result<UnfoldedParameter> {
    read_config(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn bin(mean: f64, up: f64, down: f64) -> UnfoldedBin {
        UnfoldedBin { mean, uncertainty_up: up, uncertainty_down: down }
    }

    fn identity(n: usize) -> Vec<Vec<f64>> {
        (0..n).map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect()).collect()
    }

    #[test]
    fn test_correlation_block_is_truncated() {
        let mut corr = identity(4);
        corr[0][3] = 0.5;
        corr[3][0] = 0.5;
        let fit = FitOutput::new(vec![bin(1.0, 0.1, 0.1); 2], corr).unwrap();
        assert_eq!(fit.correlation, identity(2));
        assert!(FitOutput::new(vec![bin(1.0, 0.1, 0.1); 3], identity(2)).is_err());
    }

    #[test]
    fn test_empty_segment_is_rejected() {
        let fit = FitOutput::new(vec![bin(300.0, 10.0, 12.0), bin(500.0, 10.0, 12.0)], identity(2))
            .unwrap();
        let segments = vec![vec![-1.0, 0.0, 1.0], vec![]];
        let err = extract_unfolded_parameter(&fit, &segments, -9.0, 100, 1).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
    }

    #[test]
    fn test_parameter_close_to_binned_mean() {
        // centres -0.5, 0.5; (300 * -0.5 + 500 * 0.5) / 800 = 0.125
        let fit = FitOutput::new(vec![bin(300.0, 10.0, 12.0), bin(500.0, 10.0, 12.0)], identity(2))
            .unwrap();
        let p = extract_unfolded_parameter(&fit, &[vec![-1.0, 0.0, 1.0]], -9.0, 20_000, 1).unwrap();
        assert_eq!(p.n_segments(), 1);
        assert_abs_diff_eq!(p.mean[0], -9.0 * 0.125, epsilon = 0.01);
        // linearised error: sqrt(sum (d mean / d n_i)^2 s_i^2)
        let lin = |s: f64| {
            let d0 = (-0.5 - 0.125) / 800.0;
            let d1 = (0.5 - 0.125) / 800.0;
            9.0 * ((d0 * s).powi(2) + (d1 * s).powi(2)).sqrt()
        };
        assert_abs_diff_eq!(p.uncert_up[0], lin(10.0), epsilon = 0.1 * lin(10.0));
        assert_abs_diff_eq!(p.uncert_down[0], lin(12.0), epsilon = 0.1 * lin(12.0));
        assert!(p.uncert_down[0] > p.uncert_up[0]);
    }

    #[test]
    fn test_reproducible_and_segmented() {
        let fit = FitOutput::new(
            vec![bin(100.0, 5.0, 5.0), bin(120.0, 5.0, 5.0), bin(80.0, 4.0, 4.0), bin(90.0, 4.0, 4.0)],
            identity(4),
        )
        .unwrap();
        let segs = vec![vec![-1.0, 0.0, 1.0], vec![-1.0, 0.0, 1.0]];
        let a = extract_unfolded_parameter(&fit, &segs, 1.0, 500, 7).unwrap();
        let b = extract_unfolded_parameter(&fit, &segs, 1.0, 500, 7).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.n_segments(), 2);
        assert!(a.mean[0] > 0.0);

        let too_many = vec![vec![-1.0, 0.0, 1.0]; 3];
        assert!(extract_unfolded_parameter(&fit, &too_many, 1.0, 500, 7).is_err());
    }

    #[test]
    fn test_non_positive_definite_covariance() {
        let fit = FitOutput::new(vec![bin(1.0, 0.0, 0.0), bin(1.0, 0.0, 0.0)], identity(2)).unwrap();
        let err = extract_unfolded_parameter(&fit, &[vec![-1.0, 0.0, 1.0]], 1.0, 10, 1).unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
    }

    #[test]
    fn test_reads_fitter_yaml() {
        let nanos =
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        let dir = std::env::temp_dir().join(format!("uf_fit_{}_{}", std::process::id(), nanos));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("UnfoldingData.yaml"),
            "- mean: 300\n  uncertaintyUp: 10\n  uncertaintyDown: -12\n\
             - mean: 500\n  uncertaintyUp: 10\n  uncertaintyDown: -12\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("CorrelationMatrix.yaml"),
            "- parameters: [Bin_001_mu, Bin_002_mu, alpha_JES]\n\
             - correlation_rows:\n  - [1.0, -0.2, 0.1]\n  - [-0.2, 1.0, 0.0]\n  - [0.1, 0.0, 1.0]\n",
        )
        .unwrap();

        let fit = FitOutput::read(&dir).unwrap();
        assert_eq!(fit.bins.len(), 2);
        assert_eq!(fit.bins[1].uncertainty_down, -12.0);
        assert_eq!(fit.correlation, vec![vec![1.0, -0.2], vec![-0.2, 1.0]]);

        let p = extract_unfolded_parameter(&fit, &[vec![-1.0, 0.0, 1.0]], 1.0, 100, 3).unwrap();
        let path = write_unfolded_parameter(&dir, &p).unwrap();
        let back = read_unfolded_parameter(&path).unwrap();
        assert_eq!(back.n_segments(), 1);
        assert_abs_diff_eq!(back.mean[0], p.mean[0], epsilon = 1e-12);
        assert_abs_diff_eq!(back.uncert_down[0], p.uncert_down[0], epsilon = 1e-12);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
