//! Linearity test: unfolded parameter against its truth value for a set of
//! reweighted pseudo-data samples, fitted with a straight line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use uf_core::{Error, LinearityResult, Result, UnfoldedParameter};

use crate::config::write_json;
use crate::parameter::read_unfolded_parameter;

/// Straight-line fit `y = slope * x + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    /// Slope.
    pub slope: f64,
    /// Slope uncertainty.
    pub slope_err: f64,
    /// Offset.
    pub offset: f64,
    /// Offset uncertainty.
    pub offset_err: f64,
}

/// Chi-square straight-line fit with per-point uncertainties `sigma`.
///
/// Solved in closed form; uncertainties come from the inverse of the normal
/// matrix.
pub fn fit_line(x: &[f64], y: &[f64], sigma: &[f64]) -> Result<LineFit> {
    if x.len() != y.len() || x.len() != sigma.len() {
        return Err(Error::Validation(format!(
            "line fit inputs differ in length: {}, {}, {}",
            x.len(),
            y.len(),
            sigma.len()
        )));
    }
    if x.len() < 2 {
        return Err(Error::Computation(format!("line fit needs 2 points, got {}", x.len())));
    }

    let (mut s, mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for ((&xi, &yi), &si) in x.iter().zip(y).zip(sigma) {
        if !(si > 0.0 && si.is_finite()) {
            return Err(Error::Computation(format!("point uncertainty must be positive, got {si}")));
        }
        let w = 1.0 / (si * si);
        s += w;
        sx += w * xi;
        sy += w * yi;
        sxx += w * xi * xi;
        sxy += w * xi * yi;
    }
    let det = s * sxx - sx * sx;
    if det.abs() <= f64::EPSILON * s * sxx {
        return Err(Error::Computation("degenerate line fit: all points share one x".into()));
    }
    Ok(LineFit {
        slope: (s * sxy - sx * sy) / det,
        slope_err: (s / det).sqrt(),
        offset: (sxx * sy - sx * sxy) / det,
        offset_err: (sxx / det).sqrt(),
    })
}

/// Truth-record key of an unfolded sample: `mcdata*` pairs with `truth*`.
pub fn truth_key(sample: &str) -> String {
    sample.replace("mcdata", "truth")
}

/// Indices of the segments with at least two bins.
///
/// A single-bin segment has no shape to unfold: its parameter is fixed and
/// carries no uncertainty, so per-segment tests leave it out.
pub fn measured_segments(segments: &[Vec<f64>]) -> Vec<usize> {
    segments.iter().enumerate().filter(|(_, s)| s.len() > 2).map(|(i, _)| i).collect()
}

/// Fit unfolded against truth values, one line per measured segment of
/// `segments` (see [`measured_segments`]).
pub fn linearity_test(
    truth: &BTreeMap<String, Vec<f64>>,
    unfolded: &[(String, UnfoldedParameter)],
    segments: &[Vec<f64>],
) -> Result<LinearityResult> {
    let n_segments = segments.len();
    let mut points = Vec::with_capacity(unfolded.len());
    for (name, param) in unfolded {
        let key = truth_key(name);
        let t = truth
            .get(&key)
            .ok_or_else(|| Error::Validation(format!("no truth value '{key}' for '{name}'")))?;
        if param.n_segments() != n_segments || t.len() < n_segments {
            return Err(Error::Validation(format!(
                "'{name}' has {} segments, truth has {}, binning has {n_segments}",
                param.n_segments(),
                t.len()
            )));
        }
        points.push((t, param));
    }

    let measured = measured_segments(segments);
    let mut out = LinearityResult::default();
    for i in 0..n_segments {
        if !measured.contains(&i) {
            tracing::info!(segment = i, "single-bin segment, not fitted");
            continue;
        }
        let x: Vec<f64> = points.iter().map(|(t, _)| t[i]).collect();
        let y: Vec<f64> = points.iter().map(|(_, p)| p.mean[i]).collect();
        let sigma: Vec<f64> =
            points.iter().map(|(_, p)| 0.5 * (p.uncert_up[i] + p.uncert_down[i])).collect();
        let fit = fit_line(&x, &y, &sigma)?;
        tracing::info!(
            segment = i,
            slope = fit.slope,
            slope_err = fit.slope_err,
            offset = fit.offset,
            offset_err = fit.offset_err,
            "linearity"
        );
        out.segment.push(i);
        out.slope.push(fit.slope);
        out.slope_err.push(fit.slope_err);
        out.offset.push(fit.offset);
        out.offset_err.push(fit.offset_err);
    }
    Ok(out)
}

/// Read `<dir>/<sample>/spin_parameter.json` for every sample.
pub fn load_unfolded(dir: &Path, samples: &[String]) -> Result<Vec<(String, UnfoldedParameter)>> {
    samples
        .iter()
        .map(|s| {
            let path = dir.join(s).join("spin_parameter.json");
            Ok((s.clone(), read_unfolded_parameter(&path)?))
        })
        .collect()
}

/// Write `linearity_test.json` into `dir`.
pub fn write_linearity(dir: &Path, result: &LinearityResult) -> Result<PathBuf> {
    let path = dir.join("linearity_test.json");
    write_json(&path, result)?;
    Ok(path)
}
