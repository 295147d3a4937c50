//! Bin-edge mapper: physical target edges -> index boundaries over a fine
//! equal-width source histogram.

use serde::{Deserialize, Serialize};
use uf_core::{Error, Result};

/// What to do when a target edge does not fall on a source bin boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisalignmentPolicy {
    /// Reject the binning.
    #[default]
    Error,
    /// Truncate the boundary toward zero and log a warning.
    Truncate,
}

/// Alignment check applied to every mapped boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeAlignment {
    /// Distance (in source bins) under which a boundary snaps to an integer.
    pub tolerance: f64,
    /// Policy for boundaries farther than `tolerance` from any integer.
    pub policy: MisalignmentPolicy,
}

impl Default for EdgeAlignment {
    fn default() -> Self {
        Self { tolerance: 1e-6, policy: MisalignmentPolicy::Error }
    }
}

impl EdgeAlignment {
    /// Alignment with the legacy truncating behaviour.
    pub fn truncating(tolerance: f64) -> Self {
        Self { tolerance, policy: MisalignmentPolicy::Truncate }
    }
}

/// Check that `binning` is a usable target binning.
pub fn validate_binning(binning: &[f64]) -> Result<()> {
    if binning.len() < 2 {
        return Err(Error::Validation(format!(
            "binning needs at least 2 edges, got {}",
            binning.len()
        )));
    }
    for (i, w) in binning.windows(2).enumerate() {
        if !(w[0].is_finite() && w[1].is_finite()) || w[1] <= w[0] {
            return Err(Error::Validation(format!(
                "binning must be finite and strictly increasing: edge {} = {} followed by {}",
                i, w[0], w[1]
            )));
        }
    }
    Ok(())
}

/// Map physical bin edges onto source bin indices.
///
/// Element `i` of the result is the number of source bins between
/// `binning[0]` and `binning[i]`, so target bin `i` covers source bins
/// `result[i]..result[i + 1]`. Boundaries accumulate the per-bin distances in
/// floating point and are then snapped to integers within
/// `alignment.tolerance`.
pub fn map_bin_edges(
    binning: &[f64],
    granularity: f64,
    alignment: &EdgeAlignment,
) -> Result<Vec<usize>> {
    validate_binning(binning)?;
    if !(granularity.is_finite() && granularity > 0.0) {
        return Err(Error::Validation(format!("granularity must be positive, got {granularity}")));
    }

    let mut bounds = Vec::with_capacity(binning.len());
    bounds.push(0.0_f64);
    for w in binning.windows(2) {
        let prev = bounds[bounds.len() - 1];
        bounds.push(prev + (w[1] - w[0]).abs() / granularity);
    }

    bounds
        .iter()
        .enumerate()
        .map(|(i, &b)| snap(b, binning[i], alignment))
        .collect()
}

fn snap(bound: f64, edge: f64, alignment: &EdgeAlignment) -> Result<usize> {
    let floor = bound.trunc();
    if bound == floor {
        return Ok(floor as usize);
    }
    if (bound - floor).abs() < alignment.tolerance {
        return Ok(floor as usize);
    }
    if (floor + 1.0 - bound).abs() < alignment.tolerance {
        return Ok(floor as usize + 1);
    }
    match alignment.policy {
        MisalignmentPolicy::Error => Err(Error::Validation(format!(
            "edge {edge} is not aligned with the source binning (boundary {bound:.9} source bins)"
        ))),
        MisalignmentPolicy::Truncate => {
            tracing::warn!(edge, bound, "edge not aligned with source binning; truncating");
            Ok(floor as usize)
        }
    }
}

/// Concatenate per-segment observable binnings onto one global axis.
///
/// Segment `i` occupies `[i * nbin_input, (i + 1) * nbin_input]` in units of
/// source bins; a value `v` of that segment maps to
/// `((v - lo) / (hi - lo) + i) * nbin_input`. Shared segment boundaries
/// collapse into a single edge.
pub fn flatten_differential(
    segments: &[Vec<f64>],
    nbin_input: usize,
    observable_range: (f64, f64),
) -> Result<Vec<f64>> {
    let (lo, hi) = observable_range;
    if !(lo.is_finite() && hi.is_finite()) || hi <= lo {
        return Err(Error::Validation(format!("invalid observable range [{lo}, {hi}]")));
    }
    if nbin_input == 0 {
        return Err(Error::Validation("nbin_input must be positive".into()));
    }

    let n = nbin_input as f64;
    let mut out = Vec::new();
    for (i, seg) in segments.iter().enumerate() {
        validate_binning(seg)?;
        out.extend(seg.iter().map(|&v| ((v - lo) / (hi - lo) + i as f64) * n));
    }
    out.sort_by(|a, b| a.total_cmp(b));
    out.dedup_by(|a, b| (*a - *b).abs() <= 1e-9 * b.abs().max(1.0));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coarse_regrouping() {
        let idx = map_bin_edges(&[0.0, 20.0, 40.0, 100.0], 5.0, &EdgeAlignment::default()).unwrap();
        assert_eq!(idx, vec![0, 4, 8, 20]);
    }

    #[test]
    fn test_snaps_float_noise() {
        // 0.1 steps on a 0.05 grid accumulate rounding error.
        let edges: Vec<f64> = (0..=20).map(|i| -1.0 + 0.1 * i as f64).collect();
        let idx = map_bin_edges(&edges, 0.05, &EdgeAlignment::default()).unwrap();
        let expected: Vec<usize> = (0..=20).map(|i| 2 * i).collect();
        assert_eq!(idx, expected);
    }

    #[test]
    fn test_misaligned_edge_is_an_error_by_default() {
        let err = map_bin_edges(&[0.0, 7.0, 20.0], 5.0, &EdgeAlignment::default()).unwrap_err();
        assert!(err.to_string().contains("not aligned"), "{err}");
    }

    #[test]
    fn test_misaligned_edge_truncates_when_requested() {
        let idx = map_bin_edges(&[0.0, 7.0, 20.0], 5.0, &EdgeAlignment::truncating(1e-6)).unwrap();
        assert_eq!(idx, vec![0, 1, 4]);
    }

    #[test]
    fn test_tolerance_is_configurable() {
        let loose = EdgeAlignment { tolerance: 0.5, policy: MisalignmentPolicy::Error };
        let idx = map_bin_edges(&[0.0, 7.0, 20.0], 5.0, &loose).unwrap();
        assert_eq!(idx, vec![0, 1, 4]);
    }

    #[test]
    fn test_rejects_invalid_inputs() {
        let a = EdgeAlignment::default();
        assert!(map_bin_edges(&[0.0], 1.0, &a).is_err());
        assert!(map_bin_edges(&[0.0, 2.0, 1.0], 1.0, &a).is_err());
        assert!(map_bin_edges(&[0.0, 1.0], 0.0, &a).is_err());
        assert!(map_bin_edges(&[0.0, 1.0], f64::NAN, &a).is_err());
    }

    #[test]
    fn test_flatten_differential_matches_index_units() {
        let segs = vec![vec![-1.0, 0.0, 1.0], vec![-1.0, -0.5, 0.5, 1.0]];
        let flat = flatten_differential(&segs, 20, (-1.0, 1.0)).unwrap();
        assert_eq!(flat, vec![0.0, 10.0, 20.0, 25.0, 35.0, 40.0]);

        // mapping those edges onto unit-width bins gives the same numbers
        let idx = map_bin_edges(&flat, 1.0, &EdgeAlignment::default()).unwrap();
        assert_eq!(idx, vec![0, 10, 20, 25, 35, 40]);
    }

    #[test]
    fn test_flatten_single_segment_custom_range() {
        let flat = flatten_differential(&[vec![0.0, 1.0, 3.14]], 10, (0.0, 3.14)).unwrap();
        assert_eq!(flat.len(), 3);
        assert!((flat[2] - 10.0).abs() < 1e-12);
        assert!(flatten_differential(&[vec![0.0, 1.0]], 10, (1.0, 1.0)).is_err());
    }
}
