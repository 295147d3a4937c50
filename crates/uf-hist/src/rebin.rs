//! Rebinning of fine histograms and migration matrices onto target binnings.

use uf_core::{Error, Result};

use crate::axis::Axis;
use crate::binning::{EdgeAlignment, map_bin_edges};
use crate::histogram::{Hist1D, Hist2D};

fn mapped_ranges(
    binning: &[f64],
    source: &Axis,
    alignment: &EdgeAlignment,
    what: &str,
) -> Result<Vec<usize>> {
    let idx = map_bin_edges(binning, source.granularity(), alignment)?;
    let last = idx[idx.len() - 1];
    if last > source.n_bins() {
        return Err(Error::Validation(format!(
            "{what}: binning {:?} spans {last} source bins but the source has {}",
            binning,
            source.n_bins()
        )));
    }
    Ok(idx)
}

/// Rebin a 1-D histogram onto `binning`.
///
/// Target bin `i` holds the sum of the mapped source bins and the quadrature
/// sum of their errors. Native fill statistics are carried over.
pub fn rebin_1d(
    hist: &Hist1D,
    binning: &[f64],
    name: &str,
    alignment: &EdgeAlignment,
) -> Result<Hist1D> {
    let idx = mapped_ranges(binning, &hist.axis, alignment, &hist.name)?;
    let mut out = Hist1D::new(name, Axis::from_edges(binning.to_vec())?);
    for i in 0..binning.len() - 1 {
        let (content, error) = hist.integral_and_error(idx[i]..idx[i + 1])?;
        out.content[i] = content;
        out.error[i] = error;
    }
    out.stats = hist.stats;
    Ok(out)
}

/// Rebin a migration matrix: reco (x) axis onto `reco_binning`, truth (y)
/// axis onto `truth_binning`.
pub fn rebin_2d(
    hist: &Hist2D,
    truth_binning: &[f64],
    reco_binning: &[f64],
    name: &str,
    alignment: &EdgeAlignment,
) -> Result<Hist2D> {
    let truth_idx = mapped_ranges(truth_binning, &hist.truth_axis, alignment, &hist.name)?;
    let reco_idx = mapped_ranges(reco_binning, &hist.reco_axis, alignment, &hist.name)?;

    let mut out = Hist2D::new(
        name,
        Axis::from_edges(reco_binning.to_vec())?,
        Axis::from_edges(truth_binning.to_vec())?,
    );
    for r in 0..reco_binning.len() - 1 {
        for t in 0..truth_binning.len() - 1 {
            let (content, error) = hist.integral_and_error(
                reco_idx[r]..reco_idx[r + 1],
                truth_idx[t]..truth_idx[t + 1],
            )?;
            out.set(r, t, content, error);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fine_hist() -> Hist1D {
        let axis = Axis::uniform(20, 0.0, 100.0).unwrap();
        let content: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        Hist1D::from_counts("fine", axis, content).unwrap()
    }

    #[test]
    fn test_rebin_1d_example() {
        let h = fine_hist();
        let r = rebin_1d(&h, &[0.0, 20.0, 40.0, 100.0], "coarse", &EdgeAlignment::default())
            .unwrap();
        assert_eq!(r.n_bins(), 3);
        assert_eq!(r.name, "coarse");
        assert_relative_eq!(r.content[0], 1.0 + 2.0 + 3.0 + 4.0);
        assert_relative_eq!(r.content[1], 5.0 + 6.0 + 7.0 + 8.0);
        assert_relative_eq!(r.content[2], (9..=20).sum::<i32>() as f64);
        // errors are sqrt(content) per source bin, so the quadrature sum is sqrt(sum)
        for i in 0..3 {
            assert_relative_eq!(r.error[i], r.content[i].sqrt(), epsilon = 1e-12);
        }
        assert_relative_eq!(r.integral(), h.integral());
    }

    #[test]
    fn test_identity_rebin() {
        let h = fine_hist();
        let r = rebin_1d(&h, h.axis.edges(), "same", &EdgeAlignment::default()).unwrap();
        assert_eq!(r.content, h.content);
        for (a, b) in r.error.iter().zip(&h.error) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_partial_range_is_allowed() {
        let h = fine_hist();
        let r = rebin_1d(&h, &[0.0, 50.0], "half", &EdgeAlignment::default()).unwrap();
        assert_relative_eq!(r.content[0], (1..=10).sum::<i32>() as f64);
    }

    #[test]
    fn test_out_of_range_is_fatal() {
        let h = fine_hist();
        let err = rebin_1d(&h, &[0.0, 50.0, 120.0], "x", &EdgeAlignment::default()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_rebin_2d_independent_axes() {
        let reco = Axis::uniform(4, 0.0, 4.0).unwrap();
        let truth = Axis::uniform(6, -3.0, 3.0).unwrap();
        let mut m = Hist2D::new("migmat", reco, truth);
        for r in 0..4 {
            for t in 0..6 {
                m.set(r, t, (r * 6 + t) as f64, 1.0);
            }
        }
        let out = rebin_2d(&m, &[-3.0, 0.0, 3.0], &[0.0, 1.0, 4.0], "nom", &EdgeAlignment::default())
            .unwrap();
        assert_eq!(out.n_reco(), 2);
        assert_eq!(out.n_truth(), 2);
        // reco bin 0, truth bins 0..3
        assert_relative_eq!(out.content_at(0, 0), 0.0 + 1.0 + 2.0);
        assert_relative_eq!(out.error_at(0, 0), 3.0_f64.sqrt());
        // reco bins 1..4, truth bins 3..6
        let expected: f64 = (1..4).flat_map(|r| (3..6).map(move |t| (r * 6 + t) as f64)).sum();
        assert_relative_eq!(out.content_at(1, 1), expected);
        assert_relative_eq!(out.error_at(1, 1), 3.0);
        assert_relative_eq!(out.integral(), m.integral());
    }
}
