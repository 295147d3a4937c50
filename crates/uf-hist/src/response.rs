//! Response matrices: migration matrices normalised per truth bin.

use uf_core::{Error, Result};

use crate::histogram::{Hist1D, Hist2D};

fn check_truth_shape(truth: &Hist1D, matrix: &Hist2D) -> Result<()> {
    if truth.n_bins() != matrix.n_truth() {
        return Err(Error::Validation(format!(
            "truth '{}' has {} bins but matrix '{}' has {} truth bins",
            truth.name,
            truth.n_bins(),
            matrix.name,
            matrix.n_truth()
        )));
    }
    Ok(())
}

/// Build `R[r, t] = M[r, t] / T[t]`.
///
/// Columns of empty truth bins are zero. The error is
/// `R * sqrt((dM/M)^2 + (dT/T)^2)` where both `M` and `T` are positive and
/// zero elsewhere.
pub fn response_matrix(truth: &Hist1D, migration: &Hist2D, name: &str) -> Result<Hist2D> {
    check_truth_shape(truth, migration)?;

    let mut resmat = migration.clone();
    resmat.name = name.to_string();
    for t in 0..migration.n_truth() {
        let tc = truth.content[t];
        let te = truth.error[t];
        for r in 0..migration.n_reco() {
            let mc = migration.content_at(r, t);
            let me = migration.error_at(r, t);
            let value = if tc == 0.0 { 0.0 } else { mc / tc };
            let error = if mc > 0.0 && tc > 0.0 {
                value * ((me / mc).powi(2) + (te / tc).powi(2)).sqrt()
            } else {
                0.0
            };
            resmat.set(r, t, value, error);
        }
    }
    Ok(resmat)
}

/// Predicted reco yield of `truth` through `response`: `sum_rt R[r,t] T[t]`.
pub fn response_times_truth(truth: &Hist1D, response: &Hist2D) -> Result<f64> {
    Ok(fold(response, truth)?.iter().sum())
}

/// Reco-level prediction per reco bin: `sum_t R[r,t] T[t]`.
pub fn fold(response: &Hist2D, truth: &Hist1D) -> Result<Vec<f64>> {
    check_truth_shape(truth, response)?;
    Ok((0..response.n_reco())
        .map(|r| {
            (0..response.n_truth())
                .map(|t| response.content_at(r, t) * truth.content[t])
                .sum::<f64>()
        })
        .collect())
}

/// Remove the normalisation effect of a systematic response matrix.
///
/// Scales every cell by `nominal_integral / (R . T_nominal)` so the varied
/// matrix folds the nominal truth into the nominal reco yield. Returns the
/// applied factor; a vanishing denominator leaves the matrix untouched.
pub fn shape_only_rescale(
    response: &mut Hist2D,
    nominal_truth: &Hist1D,
    nominal_integral: f64,
) -> Result<f64> {
    let folded = response_times_truth(nominal_truth, response)?;
    if folded == 0.0 || !folded.is_finite() {
        tracing::warn!(
            matrix = %response.name,
            folded,
            "cannot rescale response matrix to nominal normalisation"
        );
        return Ok(1.0);
    }
    let factor = nominal_integral / folded;
    response.scale(factor);
    Ok(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;
    use approx::assert_relative_eq;

    fn truth(content: &[f64]) -> Hist1D {
        let axis = Axis::uniform(content.len(), 0.0, content.len() as f64).unwrap();
        Hist1D::from_counts("truth", axis, content.to_vec()).unwrap()
    }

    fn migration(rows: &[&[f64]]) -> Hist2D {
        let n_truth = rows[0].len();
        let mut m = Hist2D::new(
            "migmat",
            Axis::uniform(rows.len(), 0.0, rows.len() as f64).unwrap(),
            Axis::uniform(n_truth, 0.0, n_truth as f64).unwrap(),
        );
        for (r, row) in rows.iter().enumerate() {
            for (t, &v) in row.iter().enumerate() {
                m.set(r, t, v, v.abs().sqrt());
            }
        }
        m
    }

    #[test]
    fn test_empty_truth_bin_gives_zero_column() {
        let t = truth(&[10.0, 0.0, 5.0]);
        let m = migration(&[&[2.0, 3.0, 1.0]]);
        let r = response_matrix(&t, &m, "resmat").unwrap();
        assert_eq!(r.name, "resmat");
        assert_relative_eq!(r.content_at(0, 0), 0.2);
        assert_eq!(r.content_at(0, 1), 0.0);
        assert_eq!(r.error_at(0, 1), 0.0);
        assert_relative_eq!(r.content_at(0, 2), 0.2);
        assert!(r.content.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_relative_errors_add_in_quadrature() {
        let t = truth(&[100.0]);
        let m = migration(&[&[25.0]]);
        let r = response_matrix(&t, &m, "r").unwrap();
        // dM/M = 1/5, dT/T = 1/10
        let expected = 0.25 * (0.04_f64 + 0.01).sqrt();
        assert_relative_eq!(r.error_at(0, 0), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let t = truth(&[1.0, 2.0]);
        let m = migration(&[&[1.0, 1.0, 1.0]]);
        assert!(matches!(response_matrix(&t, &m, "r"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_fold_recovers_migration_projection() {
        let t = truth(&[10.0, 20.0]);
        let m = migration(&[&[4.0, 2.0], &[3.0, 12.0]]);
        let r = response_matrix(&t, &m, "r").unwrap();
        let reco = fold(&r, &t).unwrap();
        assert_relative_eq!(reco[0], 6.0, epsilon = 1e-12);
        assert_relative_eq!(reco[1], 15.0, epsilon = 1e-12);
        assert_relative_eq!(response_times_truth(&t, &r).unwrap(), m.integral(), epsilon = 1e-12);
    }

    #[test]
    fn test_shape_only_rescale_restores_nominal_yield() {
        let nominal_truth = truth(&[10.0, 20.0]);
        let nominal_mig = migration(&[&[4.0, 2.0], &[3.0, 12.0]]);
        let nominal_integral = nominal_mig.integral();

        // a variation with different truth and an inflated migration
        let syst_truth = truth(&[12.0, 18.0]);
        let syst_mig = migration(&[&[5.0, 3.0], &[4.0, 13.0]]);
        let mut r = response_matrix(&syst_truth, &syst_mig, "r").unwrap();
        let before = r.clone();

        let factor = shape_only_rescale(&mut r, &nominal_truth, nominal_integral).unwrap();
        assert_relative_eq!(
            response_times_truth(&nominal_truth, &r).unwrap(),
            nominal_integral,
            epsilon = 1e-10
        );
        for (a, b) in r.content.iter().zip(&before.content) {
            assert_relative_eq!(*a, b * factor, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_shape_only_rescale_zero_denominator_is_noop() {
        let t = truth(&[0.0, 0.0]);
        let mut r = migration(&[&[1.0, 1.0]]);
        let factor = shape_only_rescale(&mut r, &t, 10.0).unwrap();
        assert_eq!(factor, 1.0);
        assert_eq!(r.content, vec![1.0, 1.0]);
    }
}
