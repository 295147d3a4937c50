use approx::assert_relative_eq;
use uf_hist::{
    Axis, EdgeAlignment, Hist1D, Hist2D, map_bin_edges, rebin_1d, rebin_2d, response_matrix,
    response_times_truth, shape_only_rescale,
};

fn fine(n: usize) -> Hist1D {
    let axis = Axis::uniform(n, -1.0, 1.0).unwrap();
    let content: Vec<f64> = (0..n).map(|i| 10.0 + ((i * 7) % 13) as f64).collect();
    let error: Vec<f64> = (0..n).map(|i| 0.5 + ((i * 3) % 5) as f64 * 0.25).collect();
    Hist1D::from_parts("fine", axis, content, error).unwrap()
}

/// Binnings on the 1/20 grid of [-1, 1]: every edge is a multiple of 0.1.
fn grid_binnings() -> Vec<Vec<f64>> {
    vec![
        vec![-1.0, 1.0],
        vec![-1.0, 0.0, 1.0],
        vec![-1.0, -0.4, 0.0, 0.4, 1.0],
        vec![-1.0, -0.9, -0.5, -0.1, 0.0, 0.1, 0.5, 0.9, 1.0],
        vec![-1.0, -0.3, 0.2, 0.7, 1.0],
    ]
}

#[test]
fn total_yield_is_conserved() {
    let h = fine(40);
    for binning in grid_binnings() {
        let r = rebin_1d(&h, &binning, "r", &EdgeAlignment::default()).unwrap();
        assert_relative_eq!(r.integral(), h.integral(), epsilon = 1e-9);
    }
}

#[test]
fn errors_are_quadrature_sums_of_source_errors() {
    let h = fine(40);
    for binning in grid_binnings() {
        let idx = map_bin_edges(&binning, h.axis.granularity(), &EdgeAlignment::default()).unwrap();
        let r = rebin_1d(&h, &binning, "r", &EdgeAlignment::default()).unwrap();
        for i in 0..r.n_bins() {
            let plain: f64 = h.error[idx[i]..idx[i + 1]].iter().sum();
            let quad: f64 = h.error[idx[i]..idx[i + 1]].iter().map(|e| e * e).sum::<f64>().sqrt();
            assert_relative_eq!(r.error[i], quad, epsilon = 1e-12);
            if idx[i + 1] - idx[i] > 1 {
                assert!(r.error[i] < plain, "bin {i}: quadrature must be below the plain sum");
            }
        }
    }
}

#[test]
fn identity_binning_is_identity() {
    let h = fine(40);
    let r = rebin_1d(&h, h.axis.edges(), "same", &EdgeAlignment::default()).unwrap();
    for i in 0..h.n_bins() {
        assert_relative_eq!(r.content[i], h.content[i], epsilon = 1e-12);
        assert_relative_eq!(r.error[i], h.error[i], epsilon = 1e-12);
    }
}

#[test]
fn response_of_rebinned_matrix_folds_back_to_reco_yield() {
    let n = 40;
    let axis = Axis::uniform(n, -1.0, 1.0).unwrap();
    let mut mig = Hist2D::new("migmat", axis.clone(), axis.clone());
    let mut truth = vec![0.0; n];
    for r in 0..n {
        for t in 0..n {
            let d = r.abs_diff(t) as f64;
            let v = if d < 4.0 { 50.0 / (1.0 + d) } else { 0.0 };
            mig.set(r, t, v, v.sqrt());
            truth[t] += v;
        }
    }
    // efficiency below one: one extra event per truth bin never reconstructed
    for t in truth.iter_mut() {
        *t += 1.0;
    }
    let truth = Hist1D::from_counts("truth", axis, truth).unwrap();

    let binning = vec![-1.0, -0.5, 0.0, 0.5, 1.0];
    let a = EdgeAlignment::default();
    let mig_r = rebin_2d(&mig, &binning, &binning, "nom", &a).unwrap();
    let truth_r = rebin_1d(&truth, &binning, "truth", &a).unwrap();
    let resmat = response_matrix(&truth_r, &mig_r, "resmat").unwrap();

    assert!(resmat.content.iter().all(|v| *v >= 0.0 && v.is_finite()));
    // column sums are efficiencies
    for t in 0..resmat.n_truth() {
        let eff: f64 = (0..resmat.n_reco()).map(|r| resmat.content_at(r, t)).sum();
        assert!(eff > 0.0 && eff < 1.0, "efficiency {eff}");
    }
    assert_relative_eq!(
        response_times_truth(&truth_r, &resmat).unwrap(),
        mig_r.integral(),
        epsilon = 1e-9
    );

    // shape-only: a scaled variation is mapped back onto the nominal yield
    let mut varied = mig_r.clone();
    varied.scale(1.3);
    let mut syst = response_matrix(&truth_r, &varied, "resmat").unwrap();
    shape_only_rescale(&mut syst, &truth_r, mig_r.integral()).unwrap();
    for (a, b) in syst.content.iter().zip(&resmat.content) {
        assert_relative_eq!(*a, *b, epsilon = 1e-12);
    }
}
