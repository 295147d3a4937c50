//! Rebin pipeline: one input container per (campaign, channel, b-tag region,
//! observable) is regrouped into the analysis binning, the response matrices
//! are built, and the truth parameters are written next to the output.

use std::path::{Path, PathBuf};

use uf_core::{Error, Result};
use uf_hist::{
    Hist1D, Hist2D, HistFile, TruthRecords, extract_truth_parameters, rebin_1d, rebin_2d,
    response_matrix, shape_only_rescale,
};

use crate::config::{AnalysisConfig, RebinConfig, SystMode};

/// Name of the nominal truth distribution in every container.
pub const TRUTH: &str = "truth";

/// Truth and reco binnings of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionBinning {
    /// Binning of the truth axis (flattened for differential measurements).
    pub truth: Vec<f64>,
    /// Binning of the reco axis.
    pub reco: Vec<f64>,
    /// Whether the channel is a control region.
    pub is_control: bool,
}

impl RegionBinning {
    /// Binnings for `channel`.
    ///
    /// Signal channels use the truth binning on both axes. Control channels
    /// use `nbin_control` equal-width bins over the control bounds, with the
    /// edges truncated to integers.
    pub fn for_channel(rebin: &RebinConfig, channel: &str) -> Result<Self> {
        let truth = rebin.truth_binning()?;
        match rebin.control_bounds(channel) {
            Some([lo, hi]) => {
                let n = rebin.nbin_control;
                let reco = (0..=n)
                    .map(|i| (lo + (hi - lo) * i as f64 / n as f64).trunc())
                    .collect();
                Ok(Self { truth, reco, is_control: true })
            }
            None => Ok(Self { reco: truth.clone(), truth, is_control: false }),
        }
    }
}

/// Result of rebinning one container.
#[derive(Debug, Clone, Default)]
pub struct RebinOutput {
    /// The rebinned container.
    pub file: HistFile,
    /// Processes with systematics and their variation directories.
    pub systematics: Vec<(String, Vec<String>)>,
    /// Objects that were requested but not found (or of the wrong kind).
    pub skipped: Vec<String>,
}

impl RebinOutput {
    fn skip(&mut self, path: &str, err: &Error) {
        tracing::warn!(object = path, error = %err, "skipping object");
        self.skipped.push(path.to_string());
    }
}

fn is_truth_level(name: &str) -> bool {
    name.contains(TRUTH)
}

/// Rebin one input container.
///
/// Nominal 1-D objects, the nominal truth, the migration matrix and its
/// response matrix are written at the top level; systematic variations go
/// into one directory per variation. Missing variation objects are skipped
/// with a warning, a missing nominal truth or migration matrix is fatal.
pub fn rebin_container(
    input: &HistFile,
    analysis: &AnalysisConfig,
    rebin: &RebinConfig,
    region: &RegionBinning,
    mode: SystMode,
) -> Result<RebinOutput> {
    let alignment = rebin.alignment();
    let mut out = RebinOutput::default();

    let nominal_names = rebin
        .histo_1d
        .iter()
        .chain(analysis.background.iter())
        .cloned()
        .chain(rebin.bootstrap_names());
    for name in nominal_names {
        let hist = match input.get_1d(&name) {
            Ok(h) => h,
            Err(e) => {
                out.skip(&name, &e);
                continue;
            }
        };
        // reweighted truth distributions live on the truth axis
        let binning = if is_truth_level(&name) { &region.truth } else { &region.reco };
        out.file.insert(&name, rebin_1d(hist, binning, &name, &alignment)?);
    }

    let truth = rebin_1d(input.get_1d(TRUTH)?, &region.truth, TRUTH, &alignment)?;
    let migmat_name = &analysis.migration_matrix_name;
    let resmat_name = &analysis.response_matrix_name;
    let migmat =
        rebin_2d(input.get_2d(migmat_name)?, &region.truth, &region.reco, migmat_name, &alignment)?;
    let nominal_integral = migmat.integral();
    let resmat = response_matrix(&truth, &migmat, resmat_name)?;
    tracing::debug!(
        truth_bins = truth.n_bins(),
        reco_bins = migmat.n_reco(),
        nominal_integral,
        "nominal response built"
    );

    let processes = std::iter::once("all".to_string())
        .chain(analysis.background.iter().cloned())
        .chain(std::iter::once("ttbar".to_string()));
    for process in processes {
        let systs = analysis.systematics_for(&process);
        if systs.is_empty() {
            tracing::debug!(process = %process, "no systematics");
            continue;
        }
        for syst in &systs {
            if process == "all" || process == "ttbar" {
                let varied = match varied_response(
                    input, analysis, rebin, region, &truth, nominal_integral, syst, mode,
                ) {
                    Ok(r) => r,
                    Err(e @ (Error::MissingObject(_) | Error::Validation(_))) => {
                        out.skip(&format!("{syst}/{migmat_name}"), &e);
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                out.file.insert_in(syst, resmat_name, varied);

                if process == "all" {
                    for bkg in &analysis.background {
                        let path = format!("{syst}/{bkg}");
                        match input.get_1d(&path) {
                            Ok(h) => {
                                let h = rebin_1d(h, &region.reco, bkg, &alignment)?;
                                out.file.insert_in(syst, bkg, h);
                            }
                            Err(e) => out.skip(&path, &e),
                        }
                    }
                }
            } else {
                let path = format!("{syst}/{process}");
                match input.get_1d(&path) {
                    Ok(h) => {
                        let h = rebin_1d(h, &region.reco, &process, &alignment)?;
                        out.file.insert_in(syst, &process, h);
                    }
                    Err(e) => out.skip(&path, &e),
                }
            }
        }
        out.systematics.push((process, systs));
    }

    out.file.insert(TRUTH, truth);
    out.file.insert(migmat_name, migmat);
    out.file.insert(resmat_name, resmat);
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn varied_response(
    input: &HistFile,
    analysis: &AnalysisConfig,
    rebin: &RebinConfig,
    region: &RegionBinning,
    nominal_truth: &Hist1D,
    nominal_integral: f64,
    syst: &str,
    mode: SystMode,
) -> Result<Hist2D> {
    let alignment = rebin.alignment();
    let migmat_name = &analysis.migration_matrix_name;
    let migmat = rebin_2d(
        input.get_2d(&format!("{syst}/{migmat_name}"))?,
        &region.truth,
        &region.reco,
        syst,
        &alignment,
    )?;
    let truth = match input.get_1d(&format!("{syst}/{TRUTH}")) {
        Ok(h) => rebin_1d(h, &region.truth, &format!("{TRUTH}_{syst}"), &alignment)?,
        Err(_) => {
            tracing::info!(syst, "no varied truth, using nominal truth");
            nominal_truth.clone()
        }
    };
    let mut resmat = response_matrix(&truth, &migmat, &analysis.response_matrix_name)?;
    if mode == SystMode::Shape {
        let factor = shape_only_rescale(&mut resmat, nominal_truth, nominal_integral)?;
        tracing::debug!(syst, factor, "shape-only rescale");
    }
    Ok(resmat)
}

/// Truth parameters of every truth-level 1-D histogram plus the nominal truth.
///
/// Binned means come from the rebinned container, unbinned means from the
/// fill statistics of the source container. Variants that are missing or
/// have an empty segment are skipped with a warning.
pub fn extract_truth(
    rebinned: &HistFile,
    source: &HistFile,
    rebin: &RebinConfig,
    factor: f64,
) -> Result<TruthRecords> {
    let mut records = TruthRecords::default();
    let names = rebin
        .histo_1d
        .iter()
        .filter(|h| is_truth_level(h))
        .map(String::as_str)
        .chain(std::iter::once(TRUTH));
    for name in names {
        let (coarse, fine) = match (rebinned.get_1d(name), source.get_1d(name)) {
            (Ok(c), Ok(f)) => (c, f),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(object = name, error = %e, "no truth parameters");
                continue;
            }
        };
        match extract_truth_parameters(coarse, fine, &rebin.binning, factor) {
            Ok(p) => records.insert(name, p),
            Err(Error::Computation(msg)) => {
                tracing::warn!(object = name, "no truth parameters: {msg}");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(records)
}

/// Input and output roots of a rebin run.
#[derive(Debug, Clone)]
pub struct RebinPaths {
    /// Root of the input containers.
    pub input: PathBuf,
    /// Root of the output containers.
    pub output: PathBuf,
}

/// What to process.
#[derive(Debug, Clone)]
pub struct RebinSelection {
    /// Observables.
    pub variables: Vec<String>,
    /// Channels.
    pub channels: Vec<String>,
    /// Campaigns.
    pub campaigns: Vec<String>,
}

fn container_path(root: &Path, camp: &str, chan: &str, btag: &str, file: &str) -> PathBuf {
    root.join(camp).join(chan).join(btag).join(format!("{file}.json"))
}

/// Rebin every selected container and write outputs plus truth side files.
///
/// Returns the paths of the written containers.
pub fn run_rebin(
    paths: &RebinPaths,
    analysis: &AnalysisConfig,
    rebin: &RebinConfig,
    selection: &RebinSelection,
    mode: SystMode,
) -> Result<Vec<PathBuf>> {
    rebin.validate()?;
    let suffix = rebin.suffix();
    let mut written = Vec::new();

    for camp in &selection.campaigns {
        for chan in &selection.channels {
            let region = RegionBinning::for_channel(rebin, chan)?;
            for btag in analysis.btag_regions_for(chan)? {
                let outdir = paths.output.join(camp).join(chan).join(btag);
                for var in &selection.variables {
                    let stem = format!("{var}{suffix}");
                    let in_path = container_path(&paths.input, camp, chan, btag, &stem);
                    tracing::info!(input = %in_path.display(), "rebinning");

                    let input = HistFile::open(&in_path)?;
                    let out = rebin_container(&input, analysis, rebin, &region, mode)?;
                    let out_path = outdir.join(format!("{stem}.json"));
                    out.file.save(&out_path)?;
                    tracing::info!(
                        output = %out_path.display(),
                        objects = out.file.len(),
                        skipped = out.skipped.len(),
                        "rebinned container written"
                    );

                    let factor = analysis.factor_for(var)?;
                    let records = extract_truth(&out.file, &input, rebin, factor)?;
                    let (binned, unbinned) = records.write(&outdir, &stem)?;
                    tracing::info!(
                        binned = %binned.display(),
                        unbinned = %unbinned.display(),
                        "truth parameters written"
                    );
                    written.push(out_path);
                }
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use uf_hist::{Axis, FillStats, response_times_truth};

    fn analysis() -> AnalysisConfig {
        serde_json::from_str(
            r#"{
                "rebin": "rebin.json",
                "background": ["Wt"],
                "btag_regions": {"em": ["2b"], "ee": ["2b"]},
                "twosided_syst": {"all": [["JES_up", "JES_down"]]},
                "onesided_syst": {"Wt": ["Wt_DS"]},
                "factor": {"CorrKK": -9.0}
            }"#,
        )
        .unwrap()
    }

    fn rebin_cfg() -> RebinConfig {
        serde_json::from_str(
            r#"{
                "binning": [[-1.0, 0.0, 1.0]],
                "nbin_input": 4,
                "histo_1D": ["mcdata", "truth_rw0"],
                "is_control": true,
                "control_channels": {"ee": "mll"},
                "control_variable_bounds": {"mll": [0.0, 4.0]},
                "nbin_control": 2
            }"#,
        )
        .unwrap()
    }

    fn fine_1d(name: &str, content: Vec<f64>) -> Hist1D {
        Hist1D::from_counts(name, Axis::uniform(4, -1.0, 1.0).unwrap(), content).unwrap()
    }

    fn migmat(scale: f64) -> Hist2D {
        let axis = Axis::uniform(4, -1.0, 1.0).unwrap();
        let mut m = Hist2D::new("migmat", axis.clone(), axis);
        for r in 0..4 {
            for t in 0..4 {
                let v = if r == t { 8.0 * scale } else { scale };
                m.set(r, t, v, v.sqrt());
            }
        }
        m
    }

    fn input() -> HistFile {
        let mut f = HistFile::new();
        f.insert("mcdata", fine_1d("mcdata", vec![10.0, 12.0, 14.0, 16.0]));
        f.insert("Wt", fine_1d("Wt", vec![1.0, 1.0, 1.0, 1.0]));
        f.insert(
            "truth",
            fine_1d("truth", vec![20.0, 20.0, 20.0, 20.0]).with_stats(FillStats {
                sumw: 80.0,
                sumw2: 80.0,
                sumwx: 8.0,
                sumwx2: 30.0,
            }),
        );
        f.insert("truth_rw0", fine_1d("truth_rw0", vec![10.0, 20.0, 20.0, 30.0]));
        f.insert("migmat", migmat(1.0));
        f.insert_in("JES_up", "migmat", migmat(1.2));
        f.insert_in("JES_up", "Wt", fine_1d("Wt", vec![2.0, 2.0, 2.0, 2.0]));
        f.insert_in("Wt_DS", "Wt", fine_1d("Wt", vec![1.5, 1.5, 1.5, 1.5]));
        // JES_down has no migration matrix
        f
    }

    #[test]
    fn test_region_binning() {
        let cfg = rebin_cfg();
        let em = RegionBinning::for_channel(&cfg, "em").unwrap();
        assert!(!em.is_control);
        assert_eq!(em.truth, em.reco);
        let ee = RegionBinning::for_channel(&cfg, "ee").unwrap();
        assert!(ee.is_control);
        assert_eq!(ee.reco, vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_control_edges_are_truncated() {
        let mut cfg = rebin_cfg();
        cfg.control_variable_bounds.insert("mll".into(), [0.0, 5.0]);
        let ee = RegionBinning::for_channel(&cfg, "ee").unwrap();
        assert_eq!(ee.reco, vec![0.0, 2.0, 5.0]);
    }

    #[test]
    fn test_rebin_container_layout() {
        let cfg = rebin_cfg();
        let region = RegionBinning::for_channel(&cfg, "em").unwrap();
        let out = rebin_container(&input(), &analysis(), &cfg, &region, SystMode::Full).unwrap();
        let f = &out.file;

        assert_eq!(f.get_1d("mcdata").unwrap().content, vec![22.0, 30.0]);
        assert_eq!(f.get_1d("truth").unwrap().content, vec![40.0, 40.0]);
        assert_eq!(f.get_1d("truth_rw0").unwrap().content, vec![30.0, 50.0]);
        assert_eq!(f.get_2d("migmat").unwrap().content, vec![18.0, 4.0, 4.0, 18.0]);
        let r = f.get_2d("resmat").unwrap();
        assert_relative_eq!(r.content_at(0, 0), 18.0 / 40.0);

        // varied response and background, nothing from the missing JES_down
        assert!(f.get_2d("JES_up/resmat").is_ok());
        assert_eq!(f.get_1d("JES_up/Wt").unwrap().content, vec![4.0, 4.0]);
        assert_eq!(f.get_1d("Wt_DS/Wt").unwrap().content, vec![3.0, 3.0]);
        assert!(f.get("JES_down/resmat").is_none());
        assert!(out.skipped.contains(&"JES_down/migmat".to_string()));
        assert_eq!(out.systematics.len(), 2);
    }

    /// `ee` container: reco quantities on six unit bins of mll in [0, 6],
    /// truth quantities on the fine truth axis.
    fn control_input() -> HistFile {
        let reco = Axis::uniform(6, 0.0, 6.0).unwrap();
        let truth_axis = Axis::uniform(4, -1.0, 1.0).unwrap();
        let mut f = HistFile::new();
        f.insert(
            "mcdata",
            Hist1D::from_counts("mcdata", reco.clone(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        );
        f.insert("Wt", Hist1D::from_counts("Wt", reco.clone(), vec![1.0; 6]).unwrap());
        f.insert("truth", fine_1d("truth", vec![20.0, 20.0, 20.0, 20.0]));
        f.insert("truth_rw0", fine_1d("truth_rw0", vec![10.0, 20.0, 20.0, 30.0]));
        let mut m = Hist2D::new("migmat", reco, truth_axis);
        for r in 0..6 {
            for t in 0..4 {
                let v = (r + 1) as f64;
                m.set(r, t, v, v.sqrt());
            }
        }
        f.insert("migmat", m);
        f
    }

    #[test]
    fn test_rebin_control_region() {
        let mut cfg = rebin_cfg();
        cfg.control_variable_bounds.insert("mll".into(), [0.0, 6.0]);
        cfg.nbin_control = 3;
        let region = RegionBinning::for_channel(&cfg, "ee").unwrap();
        assert_eq!(region.reco, vec![0.0, 2.0, 4.0, 6.0]);

        let out =
            rebin_container(&control_input(), &analysis(), &cfg, &region, SystMode::Full).unwrap();
        let f = &out.file;

        // reco-level histograms follow the control binning
        let mcdata = f.get_1d("mcdata").unwrap();
        assert_eq!(mcdata.axis.edges().to_vec(), vec![0.0, 2.0, 4.0, 6.0]);
        assert_eq!(mcdata.content, vec![3.0, 7.0, 11.0]);
        assert_eq!(f.get_1d("Wt").unwrap().content, vec![2.0, 2.0, 2.0]);
        // truth-level ones stay on the truth binning
        let rw0 = f.get_1d("truth_rw0").unwrap();
        assert_eq!(rw0.axis.edges().to_vec(), vec![-1.0, 0.0, 1.0]);
        assert_eq!(rw0.content, vec![30.0, 50.0]);
        assert_eq!(f.get_1d("truth").unwrap().content, vec![40.0, 40.0]);

        let migmat = f.get_2d("migmat").unwrap();
        assert_eq!((migmat.n_reco(), migmat.n_truth()), (3, 2));
        let resmat = f.get_2d("resmat").unwrap();
        assert_eq!((resmat.n_reco(), resmat.n_truth()), (3, 2));
        assert_eq!(resmat.content.len(), 6);
        for r in 0..3 {
            // fine reco bins 2r and 2r + 1 over two fine truth bins
            let cell = 2.0 * ((2 * r + 1) + (2 * r + 2)) as f64;
            assert_relative_eq!(migmat.content_at(r, 1), cell);
            assert_relative_eq!(resmat.content_at(r, 0), cell / 40.0);
        }
    }

    #[test]
    fn test_shape_mode_restores_nominal_yield() {
        let cfg = rebin_cfg();
        let region = RegionBinning::for_channel(&cfg, "em").unwrap();
        let full = rebin_container(&input(), &analysis(), &cfg, &region, SystMode::Full).unwrap();
        let shape = rebin_container(&input(), &analysis(), &cfg, &region, SystMode::Shape).unwrap();

        let truth = shape.file.get_1d("truth").unwrap();
        let nominal = shape.file.get_2d("migmat").unwrap().integral();
        let varied_full = full.file.get_2d("JES_up/resmat").unwrap();
        let varied_shape = shape.file.get_2d("JES_up/resmat").unwrap();
        // nominal truth is reused, so the full variation folds to 1.2 x nominal
        assert_relative_eq!(
            response_times_truth(truth, varied_full).unwrap(),
            1.2 * nominal,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            response_times_truth(truth, varied_shape).unwrap(),
            nominal,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_missing_nominal_truth_is_fatal() {
        let mut f = input();
        f.objects.remove("truth");
        let cfg = rebin_cfg();
        let region = RegionBinning::for_channel(&cfg, "em").unwrap();
        let err = rebin_container(&f, &analysis(), &cfg, &region, SystMode::Full).unwrap_err();
        assert!(matches!(err, Error::MissingObject(ref n) if n == "truth"));
    }

    #[test]
    fn test_extract_truth_records() {
        let cfg = rebin_cfg();
        let region = RegionBinning::for_channel(&cfg, "em").unwrap();
        let src = input();
        let out = rebin_container(&src, &analysis(), &cfg, &region, SystMode::Full).unwrap();
        let rec = extract_truth(&out.file, &src, &cfg, -9.0).unwrap();

        assert_eq!(rec.binned.len(), 2);
        // flat truth: binned mean 0
        assert_relative_eq!(rec.binned["truth"][0], 0.0);
        // (30 * -0.5 + 50 * 0.5) / 80 = 0.125
        assert_relative_eq!(rec.binned["truth_rw0"][0], -9.0 * 0.125);
        // native stats: mean 0.1
        assert_relative_eq!(rec.unbinned["truth"][0][0], -0.9, epsilon = 1e-12);
    }
}
