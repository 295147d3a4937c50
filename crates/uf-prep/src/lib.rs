//! # uf-prep
//!
//! Drives the histogram core over whole analyses: immutable configuration
//! objects, the campaign/channel/region rebin pipeline, extraction of the
//! unfolded parameter from fit outputs, the linearity and ensemble tests and
//! the enumeration of candidate binnings.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binning_scan;
pub mod config;
pub mod ensemble;
pub mod linearity;
pub mod parameter;
pub mod pipeline;

pub use binning_scan::{
    BinningCandidate, Resolution, ScanMode, best_candidate, candidate_configs, enumerate_binnings,
    normalise_feature, scan_candidates,
};
pub use config::{AnalysisConfig, RebinConfig, SystMode, read_config, write_json};
pub use ensemble::{
    EnsembleTarget, PSEUDO_DATA, ensemble_test, load_ensemble, migration_toy_config,
    stat_only_config, toy_name, write_ensemble,
};
pub use linearity::{
    LineFit, fit_line, linearity_test, load_unfolded, measured_segments, write_linearity,
};
pub use parameter::{
    FitOutput, UnfoldedBin, extract_unfolded_parameter, read_unfolded_parameter,
    write_unfolded_parameter,
};
pub use pipeline::{
    RebinOutput, RebinPaths, RebinSelection, RegionBinning, extract_truth, rebin_container,
    run_rebin,
};
