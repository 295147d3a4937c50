//! # uf-hist
//!
//! Histogram model and the numerical core of unfolding input preparation:
//! fine equal-width histograms are regrouped into analysis binnings, migration
//! matrices are rebinned on both axes and normalised into response matrices.
//!
//! ## Example
//!
//! ```no_run
//! use uf_hist::{EdgeAlignment, HistFile, rebin_1d};
//!
//! let f = HistFile::open("em/4j2b/CorrKK.json").unwrap();
//! let truth = f.get_1d("truth").unwrap();
//! let coarse = rebin_1d(truth, &[-1.0, -0.5, 0.0, 0.5, 1.0], "truth", &EdgeAlignment::default())
//!     .unwrap();
//! println!("bins: {}, integral: {}", coarse.n_bins(), coarse.integral());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod axis;
pub mod binning;
pub mod container;
pub mod histogram;
pub mod rebin;
pub mod response;
pub mod toys;
pub mod truth;

pub use axis::Axis;
pub use binning::{EdgeAlignment, MisalignmentPolicy, flatten_differential, map_bin_edges};
pub use container::{HistDirectory, HistFile};
pub use histogram::{FillStats, Hist1D, Hist2D, HistObject};
pub use rebin::{rebin_1d, rebin_2d};
pub use response::{fold, response_matrix, response_times_truth, shape_only_rescale};
pub use toys::{ToyPdf, make_toys};
pub use truth::{TruthParameters, TruthRecords, binned_mean, extract_truth_parameters};
