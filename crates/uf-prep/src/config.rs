//! Analysis and rebin configuration.
//!
//! Both documents are plain value objects: they are read once, validated and
//! then passed by reference to every stage that needs them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uf_core::{Error, Result};
use uf_hist::{EdgeAlignment, MisalignmentPolicy, flatten_differential};
use uf_hist::binning::validate_binning;

/// Read a JSON or YAML document, chosen by file extension (YAML by default).
pub fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let value = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)?
    };
    Ok(value)
}

/// Write `value` as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// How systematic response matrices are normalised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystMode {
    /// Keep the normalisation effect of the variation.
    #[default]
    Full,
    /// Rescale each varied response to the nominal reco yield.
    Shape,
}

impl FromStr for SystMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(SystMode::Full),
            "shape" => Ok(SystMode::Shape),
            other => Err(Error::Config(format!("unknown systematics mode '{other}'"))),
        }
    }
}

fn default_migration_matrix_name() -> String {
    "migmat".to_string()
}

fn default_response_matrix_name() -> String {
    "resmat".to_string()
}

/// Top-level analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Path of the rebin configuration.
    pub rebin: PathBuf,
    /// Name of the migration matrix in the input containers.
    #[serde(default = "default_migration_matrix_name")]
    pub migration_matrix_name: String,
    /// Name given to response matrices in the output containers.
    #[serde(default = "default_response_matrix_name")]
    pub response_matrix_name: String,
    /// Background process names.
    #[serde(default)]
    pub background: Vec<String>,
    /// B-tag regions per channel.
    #[serde(default)]
    pub btag_regions: BTreeMap<String, Vec<String>>,
    /// Two-sided systematics per process, as `[up, down]` pairs.
    #[serde(default)]
    pub twosided_syst: BTreeMap<String, Vec<[String; 2]>>,
    /// One-sided systematics per process.
    #[serde(default)]
    pub onesided_syst: BTreeMap<String, Vec<String>>,
    /// Reference samples per process (systematic -> sample).
    #[serde(default)]
    pub reference: BTreeMap<String, BTreeMap<String, String>>,
    /// Multiplier turning a binned mean into the physics parameter, per observable.
    #[serde(default)]
    pub factor: BTreeMap<String, f64>,
    /// Settings consumed by other tools (fitter job options, labels).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AnalysisConfig {
    /// Read the analysis configuration from JSON or YAML.
    pub fn from_path(path: &Path) -> Result<Self> {
        read_config(path)
    }

    /// Read the analysis configuration and the rebin configuration it points to.
    ///
    /// A relative `rebin` path is looked up next to the analysis
    /// configuration first, then relative to the working directory.
    pub fn load_with_rebin(path: &Path) -> Result<(Self, RebinConfig)> {
        let analysis = Self::from_path(path)?;
        let rebin_path = analysis.resolve_rebin_path(path);
        tracing::debug!(rebin = %rebin_path.display(), "reading rebin configuration");
        let rebin = RebinConfig::from_path(&rebin_path)?;
        rebin.validate()?;
        Ok((analysis, rebin))
    }

    fn resolve_rebin_path(&self, config_path: &Path) -> PathBuf {
        if self.rebin.is_absolute() {
            return self.rebin.clone();
        }
        if let Some(dir) = config_path.parent() {
            let candidate = dir.join(&self.rebin);
            if candidate.exists() {
                return candidate;
            }
        }
        self.rebin.clone()
    }

    /// Multiplier of observable `var`.
    pub fn factor_for(&self, var: &str) -> Result<f64> {
        self.factor
            .get(var)
            .copied()
            .ok_or_else(|| Error::Config(format!("no factor configured for observable '{var}'")))
    }

    /// B-tag regions of `channel`.
    pub fn btag_regions_for(&self, channel: &str) -> Result<&[String]> {
        self.btag_regions
            .get(channel)
            .map(|v| v.as_slice())
            .ok_or_else(|| Error::Config(format!("no b-tag regions configured for channel '{channel}'")))
    }

    /// Systematic directories of `process`: up then down variations of the
    /// two-sided systematics, the one-sided ones, then the unique reference
    /// samples.
    pub fn systematics_for(&self, process: &str) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(pairs) = self.twosided_syst.get(process) {
            out.extend(pairs.iter().map(|p| p[0].clone()));
            out.extend(pairs.iter().map(|p| p[1].clone()));
        }
        if let Some(one) = self.onesided_syst.get(process) {
            out.extend(one.iter().cloned());
        }
        if let Some(refs) = self.reference.get(process) {
            let unique: BTreeSet<&String> = refs.values().collect();
            out.extend(unique.into_iter().cloned());
        }
        out
    }
}

fn default_bootstrap_name() -> String {
    "bootstrap".to_string()
}

fn default_nbin_control() -> usize {
    1
}

fn default_edge_tolerance() -> f64 {
    1e-6
}

fn default_observable_range() -> [f64; 2] {
    [-1.0, 1.0]
}

/// Rebin configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebinConfig {
    /// One observable binning per differential segment.
    pub binning: Vec<Vec<f64>>,
    /// Whether the measurement is split in bins of `diff_variable`.
    #[serde(default)]
    pub differential_measurement: bool,
    /// Name of the differential variable.
    #[serde(default)]
    pub diff_variable: String,
    /// Differential bin labels, one per segment.
    #[serde(default)]
    pub diff_bins: Vec<serde_json::Value>,
    /// Number of fine source bins per segment.
    pub nbin_input: usize,
    /// 1-D histograms to rebin (pseudo-data, reweighted truths).
    #[serde(rename = "histo_1D", default)]
    pub histo_1d: Vec<String>,
    /// Whether bootstrap replicas are present.
    #[serde(default)]
    pub bootstrap: bool,
    /// Number of bootstrap replicas.
    #[serde(default)]
    pub n_bootstrap: usize,
    /// Name stem of the bootstrap replicas.
    #[serde(default = "default_bootstrap_name")]
    pub bootstrap_name: String,
    /// Whether some channels serve as control regions.
    #[serde(default)]
    pub is_control: bool,
    /// Control channel -> control variable.
    #[serde(default)]
    pub control_channels: BTreeMap<String, String>,
    /// Control variable -> `[low, high]`.
    #[serde(default)]
    pub control_variable_bounds: BTreeMap<String, [f64; 2]>,
    /// Number of reco bins in control regions.
    #[serde(default = "default_nbin_control")]
    pub nbin_control: usize,
    /// Edge alignment tolerance, in source bins.
    #[serde(default = "default_edge_tolerance")]
    pub edge_tolerance: f64,
    /// Policy for edges that do not align with the source binning.
    #[serde(default)]
    pub misalignment: MisalignmentPolicy,
    /// Range of the observable within one differential segment.
    #[serde(default = "default_observable_range")]
    pub observable_range: [f64; 2],
}

impl RebinConfig {
    /// Read the rebin configuration from JSON or YAML.
    pub fn from_path(path: &Path) -> Result<Self> {
        read_config(path)
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.binning.is_empty() {
            return Err(Error::Config("rebin configuration has no binning".into()));
        }
        for (i, seg) in self.binning.iter().enumerate() {
            validate_binning(seg).map_err(|e| Error::Config(format!("binning {i}: {e}")))?;
        }
        if self.differential_measurement {
            if self.diff_bins.len() != self.binning.len() {
                return Err(Error::Config(format!(
                    "binning has {} segments but {} differential bins are declared",
                    self.binning.len(),
                    self.diff_bins.len()
                )));
            }
        } else if self.binning.len() != 1 {
            return Err(Error::Config(format!(
                "inclusive measurement needs exactly one binning, got {}",
                self.binning.len()
            )));
        }
        if self.nbin_input == 0 {
            return Err(Error::Config("nbin_input must be positive".into()));
        }
        if !(self.edge_tolerance >= 0.0) {
            return Err(Error::Config(format!(
                "edge_tolerance must be non-negative, got {}",
                self.edge_tolerance
            )));
        }
        let [lo, hi] = self.observable_range;
        if !(lo.is_finite() && hi.is_finite()) || hi <= lo {
            return Err(Error::Config(format!("invalid observable_range [{lo}, {hi}]")));
        }
        if self.is_control {
            if self.nbin_control == 0 {
                return Err(Error::Config("nbin_control must be positive".into()));
            }
            for (chan, var) in &self.control_channels {
                if !self.control_variable_bounds.contains_key(var) {
                    return Err(Error::Config(format!(
                        "control channel '{chan}' uses '{var}' which has no bounds"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Edge alignment settings.
    pub fn alignment(&self) -> EdgeAlignment {
        EdgeAlignment { tolerance: self.edge_tolerance, policy: self.misalignment }
    }

    /// File-name suffix: `_<diff_variable>_diff` for differential measurements.
    pub fn suffix(&self) -> String {
        if self.differential_measurement {
            format!("_{}_diff", self.diff_variable)
        } else {
            String::new()
        }
    }

    /// Truth binning on the source axis.
    ///
    /// Differential binnings are flattened into source-bin units; inclusive
    /// measurements use the single binning as is.
    pub fn truth_binning(&self) -> Result<Vec<f64>> {
        if self.differential_measurement {
            let [lo, hi] = self.observable_range;
            flatten_differential(&self.binning, self.nbin_input, (lo, hi))
        } else {
            self.binning
                .first()
                .cloned()
                .ok_or_else(|| Error::Config("rebin configuration has no binning".into()))
        }
    }

    /// Names of the bootstrap replicas (`<bootstrap_name>_<i>`).
    pub fn bootstrap_names(&self) -> Vec<String> {
        if !self.bootstrap {
            return Vec::new();
        }
        (0..self.n_bootstrap).map(|i| format!("{}_{}", self.bootstrap_name, i)).collect()
    }

    /// Control bounds when `channel` is a control region.
    pub fn control_bounds(&self, channel: &str) -> Option<[f64; 2]> {
        if !self.is_control {
            return None;
        }
        let var = self.control_channels.get(channel)?;
        self.control_variable_bounds.get(var).copied()
    }
}
