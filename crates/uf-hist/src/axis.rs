//! Binned axis with explicit edges.

use serde::{Deserialize, Serialize};
use uf_core::{Error, Result};

/// Ordered bin edges of one histogram axis.
///
/// Source histograms are equal-width (built with [`Axis::uniform`]); rebinned
/// histograms carry the variable edges of the target binning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AxisRepr", into = "AxisRepr")]
pub struct Axis {
    edges: Vec<f64>,
}

/// On-disk forms: `{"n_bins", "min", "max"}` or `{"edges": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum AxisRepr {
    Uniform { n_bins: usize, min: f64, max: f64 },
    Edges { edges: Vec<f64> },
}

impl TryFrom<AxisRepr> for Axis {
    type Error = Error;

    fn try_from(repr: AxisRepr) -> Result<Self> {
        match repr {
            AxisRepr::Uniform { n_bins, min, max } => Axis::uniform(n_bins, min, max),
            AxisRepr::Edges { edges } => Axis::from_edges(edges),
        }
    }
}

impl From<Axis> for AxisRepr {
    fn from(axis: Axis) -> Self {
        AxisRepr::Edges { edges: axis.edges }
    }
}

impl Axis {
    /// Equal-width axis of `n_bins` over `[min, max]`.
    pub fn uniform(n_bins: usize, min: f64, max: f64) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Validation("axis must have at least one bin".into()));
        }
        if !(min.is_finite() && max.is_finite()) || max <= min {
            return Err(Error::Validation(format!("invalid axis range [{min}, {max}]")));
        }
        let width = (max - min) / n_bins as f64;
        let mut edges: Vec<f64> = (0..n_bins).map(|i| min + i as f64 * width).collect();
        edges.push(max);
        Ok(Self { edges })
    }

    /// Axis from explicit, strictly increasing edges.
    pub fn from_edges(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::Validation(format!(
                "axis needs at least 2 edges, got {}",
                edges.len()
            )));
        }
        for w in edges.windows(2) {
            if !(w[0].is_finite() && w[1].is_finite()) || w[1] <= w[0] {
                return Err(Error::Validation(format!(
                    "axis edges must be finite and strictly increasing (got {} then {})",
                    w[0], w[1]
                )));
            }
        }
        Ok(Self { edges })
    }

    /// Number of bins (excluding under/overflow).
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Lower edge of the first bin.
    pub fn min(&self) -> f64 {
        self.edges[0]
    }

    /// Upper edge of the last bin.
    pub fn max(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// Bin edges (length = `n_bins + 1`).
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Average bin width, `(max - min) / n_bins`.
    ///
    /// For the equal-width source histograms this is the granularity used by
    /// the bin-edge mapper.
    pub fn granularity(&self) -> f64 {
        (self.max() - self.min()) / self.n_bins() as f64
    }

    /// Centre of bin `i`.
    pub fn center(&self, i: usize) -> f64 {
        0.5 * (self.edges[i] + self.edges[i + 1])
    }

    /// All bin centres.
    pub fn centers(&self) -> Vec<f64> {
        (0..self.n_bins()).map(|i| self.center(i)).collect()
    }
}
