//! Result records written as JSON side files

use serde::{Deserialize, Serialize};

/// Unfolded observable parameter, one entry per differential segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnfoldedParameter {
    /// Central value per segment
    pub mean: Vec<f64>,
    /// Upward uncertainty per segment
    pub uncert_up: Vec<f64>,
    /// Downward uncertainty per segment
    pub uncert_down: Vec<f64>,
}

impl UnfoldedParameter {
    /// Number of differential segments
    pub fn n_segments(&self) -> usize {
        self.mean.len()
    }

    /// Push the result for one more segment
    pub fn push(&mut self, mean: f64, up: f64, down: f64) {
        self.mean.push(mean);
        self.uncert_up.push(up);
        self.uncert_down.push(down);
    }
}

/// Straight-line fit results of the linearity test, one entry per fitted
/// segment. Single-bin segments carry no shape and are not fitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearityResult {
    /// Index of each fitted segment in the binning
    #[serde(default)]
    pub segment: Vec<usize>,
    /// Fitted slope
    pub slope: Vec<f64>,
    /// Slope uncertainty
    pub slope_err: Vec<f64>,
    /// Fitted offset
    pub offset: Vec<f64>,
    /// Offset uncertainty
    pub offset_err: Vec<f64>,
}

/// Ensemble (pull) test over unfolded pseudo-experiments, one entry per
/// measured segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    /// Index of each tested segment in the binning
    pub segment: Vec<usize>,
    /// Mean parameter over the ensemble
    pub ensemble_mean: Vec<f64>,
    /// Standard deviation of the parameter over the ensemble
    pub ensemble_std: Vec<f64>,
    /// `(ensemble_mean - nominal) / nominal_uncert_up`
    pub pull: Vec<f64>,
    /// `ensemble_std / |nominal_uncert_up|`
    pub constraint: Vec<f64>,
    /// Number of pseudo-experiments that entered the ensemble
    pub n_toys: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unfolded_parameter_json_shape() {
        let mut p = UnfoldedParameter::default();
        p.push(0.3, 0.02, 0.025);
        p.push(-0.1, 0.03, 0.03);
        assert_eq!(p.n_segments(), 2);

        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["mean"].as_array().unwrap().len(), 2);
        assert_eq!(v["uncert_down"][0].as_f64(), Some(0.025));

        let back: UnfoldedParameter = serde_json::from_value(v).unwrap();
        approx::assert_relative_eq!(back.uncert_up[1], 0.03);
    }
}
