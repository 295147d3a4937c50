//! Pseudo-data toys fluctuated bin by bin from a histogram.
//!
//! Sampling is deterministic: toy `i` uses seed `seed + i`.

use std::str::FromStr;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal, Poisson};
use serde::{Deserialize, Serialize};
use uf_core::{Error, Result};

use crate::histogram::HistObject;

/// Per-bin fluctuation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToyPdf {
    /// `Poisson(content)`
    Poisson,
    /// `Normal(content, error)`
    Gaus,
    /// MC-statistics fluctuation: `Poisson(neff) * content / neff`, `neff = (content/error)^2`.
    McStat,
}

impl FromStr for ToyPdf {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "poisson" => Ok(ToyPdf::Poisson),
            "gaus" | "gauss" | "gaussian" => Ok(ToyPdf::Gaus),
            "mcstat" => Ok(ToyPdf::McStat),
            other => Err(Error::Validation(format!("unknown toy pdf '{other}'"))),
        }
    }
}

fn poisson(lambda: f64, rng: &mut StdRng) -> f64 {
    if !lambda.is_finite() || lambda <= 0.0 {
        return 0.0;
    }
    match Poisson::new(lambda) {
        Ok(p) => p.sample(rng),
        Err(_) => 0.0,
    }
}

fn fluctuate(content: f64, error: f64, pdf: ToyPdf, rng: &mut StdRng) -> f64 {
    match pdf {
        ToyPdf::Poisson => poisson(content, rng),
        ToyPdf::Gaus => match Normal::new(content, error) {
            Ok(n) if error > 0.0 => n.sample(rng),
            _ => content,
        },
        ToyPdf::McStat => {
            if content <= 0.0 || !content.is_finite() {
                return 0.0;
            }
            if !(error > 0.0) {
                return content;
            }
            let neff = (content / error).powi(2);
            poisson(neff, rng) * content / neff
        }
    }
}

/// Generate `n_toys` fluctuated copies of `obj`, named `toy<name>_<i>`.
///
/// Errors are copied from the source object unchanged.
pub fn make_toys(obj: &HistObject, n_toys: usize, pdf: ToyPdf, seed: u64) -> Vec<HistObject> {
    (0..n_toys)
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
            let mut toy = obj.clone();
            let (content, error) = match &mut toy {
                HistObject::OneD(h) => (&mut h.content, &h.error),
                HistObject::TwoD(h) => (&mut h.content, &h.error),
            };
            for (c, &e) in content.iter_mut().zip(error.iter()) {
                *c = fluctuate(*c, e, pdf, &mut rng);
            }
            toy.set_name(&format!("toy{}_{}", obj.name(), i));
            toy
        })
        .collect()
}
