//! Flat priors on the population parameters.
//!
//! Each component of θ has an open interval of support. Inside every
//! interval the (unnormalised) log-prior is 0; outside any of them it is
//! negative infinity, which the ensemble sampler treats as a hard rejection.

use crate::{Error, Result};
use dustvar_core::population::N_POPULATION_PARAMS;
use serde::{Deserialize, Serialize};

/// Open interval (lower, upper).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if !(lower < upper) {
            return Err(Error::InvalidParameter(format!(
                "Lower bound ({}) must be less than upper bound ({})",
                lower, upper
            )));
        }
        Ok(Self { lower, upper })
    }

    /// Strict containment; the endpoints and NaN are outside.
    pub fn contains(&self, value: f64) -> bool {
        self.lower < value && value < self.upper
    }
}

/// Flat prior over θ = (μ_RV, μ_fbump, θ2, θ3, θ4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatPrior {
    /// Support of the population mean R_V.
    ///
    /// Default: (0, 6)
    pub mean_rv: Bounds,

    /// Support of the population mean f_bump.
    ///
    /// Default: (0, 1.5)
    pub mean_fbump: Bounds,

    /// Support of the log diagonal factor for R_V.
    ///
    /// Default: (0, 2)
    pub ln_sigma_rv: Bounds,

    /// Support of the log diagonal factor for f_bump.
    ///
    /// Default: (0, 2)
    pub ln_sigma_fbump: Bounds,

    /// Support of the off-diagonal factor.
    ///
    /// Default: (0, 2). Negative cross terms are outside the support.
    pub sigma_rv_fbump: Bounds,
}

impl Default for FlatPrior {
    fn default() -> Self {
        Self {
            mean_rv: Bounds {
                lower: 0.0,
                upper: 6.0,
            },
            mean_fbump: Bounds {
                lower: 0.0,
                upper: 1.5,
            },
            ln_sigma_rv: Bounds {
                lower: 0.0,
                upper: 2.0,
            },
            ln_sigma_fbump: Bounds {
                lower: 0.0,
                upper: 2.0,
            },
            sigma_rv_fbump: Bounds {
                lower: 0.0,
                upper: 2.0,
            },
        }
    }
}

impl FlatPrior {
    /// Bounds in θ order.
    pub fn bounds(&self) -> [Bounds; N_POPULATION_PARAMS] {
        [
            self.mean_rv,
            self.mean_fbump,
            self.ln_sigma_rv,
            self.ln_sigma_fbump,
            self.sigma_rv_fbump,
        ]
    }

    pub fn contains(&self, theta: &[f64]) -> bool {
        theta.len() == N_POPULATION_PARAMS
            && self
                .bounds()
                .iter()
                .zip(theta)
                .all(|(bounds, &value)| bounds.contains(value))
    }

    /// 0.0 inside the support, negative infinity outside.
    pub fn log_prior(&self, theta: &[f64]) -> f64 {
        if self.contains(theta) {
            0.0
        } else {
            f64::NEG_INFINITY
        }
    }

    /// Check every bound is a proper interval.
    pub fn validate(&self) -> Result<()> {
        for bounds in self.bounds() {
            Bounds::new(bounds.lower, bounds.upper)?;
        }
        Ok(())
    }
}

/// Log-prior of θ under the default bounds.
pub fn log_prior(theta: &[f64]) -> f64 {
    FlatPrior::default().log_prior(theta)
}
