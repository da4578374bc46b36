//! Posterior target for the ensemble sampler.

use crate::likelihood;
use crate::prior::FlatPrior;
use dustvar_core::grid::RegionSampleGrid;
use dustvar_core::population::{N_POPULATION_PARAMS, POPULATION_PARAM_NAMES};
use std::sync::Arc;

/// An unnormalised log-probability density the sampler can explore.
///
/// Implementations must be cheap to share across rayon worker threads;
/// `log_prob` is called concurrently for different positions.
pub trait LogProbability {
    /// Dimensionality of the parameter space.
    fn n_params(&self) -> usize;

    /// Parameter names in position-vector order.
    fn param_names(&self) -> Vec<String>;

    /// Log-probability at `theta`. Negative infinity marks an invalid position.
    fn log_prob(&self, theta: &[f64]) -> f64;
}

/// Flat prior plus the Monte-Carlo-marginalised likelihood.
#[derive(Debug, Clone)]
pub struct HierarchicalPosterior {
    grid: Arc<RegionSampleGrid>,
    prior: FlatPrior,
}

impl HierarchicalPosterior {
    pub fn new(grid: Arc<RegionSampleGrid>, prior: FlatPrior) -> Self {
        Self { grid, prior }
    }

    pub fn grid(&self) -> &RegionSampleGrid {
        &self.grid
    }

    pub fn prior(&self) -> &FlatPrior {
        &self.prior
    }

    pub fn log_prior(&self, theta: &[f64]) -> f64 {
        self.prior.log_prior(theta)
    }

    pub fn log_likelihood(&self, theta: &[f64]) -> f64 {
        likelihood::log_likelihood(theta, &self.grid)
    }
}

impl LogProbability for HierarchicalPosterior {
    fn n_params(&self) -> usize {
        N_POPULATION_PARAMS
    }

    fn param_names(&self) -> Vec<String> {
        POPULATION_PARAM_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn log_prob(&self, theta: &[f64]) -> f64 {
        let lp = self.log_prior(theta);
        if !lp.is_finite() {
            return f64::NEG_INFINITY;
        }
        lp + self.log_likelihood(theta)
    }
}

/// Log-posterior of θ under the default prior bounds.
pub fn log_prob(theta: &[f64], grid: &RegionSampleGrid) -> f64 {
    let lp = crate::prior::log_prior(theta);
    if !lp.is_finite() {
        return f64::NEG_INFINITY;
    }
    lp + likelihood::log_likelihood(theta, grid)
}
