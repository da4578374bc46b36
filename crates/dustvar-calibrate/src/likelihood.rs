//! Monte-Carlo-marginalised likelihood of the population parameters.
//!
//! Region `r` has an intrinsic (R_V, f_bump) that is only known through its
//! posterior draws x_{r,1..S}. The probability of that region under the
//! population N(μ, Σ) is the integral of the population density over the
//! region's posterior, estimated by the sample average
//!
//! $$p_r(\theta) \approx \frac{1}{S} \sum_{s=1}^{S} \mathcal{N}(x_{r,s} \mid \mu, \Sigma)$$
//!
//! Regions are independent, so the total log-likelihood is $\sum_r \ln p_r$.
//! Each region's average is taken in log space with log-sum-exp so that
//! far-away draws do not underflow.

use dustvar_core::grid::RegionSampleGrid;
use dustvar_core::population::{CovarianceDecomposition, PopulationParams};
use dustvar_core::utils::numeric::log_sum_exp;
use ndarray::ArrayView2;

/// ln(2π), the normalising constant of a bivariate Gaussian.
const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Log-likelihood of θ given the region sample grid.
///
/// Returns negative infinity when θ is malformed, when Σ(θ) is numerically
/// singular, or when the result would otherwise be non-finite.
pub fn log_likelihood(theta: &[f64], grid: &RegionSampleGrid) -> f64 {
    let params = match PopulationParams::from_slice(theta) {
        Ok(params) => params,
        Err(_) => return f64::NEG_INFINITY,
    };
    let decomposition = match params.decompose() {
        Some(decomposition) => decomposition,
        None => return f64::NEG_INFINITY,
    };

    let mean = (params.mean_rv, params.mean_fbump);
    let mut terms = Vec::with_capacity(grid.n_samples());

    let total: f64 = grid
        .regions()
        .map(|region| region_log_likelihood(region, mean, &decomposition, &mut terms))
        .sum();

    if total.is_nan() {
        f64::NEG_INFINITY
    } else {
        total
    }
}

/// ln p_r for one region's (S, 2) block of samples.
///
/// `terms` is scratch space reused across regions.
pub fn region_log_likelihood(
    region: ArrayView2<'_, f64>,
    mean: (f64, f64),
    decomposition: &CovarianceDecomposition,
    terms: &mut Vec<f64>,
) -> f64 {
    let n_samples = region.nrows();
    if n_samples == 0 {
        return f64::NEG_INFINITY;
    }

    terms.clear();
    terms.extend(region.outer_iter().map(|sample| {
        let dx = sample[0] - mean.0;
        let dy = sample[1] - mean.1;
        -0.5 * decomposition.mahalanobis_sq(dx, dy)
    }));

    let normalisation = -0.5 * decomposition.ln_det - LN_2PI - (n_samples as f64).ln();
    log_sum_exp(terms) + normalisation
}
