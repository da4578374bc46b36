//! Population-level parameters of the hierarchical (R_V, f_bump) model.
//!
//! The population is a bivariate Gaussian with mean (μ_RV, μ_fbump) and a
//! covariance built from a lower-triangular factor
//!
//! $$L = \begin{pmatrix} e^{\theta_2} & 0 \\ \theta_4 & e^{\theta_3} \end{pmatrix}, \qquad \Sigma = L L^T$$
//!
//! Exponentiating the diagonal keeps the sampler's domain unconstrained
//! while every θ maps onto a positive-definite Σ.

use crate::errors::{DustvarError, DustvarResult};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// Number of population parameters (two means, three covariance factors).
pub const N_POPULATION_PARAMS: usize = 5;

/// Names of the population parameters, in θ order.
pub const POPULATION_PARAM_NAMES: [&str; N_POPULATION_PARAMS] = [
    "mu_rv",
    "mu_fbump",
    "ln_sigma_rv",
    "ln_sigma_fbump",
    "sigma_rv_fbump",
];

/// Covariances with a determinant at or below this are treated as singular.
pub const MIN_COVARIANCE_DETERMINANT: f64 = 1e-300;

/// Population parameter vector θ.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationParams {
    /// Population mean of R_V (θ0)
    pub mean_rv: f64,
    /// Population mean of f_bump (θ1)
    pub mean_fbump: f64,
    /// Log of the first diagonal entry of the covariance factor (θ2)
    pub ln_sigma_rv: f64,
    /// Log of the second diagonal entry of the covariance factor (θ3)
    pub ln_sigma_fbump: f64,
    /// Off-diagonal entry of the covariance factor (θ4)
    pub cross: f64,
}

impl PopulationParams {
    pub fn new(
        mean_rv: f64,
        mean_fbump: f64,
        ln_sigma_rv: f64,
        ln_sigma_fbump: f64,
        cross: f64,
    ) -> Self {
        Self {
            mean_rv,
            mean_fbump,
            ln_sigma_rv,
            ln_sigma_fbump,
            cross,
        }
    }

    /// Interpret a raw sampler position as population parameters.
    pub fn from_slice(theta: &[f64]) -> DustvarResult<Self> {
        match theta {
            &[mean_rv, mean_fbump, ln_sigma_rv, ln_sigma_fbump, cross] => Ok(Self::new(
                mean_rv,
                mean_fbump,
                ln_sigma_rv,
                ln_sigma_fbump,
                cross,
            )),
            _ => Err(DustvarError::InvalidParameter(format!(
                "Expected {} population parameters, got {}",
                N_POPULATION_PARAMS,
                theta.len()
            ))),
        }
    }

    pub fn to_array(&self) -> [f64; N_POPULATION_PARAMS] {
        [
            self.mean_rv,
            self.mean_fbump,
            self.ln_sigma_rv,
            self.ln_sigma_fbump,
            self.cross,
        ]
    }

    pub fn mean(&self) -> Vector2<f64> {
        Vector2::new(self.mean_rv, self.mean_fbump)
    }

    /// Lower-triangular factor L with exponentiated diagonal.
    pub fn lower_factor(&self) -> Matrix2<f64> {
        Matrix2::new(
            self.ln_sigma_rv.exp(),
            0.0,
            self.cross,
            self.ln_sigma_fbump.exp(),
        )
    }

    /// Population covariance Σ = L·Lᵀ.
    pub fn covariance(&self) -> Matrix2<f64> {
        let l = self.lower_factor();
        l * l.transpose()
    }

    /// Inverse and log-determinant of Σ, or `None` if Σ is numerically singular.
    pub fn decompose(&self) -> Option<CovarianceDecomposition> {
        CovarianceDecomposition::new(self.covariance())
    }
}

/// The pieces of Σ the Gaussian log-density needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CovarianceDecomposition {
    pub inverse: Matrix2<f64>,
    pub ln_det: f64,
}

impl CovarianceDecomposition {
    /// Invert a covariance matrix, guarding against singular or non-finite input.
    pub fn new(covariance: Matrix2<f64>) -> Option<Self> {
        if covariance.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let det = covariance.determinant();
        if !det.is_finite() || det <= MIN_COVARIANCE_DETERMINANT {
            return None;
        }

        let inverse = covariance.try_inverse()?;
        if inverse.iter().any(|v| !v.is_finite()) {
            return None;
        }

        Some(Self {
            inverse,
            ln_det: det.ln(),
        })
    }

    /// Squared Mahalanobis distance rᵀ Σ⁻¹ r for a residual (dx, dy).
    #[inline]
    pub fn mahalanobis_sq(&self, dx: f64, dy: f64) -> f64 {
        let inv = &self.inverse;
        dx * (inv[(0, 0)] * dx + inv[(0, 1)] * dy) + dy * (inv[(1, 0)] * dx + inv[(1, 1)] * dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_from_slice_roundtrip() {
        let theta = [4.5, 0.8, 0.3, 0.3, 0.1];
        let params = PopulationParams::from_slice(&theta).unwrap();
        assert_eq!(params.mean_rv, 4.5);
        assert_eq!(params.cross, 0.1);
        assert_eq!(params.to_array(), theta);
    }

    #[test]
    fn test_from_slice_wrong_length() {
        assert!(PopulationParams::from_slice(&[1.0, 2.0]).is_err());
        assert!(PopulationParams::from_slice(&[0.0; 6]).is_err());
    }

    #[test]
    fn test_lower_factor_layout() {
        let params = PopulationParams::new(0.0, 0.0, 0.0, 0.3_f64.ln(), 0.25);
        let l = params.lower_factor();
        assert!(is_close!(l[(0, 0)], 1.0));
        assert_eq!(l[(0, 1)], 0.0);
        assert!(is_close!(l[(1, 0)], 0.25));
        assert!(is_close!(l[(1, 1)], 0.3));
    }

    #[test]
    fn test_covariance_entries() {
        // L = [[a, 0], [c, b]] => Σ = [[a², ac], [ac, c² + b²]]
        let (a, b, c) = (0.3_f64, 0.3_f64, 0.1_f64);
        let params = PopulationParams::new(4.5, 0.8, a.ln(), b.ln(), c);
        let cov = params.covariance();

        assert!(is_close!(cov[(0, 0)], a * a));
        assert!(is_close!(cov[(0, 1)], a * c));
        assert!(is_close!(cov[(1, 0)], a * c));
        assert!(is_close!(cov[(1, 1)], c * c + b * b));
    }

    #[test]
    fn test_covariance_positive_definite_for_any_theta() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..500 {
            let params = PopulationParams::new(
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-10.0..10.0),
            );
            let cov = params.covariance();
            assert!(cov[(0, 0)] > 0.0);
            assert!(cov.determinant() > 0.0, "Σ not positive definite: {}", cov);

            let decomposition = params.decompose().expect("should invert");
            // det(L Lᵀ) = (e^θ2 e^θ3)^2
            let expected = 2.0 * (params.ln_sigma_rv + params.ln_sigma_fbump);
            assert!((decomposition.ln_det - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_decompose_rejects_singular() {
        // exp(-400) squared underflows the determinant
        let params = PopulationParams::new(0.0, 0.0, -400.0, 0.0, 0.0);
        assert!(params.decompose().is_none());

        let overflow = PopulationParams::new(0.0, 0.0, 800.0, 0.0, 0.0);
        assert!(overflow.decompose().is_none());

        let nan = PopulationParams::new(0.0, 0.0, f64::NAN, 0.0, 0.0);
        assert!(nan.decompose().is_none());
    }

    #[test]
    fn test_mahalanobis_identity() {
        let params = PopulationParams::new(0.0, 0.0, 0.0, 0.0, 0.0);
        let decomposition = params.decompose().unwrap();
        assert!(is_close!(decomposition.ln_det, 0.0, abs_tol = 1e-12));
        assert!(is_close!(decomposition.mahalanobis_sq(3.0, 4.0), 25.0));
    }

    #[test]
    fn test_mahalanobis_matches_matrix_product() {
        let params = PopulationParams::new(0.0, 0.0, 0.2, -0.4, 0.7);
        let decomposition = params.decompose().unwrap();
        let r = Vector2::new(0.6, -1.3);
        let expected = (r.transpose() * decomposition.inverse * r)[(0, 0)];
        assert!(is_close!(decomposition.mahalanobis_sq(r[0], r[1]), expected));
    }
}
