//! Run configuration for a population fit.
//!
//! Every field has a default, so a configuration file only needs the
//! values that differ:
//!
//! ```toml
//! n_walkers = 64
//! seed = 7
//!
//! [grid]
//! n_samples = 100
//!
//! [grid.selection]
//! kind = "aux_above"
//! threshold = 0.5
//! ```

use crate::driver::BurnInSchedule;
use crate::prior::FlatPrior;
use crate::{Error, Result};
use dustvar_core::grid::GridConfig;
use dustvar_core::population::N_POPULATION_PARAMS;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Steps for the main burn-in, the final burn-in and the production run.
    ///
    /// Default: 1000
    pub run_steps: usize,

    /// Steps for each burn-in restart.
    ///
    /// Default: 500
    pub restart_steps: usize,

    /// Number of burn-in restarts.
    ///
    /// Default: 8
    pub n_restarts: usize,

    /// Ensemble size. Must be even and at least twice the number of parameters.
    ///
    /// Default: 32
    pub n_walkers: usize,

    /// Starting point for the walker ball.
    ///
    /// Default: [4.5, 0.8, 0.3, 0.3, 0.1]
    pub initial_guess: Vec<f64>,

    /// Seed for the sampler's random number generator.
    ///
    /// Default: 200
    pub seed: u64,

    /// Standard deviation of the Gaussian jitter used when (re)seeding walkers.
    ///
    /// Default: 1e-4
    pub jitter: f64,

    /// Stretch move scale `a`.
    ///
    /// Default: 2.0
    pub stretch_scale: f64,

    pub prior: FlatPrior,

    pub grid: GridConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            run_steps: 1000,
            restart_steps: 500,
            n_restarts: 8,
            n_walkers: 32,
            initial_guess: vec![4.5, 0.8, 0.3, 0.3, 0.1],
            seed: 200,
            jitter: 1e-4,
            stretch_scale: 2.0,
            prior: FlatPrior::default(),
            grid: GridConfig::default(),
        }
    }
}

impl FitConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn schedule(&self) -> BurnInSchedule {
        BurnInSchedule {
            run_steps: self.run_steps,
            restart_steps: self.restart_steps,
            n_restarts: self.n_restarts,
        }
    }

    /// Check the configuration before any sampling starts.
    pub fn validate(&self) -> Result<()> {
        if self.n_walkers % 2 != 0 || self.n_walkers < 2 * N_POPULATION_PARAMS {
            return Err(Error::Config(format!(
                "n_walkers must be even and at least {}, got {}",
                2 * N_POPULATION_PARAMS,
                self.n_walkers
            )));
        }
        if self.run_steps == 0 {
            return Err(Error::Config("run_steps must be at least 1".to_string()));
        }
        if self.n_restarts > 0 && self.restart_steps == 0 {
            return Err(Error::Config(
                "restart_steps must be at least 1 when restarts are enabled".to_string(),
            ));
        }
        if !(self.jitter > 0.0) || !self.jitter.is_finite() {
            return Err(Error::Config(format!(
                "jitter must be positive and finite, got {}",
                self.jitter
            )));
        }
        if !(self.stretch_scale > 1.0) {
            return Err(Error::Config(format!(
                "stretch_scale must be greater than 1, got {}",
                self.stretch_scale
            )));
        }
        if self.grid.n_samples == 0 {
            return Err(Error::Config("grid.n_samples must be at least 1".to_string()));
        }

        self.prior.validate()?;

        if self.initial_guess.len() != N_POPULATION_PARAMS {
            return Err(Error::Config(format!(
                "initial_guess must have {} values, got {}",
                N_POPULATION_PARAMS,
                self.initial_guess.len()
            )));
        }
        if !self.prior.contains(&self.initial_guess) {
            return Err(Error::Config(format!(
                "initial_guess {:?} lies outside the prior support",
                self.initial_guess
            )));
        }

        Ok(())
    }
}
