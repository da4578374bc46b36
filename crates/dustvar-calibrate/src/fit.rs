use crate::config::FitConfig;
use crate::driver::FitDriver;
use crate::posterior::HierarchicalPosterior;
use crate::sampler::EnsembleSampler;
use crate::summary::FitResult;
use crate::{Error, Result};
use dustvar_core::grid::{RegionPosteriors, RegionSampleGrid};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Fit the population model to an already-built region sample grid.
///
/// Runs the full burn-in, restart and production schedule described by
/// `config` and summarises the production chain.
pub fn fit_grid(grid: RegionSampleGrid, config: &FitConfig) -> Result<FitResult> {
    config.validate()?;

    info!(
        n_regions = grid.n_regions(),
        n_samples = grid.n_samples(),
        n_walkers = config.n_walkers,
        total_steps = config.schedule().total_steps(),
        "Starting population fit"
    );

    let posterior = HierarchicalPosterior::new(Arc::new(grid), config.prior.clone());
    let sampler = EnsembleSampler::new(posterior, config.n_walkers, config.seed)?
        .with_stretch_param(config.stretch_scale)?;
    let mut driver = FitDriver::new(
        sampler,
        config.schedule(),
        config.initial_guess.clone(),
        config.jitter,
    )?;

    let start = Instant::now();
    driver.run()?;
    let run_time = start.elapsed().as_secs_f64();

    let (sampler, stages) = driver.into_parts();
    let acceptance_fraction = sampler
        .state()
        .map(|state| state.acceptance_fraction())
        .ok_or_else(|| Error::SamplingError("Sampler finished without a state".to_string()))?;

    let result = FitResult::from_chain(sampler.chain(), acceptance_fraction, stages, run_time);
    info!(
        run_time,
        acceptance_fraction = result.mean_acceptance_fraction(),
        "Finished population fit"
    );
    Ok(result)
}

/// Build the region sample grid from `config.grid`, then fit it.
pub fn fit_posteriors(posteriors: &RegionPosteriors, config: &FitConfig) -> Result<FitResult> {
    config.validate()?;
    let grid = RegionSampleGrid::from_posteriors(posteriors, &config.grid)?;
    fit_grid(grid, config)
}
