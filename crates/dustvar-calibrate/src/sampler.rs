//! Affine-invariant ensemble sampler (emcee algorithm).
//!
//! Implements the Goodman & Weare (2010) stretch move. The ensemble is split
//! into two halves; each half proposes moves along lines through randomly
//! chosen walkers of the other half, so the proposal adapts to the shape of
//! the target without tuning.
//!
//! All randomness comes from a single seeded [`ChaCha8Rng`]. Proposals and
//! acceptance draws are made sequentially, while the log-probabilities of a
//! half-ensemble's proposals are evaluated in parallel with rayon. A given
//! seed therefore reproduces the same chain on any number of threads.
//!
//! # References
//!
//! Goodman, J., & Weare, J. (2010). Ensemble samplers with affine invariance.
//! Communications in Applied Mathematics and Computational Science, 5(1), 65-80.

use crate::{posterior::LogProbability, Error, Result};
use indexmap::IndexMap;
use ndarray::{s, Array1, Array2, Array3, ArrayView1};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Information about sampling progress.
///
/// Passed to progress callbacks once per iteration.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Current iteration number within this run (0-indexed)
    pub iteration: usize,

    /// Total number of iterations in this run
    pub total: usize,

    /// Mean acceptance rate across all walkers since the last reset
    pub acceptance_rate: f64,

    /// Mean log probability across all walkers
    pub mean_log_prob: f64,
}

/// Walker positions, their log probabilities and acceptance counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerState {
    /// Current positions of walkers: shape (n_walkers, n_params)
    pub positions: Array2<f64>,

    /// Log probabilities at current positions: shape (n_walkers,)
    pub log_probs: Array1<f64>,

    /// Accepted proposals per walker since the last reset
    pub n_accepted: Array1<usize>,

    /// Proposals made per walker since the last reset
    pub n_proposed: Array1<usize>,
}

impl SamplerState {
    /// Wrap initial positions; log probabilities start at negative infinity
    /// until the sampler evaluates them.
    pub fn new(positions: Array2<f64>) -> Result<Self> {
        let n_walkers = positions.nrows();
        if n_walkers < 2 {
            return Err(Error::SamplingError(
                "Must have at least 2 walkers for ensemble sampling".to_string(),
            ));
        }

        Ok(Self {
            positions,
            log_probs: Array1::from_elem(n_walkers, f64::NEG_INFINITY),
            n_accepted: Array1::zeros(n_walkers),
            n_proposed: Array1::zeros(n_walkers),
        })
    }

    pub fn n_walkers(&self) -> usize {
        self.positions.nrows()
    }

    pub fn n_params(&self) -> usize {
        self.positions.ncols()
    }

    /// Ratio of accepted to proposed moves for each walker.
    ///
    /// Walkers without proposals report 0.0.
    pub fn acceptance_fraction(&self) -> Array1<f64> {
        let mut fractions = Array1::zeros(self.n_walkers());
        for i in 0..self.n_walkers() {
            if self.n_proposed[i] > 0 {
                fractions[i] = self.n_accepted[i] as f64 / self.n_proposed[i] as f64;
            }
        }
        fractions
    }

    pub fn mean_acceptance_rate(&self) -> f64 {
        let total_accepted: usize = self.n_accepted.iter().sum();
        let total_proposed: usize = self.n_proposed.iter().sum();

        if total_proposed > 0 {
            total_accepted as f64 / total_proposed as f64
        } else {
            0.0
        }
    }

    fn reset_counters(&mut self) {
        self.n_accepted.fill(0);
        self.n_proposed.fill(0);
    }
}

/// Stored walker positions and log probabilities, one entry per iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    /// Per-step positions, each of shape (n_walkers, n_params)
    samples: Vec<Array2<f64>>,

    /// Per-step log probabilities, each of shape (n_walkers,)
    log_probs: Vec<Array1<f64>>,

    param_names: Vec<String>,
}

impl Chain {
    pub fn new(param_names: Vec<String>) -> Self {
        Self {
            samples: Vec::new(),
            log_probs: Vec::new(),
            param_names,
        }
    }

    pub fn push(&mut self, positions: Array2<f64>, log_probs: Array1<f64>) {
        self.samples.push(positions);
        self.log_probs.push(log_probs);
    }

    /// Number of stored iterations.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn n_walkers(&self) -> usize {
        self.samples.first().map_or(0, |s| s.nrows())
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Chain as an array of shape (n_walkers, n_steps, n_params).
    pub fn to_array3(&self) -> Array3<f64> {
        let mut chain = Array3::zeros((self.n_walkers(), self.len(), self.param_names.len()));
        for (step, positions) in self.samples.iter().enumerate() {
            chain.slice_mut(s![.., step, ..]).assign(positions);
        }
        chain
    }

    /// Walker-major flattened samples of shape (n_walkers * n_steps, n_params).
    ///
    /// Row `w * n_steps + t` holds walker `w` at step `t`.
    pub fn flat_samples(&self) -> Array2<f64> {
        let n_steps = self.len();
        let mut flat = Array2::zeros((self.n_walkers() * n_steps, self.param_names.len()));

        for (step, positions) in self.samples.iter().enumerate() {
            for (walker, row) in positions.outer_iter().enumerate() {
                flat.row_mut(walker * n_steps + step).assign(&row);
            }
        }

        flat
    }

    /// Log probabilities of shape (n_walkers, n_steps).
    pub fn lnprob_traces(&self) -> Array2<f64> {
        let mut traces = Array2::zeros((self.n_walkers(), self.len()));
        for (step, log_probs) in self.log_probs.iter().enumerate() {
            traces.column_mut(step).assign(log_probs);
        }
        traces
    }

    /// Log probabilities in the same walker-major order as [`Chain::flat_samples`].
    pub fn flat_log_probs(&self) -> Array1<f64> {
        let n_steps = self.len();
        let mut flat = Array1::zeros(self.n_walkers() * n_steps);

        for (step, log_probs) in self.log_probs.iter().enumerate() {
            for (walker, &lp) in log_probs.iter().enumerate() {
                flat[walker * n_steps + step] = lp;
            }
        }

        flat
    }

    /// Trace of one parameter for every walker, shape (n_walkers, n_steps).
    ///
    /// Returns `None` for an unknown parameter name.
    pub fn walker_traces(&self, param: &str) -> Option<Array2<f64>> {
        let idx = self.param_names.iter().position(|name| name == param)?;
        let mut traces = Array2::zeros((self.n_walkers(), self.len()));
        for (step, positions) in self.samples.iter().enumerate() {
            traces.column_mut(step).assign(&positions.column(idx));
        }
        Some(traces)
    }

    /// Highest stored log probability and the mean position of every sample
    /// attaining it.
    ///
    /// Returns `None` when the chain is empty or no log probability is finite.
    pub fn max_log_prob_center(&self) -> Option<(f64, Array1<f64>)> {
        let max = self
            .log_probs
            .iter()
            .flat_map(|lp| lp.iter().copied())
            .fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return None;
        }

        let mut center = Array1::zeros(self.param_names.len());
        let mut count = 0usize;
        for (positions, log_probs) in self.samples.iter().zip(&self.log_probs) {
            for (row, &lp) in positions.outer_iter().zip(log_probs) {
                if lp == max {
                    center += &row;
                    count += 1;
                }
            }
        }

        center /= count as f64;
        Some((max, center))
    }

    /// Integrated autocorrelation time τ = 1 + 2 Σ ρ(k) for each parameter.
    ///
    /// ρ(k) is averaged over walkers and summed until the first non-positive
    /// lag. Returns an empty map with fewer than 10 stored iterations.
    pub fn autocorr_time(&self) -> IndexMap<String, f64> {
        self.summed_autocorrelation()
            .into_iter()
            .map(|(name, sum)| (name, 1.0 + 2.0 * sum))
            .collect()
    }

    /// Effective sample size N / τ for each parameter, N counting all walkers.
    pub fn ess(&self) -> IndexMap<String, f64> {
        let n_total = (self.len() * self.n_walkers()) as f64;
        self.summed_autocorrelation()
            .into_iter()
            .map(|(name, sum)| (name, n_total / (1.0 + 2.0 * sum)))
            .collect()
    }

    fn summed_autocorrelation(&self) -> IndexMap<String, f64> {
        let mut result = IndexMap::new();

        let n_steps = self.len();
        if n_steps < 10 {
            return result;
        }

        let n_walkers = self.n_walkers();
        let max_lag = (n_steps / 2).min(100);

        for (param_idx, param_name) in self.param_names.iter().enumerate() {
            let mut avg_autocorr = vec![0.0; max_lag];

            for walker_idx in 0..n_walkers {
                let trace: Vec<f64> = self
                    .samples
                    .iter()
                    .map(|sample| sample[[walker_idx, param_idx]])
                    .collect();
                let autocorr = compute_autocorrelation(&trace, max_lag);
                for (avg, ac) in avg_autocorr.iter_mut().zip(autocorr) {
                    *avg += ac / n_walkers as f64;
                }
            }

            let sum: f64 = avg_autocorr.iter().take_while(|&&ac| ac > 0.0).sum();
            result.insert(param_name.clone(), sum);
        }

        result
    }
}

/// Autocorrelation of `chain` at lags 1..=max_lag.
fn compute_autocorrelation(chain: &[f64], max_lag: usize) -> Vec<f64> {
    let n = chain.len();
    let mean = chain.iter().sum::<f64>() / n as f64;
    let variance = chain.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n as f64;

    if variance == 0.0 {
        return vec![0.0; max_lag];
    }

    (1..=max_lag)
        .map(|lag| {
            if lag >= n {
                return 0.0;
            }
            let covariance = (0..n - lag)
                .map(|i| (chain[i] - mean) * (chain[i + lag] - mean))
                .sum::<f64>()
                / (n - lag) as f64;
            covariance / variance
        })
        .collect()
}

/// Stretch move proposal with scale parameter `a`.
///
/// The default of 2.0 is the value recommended by Goodman & Weare (2010).
#[derive(Debug, Clone, Copy)]
pub struct StretchMove {
    pub a: f64,
}

impl Default for StretchMove {
    fn default() -> Self {
        Self { a: 2.0 }
    }
}

impl StretchMove {
    /// `a` must be greater than 1.
    pub fn new(a: f64) -> Result<Self> {
        if !(a > 1.0) {
            return Err(Error::InvalidParameter(format!(
                "Stretch move scale parameter must be > 1.0, got {}",
                a
            )));
        }
        Ok(Self { a })
    }

    /// Sample z from g(z) ∝ 1/√z on [1/a, a].
    ///
    /// Inverse-CDF sampling: z = ((a-1)u + 1)² / a for u ~ Uniform(0, 1).
    pub fn sample_z<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen();
        ((self.a - 1.0) * u + 1.0).powi(2) / self.a
    }

    /// min(1, z^(n_params - 1) · exp(log_prob_new - log_prob_old)).
    pub fn acceptance_probability(
        &self,
        z: f64,
        n_params: usize,
        log_prob_old: f64,
        log_prob_new: f64,
    ) -> f64 {
        if !log_prob_new.is_finite() {
            return 0.0;
        }

        let log_ratio = (n_params as f64 - 1.0) * z.ln() + (log_prob_new - log_prob_old);
        log_ratio.exp().min(1.0)
    }

    /// Propose y = c + z (x - c) for a complementary walker c chosen uniformly.
    ///
    /// Returns the proposal and the stretch factor used.
    pub fn propose<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        current_pos: ArrayView1<f64>,
        complementary_positions: &Array2<f64>,
    ) -> (Array1<f64>, f64) {
        let z = self.sample_z(rng);

        let comp_idx = rng.gen_range(0..complementary_positions.nrows());
        let comp_pos = complementary_positions.row(comp_idx);

        let proposal = &comp_pos + &((&current_pos - &comp_pos) * z);
        (proposal, z)
    }
}

/// How walker positions are created before a run.
#[derive(Debug, Clone)]
pub enum WalkerInit {
    /// Independent N(0, sigma²) jitter around a point in every dimension
    Ball {
        center: Vec<f64>,
        sigma: f64,
    },
}

impl WalkerInit {
    /// Produce an (n_walkers, n_params) array of starting positions.
    pub fn initialize<R: Rng + ?Sized>(
        &self,
        n_walkers: usize,
        n_params: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>> {
        match self {
            WalkerInit::Ball { center, sigma } => {
                if center.len() != n_params {
                    return Err(Error::InvalidParameter(format!(
                        "Ball center length {} does not match parameter count {}",
                        center.len(),
                        n_params
                    )));
                }
                // Normal::new accepts a negative standard deviation
                if !sigma.is_finite() || *sigma <= 0.0 {
                    return Err(Error::InvalidParameter(format!(
                        "Jitter scale must be positive and finite, got {}",
                        sigma
                    )));
                }
                let jitter = Normal::new(0.0, *sigma).map_err(|e| {
                    Error::InvalidParameter(format!("Invalid jitter scale {}: {}", sigma, e))
                })?;

                let mut positions = Array2::zeros((n_walkers, n_params));
                for mut walker in positions.outer_iter_mut() {
                    for (value, &c) in walker.iter_mut().zip(center) {
                        *value = c + jitter.sample(rng);
                    }
                }
                Ok(positions)
            }
        }
    }
}

/// Affine-invariant ensemble sampler over a [`LogProbability`] target.
///
/// The sampler owns its RNG, the current walker state and the chain stored
/// since the last [`EnsembleSampler::reset`]. Successive calls to
/// [`EnsembleSampler::run_mcmc`] append to the chain; `reset` discards it
/// together with the acceptance counters.
///
/// # Example
///
/// ```ignore
/// let mut sampler = EnsembleSampler::new(posterior, 32, 200)?;
/// let p0 = sampler.initialize(&WalkerInit::Ball { center, sigma: 1e-4 })?;
/// let end = sampler.run_mcmc(p0, 1000)?.positions.clone();
/// sampler.reset();
/// sampler.run_mcmc(end, 1000)?;
/// let flat = sampler.chain().flat_samples();
/// ```
pub struct EnsembleSampler<P: LogProbability> {
    target: P,
    stretch: StretchMove,
    n_walkers: usize,
    rng: ChaCha8Rng,
    state: Option<SamplerState>,
    chain: Chain,
}

impl<P: LogProbability + Sync> EnsembleSampler<P> {
    /// `n_walkers` must be even and at least twice the target's dimension.
    pub fn new(target: P, n_walkers: usize, seed: u64) -> Result<Self> {
        let n_params = target.n_params();
        if n_walkers < 2 * n_params || n_walkers < 2 {
            return Err(Error::SamplingError(format!(
                "Need at least {} walkers for {} parameters, got {}",
                (2 * n_params).max(2),
                n_params,
                n_walkers
            )));
        }
        if n_walkers % 2 != 0 {
            return Err(Error::SamplingError(format!(
                "Number of walkers must be even, got {}",
                n_walkers
            )));
        }

        let chain = Chain::new(target.param_names());
        Ok(Self {
            target,
            stretch: StretchMove::default(),
            n_walkers,
            rng: ChaCha8Rng::seed_from_u64(seed),
            state: None,
            chain,
        })
    }

    pub fn with_stretch_param(mut self, a: f64) -> Result<Self> {
        self.stretch = StretchMove::new(a)?;
        Ok(self)
    }

    pub fn target(&self) -> &P {
        &self.target
    }

    pub fn n_walkers(&self) -> usize {
        self.n_walkers
    }

    pub fn n_params(&self) -> usize {
        self.target.n_params()
    }

    /// Draw starting positions using the sampler's own RNG stream.
    pub fn initialize(&mut self, init: &WalkerInit) -> Result<Array2<f64>> {
        init.initialize(self.n_walkers, self.n_params(), &mut self.rng)
    }

    /// Chain stored since the last reset.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn state(&self) -> Option<&SamplerState> {
        self.state.as_ref()
    }

    /// Iterations stored since the last reset.
    pub fn iterations(&self) -> usize {
        self.chain.len()
    }

    /// Discard the stored chain and zero the acceptance counters.
    ///
    /// The walker positions survive so a caller can still read them, but the
    /// next run always starts from the positions it is given.
    pub fn reset(&mut self) {
        self.chain = Chain::new(self.target.param_names());
        if let Some(state) = self.state.as_mut() {
            state.reset_counters();
        }
    }

    /// Advance the ensemble `n_steps` iterations from `positions`.
    ///
    /// Every iteration is appended to the chain. Returns the final state.
    pub fn run_mcmc(&mut self, positions: Array2<f64>, n_steps: usize) -> Result<&SamplerState> {
        self.run_mcmc_with_progress(positions, n_steps, None::<fn(&ProgressInfo)>)
    }

    pub fn run_mcmc_with_progress<F>(
        &mut self,
        positions: Array2<f64>,
        n_steps: usize,
        mut progress_callback: Option<F>,
    ) -> Result<&SamplerState>
    where
        F: FnMut(&ProgressInfo),
    {
        if positions.dim() != (self.n_walkers, self.n_params()) {
            return Err(Error::SamplingError(format!(
                "Positions have shape {:?}, expected ({}, {})",
                positions.dim(),
                self.n_walkers,
                self.n_params()
            )));
        }

        let mut state = SamplerState::new(positions)?;
        if let Some(previous) = self.state.take() {
            // Acceptance keeps accumulating until the next reset
            state.n_accepted = previous.n_accepted;
            state.n_proposed = previous.n_proposed;
        }
        let initial: Vec<Vec<f64>> = state.positions.outer_iter().map(|row| row.to_vec()).collect();
        state.log_probs = Array1::from_vec(self.log_prob_batch(&initial));

        let half = self.n_walkers / 2;
        for iteration in 0..n_steps {
            self.update_group(&mut state, 0..half, half..self.n_walkers);
            self.update_group(&mut state, half..self.n_walkers, 0..half);

            self.chain
                .push(state.positions.clone(), state.log_probs.clone());

            if let Some(ref mut callback) = progress_callback {
                let info = ProgressInfo {
                    iteration,
                    total: n_steps,
                    acceptance_rate: state.mean_acceptance_rate(),
                    mean_log_prob: state.log_probs.mean().unwrap_or(f64::NEG_INFINITY),
                };
                callback(&info);
            }
        }

        let state = self.state.insert(state);
        Ok(&*state)
    }

    /// Evaluate the target at each position in parallel.
    ///
    /// NaN is mapped to negative infinity.
    fn log_prob_batch(&self, positions: &[Vec<f64>]) -> Vec<f64> {
        positions
            .par_iter()
            .map(|theta| {
                let lp = self.target.log_prob(theta);
                if lp.is_nan() {
                    f64::NEG_INFINITY
                } else {
                    lp
                }
            })
            .collect()
    }

    /// Update the walkers in `active` using `complementary` as the partner pool.
    fn update_group(
        &mut self,
        state: &mut SamplerState,
        active: std::ops::Range<usize>,
        complementary: std::ops::Range<usize>,
    ) {
        let complementary_positions = state.positions.slice(s![complementary, ..]).to_owned();

        let proposals: Vec<(Array1<f64>, f64)> = active
            .clone()
            .map(|i| {
                self.stretch
                    .propose(&mut self.rng, state.positions.row(i), &complementary_positions)
            })
            .collect();

        let proposal_params: Vec<Vec<f64>> = proposals.iter().map(|(p, _)| p.to_vec()).collect();
        let proposal_log_probs = self.log_prob_batch(&proposal_params);

        let n_params = state.n_params();
        for (walker_idx, ((proposal, z), log_prob_new)) in
            active.zip(proposals.into_iter().zip(proposal_log_probs))
        {
            let accept_prob = self.stretch.acceptance_probability(
                z,
                n_params,
                state.log_probs[walker_idx],
                log_prob_new,
            );

            state.n_proposed[walker_idx] += 1;
            if self.rng.gen::<f64>() < accept_prob {
                state.positions.row_mut(walker_idx).assign(&proposal);
                state.log_probs[walker_idx] = log_prob_new;
                state.n_accepted[walker_idx] += 1;
            }
        }
    }
}
