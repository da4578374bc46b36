//! Burn-in, restart and production schedule for a population fit.
//!
//! The driver is an explicit state machine over [`Stage`]:
//!
//! ```text
//! Init -> BurnMain -> BurnRestart(1..=n) -> BurnFinal -> Production -> Done
//! ```
//!
//! Every stage after `BurnMain` starts from a reset sampler, so the chain
//! left behind by a stage of `n` steps always has shape
//! (n_walkers, n, n_params). Restart and final burn-in stages reseed the
//! walkers in a tight ball around the mean of the samples that reached the
//! stage's highest log probability.

use crate::posterior::LogProbability;
use crate::sampler::{EnsembleSampler, ProgressInfo, WalkerInit};
use crate::{Error, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Progress events logged per stage at debug level.
const PROGRESS_REPORTS: usize = 10;

/// Position in the fitting schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Init,
    BurnMain,
    /// 1-based restart index
    BurnRestart(usize),
    BurnFinal,
    Production,
    Done,
}

impl Stage {
    /// The stage that follows this one for a schedule with `n_restarts` restarts.
    pub fn next(self, n_restarts: usize) -> Stage {
        match self {
            Stage::Init => Stage::BurnMain,
            Stage::BurnMain if n_restarts == 0 => Stage::BurnFinal,
            Stage::BurnMain => Stage::BurnRestart(1),
            Stage::BurnRestart(i) if i < n_restarts => Stage::BurnRestart(i + 1),
            Stage::BurnRestart(_) => Stage::BurnFinal,
            Stage::BurnFinal => Stage::Production,
            Stage::Production | Stage::Done => Stage::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Init => write!(f, "init"),
            Stage::BurnMain => write!(f, "burn-in"),
            Stage::BurnRestart(i) => write!(f, "burn-in restart {}", i),
            Stage::BurnFinal => write!(f, "final burn-in"),
            Stage::Production => write!(f, "production"),
            Stage::Done => write!(f, "done"),
        }
    }
}

/// Step counts for each part of the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnInSchedule {
    /// Steps for the main burn-in, the final burn-in and production
    pub run_steps: usize,
    /// Steps for each restart
    pub restart_steps: usize,
    pub n_restarts: usize,
}

impl BurnInSchedule {
    pub fn steps_for(&self, stage: Stage) -> usize {
        match stage {
            Stage::BurnMain | Stage::BurnFinal | Stage::Production => self.run_steps,
            Stage::BurnRestart(_) => self.restart_steps,
            Stage::Init | Stage::Done => 0,
        }
    }

    /// Total sampler iterations over the whole schedule.
    pub fn total_steps(&self) -> usize {
        3 * self.run_steps + self.n_restarts * self.restart_steps
    }
}

/// Outcome of one sampling stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub steps: usize,
    /// Mean acceptance fraction over the stage
    pub acceptance_fraction: f64,
    /// Highest log probability stored during the stage
    pub max_log_prob: f64,
    /// Centre of the reseeded walker ball, for stages that reseed
    pub reseed_center: Option<Vec<f64>>,
}

/// Runs an [`EnsembleSampler`] through the burn-in schedule.
pub struct FitDriver<P: LogProbability> {
    sampler: EnsembleSampler<P>,
    schedule: BurnInSchedule,
    initial_guess: Vec<f64>,
    jitter: f64,
    stage: Stage,
    positions: Option<Array2<f64>>,
    reports: Vec<StageReport>,
}

impl<P: LogProbability + Sync> FitDriver<P> {
    pub fn new(
        sampler: EnsembleSampler<P>,
        schedule: BurnInSchedule,
        initial_guess: Vec<f64>,
        jitter: f64,
    ) -> Result<Self> {
        if initial_guess.len() != sampler.n_params() {
            return Err(Error::InvalidParameter(format!(
                "Initial guess has {} values, target has {} parameters",
                initial_guess.len(),
                sampler.n_params()
            )));
        }
        if !jitter.is_finite() || jitter <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "Walker jitter must be positive and finite, got {}",
                jitter
            )));
        }

        Ok(Self {
            sampler,
            schedule,
            initial_guess,
            jitter,
            stage: Stage::Init,
            positions: None,
            reports: Vec::new(),
        })
    }

    /// Stage that the next call to [`FitDriver::advance`] will execute.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn sampler(&self) -> &EnsembleSampler<P> {
        &self.sampler
    }

    pub fn schedule(&self) -> &BurnInSchedule {
        &self.schedule
    }

    pub fn reports(&self) -> &[StageReport] {
        &self.reports
    }

    pub fn into_parts(self) -> (EnsembleSampler<P>, Vec<StageReport>) {
        (self.sampler, self.reports)
    }

    /// Execute the current stage and move to the next one.
    ///
    /// Returns the new current stage. Calling this once `Done` is reached
    /// does nothing.
    pub fn advance(&mut self) -> Result<Stage> {
        let stage = self.stage;
        match stage {
            Stage::Init => {
                let init = WalkerInit::Ball {
                    center: self.initial_guess.clone(),
                    sigma: self.jitter,
                };
                self.positions = Some(self.sampler.initialize(&init)?);
                debug!(
                    n_walkers = self.sampler.n_walkers(),
                    jitter = self.jitter,
                    "Initialised walkers around the initial guess"
                );
            }
            Stage::BurnMain => {
                self.run_stage(stage, false)?;
            }
            Stage::BurnRestart(_) | Stage::BurnFinal => {
                self.sampler.reset();
                self.run_stage(stage, true)?;
            }
            Stage::Production => {
                self.sampler.reset();
                self.run_stage(stage, false)?;
            }
            Stage::Done => return Ok(Stage::Done),
        }

        self.stage = stage.next(self.schedule.n_restarts);
        Ok(self.stage)
    }

    /// Advance until the production stage has finished.
    pub fn run(&mut self) -> Result<()> {
        while self.stage != Stage::Done {
            self.advance()?;
        }
        Ok(())
    }

    fn run_stage(&mut self, stage: Stage, reseed: bool) -> Result<()> {
        let positions = self.positions.take().ok_or_else(|| {
            Error::SamplingError(format!("No walker positions available for the {} stage", stage))
        })?;
        let steps = self.schedule.steps_for(stage);

        let report_every = (steps / PROGRESS_REPORTS).max(1);
        let state = self.sampler.run_mcmc_with_progress(
            positions,
            steps,
            Some(|progress: &ProgressInfo| {
                let done = progress.iteration + 1;
                if done % report_every == 0 || done == progress.total {
                    debug!(
                        stage = %stage,
                        step = done,
                        total = progress.total,
                        acceptance_rate = progress.acceptance_rate,
                        mean_log_prob = progress.mean_log_prob,
                        "Sampling progress"
                    );
                }
            }),
        )?;
        let acceptance_fraction = state.mean_acceptance_rate();
        let end_positions = state.positions.clone();

        let (max_log_prob, center) = self.sampler.chain().max_log_prob_center().ok_or_else(|| {
            Error::DegenerateEnsemble {
                stage: stage.to_string(),
            }
        })?;

        let reseed_center = if reseed {
            let center = center.to_vec();
            debug!(stage = %stage, center = ?center, "Reseeding walkers at the best sample");
            let init = WalkerInit::Ball {
                center: center.clone(),
                sigma: self.jitter,
            };
            self.positions = Some(self.sampler.initialize(&init)?);
            Some(center)
        } else {
            self.positions = Some(end_positions);
            None
        };

        info!(
            stage = %stage,
            steps,
            acceptance_fraction,
            max_log_prob,
            "Finished sampling stage"
        );

        self.reports.push(StageReport {
            stage,
            steps,
            acceptance_fraction,
            max_log_prob,
            reseed_center,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit Gaussian centred on `mean`, or flat negative infinity.
    struct TestTarget {
        mean: Vec<f64>,
        degenerate: bool,
    }

    impl LogProbability for TestTarget {
        fn n_params(&self) -> usize {
            self.mean.len()
        }

        fn param_names(&self) -> Vec<String> {
            (0..self.mean.len()).map(|i| format!("p{}", i)).collect()
        }

        fn log_prob(&self, theta: &[f64]) -> f64 {
            if self.degenerate {
                return f64::NEG_INFINITY;
            }
            -0.5 * theta
                .iter()
                .zip(&self.mean)
                .map(|(x, m)| ((x - m) / 0.1).powi(2))
                .sum::<f64>()
        }
    }

    fn schedule(n_restarts: usize) -> BurnInSchedule {
        BurnInSchedule {
            run_steps: 30,
            restart_steps: 12,
            n_restarts,
        }
    }

    fn driver(n_restarts: usize, degenerate: bool) -> FitDriver<TestTarget> {
        let target = TestTarget {
            mean: vec![1.0, 2.0, 3.0],
            degenerate,
        };
        let sampler = EnsembleSampler::new(target, 8, 11).unwrap();
        FitDriver::new(sampler, schedule(n_restarts), vec![0.9, 2.1, 3.0], 1e-4).unwrap()
    }

    #[test]
    fn test_stage_sequence() {
        let mut stage = Stage::Init;
        let mut seen = vec![stage];
        while stage != Stage::Done {
            stage = stage.next(2);
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                Stage::Init,
                Stage::BurnMain,
                Stage::BurnRestart(1),
                Stage::BurnRestart(2),
                Stage::BurnFinal,
                Stage::Production,
                Stage::Done
            ]
        );
    }

    #[test]
    fn test_stage_sequence_without_restarts() {
        assert_eq!(Stage::BurnMain.next(0), Stage::BurnFinal);
        assert_eq!(Stage::Done.next(0), Stage::Done);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::BurnRestart(3).to_string(), "burn-in restart 3");
        assert_eq!(Stage::Production.to_string(), "production");
    }

    #[test]
    fn test_schedule_steps() {
        let s = schedule(4);
        assert_eq!(s.steps_for(Stage::BurnMain), 30);
        assert_eq!(s.steps_for(Stage::BurnRestart(2)), 12);
        assert_eq!(s.steps_for(Stage::Done), 0);
        assert_eq!(s.total_steps(), 90 + 48);
    }

    #[test]
    fn test_advance_step_by_step() {
        let mut driver = driver(2, false);
        assert_eq!(driver.stage(), Stage::Init);

        assert_eq!(driver.advance().unwrap(), Stage::BurnMain);
        assert!(driver.reports().is_empty());

        assert_eq!(driver.advance().unwrap(), Stage::BurnRestart(1));
        assert_eq!(driver.sampler().chain().to_array3().dim(), (8, 30, 3));
        assert!(driver.reports()[0].reseed_center.is_none());

        assert_eq!(driver.advance().unwrap(), Stage::BurnRestart(2));
        // History from the main burn-in was discarded by the reset
        assert_eq!(driver.sampler().iterations(), 12);
        assert_eq!(driver.sampler().chain().to_array3().dim(), (8, 12, 3));
        let center = driver.reports()[1].reseed_center.clone().unwrap();
        assert_eq!(center.len(), 3);

        driver.run().unwrap();
        assert_eq!(driver.stage(), Stage::Done);
        assert_eq!(driver.sampler().chain().to_array3().dim(), (8, 30, 3));

        let stages: Vec<Stage> = driver.reports().iter().map(|r| r.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::BurnMain,
                Stage::BurnRestart(1),
                Stage::BurnRestart(2),
                Stage::BurnFinal,
                Stage::Production
            ]
        );

        // Advancing past the end is a no-op
        assert_eq!(driver.advance().unwrap(), Stage::Done);
        assert_eq!(driver.reports().len(), 5);
    }

    #[test]
    fn test_reseed_center_near_mode() {
        let mut driver = driver(1, false);
        driver.run().unwrap();
        let final_burn = &driver.reports()[2];
        assert_eq!(final_burn.stage, Stage::BurnFinal);
        let center = final_burn.reseed_center.as_ref().unwrap();
        for (c, m) in center.iter().zip([1.0, 2.0, 3.0]) {
            assert!((c - m).abs() < 0.2, "reseed centre {:?}", center);
        }
        assert!(final_burn.max_log_prob.is_finite());
    }

    #[test]
    fn test_no_restarts() {
        let mut driver = driver(0, false);
        driver.run().unwrap();
        let stages: Vec<Stage> = driver.reports().iter().map(|r| r.stage).collect();
        assert_eq!(
            stages,
            vec![Stage::BurnMain, Stage::BurnFinal, Stage::Production]
        );
    }

    #[test]
    fn test_degenerate_ensemble() {
        let mut driver = driver(2, true);
        driver.advance().unwrap();
        match driver.advance() {
            Err(Error::DegenerateEnsemble { stage }) => assert_eq!(stage, "burn-in"),
            other => panic!("Expected a degenerate ensemble error, got {:?}", other),
        }
    }

    #[test]
    fn test_initial_guess_length() {
        let target = TestTarget {
            mean: vec![0.0; 3],
            degenerate: false,
        };
        let sampler = EnsembleSampler::new(target, 8, 0).unwrap();
        assert!(FitDriver::new(sampler, schedule(1), vec![0.0; 2], 1e-4).is_err());
    }

    #[test]
    fn test_jitter_must_be_positive() {
        let new_driver = |jitter: f64| {
            let target = TestTarget {
                mean: vec![0.0; 3],
                degenerate: false,
            };
            let sampler = EnsembleSampler::new(target, 8, 0).unwrap();
            FitDriver::new(sampler, schedule(1), vec![0.0; 3], jitter)
        };
        for jitter in [-1.0, 0.0, f64::NAN, f64::INFINITY] {
            assert!(
                matches!(new_driver(jitter), Err(Error::InvalidParameter(_))),
                "jitter {} was accepted",
                jitter
            );
        }
        assert!(new_driver(1e-4).is_ok());
    }

    #[test]
    fn test_same_seed_same_production_chain() {
        let run = || {
            let mut driver = driver(1, false);
            driver.run().unwrap();
            driver.sampler().chain().flat_samples()
        };
        assert_eq!(run(), run());
    }
}
