//! Hierarchical population fit of dust-attenuation parameters.
//!
//! Each spatial region of the survey carries its own posterior over
//! (R_V, f_bump). This crate infers the population those regions were drawn
//! from: a bivariate Gaussian with mean (μ_RV, μ_fbump) and a full
//! covariance. Per-region uncertainty is marginalised by averaging the
//! population density over each region's posterior draws.
//!
//! # Module Organisation
//!
//! - [`prior`]: flat priors with hard bounds
//! - [`likelihood`]: Monte-Carlo-marginalised hierarchical likelihood
//! - [`posterior`]: prior + likelihood, the sampler's target
//! - [`sampler`]: affine-invariant ensemble sampler and chain storage
//! - [`driver`]: burn-in / restart / production schedule
//! - [`summary`]: percentile summaries and persisted fit archives
//! - [`config`]: run configuration
//!
//! # Example
//!
//! ```ignore
//! use dustvar_calibrate::{fit_posteriors, FitConfig};
//!
//! let config = FitConfig::from_file("fit.toml")?;
//! let result = fit_posteriors(&region_posteriors, &config)?;
//! println!("{}", result.summary);
//! ```

pub mod config;
pub mod driver;
mod error;
mod fit;
pub mod likelihood;
pub mod posterior;
pub mod prior;
pub mod sampler;
pub mod summary;

pub use config::FitConfig;
pub use driver::{BurnInSchedule, FitDriver, Stage, StageReport};
pub use error::{Error, Result};
pub use fit::{fit_grid, fit_posteriors};
pub use posterior::{HierarchicalPosterior, LogProbability};
pub use prior::{Bounds, FlatPrior};
pub use sampler::{Chain, EnsembleSampler, ProgressInfo, SamplerState, StretchMove, WalkerInit};
pub use summary::{FitArchive, FitRecord, FitResult, ParameterSummary, PosteriorSummary};
