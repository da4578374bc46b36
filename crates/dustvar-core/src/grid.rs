//! Per-region posterior samples, subsampled onto a fixed (R, S, 2) grid.
//!
//! Every region in the survey map was previously fit on its own and left
//! behind a flat posterior chain over (R_V, f_bump). The population fit does
//! not need all of those draws: it takes the same `S` randomly chosen draws
//! from every region. Reusing one index set for all regions keeps any joint
//! structure the upstream chains share.

use crate::errors::{DustvarError, DustvarResult};
use indexmap::IndexMap;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Number of parameters stored per grid sample.
pub const N_GRID_PARAMS: usize = 2;

/// Names of the per-region parameters, in column order.
pub const GRID_PARAM_NAMES: [&str; N_GRID_PARAMS] = ["R_V", "f_bump"];

/// Flattened posterior of a single region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionPosterior {
    /// Posterior draws, shape (n_draws, n_cols) with R_V and f_bump in the first two columns
    pub flatchain: Array2<f64>,

    /// Auxiliary per-region scalar used when selecting regions (e.g. dA_V)
    pub auxiliary: Option<f64>,
}

/// Collection of region posteriors keyed by region name, in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionPosteriors {
    regions: IndexMap<String, RegionPosterior>,
}

impl RegionPosteriors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region's flat posterior chain.
    ///
    /// The chain must have at least two columns (R_V, f_bump).
    pub fn insert(&mut self, key: impl Into<String>, flatchain: Array2<f64>) -> DustvarResult<()> {
        self.insert_region(key.into(), flatchain, None)
    }

    /// Add a region's flat posterior chain along with its auxiliary selection scalar.
    pub fn insert_with_auxiliary(
        &mut self,
        key: impl Into<String>,
        flatchain: Array2<f64>,
        auxiliary: f64,
    ) -> DustvarResult<()> {
        self.insert_region(key.into(), flatchain, Some(auxiliary))
    }

    fn insert_region(
        &mut self,
        key: String,
        flatchain: Array2<f64>,
        auxiliary: Option<f64>,
    ) -> DustvarResult<()> {
        if flatchain.ncols() < N_GRID_PARAMS {
            return Err(DustvarError::InvalidGrid(format!(
                "Region {} posterior has {} columns, expected at least {}",
                key,
                flatchain.ncols(),
                N_GRID_PARAMS
            )));
        }
        self.regions.insert(
            key,
            RegionPosterior {
                flatchain,
                auxiliary,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&RegionPosterior> {
        self.regions.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegionPosterior)> {
        self.regions.iter()
    }
}

/// Which regions take part in a fit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegionSelection {
    /// Use every region
    #[default]
    All,
    /// Keep regions whose auxiliary scalar is finite and strictly above the threshold
    AuxAbove { threshold: f64 },
}

impl RegionSelection {
    /// Decide whether a region is kept.
    ///
    /// Fails if the selection needs an auxiliary value and the region has none.
    pub fn accepts(&self, key: &str, auxiliary: Option<f64>) -> DustvarResult<bool> {
        match self {
            RegionSelection::All => Ok(true),
            RegionSelection::AuxAbove { threshold } => match auxiliary {
                Some(value) => Ok(value.is_finite() && value > *threshold),
                None => Err(DustvarError::Selection(format!(
                    "Region {} has no auxiliary value to compare against threshold {}",
                    key, threshold
                ))),
            },
        }
    }
}

/// How to build a [`RegionSampleGrid`] from region posteriors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Number of draws taken from every region (S).
    ///
    /// Default: 50
    pub n_samples: usize,

    /// Seed for choosing which draws are used.
    ///
    /// Default: 200
    pub seed: u64,

    /// Region selection filter.
    ///
    /// Default: all regions
    pub selection: RegionSelection,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            n_samples: 50,
            seed: 200,
            selection: RegionSelection::All,
        }
    }
}

/// Per-region posterior samples, shape (R, S, 2).
///
/// Immutable once built. Every entry is finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSampleGrid {
    samples: Array3<f64>,
    region_keys: Vec<String>,
}

impl RegionSampleGrid {
    /// Wrap an existing (R, S, 2) array, naming regions by their index.
    pub fn new(samples: Array3<f64>) -> DustvarResult<Self> {
        let keys = (0..samples.len_of(Axis(0))).map(|i| i.to_string()).collect();
        Self::with_keys(samples, keys)
    }

    /// Wrap an existing (R, S, 2) array with explicit region keys.
    pub fn with_keys(samples: Array3<f64>, region_keys: Vec<String>) -> DustvarResult<Self> {
        let (n_regions, n_samples, n_params) = samples.dim();

        if n_params != N_GRID_PARAMS {
            return Err(DustvarError::InvalidGrid(format!(
                "Expected {} parameters per sample, got {}",
                N_GRID_PARAMS, n_params
            )));
        }
        if n_regions == 0 || n_samples == 0 {
            return Err(DustvarError::InvalidGrid(format!(
                "Grid must contain at least one region and one sample, got shape ({}, {}, {})",
                n_regions, n_samples, n_params
            )));
        }
        if region_keys.len() != n_regions {
            return Err(DustvarError::InvalidGrid(format!(
                "Got {} region keys for {} regions",
                region_keys.len(),
                n_regions
            )));
        }
        for (key, region) in region_keys.iter().zip(samples.outer_iter()) {
            if region.iter().any(|v| !v.is_finite()) {
                return Err(DustvarError::InvalidGrid(format!(
                    "Region {} contains non-finite samples",
                    key
                )));
            }
        }

        Ok(Self {
            samples,
            region_keys,
        })
    }

    /// Subsample region posteriors onto a grid.
    ///
    /// Regions are first filtered with `config.selection`. Then `n_samples`
    /// distinct draw indices are picked (sorted, seeded by `config.seed`)
    /// and the same indices are read from every selected region.
    ///
    /// Fails before any sampling if a selected region has fewer than
    /// `n_samples` draws.
    pub fn from_posteriors(
        posteriors: &RegionPosteriors,
        config: &GridConfig,
    ) -> DustvarResult<Self> {
        if config.n_samples == 0 {
            return Err(DustvarError::InvalidGrid(
                "Number of samples per region must be at least 1".to_string(),
            ));
        }

        let mut selected = Vec::with_capacity(posteriors.len());
        for (key, region) in posteriors.iter() {
            if config.selection.accepts(key, region.auxiliary)? {
                selected.push((key, region));
            } else {
                debug!(region = %key, auxiliary = ?region.auxiliary, "Region excluded by selection");
            }
        }

        if selected.is_empty() {
            return Err(DustvarError::Selection(format!(
                "No regions left after applying {:?} to {} regions",
                config.selection,
                posteriors.len()
            )));
        }

        for (key, region) in &selected {
            let available = region.flatchain.nrows();
            if available < config.n_samples {
                return Err(DustvarError::InsufficientSamples {
                    region: key.to_string(),
                    available,
                    requested: config.n_samples,
                });
            }
        }

        let n_draws = selected
            .iter()
            .map(|(_, region)| region.flatchain.nrows())
            .min()
            .unwrap_or(0);

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut indices = rand::seq::index::sample(&mut rng, n_draws, config.n_samples).into_vec();
        indices.sort_unstable();

        let mut samples = Array3::zeros((selected.len(), config.n_samples, N_GRID_PARAMS));
        let mut region_keys = Vec::with_capacity(selected.len());
        for (i, (key, region)) in selected.iter().enumerate() {
            for (j, &draw) in indices.iter().enumerate() {
                for k in 0..N_GRID_PARAMS {
                    samples[[i, j, k]] = region.flatchain[[draw, k]];
                }
            }
            region_keys.push(key.to_string());
        }

        info!(
            n_regions = selected.len(),
            n_excluded = posteriors.len() - selected.len(),
            n_samples = config.n_samples,
            "Built region sample grid"
        );

        Self::with_keys(samples, region_keys)
    }

    pub fn n_regions(&self) -> usize {
        self.samples.len_of(Axis(0))
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len_of(Axis(1))
    }

    /// Samples of one region, shape (S, 2).
    pub fn region(&self, index: usize) -> ArrayView2<'_, f64> {
        self.samples.index_axis(Axis(0), index)
    }

    /// Iterate over regions as (S, 2) views.
    pub fn regions(&self) -> impl Iterator<Item = ArrayView2<'_, f64>> {
        self.samples.outer_iter()
    }

    pub fn region_keys(&self) -> &[String] {
        &self.region_keys
    }

    pub fn as_array(&self) -> &Array3<f64> {
        &self.samples
    }

    pub fn into_array(self) -> Array3<f64> {
        self.samples
    }
}
