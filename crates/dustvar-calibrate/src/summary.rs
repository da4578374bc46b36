//! Percentile summaries, fit results and their persisted form.

use crate::driver::StageReport;
use crate::sampler::Chain;
use crate::{Error, Result};
use dustvar_core::utils::numeric::percentiles;
use indexmap::IndexMap;
use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Percentiles reported for every parameter.
pub const SUMMARY_PERCENTILES: [f64; 3] = [16.0, 50.0, 84.0];

/// 16th, 50th and 84th percentiles of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub p16: f64,
    pub p50: f64,
    pub p84: f64,
}

impl ParameterSummary {
    pub fn from_samples<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let p = percentiles(values, &SUMMARY_PERCENTILES);
        Self {
            p16: p[0],
            p50: p[1],
            p84: p[2],
        }
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.p16, self.p50, self.p84]
    }

    /// Half the 16-84 interval, a one-sigma width for near-Gaussian marginals.
    pub fn half_width(&self) -> f64 {
        0.5 * (self.p84 - self.p16)
    }
}

/// Per-parameter percentiles of a production chain plus its run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSummary {
    pub params: IndexMap<String, ParameterSummary>,
    /// Wall-clock seconds spent sampling
    pub run_time: f64,
}

impl PosteriorSummary {
    pub fn from_chain(chain: &Chain, run_time: f64) -> Self {
        let flat = chain.flat_samples();
        let params = chain
            .param_names()
            .iter()
            .enumerate()
            .map(|(i, name)| {
                (
                    name.clone(),
                    ParameterSummary::from_samples(flat.column(i).iter().copied()),
                )
            })
            .collect();
        Self { params, run_time }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSummary> {
        self.params.get(name)
    }
}

impl fmt::Display for PosteriorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, s) in &self.params {
            writeln!(f, "{}: [{:.6}, {:.6}, {:.6}]", name, s.p16, s.p50, s.p84)?;
        }
        write!(f, "Run took {:.2} seconds.", self.run_time)
    }
}

/// Everything a finished fit produces.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub param_names: Vec<String>,
    /// Production chain, shape (n_walkers, n_steps, n_params)
    pub chain: Array3<f64>,
    /// Walker-major flat chain, shape (n_walkers * n_steps, n_params)
    pub flatchain: Array2<f64>,
    /// Log probabilities, shape (n_walkers, n_steps)
    pub lnprob: Array2<f64>,
    pub flat_lnprob: Array1<f64>,
    pub summary: PosteriorSummary,
    pub autocorr_time: IndexMap<String, f64>,
    /// Effective sample size per parameter across all walkers
    pub ess: IndexMap<String, f64>,
    /// Per-walker acceptance fraction over the production stage
    pub acceptance_fraction: Array1<f64>,
    pub stages: Vec<StageReport>,
}

impl FitResult {
    pub fn from_chain(
        chain: &Chain,
        acceptance_fraction: Array1<f64>,
        stages: Vec<StageReport>,
        run_time: f64,
    ) -> Self {
        Self {
            param_names: chain.param_names().to_vec(),
            chain: chain.to_array3(),
            flatchain: chain.flat_samples(),
            lnprob: chain.lnprob_traces(),
            flat_lnprob: chain.flat_log_probs(),
            summary: PosteriorSummary::from_chain(chain, run_time),
            autocorr_time: chain.autocorr_time(),
            ess: chain.ess(),
            acceptance_fraction,
            stages,
        }
    }

    pub fn mean_acceptance_fraction(&self) -> f64 {
        self.acceptance_fraction.mean().unwrap_or(0.0)
    }

    pub fn to_record(&self) -> FitRecord {
        FitRecord {
            param_names: self.param_names.clone(),
            sampler_chain: self.chain.clone(),
            sampler_flatchain: self.flatchain.clone(),
            sampler_lnprob: self.lnprob.clone(),
            percentiles: self
                .summary
                .params
                .iter()
                .map(|(name, s)| (name.clone(), s.to_array()))
                .collect(),
            run_time: self.summary.run_time,
            autocorr_time: self.autocorr_time.clone(),
            ess: self.ess.clone(),
        }
    }
}

/// One persisted fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    pub param_names: Vec<String>,
    pub sampler_chain: Array3<f64>,
    pub sampler_flatchain: Array2<f64>,
    pub sampler_lnprob: Array2<f64>,
    /// [p16, p50, p84] per parameter
    pub percentiles: IndexMap<String, [f64; 3]>,
    pub run_time: f64,
    pub autocorr_time: IndexMap<String, f64>,
    pub ess: IndexMap<String, f64>,
}

/// Named fit records written to and read from a single file.
///
/// Groups keep their insertion order; inserting an existing label replaces
/// that group in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitArchive {
    groups: IndexMap<String, FitRecord>,
}

impl FitArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, record: FitRecord) -> Option<FitRecord> {
        self.groups.insert(label.into(), record)
    }

    pub fn get(&self, label: &str) -> Option<&FitRecord> {
        self.groups.get(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Write the archive with bincode.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        bincode::serialize_into(&mut writer, self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize fit archive: {}", e)))?;
        writer.flush()?;

        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        bincode::deserialize_from(&mut reader)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize fit archive: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Stage;
    use is_close::is_close;
    use ndarray::array;

    fn sample_chain() -> Chain {
        let mut chain = Chain::new(vec!["a".to_string(), "b".to_string()]);
        for step in 0..20 {
            let t = step as f64;
            chain.push(
                array![[t, 10.0 - t], [t + 0.5, 10.5 - t]],
                array![-t, -t - 1.0],
            );
        }
        chain
    }

    #[test]
    fn test_parameter_summary() {
        let s = ParameterSummary::from_samples((0..=100).map(|v| v as f64));
        assert!(is_close!(s.p16, 16.0));
        assert!(is_close!(s.p50, 50.0));
        assert!(is_close!(s.p84, 84.0));
        assert!(is_close!(s.half_width(), 34.0));
    }

    #[test]
    fn test_summary_from_chain() {
        let chain = sample_chain();
        let summary = PosteriorSummary::from_chain(&chain, 1.234);

        let a = summary.get("a").unwrap();
        let flat: Vec<f64> = chain.flat_samples().column(0).to_vec();
        let expected = ParameterSummary::from_samples(flat);
        assert_eq!(*a, expected);
        assert!(summary.get("missing").is_none());
        assert_eq!(summary.params.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_summary_display() {
        let mut params = IndexMap::new();
        params.insert(
            "mu_rv".to_string(),
            ParameterSummary {
                p16: 3.0,
                p50: 3.1,
                p84: 3.25,
            },
        );
        let summary = PosteriorSummary {
            params,
            run_time: 12.346,
        };
        assert_eq!(
            summary.to_string(),
            "mu_rv: [3.000000, 3.100000, 3.250000]\nRun took 12.35 seconds."
        );
    }

    fn sample_result() -> FitResult {
        let stages = vec![StageReport {
            stage: Stage::Production,
            steps: 20,
            acceptance_fraction: 0.4,
            max_log_prob: 0.0,
            reseed_center: None,
        }];
        FitResult::from_chain(&sample_chain(), array![0.3, 0.5], stages, 2.0)
    }

    #[test]
    fn test_fit_result_shapes() {
        let result = sample_result();
        assert_eq!(result.chain.dim(), (2, 20, 2));
        assert_eq!(result.flatchain.dim(), (40, 2));
        assert_eq!(result.lnprob.dim(), (2, 20));
        assert_eq!(result.flat_lnprob.len(), 40);
        assert!(is_close!(result.mean_acceptance_fraction(), 0.4));
        assert_eq!(result.autocorr_time.len(), 2);
    }

    #[test]
    fn test_ess_matches_autocorr_time() {
        let result = sample_result();
        assert_eq!(result.ess.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        for (name, tau) in &result.autocorr_time {
            assert_eq!(result.ess[name], 40.0 / tau);
        }
        assert_eq!(result.to_record().ess, result.ess);
    }

    #[test]
    fn test_record_contents() {
        let result = sample_result();
        let record = result.to_record();
        assert_eq!(record.sampler_chain, result.chain);
        assert_eq!(record.percentiles["b"], result.summary.params["b"].to_array());
        assert_eq!(record.run_time, 2.0);
    }

    #[test]
    fn test_archive_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fits.bin");

        let record = sample_result().to_record();
        let mut archive = FitArchive::new();
        archive.insert("all", record.clone());
        archive.insert("av_above_0.5", record);
        archive.save(&path).unwrap();

        let loaded = FitArchive::load(&path).unwrap();
        assert_eq!(loaded, archive);
        assert_eq!(loaded.labels().collect::<Vec<_>>(), vec!["all", "av_above_0.5"]);
    }

    #[test]
    fn test_archive_replace_keeps_order() {
        let record = sample_result().to_record();
        let mut archive = FitArchive::new();
        archive.insert("R_V", record.clone());
        archive.insert("f_bump", record.clone());

        let mut changed = record;
        changed.run_time = 99.0;
        assert!(archive.insert("R_V", changed).is_some());
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.labels().next(), Some("R_V"));
        assert_eq!(archive.get("R_V").unwrap().run_time, 99.0);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FitArchive::load(dir.path().join("missing.bin")),
            Err(Error::Io(_))
        ));
    }
}
