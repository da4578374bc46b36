//! Region selection through to a persisted fit archive.

use dustvar_calibrate::{fit_posteriors, Error, FitArchive, FitConfig, Stage};
use dustvar_core::errors::DustvarError;
use dustvar_core::grid::{RegionPosteriors, RegionSelection};
use ndarray::Array2;

/// Regions whose draws sit on a small deterministic lattice around (R_V, f_bump).
fn posteriors(n_regions: usize, n_draws: usize) -> RegionPosteriors {
    let mut posteriors = RegionPosteriors::new();
    for r in 0..n_regions {
        let rv = 2.5 + 0.1 * r as f64;
        let fbump = 0.5 + 0.03 * r as f64;
        let chain = Array2::from_shape_fn((n_draws, 3), |(i, k)| {
            let wiggle = 0.01 * ((i % 7) as f64 - 3.0);
            match k {
                0 => rv + wiggle,
                1 => fbump - wiggle,
                _ => -10.0,
            }
        });
        // dA_V alternates below and above 0.5
        let aux = if r % 2 == 0 { 0.2 } else { 0.8 };
        posteriors
            .insert_with_auxiliary(format!("{}", r), chain, aux)
            .unwrap();
    }
    posteriors
}

fn small_config() -> FitConfig {
    let mut config = FitConfig {
        run_steps: 40,
        restart_steps: 20,
        n_restarts: 1,
        n_walkers: 12,
        ..FitConfig::default()
    };
    config.grid.n_samples = 10;
    config
}

#[test]
fn test_selection_and_archive() {
    let posteriors = posteriors(12, 30);

    let all = fit_posteriors(&posteriors, &small_config()).unwrap();

    let mut selected_config = small_config();
    selected_config.grid.selection = RegionSelection::AuxAbove { threshold: 0.5 };
    let selected = fit_posteriors(&posteriors, &selected_config).unwrap();

    for result in [&all, &selected] {
        assert_eq!(result.chain.dim(), (12, 40, 5));
        assert_eq!(result.flatchain.dim(), (480, 5));
        assert_eq!(result.lnprob.dim(), (12, 40));
        assert_eq!(result.acceptance_fraction.len(), 12);
        let stages: Vec<Stage> = result.stages.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::BurnMain,
                Stage::BurnRestart(1),
                Stage::BurnFinal,
                Stage::Production
            ]
        );
        assert_eq!(result.summary.params.len(), 5);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("final_sampler_rv_fbump_cov.bin");

    let mut archive = FitArchive::new();
    archive.insert("all", all.to_record());
    archive.insert("av_above_0.5", selected.to_record());
    archive.save(&path).unwrap();

    let loaded = FitArchive::load(&path).unwrap();
    assert_eq!(loaded.len(), 2);
    let record = loaded.get("av_above_0.5").unwrap();
    assert_eq!(record.sampler_chain, selected.chain);
    assert_eq!(record.sampler_flatchain.dim(), (480, 5));
    assert_eq!(
        record.percentiles["mu_rv"],
        selected.summary.get("mu_rv").unwrap().to_array()
    );
}

#[test]
fn test_insufficient_samples_fails_before_sampling() {
    let mut posteriors = posteriors(4, 30);
    posteriors
        .insert("short", Array2::zeros((5, 2)))
        .unwrap();

    match fit_posteriors(&posteriors, &small_config()) {
        Err(Error::Core(DustvarError::InsufficientSamples {
            region,
            available,
            requested,
        })) => {
            assert_eq!(region, "short");
            assert_eq!(available, 5);
            assert_eq!(requested, 10);
        }
        other => panic!("Expected InsufficientSamples, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_invalid_config_rejected() {
    let posteriors = posteriors(4, 30);
    let mut config = small_config();
    config.n_walkers = 7;
    assert!(matches!(
        fit_posteriors(&posteriors, &config),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_empty_selection_is_an_error() {
    let posteriors = posteriors(4, 30);
    let mut config = small_config();
    config.grid.selection = RegionSelection::AuxAbove { threshold: 5.0 };
    assert!(matches!(
        fit_posteriors(&posteriors, &config),
        Err(Error::Core(DustvarError::Selection(_)))
    ));
}
