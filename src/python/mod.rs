use dustvar_calibrate::{fit_grid, FitConfig, FitResult};
use dustvar_core::grid::{GridConfig, RegionPosteriors, RegionSampleGrid, RegionSelection};
use numpy::{IntoPyArray, PyArray3, PyReadonlyArray2, PyReadonlyArray3};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

fn to_py_err(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Subsample every region's flat chain onto an (R, S, 2) grid.
///
/// `chains` maps region keys to arrays of shape (n_draws, >=2). When
/// `threshold` is given, only regions whose entry in `auxiliary` is strictly
/// greater are kept.
#[pyfunction]
#[pyo3(signature = (chains, n_samples=50, seed=200, auxiliary=None, threshold=None))]
fn build_region_grid<'py>(
    py: Python<'py>,
    chains: &Bound<'py, PyDict>,
    n_samples: usize,
    seed: u64,
    auxiliary: Option<&Bound<'py, PyDict>>,
    threshold: Option<f64>,
) -> PyResult<Bound<'py, PyArray3<f64>>> {
    let mut posteriors = RegionPosteriors::new();
    for (key, value) in chains.iter() {
        let key: String = key.extract()?;
        let chain: PyReadonlyArray2<f64> = value.extract()?;
        let aux = match auxiliary {
            Some(aux) => aux.get_item(&key)?,
            None => None,
        };
        let flatchain = chain.as_array().to_owned();
        let inserted = match aux {
            Some(aux) => posteriors.insert_with_auxiliary(key, flatchain, aux.extract()?),
            None => posteriors.insert(key, flatchain),
        };
        inserted.map_err(to_py_err)?;
    }

    let selection = match threshold {
        Some(threshold) => RegionSelection::AuxAbove { threshold },
        None => RegionSelection::All,
    };
    let config = GridConfig {
        n_samples,
        seed,
        selection,
    };

    let grid = RegionSampleGrid::from_posteriors(&posteriors, &config).map_err(to_py_err)?;
    Ok(grid.into_array().into_pyarray_bound(py))
}

/// Flat log-prior of θ under the default bounds.
#[pyfunction]
fn log_prior(theta: Vec<f64>) -> f64 {
    dustvar_calibrate::prior::log_prior(&theta)
}

/// Marginalised log-likelihood of θ for an (R, S, 2) sample grid.
#[pyfunction]
fn log_likelihood(samples: PyReadonlyArray3<'_, f64>, theta: Vec<f64>) -> PyResult<f64> {
    let grid = RegionSampleGrid::new(samples.as_array().to_owned()).map_err(to_py_err)?;
    Ok(dustvar_calibrate::likelihood::log_likelihood(&theta, &grid))
}

/// Run the burn-in schedule and production chain for an (R, S, 2) sample grid.
///
/// `config` is an optional dict with the same keys as the TOML run
/// configuration. The GIL is released while sampling.
#[pyfunction]
#[pyo3(signature = (samples, config=None))]
fn fit_population<'py>(
    py: Python<'py>,
    samples: PyReadonlyArray3<'py, f64>,
    config: Option<&Bound<'py, PyAny>>,
) -> PyResult<Bound<'py, PyDict>> {
    let config: FitConfig = match config {
        Some(config) => pythonize::depythonize(config).map_err(to_py_err)?,
        None => FitConfig::default(),
    };
    let grid = RegionSampleGrid::new(samples.as_array().to_owned()).map_err(to_py_err)?;

    let result = py
        .allow_threads(|| fit_grid(grid, &config))
        .map_err(to_py_err)?;

    result_to_dict(py, result)
}

fn result_to_dict(py: Python<'_>, result: FitResult) -> PyResult<Bound<'_, PyDict>> {
    let dict = PyDict::new_bound(py);

    let percentiles = PyDict::new_bound(py);
    for (name, summary) in &result.summary.params {
        percentiles.set_item(name, summary.to_array().to_vec())?;
    }
    let autocorr_time = PyDict::new_bound(py);
    for (name, tau) in &result.autocorr_time {
        autocorr_time.set_item(name, *tau)?;
    }
    let ess = PyDict::new_bound(py);
    for (name, value) in &result.ess {
        ess.set_item(name, *value)?;
    }

    dict.set_item("param_names", result.param_names)?;
    dict.set_item("percentiles", percentiles)?;
    dict.set_item("autocorr_time", autocorr_time)?;
    dict.set_item("ess", ess)?;
    dict.set_item("run_time", result.summary.run_time)?;
    dict.set_item("summary", result.summary.to_string())?;
    dict.set_item("sampler_chain", result.chain.into_pyarray_bound(py))?;
    dict.set_item("sampler_flatchain", result.flatchain.into_pyarray_bound(py))?;
    dict.set_item("sampler_lnprob", result.lnprob.into_pyarray_bound(py))?;
    dict.set_item("flat_lnprob", result.flat_lnprob.into_pyarray_bound(py))?;
    dict.set_item(
        "acceptance_fraction",
        result.acceptance_fraction.into_pyarray_bound(py),
    )?;
    Ok(dict)
}

#[pymodule]
#[pyo3(name = "_lib")]
fn dustvar(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_function(wrap_pyfunction!(build_region_grid, m)?)?;
    m.add_function(wrap_pyfunction!(log_prior, m)?)?;
    m.add_function(wrap_pyfunction!(log_likelihood, m)?)?;
    m.add_function(wrap_pyfunction!(fit_population, m)?)?;
    Ok(())
}
