use dustvar_core::errors::DustvarError;
use thiserror::Error;

/// Errors raised while configuring or running a population fit.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] DustvarError),
    #[error("Sampling error: {0}")]
    SamplingError(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Every walker has a non-finite log probability after the {stage} stage")]
    DegenerateEnsemble { stage: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;
