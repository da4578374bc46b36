use thiserror::Error;

/// Error type for invalid grid or parameter operations.
#[derive(Error, Debug)]
pub enum DustvarError {
    #[error("Region {region} has {available} posterior draws but {requested} samples were requested")]
    InsufficientSamples {
        region: String,
        available: usize,
        requested: usize,
    },
    #[error("Invalid region sample grid: {0}")]
    InvalidGrid(String),
    #[error("Region selection failed: {0}")]
    Selection(String),
    #[error("Invalid population parameters: {0}")]
    InvalidParameter(String),
}

/// Convenience type for `Result<T, DustvarError>`.
pub type DustvarResult<T> = Result<T, DustvarError>;
