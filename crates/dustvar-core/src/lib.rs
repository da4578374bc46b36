//! Core data structures for hierarchical fits of dust-attenuation parameters.
//!
//! A fit starts from independently sampled per-region posteriors over
//! (R_V, f_bump). Those are subsampled into a [`grid::RegionSampleGrid`],
//! which the population model in `dustvar-calibrate` marginalises over.
//! The population itself is described by [`population::PopulationParams`],
//! a mean vector plus a covariance held in Cholesky-factored form.

pub mod errors;
pub mod grid;
pub mod population;
pub mod utils;
