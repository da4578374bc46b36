//! Python bindings for the hierarchical (R_V, f_bump) population fit.
//!
//! The compiled module is imported from Python as `dustvar._lib`.

pub mod python;
