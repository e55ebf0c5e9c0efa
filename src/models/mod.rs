//! Fit model definitions.
//!
//! Models are user formulas parsed once per batch and evaluated as pure
//! functions of `(x, parameters)`, so the fitting code stays generic.

pub mod formula;

pub use formula::*;
