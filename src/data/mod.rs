//! Input data sources other than real hardware dumps.

pub mod synth;

pub use synth::*;
