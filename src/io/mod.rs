//! Input/output helpers.
//!
//! - raw calibration dump parsing (`dump`)
//! - calibration artifact JSON read/write (`artifact`)

pub mod artifact;
pub mod dump;

pub use artifact::*;
pub use dump::*;
