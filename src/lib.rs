//! `sampic-cal` library crate.
//!
//! The binary (`sampic-cal`) is a thin wrapper around this library so that:
//!
//! - the conversion pipeline is testable without spawning processes
//! - parsing, fitting and merging are reusable from other tools
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod merge;
pub mod models;
pub mod plot;
pub mod report;
pub mod tui;
