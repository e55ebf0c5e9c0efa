//! Command-line parsing for the SAMPIC calibration converter.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! pipeline; `app` turns parsed arguments into configs and dispatches.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::domain::BoundPolicy;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "sampic-cal",
    version,
    about = "SAMPIC digitizer voltage calibration: raw dumps to per-cell fit artifacts"
)]
pub struct Cli {
    /// More log output (`-v` debug, `-vv` trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert raw dumps (and/or merge `.cal.json` artifacts).
    ///
    /// This is the default: `sampic-cal run_db5.txt` is `sampic-cal convert run_db5.txt`.
    Convert(ConvertArgs),
    /// Print a summary of a calibration artifact.
    Show(ShowArgs),
    /// Write a synthetic calibration dump for one board.
    Synth(SynthArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct ConvertArgs {
    /// Raw dump files and/or `.cal.json` artifacts.
    #[arg(required = true, value_name = "INPUT")]
    pub inputs: Vec<PathBuf>,

    /// Fit formula (`pol1`, `expo`, `[0]+[1]*x+[2]*x^2`, ...). Default: pol1.
    #[arg(long)]
    pub function: Option<String>,

    /// Lower bound of the fit domain (volts).
    #[arg(short = 'f', long, visible_alias = "fit_from", allow_negative_numbers = true)]
    pub fit_from: Option<f64>,

    /// Upper bound of the fit domain (volts). Default: smallest ladder maximum.
    #[arg(short = 't', long, visible_alias = "fit_to", allow_negative_numbers = true)]
    pub fit_to: Option<f64>,

    /// How explicit bounds combine with the voltage ladders.
    #[arg(long = "bounds", value_enum, default_value_t = BoundPolicy::Batch)]
    pub bound_policy: BoundPolicy,

    /// Show a diagnostic plot of this block (0..32) of the first run.
    #[arg(long, value_name = "BLOCK", value_parser = clap::value_parser!(u8).range(0..32))]
    pub plot: Option<u8>,

    /// Print the diagnostic plot as text instead of opening the terminal UI.
    #[arg(long, requires = "plot")]
    pub ascii_plot: bool,

    /// Merge everything into a single artifact at this path.
    #[arg(short = 'm', long, value_name = "OUT")]
    pub merge: Option<PathBuf>,

    /// Output file (single artifact) or directory (several artifacts).
    #[arg(short = 'o', long, value_name = "PATH", conflicts_with = "merge")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct ShowArgs {
    /// A `.cal.json` artifact.
    pub artifact: PathBuf,
}

#[derive(Debug, Parser, Clone)]
pub struct SynthArgs {
    /// Board id (ends up in the file name).
    #[arg(short, long)]
    pub board: u32,

    /// Output directory.
    #[arg(short, long, default_value = ".")]
    pub out: PathBuf,

    /// Comma separated probe voltages. Default: 0.0 to 1.0 in 0.1 steps.
    #[arg(long)]
    pub probes: Option<String>,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Gaussian noise on every code (ADC counts, 1 sigma).
    #[arg(long, default_value_t = 1.5)]
    pub noise: f64,
}
