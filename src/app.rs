//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and sets up logging
//! - parses CLI arguments
//! - runs a conversion batch, shows an artifact, or writes a synthetic dump
//! - prints reports

use std::io;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, ConvertArgs, ShowArgs, SynthArgs};
use crate::data::{SynthConfig, default_probes, parse_probe_list, write_dump};
use crate::domain::{ConvertConfig, PlotRequest, PlotStyle};
use crate::error::AppError;
use crate::fit::LeastSquaresFitter;
use crate::plot::AsciiPlotSink;
use crate::tui::TerminalPlotSink;

pub mod pipeline;

/// ASCII diagnostic size (columns x rows per panel).
const ASCII_PLOT_WIDTH: usize = 100;
const ASCII_PLOT_HEIGHT: usize = 25;

/// Entry point for the `sampic-cal` binary.
pub fn run() -> Result<(), AppError> {
    // `.env` may carry RUST_LOG; it must be loaded before the filter is built.
    dotenvy::dotenv().ok();

    // We want `sampic-cal run_db5.txt` to behave like `sampic-cal convert run_db5.txt`.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    init_logging(cli.verbose);

    match cli.command {
        Command::Convert(args) => handle_convert(args),
        Command::Show(args) => handle_show(args),
        Command::Synth(args) => handle_synth(args),
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn handle_convert(args: ConvertArgs) -> Result<(), AppError> {
    let config = convert_config_from_args(&args);
    let fitter = LeastSquaresFitter::default();

    let batch = match config.plot.map(|request| request.style) {
        Some(PlotStyle::Terminal) => pipeline::run_batch(&config, &fitter, Some(&mut TerminalPlotSink))?,
        Some(PlotStyle::Ascii) => {
            let mut sink = AsciiPlotSink::new(io::stdout(), ASCII_PLOT_WIDTH, ASCII_PLOT_HEIGHT);
            pipeline::run_batch(&config, &fitter, Some(&mut sink))?
        }
        None => pipeline::run_batch(&config, &fitter, None)?,
    };
    println!("{}", crate::report::format_batch_summary(&batch));
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<(), AppError> {
    let artifact = crate::io::read_artifact(&args.artifact)?;
    println!("{}", crate::report::format_artifact_summary(&args.artifact, &artifact));
    Ok(())
}

fn handle_synth(args: SynthArgs) -> Result<(), AppError> {
    let probes = match &args.probes {
        Some(list) => parse_probe_list(list)?,
        None => default_probes(),
    };
    let config = SynthConfig {
        board: args.board,
        probes,
        seed: args.seed,
        noise: args.noise,
        out: args.out,
    };
    let path = write_dump(&config)?;
    println!("{}", path.display());
    Ok(())
}

pub fn convert_config_from_args(args: &ConvertArgs) -> ConvertConfig {
    ConvertConfig {
        inputs: args.inputs.clone(),
        formula: args.function.clone(),
        fit_from: args.fit_from,
        fit_to: args.fit_to,
        bound_policy: args.bound_policy,
        plot: args.plot.map(|block| PlotRequest {
            block: usize::from(block),
            style: if args.ascii_plot {
                PlotStyle::Ascii
            } else {
                PlotStyle::Terminal
            },
        }),
        merge: args.merge.clone(),
        output: args.output.clone(),
    }
}

/// Rewrite argv so `sampic-cal` defaults to `sampic-cal convert`.
///
/// Rules (leading `-v`/`--verbose` flags are looked past):
/// - `sampic-cal a_db1.txt ...`          -> `sampic-cal convert a_db1.txt ...`
/// - `sampic-cal --merge m a_db1.txt`    -> `sampic-cal convert --merge m a_db1.txt`
/// - `sampic-cal --help/--version/help`  -> unchanged
/// - `sampic-cal` (no arguments)         -> unchanged (clap prints usage)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(pos) = argv
        .iter()
        .skip(1)
        .position(|a| !is_verbose_flag(a))
        .map(|p| p + 1)
    else {
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        argv[pos].as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    let is_subcommand = matches!(argv[pos].as_str(), "convert" | "show" | "synth");
    if is_top_level_help_or_version || is_subcommand {
        return argv;
    }

    argv.insert(pos, "convert".to_string());
    argv
}

fn is_verbose_flag(arg: &str) -> bool {
    arg == "--verbose" || (arg.len() > 1 && arg.starts_with('-') && !arg.starts_with("--") && arg[1..].chars().all(|c| c == 'v'))
}
