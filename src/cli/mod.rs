//! Command-line parsing for the datacard builder.
//!
//! Parsing and dispatch stay separate from the extraction/assembly code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "datacard", version, about = "Rate & nuisance model builder for binned yields")]
pub struct Cli {
    /// More log output (debug level, per-bin anomalies).
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only warnings and errors on stderr.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the model and write a datacard (stdout unless `--output`).
    Build(BuildArgs),
    /// Show admitted and rejected categories with their signal sums.
    Categories(InputArgs),
    /// Up/down agreement at peak and off-peak buckets for each peak family.
    Peaks(InputArgs),
}

/// Input and configuration options shared by every subcommand.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    /// Yield file (`.json`, or long-format CSV `label,bin,yield[,error]`).
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Model configuration JSON (falls back to `DATACARD_CONFIG`, then built-in defaults).
    #[arg(short, long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Override the category admission floor on summed signal rate.
    #[arg(long)]
    pub signal_floor: Option<f64>,

    /// Override the symmetrization magnitude cap.
    #[arg(long)]
    pub cap: Option<f64>,
}

/// Options for `build`.
#[derive(Debug, Args, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Write the datacard here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Also export the model as JSON.
    #[arg(long = "export-json", value_name = "FILE")]
    pub export_json: Option<PathBuf>,

    /// Skip the run summary.
    #[arg(long)]
    pub no_summary: bool,
}
