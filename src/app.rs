//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs logging
//! - resolves the model configuration
//! - loads yields
//! - runs the pipeline for the chosen subcommand
//! - writes the datacard and optional exports

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{BuildArgs, Cli, Command, InputArgs};
use crate::config::ModelConfig;
use crate::error::AppError;
use crate::io::ingest::load_yields;
use crate::io::{write_datacard_file, write_model_json, DatacardWriter, ModelSink};

pub mod pipeline;

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV: &str = "DATACARD_CONFIG";

/// Entry point for the `datacard` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Build(args) => handle_build(args),
        Command::Categories(args) => handle_categories(args),
        Command::Peaks(args) => handle_peaks(args),
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    // A second init (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_build(args: BuildArgs) -> Result<(), AppError> {
    let config = resolve_config(&args.input)?;
    let ingested = load_yields(&args.input.input)?;
    let run = pipeline::run_build(&ingested.measurements, &config)?;

    match &args.output {
        Some(path) => {
            write_datacard_file(path, &run.model)?;
            if !args.no_summary {
                println!("{}", crate::report::format_run_summary(&run, &config));
            }
        }
        None => {
            let stdout = std::io::stdout();
            DatacardWriter::new(stdout.lock()).write_model(&run.model)?;
            // stdout carries the datacard itself.
            if !args.no_summary {
                eprintln!("{}", crate::report::format_run_summary(&run, &config));
            }
        }
    }

    if let Some(path) = &args.export_json {
        write_model_json(path, &run.model)?;
    }
    Ok(())
}

fn handle_categories(args: InputArgs) -> Result<(), AppError> {
    let config = resolve_config(&args)?;
    let ingested = load_yields(&args.input)?;
    let gate = pipeline::run_gate(&ingested.measurements, &config)?;
    print_report(&crate::report::format_categories(&gate, config.signal_floor))
}

fn handle_peaks(args: InputArgs) -> Result<(), AppError> {
    let config = resolve_config(&args)?;
    let ingested = load_yields(&args.input)?;
    let gate = pipeline::run_gate(&ingested.measurements, &config)?;
    let summaries: Vec<_> = config
        .symmetrized_families
        .iter()
        .map(|family| {
            crate::nuisance::peak_agreement(
                &gate.extraction.yields,
                &gate.extraction.ratios,
                &gate.extraction.roles,
                family,
                &config.data_driven,
            )
        })
        .collect();
    print_report(&crate::report::format_peak_agreement(&summaries))
}

fn print_report(text: &str) -> Result<(), AppError> {
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .map_err(|e| AppError::new(4, format!("Failed to write report: {e}")))
}

/// Config precedence: `--config`, then `DATACARD_CONFIG`, then defaults; CLI overrides last.
pub fn resolve_config(args: &InputArgs) -> Result<ModelConfig, AppError> {
    let path = args
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let mut config = match &path {
        Some(p) => {
            info!("using config {}", p.display());
            ModelConfig::from_json_file(p)?
        }
        None => {
            debug!("no config file given; using built-in defaults");
            ModelConfig::default()
        }
    };

    if let Some(floor) = args.signal_floor {
        config.signal_floor = floor;
    }
    if let Some(cap) = args.cap {
        config.symmetrize_cap = cap;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(config: Option<PathBuf>) -> InputArgs {
        InputArgs {
            input: PathBuf::from("unused.csv"),
            config,
            signal_floor: Some(0.2),
            cap: None,
        }
    }

    #[test]
    fn cli_overrides_apply_on_top_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "signal_floor": 0.05, "symmetrize_cap": 2.5 }"#).unwrap();

        let config = resolve_config(&args(Some(path))).unwrap();
        assert_eq!(config.signal_floor, 0.2);
        assert_eq!(config.symmetrize_cap, 2.5);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let mut a = args(Some(PathBuf::from("/nonexistent/config.json")));
        assert_eq!(resolve_config(&a).unwrap_err().exit_code(), 2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, "{}").unwrap();
        a.config = Some(path);
        a.signal_floor = Some(-1.0);
        assert_eq!(resolve_config(&a).unwrap_err().exit_code(), 2);
    }
}
