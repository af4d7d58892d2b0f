//! Shared end-to-end pipeline used by every subcommand.
//!
//! raw records -> (nominal pass, systematic pass) -> category gate
//! -> peak directions -> emission -> assembly
//!
//! Each stage reads only tables fully built by the stage before it.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::domain::RateModel;
use crate::error::{AppError, Anomaly};
use crate::extract::{admit_categories, extract, AdmittedCategories, Extraction};
use crate::io::ingest::YieldSource;
use crate::nuisance::{assemble_model, emit_nuisances, resolve_directions, PeakDirections};

/// Tables up to and including the category gate.
#[derive(Debug, Clone)]
pub struct GateOutput {
    pub extraction: Extraction,
    pub admitted: AdmittedCategories,
}

/// All computed outputs of a single `datacard build` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub extraction: Extraction,
    pub admitted: AdmittedCategories,
    pub directions: PeakDirections,
    pub model: RateModel,
    /// Every anomaly from every stage, in stage order.
    pub anomalies: Vec<Anomaly>,
}

/// Extract and gate; does not require any category to be admitted.
pub fn run_gate(source: &dyn YieldSource, config: &ModelConfig) -> Result<GateOutput, AppError> {
    config.validate()?;
    let extraction = extract(source, config)?;
    let admitted = admit_categories(&extraction.yields, &extraction.roles, config.signal_floor)?;
    Ok(GateOutput { extraction, admitted })
}

/// Execute the full pipeline and return the assembled model.
pub fn run_build(source: &dyn YieldSource, config: &ModelConfig) -> Result<RunOutput, AppError> {
    let GateOutput { extraction, admitted } = run_gate(source, config)?;
    if admitted.is_empty() {
        return Err(AppError::new(
            3,
            format!(
                "No category passed the signal floor of {}; nothing to model.",
                config.signal_floor
            ),
        ));
    }

    let directions = resolve_directions(&extraction.yields, &extraction.ratios, &config.symmetrized_families);
    let emission = emit_nuisances(&extraction, &admitted, &directions, config)?;

    let mut anomalies = extraction.anomalies.clone();
    anomalies.extend(emission.anomalies.iter().cloned());
    let (model, assembly_anomalies) = assemble_model(&extraction, &admitted, emission, config)?;
    anomalies.extend(assembly_anomalies);

    log_anomaly_summary(&anomalies);
    info!(
        categories = model.categories.len(),
        nuisances = model.nuisances.len(),
        "build complete"
    );

    Ok(RunOutput {
        extraction,
        admitted,
        directions,
        model,
        anomalies,
    })
}

/// Anomaly counts by kind.
pub fn count_anomalies(anomalies: &[Anomaly]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for a in anomalies {
        *counts.entry(a.kind()).or_insert(0) += 1;
    }
    counts
}

fn log_anomaly_summary(anomalies: &[Anomaly]) {
    for (kind, count) in count_anomalies(anomalies) {
        match kind {
            // Expected in normal inputs.
            "override-not-applicable" | "degenerate-ratio" => info!(kind, count, "anomalies"),
            _ => warn!(kind, count, "anomalies"),
        }
    }
}
