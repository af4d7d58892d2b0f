//! Nuisance assembler: naming, dedup, grouping, and the final `RateModel`.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::config::{ModelConfig, ALL_GROUP};
use crate::domain::{NuisanceRecord, RateModel, Role};
use crate::error::{AppError, Anomaly};
use crate::extract::{AdmittedCategories, Extraction};
use crate::nuisance::symmetrize::Emission;

/// Build the model handed to the sinks.
///
/// Returns the model plus anomalies raised while assembling (duplicates).
pub fn assemble_model(
    extraction: &Extraction,
    admitted: &AdmittedCategories,
    emission: Emission,
    config: &ModelConfig,
) -> Result<(RateModel, Vec<Anomaly>), AppError> {
    let group_rules = config.compiled_groups()?;
    let mut anomalies = Vec::new();

    let mut seen = BTreeSet::new();
    let mut nuisances = Vec::with_capacity(emission.records.len());
    for record in emission.records {
        let name = config.nuisance_name(&record.name);
        if !seen.insert((record.process.clone(), record.category.clone(), name.clone())) {
            let anomaly = Anomaly::DuplicateNuisance {
                category: record.category.to_string(),
                process: record.process.clone(),
                name,
            };
            debug!("{anomaly}");
            anomalies.push(anomaly);
            continue;
        }
        nuisances.push(NuisanceRecord { name, ..record });
    }

    let mut rates = BTreeMap::new();
    let mut observations = BTreeMap::new();
    let mut present = BTreeSet::new();
    for (key, rate) in extraction.yields.iter() {
        if !admitted.contains(&key.category) {
            continue;
        }
        *observations.entry(key.category.clone()).or_insert(0.0) += rate;
        present.insert(key.process.as_str());
        rates.insert(key.clone(), rate);
    }

    let in_model = |list: &[String], role: Role| -> Vec<String> {
        list.iter()
            .filter(|p| present.contains(p.as_str()) && extraction.roles.get(p.as_str()) == Some(&role))
            .cloned()
            .collect()
    };
    let signals = in_model(&config.signals, Role::Signal);
    let backgrounds = in_model(&config.backgrounds, Role::Background);

    let mut model = RateModel {
        categories: admitted.iter().cloned().collect(),
        signals,
        backgrounds,
        rates,
        observations,
        nuisances,
        groups: BTreeMap::new(),
    };

    let names: Vec<String> = model.nuisance_names().into_iter().map(str::to_string).collect();
    for (group, patterns) in &group_rules {
        let members: BTreeSet<String> = names
            .iter()
            .filter(|n| patterns.iter().any(|re| re.is_match(n)))
            .cloned()
            .collect();
        if !members.is_empty() {
            model.groups.insert(group.clone(), members);
        }
    }
    if !names.is_empty() {
        model.groups.insert(ALL_GROUP.to_string(), names.into_iter().collect());
    }

    info!(
        categories = model.categories.len(),
        processes = model.signals.len() + model.backgrounds.len(),
        nuisances = model.nuisances.len(),
        groups = model.groups.len(),
        "model assembled"
    );
    Ok((model, anomalies))
}
