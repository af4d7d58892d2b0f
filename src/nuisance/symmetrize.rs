//! Symmetrization & override engine.
//!
//! Turns the ratio table into raw (un-renamed) nuisance records for every
//! admitted `(process, category)` with a positive nominal rate. Per key the
//! emission order is fixed:
//!
//! 1. statistical family
//! 2. flat families
//! 3. override families
//! 4. two-point families (symmetrized ones through `symmetrize`)
//!
//! Keys are independent, so they are emitted on the rayon pool and collected
//! back in `BinKey` order.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{ModelConfig, OverrideEntry};
use crate::domain::{split_variation, BinKey, Direction, NuisanceRecord, NuisanceValue, Role, Variation};
use crate::error::{AppError, Anomaly};
use crate::extract::{AdmittedCategories, Extraction};
use crate::nuisance::peak::PeakDirections;

/// Raw nuisance records plus the anomalies met while emitting them.
#[derive(Debug, Clone, Default)]
pub struct Emission {
    pub records: Vec<NuisanceRecord>,
    pub anomalies: Vec<Anomaly>,
}

/// Distance from unity on a multiplicative scale.
pub fn reflect(ratio: f64) -> f64 {
    ratio.max(1.0 / ratio)
}

/// Collapse an up/down pair into one signed multiplier within `[1/cap, cap]`.
pub fn symmetrize(up: f64, down: f64, direction: Direction, cap: f64) -> f64 {
    let avg = (reflect(up) + reflect(down)) / 2.0;
    let signed = match direction {
        Direction::Pos => avg,
        Direction::Neg => 1.0 / avg,
    };
    signed.clamp(1.0 / cap, cap)
}

#[derive(Default)]
struct TwoPoint {
    up: Option<f64>,
    down: Option<f64>,
    single: Option<f64>,
}

/// Emit every applicable nuisance for the admitted keys.
pub fn emit_nuisances(
    extraction: &Extraction,
    admitted: &AdmittedCategories,
    directions: &PeakDirections,
    config: &ModelConfig,
) -> Result<Emission, AppError> {
    let keys: Vec<(&BinKey, Role)> = extraction
        .yields
        .iter()
        .filter(|(key, rate)| *rate > 0.0 && admitted.contains(&key.category))
        .filter_map(|(key, _)| extraction.roles.get(&key.process).map(|role| (key, *role)))
        .collect();

    let per_key = keys
        .par_iter()
        .map(|(key, role)| emit_for_key(key, *role, extraction, directions, config))
        .collect::<Result<Vec<_>, AppError>>()?;

    let mut emission = Emission::default();
    for part in per_key {
        emission.records.extend(part.records);
        emission.anomalies.extend(part.anomalies);
    }
    info!(
        keys = keys.len(),
        records = emission.records.len(),
        "nuisances emitted"
    );
    Ok(emission)
}

fn emit_for_key(
    key: &BinKey,
    role: Role,
    extraction: &Extraction,
    directions: &PeakDirections,
    config: &ModelConfig,
) -> Result<Emission, AppError> {
    let mut out = Emission::default();
    let record = |name: &str, value: NuisanceValue| NuisanceRecord {
        process: key.process.clone(),
        category: key.category.clone(),
        name: name.to_string(),
        value,
    };

    if let Some(stat) = extraction.ratios.get(key, &config.stat_family) {
        out.records.push(record(&config.stat_family, NuisanceValue::Symmetric(stat)));
    }

    for flat in &config.flat {
        if flat.applies_to.applies(&key.process, role) {
            out.records.push(record(&flat.name, NuisanceValue::Symmetric(flat.value)));
        }
    }

    let category = key.category.to_string();
    for family in config.overrides.iter().filter(|o| o.covers(&key.process)) {
        match family.lookup(&key.process, &category) {
            Some(OverrideEntry::Value(v)) => {
                out.records.push(record(&family.name, NuisanceValue::Symmetric(v)));
            }
            Some(OverrideEntry::NotApplicable) => {
                let anomaly = Anomaly::OverrideNotApplicable {
                    family: family.name.clone(),
                    category: category.clone(),
                    process: key.process.clone(),
                };
                debug!("{anomaly}");
                out.anomalies.push(anomaly);
            }
            None => {
                return Err(AppError::config(format!(
                    "override table `{}` has no entry for {} in {category}",
                    family.name, key.process
                )));
            }
        }
    }

    let mut pairs: BTreeMap<&str, TwoPoint> = BTreeMap::new();
    for (systematic, ratio) in extraction.ratios.for_key(key) {
        if systematic == config.stat_family {
            continue;
        }
        let (stem, side) = split_variation(systematic);
        let entry = pairs.entry(stem).or_default();
        match side {
            Some(Variation::Up) => entry.up = Some(ratio),
            Some(Variation::Down) => entry.down = Some(ratio),
            None => entry.single = Some(ratio),
        }
    }

    for (stem, point) in pairs {
        if config.is_intermediate(stem) {
            continue;
        }
        let emitted_name = config.nuisance_name(stem);
        let overridden = config
            .overrides
            .iter()
            .any(|o| o.covers(&key.process) && (o.name == stem || o.name == emitted_name));
        if overridden {
            continue;
        }

        let value = match (point.up, point.down, point.single) {
            (Some(up), Some(down), _) if config.is_symmetrized(stem) => {
                let direction = directions.get(stem, key).unwrap_or(Direction::Pos);
                NuisanceValue::Symmetric(symmetrize(up, down, direction, config.symmetrize_cap))
            }
            (Some(up), Some(down), _) => NuisanceValue::Asymmetric { down, up },
            (None, None, Some(v)) => NuisanceValue::Symmetric(v),
            _ => {
                debug!(
                    family = stem,
                    process = %key.process,
                    category = %key.category,
                    "incomplete up/down pair; not emitted"
                );
                continue;
            }
        };
        out.records.push(record(stem, value));
    }

    Ok(out)
}
