//! Run configuration.
//!
//! `ModelConfig` holds every configuration input of a run (process lists,
//! rename tables, region families, thresholds, flat and override families,
//! nuisance groups). It is built once, validated, and then passed by
//! reference into every stage; nothing mutates it during a run.
//!
//! Defaults reproduce the multilepton top-EFT analysis conventions. A JSON file
//! may override any subset of fields.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::Role;
use crate::error::AppError;

/// Region family: which raw region labels it covers and how its sub-bins map to jet counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFamily {
    /// Substring identifying the family in a raw region label (first match wins).
    pub pattern: String,
    /// Jet count of sub-bin `i` is `i + jet_offset`.
    pub jet_offset: u32,
    /// Number of sub-bins; the last one is the open-ended overflow bucket.
    pub max_bins: u32,
}

impl RegionFamily {
    fn new(pattern: &str, jet_offset: u32, max_bins: u32) -> Self {
        Self {
            pattern: pattern.to_string(),
            jet_offset,
            max_bins,
        }
    }
}

/// Which processes a flat or override family applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Applicability {
    All,
    Signal,
    Background,
    Processes(Vec<String>),
}

impl Applicability {
    pub fn applies(&self, process: &str, role: Role) -> bool {
        match self {
            Applicability::All => true,
            Applicability::Signal => role == Role::Signal,
            Applicability::Background => role == Role::Background,
            Applicability::Processes(list) => list.iter().any(|p| p == process),
        }
    }
}

/// Measurement-independent multiplier (e.g. luminosity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatFamily {
    pub name: String,
    pub value: f64,
    pub applies_to: Applicability,
}

/// Family whose values come from a fixed per-process, per-category table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideFamily {
    pub name: String,
    /// Table value meaning "not applicable for this category".
    #[serde(default)]
    pub sentinel: f64,
    /// process -> category label (`C_..._Nj`) -> multiplier.
    pub tables: BTreeMap<String, BTreeMap<String, f64>>,
}

/// Resolved override table entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverrideEntry {
    Value(f64),
    NotApplicable,
}

impl OverrideFamily {
    pub fn covers(&self, process: &str) -> bool {
        self.tables.contains_key(process)
    }

    /// Look up the entry for `(process, category)`.
    ///
    /// `None` means the table has no row for this category at all.
    pub fn lookup(&self, process: &str, category: &str) -> Option<OverrideEntry> {
        let value = *self.tables.get(process)?.get(category)?;
        if value == self.sentinel {
            Some(OverrideEntry::NotApplicable)
        } else {
            Some(OverrideEntry::Value(value))
        }
    }
}

/// Named nuisance group with regex membership patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRule {
    pub name: String,
    pub patterns: Vec<String>,
}

/// Name of the group that always contains every nuisance.
pub const ALL_GROUP: &str = "all";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub signals: Vec<String>,
    pub backgrounds: Vec<String>,
    /// Suffix (after `_`) carried by raw signal labels, stripped before use.
    pub signal_suffix: Option<String>,
    /// Raw labels of observed data; recognized and ignored.
    pub data_labels: Vec<String>,
    /// Raw process spelling -> canonical process name.
    pub process_renames: BTreeMap<String, String>,
    pub regions: Vec<RegionFamily>,
    /// Backgrounds estimated from data; left out of the peak agreement report.
    pub data_driven: Vec<String>,

    /// Minimum summed signal rate for a category to be admitted.
    pub signal_floor: f64,
    /// Symmetrized multipliers are kept within `[1/cap, cap]`.
    pub symmetrize_cap: f64,

    /// Ratio-table key of the statistical-uncertainty family.
    pub stat_family: String,
    /// Family whose ratio uses the jet-multiplicity integral.
    pub fake_rate_family: String,
    /// Two-point families collapsed to one signed multiplier via peak direction.
    pub symmetrized_families: Vec<String>,
    /// Families only used as inputs to other computations; never emitted.
    pub intermediate_families: Vec<String>,
    pub flat: Vec<FlatFamily>,
    pub overrides: Vec<OverrideFamily>,

    /// Raw family stem -> emitted nuisance name.
    pub nuisance_renames: BTreeMap<String, String>,
    pub groups: Vec<GroupRule>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let pairs = |list: &[(&str, &str)]| {
            list.iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect::<BTreeMap<_, _>>()
        };

        Self {
            signals: names(&["ttH", "tllq", "ttll", "ttlnu", "tHq"]),
            backgrounds: names(&["charge_flips", "fakes", "Diboson", "Triboson", "convs"]),
            signal_suffix: Some("16D".to_string()),
            data_labels: names(&["data"]),
            process_renames: pairs(&[
                ("tZq", "tllq"),
                ("ttZ", "ttll"),
                ("ttW", "ttlnu"),
                ("WZ", "Diboson"),
                ("WWW", "Triboson"),
                ("ttGJets", "convs"),
            ]),
            regions: vec![
                RegionFamily::new("2lss", 3, 4),
                RegionFamily::new("3l", 1, 4),
                RegionFamily::new("4l", 0, 4),
            ],
            data_driven: names(&["fakes", "charge_flips"]),
            signal_floor: 0.01,
            symmetrize_cap: 3.0,
            stat_family: "MCSTATS".to_string(),
            fake_rate_family: "FR".to_string(),
            symmetrized_families: names(&["JES"]),
            intermediate_families: Vec::new(),
            flat: vec![
                FlatFamily {
                    name: "Lumi".to_string(),
                    value: 1.025,
                    applies_to: Applicability::All,
                },
                FlatFamily {
                    name: "PDF".to_string(),
                    value: 1.015,
                    applies_to: Applicability::Signal,
                },
                FlatFamily {
                    name: "ChargeFlips".to_string(),
                    value: 1.30,
                    applies_to: Applicability::Processes(names(&["charge_flips"])),
                },
            ],
            overrides: Vec::new(),
            nuisance_renames: pairs(&[("MCSTATS", "MCStats"), ("FR", "FR_FF"), ("pdf", "PDF")]),
            groups: vec![
                GroupRule {
                    name: "theory".to_string(),
                    patterns: names(&["^PDF", "^Q2", "^missing_parton"]),
                },
                GroupRule {
                    name: "experimental".to_string(),
                    patterns: names(&["^Lumi", "^JES", "^MCStats"]),
                },
                GroupRule {
                    name: "datadriven".to_string(),
                    patterns: names(&["^FR_FF", "^ChargeFlips"]),
                },
            ],
        }
    }
}

impl ModelConfig {
    /// Load a JSON config; fields absent from the file keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path)
            .map_err(|e| AppError::new(2, format!("Failed to open config '{}': {e}", path.display())))?;
        serde_json::from_reader(file)
            .map_err(|e| AppError::new(2, format!("Invalid config JSON '{}': {e}", path.display())))
    }

    pub fn role_of(&self, process: &str) -> Option<Role> {
        if self.signals.iter().any(|p| p == process) {
            Some(Role::Signal)
        } else if self.backgrounds.iter().any(|p| p == process) {
            Some(Role::Background)
        } else {
            None
        }
    }

    /// Emitted nuisance name for a raw family stem.
    pub fn nuisance_name(&self, stem: &str) -> String {
        self.nuisance_renames
            .get(stem)
            .cloned()
            .unwrap_or_else(|| stem.to_string())
    }

    pub fn is_symmetrized(&self, stem: &str) -> bool {
        self.symmetrized_families.iter().any(|f| f == stem)
    }

    pub fn is_intermediate(&self, stem: &str) -> bool {
        self.intermediate_families.iter().any(|f| f == stem)
    }

    /// Compiled group patterns, in config order.
    pub fn compiled_groups(&self) -> Result<Vec<(String, Vec<Regex>)>, AppError> {
        self.groups
            .iter()
            .map(|g| {
                let patterns = g
                    .patterns
                    .iter()
                    .map(|p| {
                        Regex::new(p).map_err(|e| {
                            AppError::config(format!("group `{}` has invalid pattern `{p}`: {e}", g.name))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((g.name.clone(), patterns))
            })
            .collect()
    }

    /// Reject configurations that would make the rule engine misbehave.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.signals.is_empty() {
            return Err(AppError::config("no signal processes configured"));
        }
        if let Some(p) = self.signals.iter().find(|p| self.backgrounds.contains(p)) {
            return Err(AppError::config(format!(
                "process `{p}` is listed as both signal and background"
            )));
        }
        if !(self.signal_floor.is_finite() && self.signal_floor >= 0.0) {
            return Err(AppError::config(format!(
                "signal floor must be finite and >= 0 (got {})",
                self.signal_floor
            )));
        }
        if !(self.symmetrize_cap.is_finite() && self.symmetrize_cap > 1.0) {
            return Err(AppError::config(format!(
                "symmetrization cap must be finite and > 1 (got {})",
                self.symmetrize_cap
            )));
        }
        if self.regions.is_empty() {
            return Err(AppError::config("no region families configured"));
        }
        for region in &self.regions {
            if region.pattern.is_empty() || region.max_bins == 0 {
                return Err(AppError::config(format!(
                    "region family `{}` needs a non-empty pattern and at least one sub-bin",
                    region.pattern
                )));
            }
        }
        for flat in &self.flat {
            if !(flat.value.is_finite() && flat.value > 0.0) {
                return Err(AppError::config(format!(
                    "flat family `{}` has non-positive multiplier {}",
                    flat.name, flat.value
                )));
            }
        }
        for family in &self.overrides {
            for (process, table) in &family.tables {
                for (category, &value) in table {
                    if value == family.sentinel {
                        continue;
                    }
                    if !(value.is_finite() && value > 0.0) {
                        return Err(AppError::config(format!(
                            "override `{}` has invalid value {value} for {process} in {category}",
                            family.name
                        )));
                    }
                }
            }
        }
        self.compiled_groups()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ModelConfig::default().validate().unwrap();
    }

    #[test]
    fn overlapping_roles_are_rejected() {
        let mut config = ModelConfig::default();
        config.backgrounds.push("ttH".to_string());
        let err = config.validate().unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("ttH"));
    }

    #[test]
    fn cap_must_exceed_one() {
        let config = ModelConfig {
            symmetrize_cap: 1.0,
            ..ModelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn override_sentinel_is_not_a_value() {
        let family = OverrideFamily {
            name: "missing_parton".to_string(),
            sentinel: 0.0,
            tables: BTreeMap::from([(
                "ttll".to_string(),
                BTreeMap::from([
                    ("C_3l_ppp_1b_2j".to_string(), 1.08),
                    ("C_3l_ppp_1b_3j".to_string(), 0.0),
                ]),
            )]),
        };
        assert_eq!(family.lookup("ttll", "C_3l_ppp_1b_2j"), Some(OverrideEntry::Value(1.08)));
        assert_eq!(family.lookup("ttll", "C_3l_ppp_1b_3j"), Some(OverrideEntry::NotApplicable));
        assert_eq!(family.lookup("ttll", "C_3l_ppp_1b_4j"), None);
        assert!(!family.covers("ttH"));

        let config = ModelConfig {
            overrides: vec![family],
            ..ModelConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn negative_override_value_is_rejected() {
        let family = OverrideFamily {
            name: "missing_parton".to_string(),
            sentinel: 0.0,
            tables: BTreeMap::from([(
                "ttll".to_string(),
                BTreeMap::from([("C_3l_ppp_1b_2j".to_string(), -1.0)]),
            )]),
        };
        let config = ModelConfig {
            overrides: vec![family],
            ..ModelConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ModelConfig =
            serde_json::from_str(r#"{ "signal_floor": 0.5, "symmetrized_families": [] }"#).unwrap();
        assert!((config.signal_floor - 0.5).abs() < 1e-12);
        assert!(config.symmetrized_families.is_empty());
        assert_eq!(config.regions.len(), 3);
        assert_eq!(config.nuisance_name("FR"), "FR_FF");
        assert_eq!(config.nuisance_name("JES"), "JES");
    }

    #[test]
    fn applicability_from_json() {
        let a: Applicability = serde_json::from_str(r#"{ "processes": ["fakes"] }"#).unwrap();
        assert!(a.applies("fakes", Role::Background));
        assert!(!a.applies("ttH", Role::Signal));
        let s: Applicability = serde_json::from_str(r#""signal""#).unwrap();
        assert!(s.applies("ttH", Role::Signal));
    }
}
