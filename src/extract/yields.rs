//! Yield & ratio extraction.
//!
//! Turns raw labeled measurements into:
//! - a `YieldTable` of nominal rates (clamped to `>= 0`)
//! - a `RatioTable` of systematic-to-nominal ratios (floored at `RATIO_FLOOR`)
//!
//! Extraction is two full passes over the source. `nominal_pass` is the only
//! way to obtain `NominalTables`, and `systematic_pass` consumes them, so every
//! ratio is computed against a fully populated nominal table no matter how the
//! source orders its records.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::domain::{split_variation, BinKey, RATIO_FLOOR, RatioTable, RawLabel, RawRecord, Role, YieldTable};
use crate::error::{AppError, Anomaly};
use crate::extract::category::{name_category, region_family};
use crate::extract::process::{ProcessResolver, Resolution};
use crate::io::ingest::YieldSource;

/// Record counters collected during the nominal pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub records_read: usize,
    pub nominal_records: usize,
    pub systematic_records: usize,
    pub data_records: usize,
    pub skipped_records: usize,
}

/// Output of the nominal pass; input of the systematic pass.
#[derive(Debug, Clone)]
pub struct NominalTables {
    yields: YieldTable,
    ratios: RatioTable,
    /// Integral of the nominal record per `(region, process)`.
    integrals: BTreeMap<(String, String), f64>,
    roles: BTreeMap<String, Role>,
    anomalies: Vec<Anomaly>,
    stats: ExtractStats,
}

impl NominalTables {
    pub fn yields(&self) -> &YieldTable {
        &self.yields
    }
}

/// Full extraction output.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub yields: YieldTable,
    pub ratios: RatioTable,
    /// Canonical processes seen in the source, with their configured role.
    pub roles: BTreeMap<String, Role>,
    pub anomalies: Vec<Anomaly>,
    pub stats: ExtractStats,
}

/// A record that survived label parsing and process resolution.
struct Classified<'r> {
    region: &'r str,
    systematic: Option<&'r str>,
    process: String,
    role: Role,
}

/// Run both passes in order.
pub fn extract(source: &dyn YieldSource, config: &ModelConfig) -> Result<Extraction, AppError> {
    let nominal = nominal_pass(source, config);
    if nominal.yields.is_empty() {
        return Err(AppError::new(
            3,
            "No nominal measurement of any configured process was found.",
        ));
    }
    Ok(systematic_pass(source, config, nominal))
}

/// Pass 1: record every nominal rate and its statistical-uncertainty ratio.
pub fn nominal_pass(source: &dyn YieldSource, config: &ModelConfig) -> NominalTables {
    let resolver = ProcessResolver::new(config);
    let mut tables = NominalTables {
        yields: YieldTable::default(),
        ratios: RatioTable::default(),
        integrals: BTreeMap::new(),
        roles: BTreeMap::new(),
        anomalies: Vec::new(),
        stats: ExtractStats::default(),
    };

    for record in source.records() {
        tables.stats.records_read += 1;

        let classified = match classify(record, &resolver) {
            Ok(Some(c)) => c,
            Ok(None) => {
                tables.stats.data_records += 1;
                continue;
            }
            Err(anomaly) => {
                debug!("{anomaly}");
                tables.anomalies.push(anomaly);
                tables.stats.skipped_records += 1;
                continue;
            }
        };
        let Some(family) = region_family(&config.regions, classified.region) else {
            let anomaly = Anomaly::UnknownRegion {
                region: classified.region.to_string(),
                label: record.label.clone(),
            };
            debug!("{anomaly}");
            tables.anomalies.push(anomaly);
            tables.stats.skipped_records += 1;
            continue;
        };

        tables.roles.insert(classified.process.clone(), classified.role);
        if classified.systematic.is_some() {
            tables.stats.systematic_records += 1;
            continue;
        }
        tables.stats.nominal_records += 1;
        debug!(label = %record.label, "nominal record");

        tables
            .integrals
            .entry((classified.region.to_string(), classified.process.clone()))
            .or_insert_with(|| record.integral());

        for (&bin, content) in record.bins.range(1..=family.max_bins) {
            let Some(category) = name_category(&config.regions, classified.region, bin) else {
                continue;
            };
            let key = BinKey::new(category, classified.process.clone());

            if !tables.yields.insert_nominal(key.clone(), content.value) {
                let anomaly = Anomaly::DuplicateNominal {
                    category: key.category.to_string(),
                    process: key.process.clone(),
                    label: record.label.clone(),
                };
                debug!("{anomaly}");
                tables.anomalies.push(anomaly);
                continue;
            }

            let nominal = tables.yields.get(&key).unwrap_or(0.0);
            let error = content
                .error
                .unwrap_or_else(|| content.value.max(0.0).sqrt());
            let ratio = stat_ratio(nominal, error);
            tables.ratios.insert(key, config.stat_family.clone(), ratio);
        }
    }

    info!(
        records = tables.stats.records_read,
        nominal = tables.stats.nominal_records,
        rates = tables.yields.len(),
        "nominal pass complete"
    );
    tables
}

/// Pass 2: ratios of every systematic variation to its nominal rate.
pub fn systematic_pass(source: &dyn YieldSource, config: &ModelConfig, nominal: NominalTables) -> Extraction {
    let resolver = ProcessResolver::new(config);
    let NominalTables {
        yields,
        mut ratios,
        integrals,
        roles,
        mut anomalies,
        stats,
    } = nominal;

    for record in source.records() {
        // Unusable records were already reported by the nominal pass.
        let Ok(Some(classified)) = classify(record, &resolver) else {
            continue;
        };
        let Some(systematic) = classified.systematic else {
            continue;
        };
        let Some(family) = region_family(&config.regions, classified.region) else {
            continue;
        };
        let is_fake_rate = split_variation(systematic).0 == config.fake_rate_family;

        for (&bin, content) in record.bins.range(1..=family.max_bins) {
            let Some(category) = name_category(&config.regions, classified.region, bin) else {
                continue;
            };
            let key = BinKey::new(category, classified.process.clone());

            let Some(nominal_rate) = yields.get(&key) else {
                let anomaly = Anomaly::MissingNominal {
                    category: key.category.to_string(),
                    process: key.process.clone(),
                    systematic: systematic.to_string(),
                };
                debug!("{anomaly}");
                anomalies.push(anomaly);
                continue;
            };
            // Undefined against a zero nominal; never defaulted.
            if nominal_rate == 0.0 {
                continue;
            }
            if ratios.get(&key, systematic).is_some() {
                continue;
            }

            let raw = if is_fake_rate {
                // Whole jet-multiplicity family, to avoid bin-by-bin noise.
                match integrals.get(&(classified.region.to_string(), classified.process.clone())) {
                    Some(&total) if total > 0.0 => record.integral() / total,
                    _ => f64::NAN,
                }
            } else {
                content.value / nominal_rate
            };

            let (ratio, degenerate) = floor_ratio(raw);
            if degenerate {
                let anomaly = Anomaly::DegenerateRatio {
                    category: key.category.to_string(),
                    process: key.process.clone(),
                    systematic: systematic.to_string(),
                    value: raw,
                };
                debug!("{anomaly}");
                anomalies.push(anomaly);
            }
            ratios.insert(key, systematic, ratio);
        }
    }

    info!(ratios = ratios.len(), "systematic pass complete");
    Extraction {
        yields,
        ratios,
        roles,
        anomalies,
        stats,
    }
}

/// `1 + error / nominal` for positive nominals, neutral `1.0` otherwise.
pub fn stat_ratio(nominal: f64, error: f64) -> f64 {
    if nominal > 0.0 {
        floor_ratio(1.0 + error / nominal).0
    } else {
        1.0
    }
}

/// Floor a ratio at `RATIO_FLOOR`; the flag marks non-positive or non-finite input.
pub fn floor_ratio(raw: f64) -> (f64, bool) {
    if !raw.is_finite() || raw <= 0.0 {
        (RATIO_FLOOR, true)
    } else {
        (raw.max(RATIO_FLOOR), false)
    }
}

/// Parse the label and resolve the process. `Ok(None)` marks observed data.
fn classify<'r>(record: &'r RawRecord, resolver: &ProcessResolver<'_>) -> Result<Option<Classified<'r>>, Anomaly> {
    let label = RawLabel::parse(&record.label).ok_or_else(|| Anomaly::MalformedLabel {
        label: record.label.clone(),
    })?;
    match resolver.resolve(label.process) {
        Resolution::Process { name, role } => Ok(Some(Classified {
            region: label.region,
            systematic: label.systematic,
            process: name,
            role,
        })),
        Resolution::Data => Ok(None),
        Resolution::Unknown => Err(Anomaly::UnknownProcess {
            label: label.process.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BinContent, Category, JetBucket};
    use crate::io::ingest::MeasurementSet;

    fn key(region: &str, bucket: JetBucket, process: &str) -> BinKey {
        BinKey::new(Category::new(region, bucket), process)
    }

    fn run(records: Vec<RawRecord>) -> Extraction {
        let config = ModelConfig::default();
        extract(&MeasurementSet::new(records), &config).unwrap()
    }

    #[test]
    fn nominal_rates_are_clamped_and_stat_ratio_recorded() {
        let mut record = RawRecord::new("3l_ppp_1b.ttH_16D", &[4.0, -1.0, 0.0, 9.0]);
        record.bins.get_mut(&1).unwrap().error = Some(1.0);
        let out = run(vec![record]);

        let k1 = key("3l_ppp_1b", JetBucket::Exact(2), "ttH");
        let k2 = key("3l_ppp_1b", JetBucket::Exact(3), "ttH");
        let k4 = key("3l_ppp_1b", JetBucket::AtLeast(5), "ttH");
        assert_eq!(out.yields.get(&k1), Some(4.0));
        assert_eq!(out.yields.get(&k2), Some(0.0));

        assert!((out.ratios.get(&k1, "MCSTATS").unwrap() - 1.25).abs() < 1e-12);
        assert_eq!(out.ratios.get(&k2, "MCSTATS"), Some(1.0));
        // No error supplied: sqrt(9) / 9.
        assert!((out.ratios.get(&k4, "MCSTATS").unwrap() - (1.0 + 3.0 / 9.0)).abs() < 1e-12);
    }

    #[test]
    fn ratios_are_computed_after_all_nominals_regardless_of_order() {
        // Variation listed before its nominal.
        let out = run(vec![
            RawRecord::new("4l_2b.JESUP.ttH_16D", &[2.2, 0.5]),
            RawRecord::new("4l_2b.ttH_16D", &[2.0, 0.0]),
        ]);
        let k1 = key("4l_2b", JetBucket::Exact(1), "ttH");
        let k2 = key("4l_2b", JetBucket::Exact(2), "ttH");
        assert!((out.ratios.get(&k1, "JESUP").unwrap() - 1.1).abs() < 1e-12);
        // Zero nominal: undefined, not 1.0.
        assert_eq!(out.ratios.get(&k2, "JESUP"), None);
        assert!(out.anomalies.is_empty());
    }

    #[test]
    fn zero_variation_is_floored() {
        let out = run(vec![
            RawRecord::new("4l_2b.ttH_16D", &[2.0]),
            RawRecord::new("4l_2b.JESDOWN.ttH_16D", &[0.0]),
        ]);
        let k = key("4l_2b", JetBucket::Exact(1), "ttH");
        assert_eq!(out.ratios.get(&k, "JESDOWN"), Some(RATIO_FLOOR));
        assert!(matches!(out.anomalies[0], Anomaly::DegenerateRatio { .. }));
    }

    #[test]
    fn missing_nominal_is_omitted_and_reported() {
        let out = run(vec![
            RawRecord::new("4l_2b.ttH_16D", &[2.0]),
            RawRecord::new("4l_2b.JESUP.ttH_16D", &[2.0, 1.0]),
        ]);
        let k2 = key("4l_2b", JetBucket::Exact(2), "ttH");
        assert_eq!(out.ratios.get(&k2, "JESUP"), None);
        assert!(out
            .anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::MissingNominal { systematic, .. } if systematic == "JESUP")));
    }

    #[test]
    fn fake_rate_uses_family_integral() {
        let out = run(vec![
            RawRecord::new("2lss_p_1b.fakes", &[1.0, 3.0, 0.0, 4.0]),
            RawRecord::new("2lss_p_1b.FRUP.fakes", &[2.0, 3.0, 1.0, 4.0]),
        ]);
        let k1 = key("2lss_p_1b", JetBucket::Exact(4), "fakes");
        let k2 = key("2lss_p_1b", JetBucket::Exact(5), "fakes");
        let k3 = key("2lss_p_1b", JetBucket::Exact(6), "fakes");
        assert!((out.ratios.get(&k1, "FRUP").unwrap() - 10.0 / 8.0).abs() < 1e-12);
        assert!((out.ratios.get(&k2, "FRUP").unwrap() - 10.0 / 8.0).abs() < 1e-12);
        assert_eq!(out.ratios.get(&k3, "FRUP"), None);
    }

    #[test]
    fn unknown_and_malformed_records_are_skipped() {
        let out = run(vec![
            RawRecord::new("4l_2b.ttH_16D", &[2.0]),
            RawRecord::new("4l_2b.DYJets", &[7.0]),
            RawRecord::new("4l_2b", &[7.0]),
            RawRecord::new("1l_cr.fakes", &[7.0]),
            RawRecord::new("4l_2b.data", &[7.0]),
        ]);
        assert_eq!(out.yields.len(), 1);
        assert_eq!(out.stats.records_read, 5);
        assert_eq!(out.stats.data_records, 1);
        assert_eq!(out.stats.skipped_records, 3);
        let kinds: Vec<_> = out.anomalies.iter().map(Anomaly::kind).collect();
        assert_eq!(kinds, ["unknown-process", "malformed-label", "unknown-region"]);
    }

    #[test]
    fn duplicate_nominal_keeps_first() {
        let out = run(vec![
            RawRecord::new("4l_2b.WZ", &[2.0]),
            RawRecord::new("4l_2b.Diboson", &[5.0]),
        ]);
        let k = key("4l_2b", JetBucket::Exact(1), "Diboson");
        assert_eq!(out.yields.get(&k), Some(2.0));
        assert!(matches!(out.anomalies[0], Anomaly::DuplicateNominal { .. }));
    }

    #[test]
    fn bins_beyond_family_are_ignored() {
        let out = run(vec![RawRecord::new("3l_ppp_1b.ttH_16D", &[1.0, 1.0, 1.0, 1.0, 50.0])]);
        assert_eq!(out.yields.len(), 4);
    }

    #[test]
    fn unmeasured_sub_bin_has_no_nominal() {
        let nominal = RawRecord {
            label: "4l_2b.ttH_16D".to_string(),
            bins: BTreeMap::from([(2, BinContent { value: 1.0, error: None })]),
        };
        let out = run(vec![nominal, RawRecord::new("4l_2b.JESUP.ttH_16D", &[0.4, 1.2])]);

        let k1 = key("4l_2b", JetBucket::Exact(1), "ttH");
        let k2 = key("4l_2b", JetBucket::Exact(2), "ttH");
        assert_eq!(out.yields.get(&k1), None);
        assert_eq!(out.ratios.get(&k1, "JESUP"), None);
        assert!((out.ratios.get(&k2, "JESUP").unwrap() - 1.2).abs() < 1e-12);
        assert_eq!(
            out.anomalies,
            vec![Anomaly::MissingNominal {
                category: "C_4l_2b_1j".to_string(),
                process: "ttH".to_string(),
                systematic: "JESUP".to_string(),
            }]
        );
    }

    #[test]
    fn no_nominals_is_an_error() {
        let config = ModelConfig::default();
        let source = MeasurementSet::new(vec![RawRecord {
            label: "4l_2b.JESUP.ttH_16D".to_string(),
            bins: BTreeMap::from([(1, BinContent { value: 1.0, error: None })]),
        }]);
        let err = extract(&source, &config).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn floor_ratio_cases() {
        assert_eq!(floor_ratio(0.0), (RATIO_FLOOR, true));
        assert_eq!(floor_ratio(-3.0), (RATIO_FLOOR, true));
        assert_eq!(floor_ratio(f64::NAN), (RATIO_FLOOR, true));
        assert_eq!(floor_ratio(1e-6), (RATIO_FLOOR, false));
        assert_eq!(floor_ratio(1.2), (1.2, false));
    }
}
