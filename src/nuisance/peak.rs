//! Peak-direction resolver.
//!
//! For families that should vary monotonically with jet multiplicity, each
//! `(process, region)` run of jet buckets is scanned for its peak nominal rate:
//!
//! - buckets below the peak fluctuate `Neg`
//! - buckets above the peak fluctuate `Pos`
//! - the overflow bucket is always `Pos`
//! - the peak itself follows its own up variation (`Pos` when `up >= 1`)
//!
//! The same scan feeds the up/down agreement diagnostics behind `peaks`.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::domain::{BinKey, Direction, RatioTable, Role, YieldTable};

/// Direction per `(family, BinKey)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakDirections {
    by_family: BTreeMap<String, BTreeMap<BinKey, Direction>>,
}

impl PeakDirections {
    pub fn get(&self, family: &str, key: &BinKey) -> Option<Direction> {
        self.by_family.get(family)?.get(key).copied()
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.by_family.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_family.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One `(process, region)` run of buckets, ordered by jet count.
struct BucketRun<'a> {
    keys: Vec<(&'a BinKey, f64)>,
    /// Index of the first maximal nominal rate.
    peak: usize,
}

fn bucket_runs(yields: &YieldTable) -> Vec<BucketRun<'_>> {
    let mut grouped: BTreeMap<(&str, &str), Vec<(&BinKey, f64)>> = BTreeMap::new();
    for (key, rate) in yields.iter() {
        grouped
            .entry((key.process.as_str(), key.category.region()))
            .or_default()
            .push((key, rate));
    }

    grouped
        .into_values()
        .map(|mut keys| {
            keys.sort_by_key(|(k, _)| k.category.bucket());
            let mut peak = 0;
            for (idx, (_, rate)) in keys.iter().enumerate() {
                if *rate > keys[peak].1 {
                    peak = idx;
                }
            }
            BucketRun { keys, peak }
        })
        .collect()
}

/// Assign a direction to every measured key, for each peak family.
pub fn resolve_directions(yields: &YieldTable, ratios: &RatioTable, families: &[String]) -> PeakDirections {
    let runs = bucket_runs(yields);
    let mut by_family = BTreeMap::new();

    for family in families {
        let up_name = format!("{family}UP");
        let mut directions = BTreeMap::new();
        for run in &runs {
            for (idx, (key, _)) in run.keys.iter().enumerate() {
                let direction = if key.category.bucket().is_overflow() || idx > run.peak {
                    Direction::Pos
                } else if idx < run.peak {
                    Direction::Neg
                } else {
                    match ratios.get(key, &up_name) {
                        Some(up) if up < 1.0 => Direction::Neg,
                        _ => Direction::Pos,
                    }
                };
                directions.insert((*key).clone(), direction);
            }
        }
        debug!(family = %family, keys = directions.len(), "peak directions resolved");
        by_family.insert(family.clone(), directions);
    }

    PeakDirections { by_family }
}

/// Up/down agreement counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Agreement {
    /// Up and down both above, or both below, unity.
    pub same: usize,
    pub opposite: usize,
}

impl Agreement {
    fn record(&mut self, same: bool) {
        if same {
            self.same += 1;
        } else {
            self.opposite += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.same + self.opposite
    }

    pub fn same_fraction(&self) -> Option<f64> {
        let total = self.total();
        (total > 0).then(|| self.same as f64 / total as f64)
    }
}

/// Agreement counts overall and per lepton multiplicity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgreementSplit {
    pub total: Agreement,
    pub by_lepton: BTreeMap<String, Agreement>,
}

impl AgreementSplit {
    fn record(&mut self, key: &BinKey, same: bool) {
        self.total.record(same);
        if let Some(tag) = key.category.lepton_tag() {
            self.by_lepton.entry(tag.to_string()).or_default().record(same);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeakAgreement {
    pub family: String,
    pub peak: AgreementSplit,
    pub off_peak: AgreementSplit,
}

/// Count how often a family's up and down variations move the same way,
/// separately for peak and off-peak buckets.
///
/// A background whose peak sits in its lowest bucket has no real turnover, so
/// that bucket is counted as off-peak. Processes in `excluded` (data-driven
/// backgrounds) are not counted.
pub fn peak_agreement(
    yields: &YieldTable,
    ratios: &RatioTable,
    roles: &BTreeMap<String, Role>,
    family: &str,
    excluded: &[String],
) -> PeakAgreement {
    let up_name = format!("{family}UP");
    let down_name = format!("{family}DOWN");
    let mut out = PeakAgreement {
        family: family.to_string(),
        ..PeakAgreement::default()
    };

    for run in bucket_runs(yields) {
        for (idx, (key, rate)) in run.keys.iter().enumerate() {
            if *rate <= 0.0 || excluded.contains(&key.process) {
                continue;
            }
            let (Some(up), Some(down)) = (ratios.get(key, &up_name), ratios.get(key, &down_name)) else {
                continue;
            };
            let same = (up > 1.0 && down > 1.0) || (up < 1.0 && down < 1.0);
            let bottom_background = run.peak == 0 && roles.get(&key.process) == Some(&Role::Background);
            if idx == run.peak && !bottom_background {
                out.peak.record(key, same);
            } else {
                out.off_peak.record(key, same);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, JetBucket};

    fn key(n: u32, overflow: bool) -> BinKey {
        let bucket = if overflow { JetBucket::AtLeast(n) } else { JetBucket::Exact(n) };
        BinKey::new(Category::new("3l_ppp_1b", bucket), "ttH")
    }

    fn run_of(rates: [f64; 4]) -> YieldTable {
        let mut yields = YieldTable::default();
        for (i, rate) in rates.into_iter().enumerate() {
            yields.insert_nominal(key(i as u32 + 2, i == 3), rate);
        }
        yields
    }

    #[test]
    fn buckets_below_peak_are_negative() {
        let yields = run_of([1.0, 3.0, 2.0, 0.5]);
        let dirs = resolve_directions(&yields, &RatioTable::default(), &["JES".to_string()]);
        assert_eq!(dirs.get("JES", &key(2, false)), Some(Direction::Neg));
        // No up ratio recorded at the peak: positive.
        assert_eq!(dirs.get("JES", &key(3, false)), Some(Direction::Pos));
        assert_eq!(dirs.get("JES", &key(4, false)), Some(Direction::Pos));
        assert_eq!(dirs.get("JES", &key(5, true)), Some(Direction::Pos));
        assert_eq!(dirs.get("FR", &key(2, false)), None);
    }

    #[test]
    fn peak_follows_up_variation() {
        let yields = run_of([1.0, 3.0, 2.0, 0.5]);
        let mut ratios = RatioTable::default();
        ratios.insert(key(3, false), "JESUP", 0.97);
        let dirs = resolve_directions(&yields, &ratios, &["JES".to_string()]);
        assert_eq!(dirs.get("JES", &key(3, false)), Some(Direction::Neg));

        ratios.insert(key(3, false), "JESUP", 1.0);
        let dirs = resolve_directions(&yields, &ratios, &["JES".to_string()]);
        assert_eq!(dirs.get("JES", &key(3, false)), Some(Direction::Pos));
    }

    #[test]
    fn overflow_is_positive_even_at_peak() {
        let yields = run_of([1.0, 2.0, 3.0, 9.0]);
        let mut ratios = RatioTable::default();
        ratios.insert(key(5, true), "JESUP", 0.5);
        let dirs = resolve_directions(&yields, &ratios, &["JES".to_string()]);
        assert_eq!(dirs.get("JES", &key(4, false)), Some(Direction::Neg));
        assert_eq!(dirs.get("JES", &key(5, true)), Some(Direction::Pos));
    }

    #[test]
    fn ties_take_the_first_maximum() {
        let yields = run_of([2.0, 2.0, 1.0, 1.0]);
        let dirs = resolve_directions(&yields, &RatioTable::default(), &["JES".to_string()]);
        assert_eq!(dirs.get("JES", &key(2, false)), Some(Direction::Pos));
        assert_eq!(dirs.get("JES", &key(3, false)), Some(Direction::Pos));
    }

    #[test]
    fn resolution_is_idempotent() {
        let yields = run_of([0.5, 3.0, 3.5, 1.0]);
        let mut ratios = RatioTable::default();
        ratios.insert(key(4, false), "JESUP", 0.9);
        let families = ["JES".to_string()];
        let first = resolve_directions(&yields, &ratios, &families);
        let second = resolve_directions(&yields, &ratios, &families);
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn agreement_splits_peak_and_off_peak() {
        let yields = run_of([1.0, 3.0, 2.0, 0.0]);
        let mut ratios = RatioTable::default();
        for (n, up, down) in [(2, 1.1, 1.05), (3, 1.1, 0.9), (4, 0.9, 0.95)] {
            ratios.insert(key(n, false), "JESUP", up);
            ratios.insert(key(n, false), "JESDOWN", down);
        }
        let roles = BTreeMap::from([("ttH".to_string(), Role::Signal)]);
        let summary = peak_agreement(&yields, &ratios, &roles, "JES", &[]);
        assert_eq!(summary.peak.total, Agreement { same: 0, opposite: 1 });
        assert_eq!(summary.off_peak.total, Agreement { same: 2, opposite: 0 });
        assert_eq!(summary.off_peak.by_lepton["3l"].same, 2);
        assert_eq!(summary.peak.total.same_fraction(), Some(0.0));
    }

    #[test]
    fn data_driven_backgrounds_are_not_counted() {
        let mut yields = YieldTable::default();
        let mut ratios = RatioTable::default();
        for (i, rate) in [1.0, 3.0, 2.0].into_iter().enumerate() {
            let k = BinKey::new(Category::new("3l_ppp_1b", JetBucket::Exact(i as u32 + 2)), "fakes");
            yields.insert_nominal(k.clone(), rate);
            ratios.insert(k.clone(), "JESUP", 1.1);
            ratios.insert(k, "JESDOWN", 0.9);
        }
        let roles = BTreeMap::from([("fakes".to_string(), Role::Background)]);

        let counted = peak_agreement(&yields, &ratios, &roles, "JES", &[]);
        assert_eq!(counted.peak.total.total() + counted.off_peak.total.total(), 3);

        let excluded = peak_agreement(&yields, &ratios, &roles, "JES", &["fakes".to_string()]);
        assert_eq!(excluded.peak.total.total(), 0);
        assert_eq!(excluded.off_peak.total.total(), 0);
    }
}
