//! Shared domain types.
//!
//! Tables are `BTreeMap`-backed so every pass over them, and therefore every
//! emitted model, is ordered deterministically regardless of input order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Smallest ratio the downstream sink accepts (it models uncertainties multiplicatively).
pub const RATIO_FLOOR: f64 = 1e-4;

/// Jet-multiplicity bucket of a category.
///
/// Buckets are contiguous integers except the last one of a region family,
/// which is open ended ("at least N jets").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JetBucket {
    Exact(u32),
    AtLeast(u32),
}

impl JetBucket {
    pub fn jets(self) -> u32 {
        match self {
            JetBucket::Exact(n) | JetBucket::AtLeast(n) => n,
        }
    }

    pub fn is_overflow(self) -> bool {
        matches!(self, JetBucket::AtLeast(_))
    }
}

/// Canonical category: region tag + jet bucket.
///
/// Only the category namer constructs these from raw data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category {
    region: String,
    bucket: JetBucket,
}

impl Category {
    pub fn new(region: impl Into<String>, bucket: JetBucket) -> Self {
        Self {
            region: region.into(),
            bucket,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn bucket(&self) -> JetBucket {
        self.bucket
    }

    /// Lepton multiplicity tag (`2l`, `3l`, `4l`) when the region carries one.
    pub fn lepton_tag(&self) -> Option<&'static str> {
        ["2l", "3l", "4l"]
            .into_iter()
            .find(|tag| self.region.contains(tag))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bucket {
            JetBucket::Exact(n) => write!(f, "C_{}_{}j", self.region, n),
            JetBucket::AtLeast(n) => write!(f, "C_{}_ge{}j", self.region, n),
        }
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Content of one raw sub-bin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinContent {
    pub value: f64,
    /// Statistical error of `value`, when the source provides one.
    pub error: Option<f64>,
}

/// One labeled binned measurement as delivered by a yield source.
///
/// Sub-bins are keyed by their 1-based index. A sub-bin the source never
/// measured is absent, not zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// `region.process` or `region.systematic.process`.
    pub label: String,
    pub bins: BTreeMap<u32, BinContent>,
}

impl RawRecord {
    /// Record with contiguous sub-bins `1..=values.len()`.
    pub fn new(label: impl Into<String>, values: &[f64]) -> Self {
        Self {
            label: label.into(),
            bins: (1u32..)
                .zip(values)
                .map(|(bin, &value)| (bin, BinContent { value, error: None }))
                .collect(),
        }
    }

    /// Sum over all measured sub-bins (including any beyond the named range).
    pub fn integral(&self) -> f64 {
        self.bins.values().map(|b| b.value).sum()
    }
}

/// Parsed record label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLabel<'a> {
    pub region: &'a str,
    pub systematic: Option<&'a str>,
    pub process: &'a str,
}

impl<'a> RawLabel<'a> {
    pub fn parse(label: &'a str) -> Option<Self> {
        let parts: Vec<&str> = label.split('.').collect();
        let (region, systematic, process) = match parts.as_slice() {
            [region, process] => (*region, None, *process),
            [region, systematic, process] => (*region, Some(*systematic), *process),
            _ => return None,
        };
        if region.is_empty() || process.is_empty() || systematic.is_some_and(str::is_empty) {
            return None;
        }
        Some(Self {
            region,
            systematic,
            process,
        })
    }
}

/// Process role, fixed by configuration and never derived from data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Signal,
    Background,
}

/// Join key across all tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BinKey {
    pub category: Category,
    pub process: String,
}

impl BinKey {
    pub fn new(category: Category, process: impl Into<String>) -> Self {
        Self {
            category,
            process: process.into(),
        }
    }
}

/// Nominal rates per `BinKey`.
///
/// A key that was never measured is absent, which is distinct from a measured zero.
#[derive(Debug, Clone, Default)]
pub struct YieldTable {
    rates: BTreeMap<BinKey, f64>,
}

impl YieldTable {
    /// Record a nominal rate, clamped to `>= 0`.
    ///
    /// Returns `false` (and leaves the table untouched) if the key already has a rate.
    pub fn insert_nominal(&mut self, key: BinKey, rate: f64) -> bool {
        if self.rates.contains_key(&key) {
            return false;
        }
        let rate = if rate.is_finite() { rate.max(0.0) } else { 0.0 };
        self.rates.insert(key, rate);
        true
    }

    pub fn get(&self, key: &BinKey) -> Option<f64> {
        self.rates.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BinKey, f64)> {
        self.rates.iter().map(|(k, v)| (k, *v))
    }

    pub fn categories(&self) -> BTreeSet<Category> {
        self.rates.keys().map(|k| k.category.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Systematic-to-nominal ratios per `(BinKey, raw systematic name)`.
#[derive(Debug, Clone, Default)]
pub struct RatioTable {
    ratios: BTreeMap<BinKey, BTreeMap<String, f64>>,
}

impl RatioTable {
    pub fn insert(&mut self, key: BinKey, systematic: impl Into<String>, ratio: f64) {
        self.ratios
            .entry(key)
            .or_default()
            .insert(systematic.into(), ratio);
    }

    pub fn get(&self, key: &BinKey, systematic: &str) -> Option<f64> {
        self.ratios.get(key)?.get(systematic).copied()
    }

    /// All ratios recorded for one key, ordered by systematic name.
    pub fn for_key(&self, key: &BinKey) -> impl Iterator<Item = (&str, f64)> {
        self.ratios
            .get(key)
            .into_iter()
            .flat_map(|m| m.iter().map(|(s, v)| (s.as_str(), *v)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BinKey, &str, f64)> {
        self.ratios
            .iter()
            .flat_map(|(k, m)| m.iter().map(move |(s, v)| (k, s.as_str(), *v)))
    }

    pub fn len(&self) -> usize {
        self.ratios.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which side of a two-point variation a raw systematic name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variation {
    Up,
    Down,
}

/// Split a raw systematic name into its family stem and variation side.
///
/// `JESUP` -> (`JES`, Up), `FRDOWN` -> (`FR`, Down), `pdf` -> (`pdf`, None).
pub fn split_variation(systematic: &str) -> (&str, Option<Variation>) {
    if let Some(stem) = systematic.strip_suffix("DOWN").filter(|s| !s.is_empty()) {
        return (stem, Some(Variation::Down));
    }
    if let Some(stem) = systematic.strip_suffix("UP").filter(|s| !s.is_empty()) {
        return (stem, Some(Variation::Up));
    }
    (systematic, None)
}

/// Sign of the fluctuation assigned by the peak-direction resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Pos,
    Neg,
}

/// Emitted multiplier: symmetric, or an asymmetric `[down, up]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NuisanceValue {
    Symmetric(f64),
    Asymmetric { down: f64, up: f64 },
}

impl fmt::Display for NuisanceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NuisanceValue::Symmetric(v) => write!(f, "{}", fmt_kappa(*v)),
            NuisanceValue::Asymmetric { down, up } => {
                write!(f, "{}/{}", fmt_kappa(*down), fmt_kappa(*up))
            }
        }
    }
}

fn fmt_kappa(v: f64) -> String {
    let s = format!("{v:.6}");
    let s = s.trim_end_matches('0');
    s.strip_suffix('.').unwrap_or(s).to_string()
}

/// One emitted uncertainty entry. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NuisanceRecord {
    pub process: String,
    pub category: Category,
    pub name: String,
    pub value: NuisanceValue,
}

/// Everything handed to a model sink.
#[derive(Debug, Clone, Default)]
pub struct RateModel {
    /// Admitted categories, ordered.
    pub categories: Vec<Category>,
    /// Signal processes with at least one rate in an admitted category (config order).
    pub signals: Vec<String>,
    /// Background processes with at least one rate in an admitted category (config order).
    pub backgrounds: Vec<String>,
    /// Nominal rates restricted to admitted categories.
    pub rates: BTreeMap<BinKey, f64>,
    /// Asimov observation per admitted category.
    pub observations: BTreeMap<Category, f64>,
    pub nuisances: Vec<NuisanceRecord>,
    /// Group name -> member nuisance names (`all` included).
    pub groups: BTreeMap<String, BTreeSet<String>>,
}

impl RateModel {
    /// Distinct nuisance names in first-emission order.
    pub fn nuisance_names(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.nuisances
            .iter()
            .filter(|n| seen.insert(n.name.as_str()))
            .map(|n| n.name.as_str())
            .collect()
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
}
