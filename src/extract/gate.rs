//! Category gate: admit categories by summed signal rate.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::domain::{Category, Role, YieldTable};
use crate::error::AppError;

/// Categories admitted into the model. Frozen once built.
#[derive(Debug, Clone, Default)]
pub struct AdmittedCategories {
    admitted: BTreeSet<Category>,
    /// Signal sum per category, for every category seen (admitted or not).
    signal_sums: BTreeMap<Category, f64>,
}

impl AdmittedCategories {
    pub fn contains(&self, category: &Category) -> bool {
        self.admitted.contains(category)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.admitted.iter()
    }

    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }

    pub fn signal_sum(&self, category: &Category) -> Option<f64> {
        self.signal_sums.get(category).copied()
    }

    /// Categories that were seen but not admitted, with their signal sums.
    pub fn rejected(&self) -> impl Iterator<Item = (&Category, f64)> {
        self.signal_sums
            .iter()
            .filter(|(c, _)| !self.admitted.contains(*c))
            .map(|(c, s)| (c, *s))
    }
}

/// Admit every category whose summed signal rate reaches `floor`.
///
/// Categories with no signal rate at all are never admitted, whatever their
/// background yield.
pub fn admit_categories(
    yields: &YieldTable,
    roles: &BTreeMap<String, Role>,
    floor: f64,
) -> Result<AdmittedCategories, AppError> {
    if !(floor.is_finite() && floor >= 0.0) {
        return Err(AppError::config(format!("invalid signal floor {floor}")));
    }

    let mut signal_sums: BTreeMap<Category, f64> =
        yields.categories().into_iter().map(|c| (c, 0.0)).collect();
    for (key, rate) in yields.iter() {
        if roles.get(&key.process) == Some(&Role::Signal) {
            *signal_sums.entry(key.category.clone()).or_insert(0.0) += rate;
        }
    }

    let mut admitted = BTreeSet::new();
    for (category, &sum) in &signal_sums {
        if sum > 0.0 && sum >= floor {
            admitted.insert(category.clone());
        } else {
            debug!(category = %category, signal = sum, "skipping category for low signal yield");
        }
    }

    info!(
        admitted = admitted.len(),
        rejected = signal_sums.len() - admitted.len(),
        floor,
        "category gate applied"
    );
    Ok(AdmittedCategories {
        admitted,
        signal_sums,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BinKey, JetBucket};

    fn table() -> (YieldTable, BTreeMap<String, Role>) {
        let cat = |n| Category::new("3l_ppp_1b", JetBucket::Exact(n));
        let mut yields = YieldTable::default();
        yields.insert_nominal(BinKey::new(cat(2), "ttH"), 0.004);
        yields.insert_nominal(BinKey::new(cat(2), "ttll"), 0.001);
        yields.insert_nominal(BinKey::new(cat(2), "fakes"), 40.0);
        yields.insert_nominal(BinKey::new(cat(3), "ttH"), 0.5);
        yields.insert_nominal(BinKey::new(cat(4), "fakes"), 12.0);
        let roles = BTreeMap::from([
            ("ttH".to_string(), Role::Signal),
            ("ttll".to_string(), Role::Signal),
            ("fakes".to_string(), Role::Background),
        ]);
        (yields, roles)
    }

    #[test]
    fn low_signal_category_is_rejected_regardless_of_background() {
        let (yields, roles) = table();
        let gate = admit_categories(&yields, &roles, 0.01).unwrap();
        let low = Category::new("3l_ppp_1b", JetBucket::Exact(2));
        assert!(!gate.contains(&low));
        assert!((gate.signal_sum(&low).unwrap() - 0.005).abs() < 1e-12);
        assert!(gate.contains(&Category::new("3l_ppp_1b", JetBucket::Exact(3))));
        assert_eq!(gate.len(), 1);
    }

    #[test]
    fn background_only_category_is_never_admitted() {
        let (yields, roles) = table();
        let gate = admit_categories(&yields, &roles, 0.0).unwrap();
        assert!(!gate.contains(&Category::new("3l_ppp_1b", JetBucket::Exact(4))));
        assert_eq!(gate.rejected().count(), 1);
    }

    #[test]
    fn raising_the_floor_never_admits_more() {
        let (yields, roles) = table();
        let mut previous: Option<BTreeSet<Category>> = None;
        for floor in [0.0, 0.001, 0.005, 0.01, 0.1, 0.5, 1.0] {
            let gate = admit_categories(&yields, &roles, floor).unwrap();
            let current: BTreeSet<Category> = gate.iter().cloned().collect();
            if let Some(prev) = &previous {
                assert!(current.is_subset(prev), "floor {floor} admitted a new category");
            }
            previous = Some(current);
        }
    }

    #[test]
    fn invalid_floor_is_a_configuration_error() {
        let (yields, roles) = table();
        assert_eq!(admit_categories(&yields, &roles, f64::NAN).unwrap_err().exit_code(), 2);
    }
}
