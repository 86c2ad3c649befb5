use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Canonical condition identity. Integer-only resolution: 1 nM for dose,
/// 1 minute for time, derived by banker's rounding. Float-noise duplicates
/// collapse to one key; merges are logged, never silent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConditionKey {
    pub cell_line: String,
    pub compound: String,
    pub dose_nm: i64,
    pub time_min: i64,
    pub assay: String,
    pub position_class: String,
}

impl ConditionKey {
    pub fn new(
        cell_line: &str,
        compound: &str,
        dose_um: f64,
        time_h: f64,
        assay: &str,
        position_class: &str,
    ) -> Self {
        Self {
            cell_line: cell_line.to_string(),
            compound: compound.to_string(),
            dose_nm: round_half_even(dose_um * 1000.0),
            time_min: round_half_even(time_h * 60.0),
            assay: assay.to_string(),
            position_class: position_class.to_string(),
        }
    }

    pub fn canonical_string(&self) -> String {
        format!(
            "{}|{}|{}nM|{}min|{}|{}",
            self.cell_line, self.compound, self.dose_nm, self.time_min, self.assay,
            self.position_class
        )
    }
}

impl std::fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

/// Round half-to-even to the nearest integer.
pub fn round_half_even(x: f64) -> i64 {
    x.round_ties_even() as i64
}

/// Groups raw observations under canonical keys, logging any merge that
/// collapses distinct raw values.
#[derive(Debug, Default)]
pub struct ConditionAggregator {
    groups: BTreeMap<ConditionKey, Vec<(f64, f64)>>,
}

impl ConditionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw (dose_uM, time_h) observation under its canonical key.
    pub fn insert(&mut self, key: ConditionKey, raw_dose_um: f64, raw_time_h: f64) {
        let entry = self.groups.entry(key.clone()).or_default();
        let is_merge = entry
            .iter()
            .any(|&(d, t)| d != raw_dose_um || t != raw_time_h);
        if is_merge {
            tracing::info!(
                key = %key.canonical_string(),
                raw_dose_um,
                raw_time_h,
                "condition key merge: distinct raw values collapsed"
            );
        }
        entry.push((raw_dose_um, raw_time_h));
    }

    pub fn visit_count(&self, key: &ConditionKey) -> usize {
        self.groups.get(key).map(Vec::len).unwrap_or(0)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ConditionKey> {
        self.groups.keys()
    }
}
