use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One frozen sentinel well in a scaffold.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScaffoldEntry {
    pub position: String,
    pub sentinel_type: String,
    pub compound: String,
    pub dose_um: f64,
}

/// Versioned sentinel specification for a plate design. Any change to a
/// sentinel position, type, compound, or dose changes the hash, and a
/// non-matching hash is a hard validation error. Tweaking a sentinel
/// requires bumping the version and re-freezing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scaffold {
    pub scaffold_id: String,
    pub version: u32,
    pub entries: Vec<ScaffoldEntry>,
}

impl Scaffold {
    /// First 16 hex chars of SHA-256 over sorted canonical JSON of the
    /// (position, type, compound, dose) tuples.
    pub fn hash(&self) -> String {
        let mut tuples: Vec<serde_json::Value> = self
            .entries
            .iter()
            .map(|e| {
                serde_json::json!([e.position, e.sentinel_type, e.compound, e.dose_um])
            })
            .collect();
        tuples.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        let canonical = serde_json::Value::Array(tuples).to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    pub fn sentinel_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.sentinel_type.clone())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// Built-in scaffold: untreated, vehicle, and positive-control
    /// sentinels in fixed corner-adjacent interior wells.
    pub fn reference() -> Scaffold {
        Scaffold {
            scaffold_id: "sent-std".into(),
            version: 1,
            entries: vec![
                ScaffoldEntry {
                    position: "B02".into(),
                    sentinel_type: "untreated".into(),
                    compound: "none".into(),
                    dose_um: 0.0,
                },
                ScaffoldEntry {
                    position: "B11".into(),
                    sentinel_type: "vehicle".into(),
                    compound: "dmso".into(),
                    dose_um: 0.0,
                },
                ScaffoldEntry {
                    position: "G02".into(),
                    sentinel_type: "positive_control".into(),
                    compound: "cccp".into(),
                    dose_um: 8.0,
                },
                ScaffoldEntry {
                    position: "G11".into(),
                    sentinel_type: "positive_control".into(),
                    compound: "nocodazole".into(),
                    dose_um: 1.6,
                },
            ],
        }
    }
}

/// Frozen scaffold hashes, keyed by scaffold id. Validation compares every
/// submitted design against the frozen hash for its scaffold id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScaffoldRegistry {
    frozen: BTreeMap<String, String>,
}

impl ScaffoldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frozen(scaffold: &Scaffold) -> Self {
        let mut registry = Self::new();
        registry.freeze(scaffold);
        registry
    }

    pub fn freeze(&mut self, scaffold: &Scaffold) {
        self.frozen
            .insert(scaffold.scaffold_id.clone(), scaffold.hash());
    }

    pub fn expected_hash(&self, scaffold_id: &str) -> Option<&str> {
        self.frozen.get(scaffold_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_sixteen_hex() {
        let scaffold = Scaffold::reference();
        let h1 = scaffold.hash();
        let h2 = scaffold.hash();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_ignores_entry_order() {
        let mut scaffold = Scaffold::reference();
        let original = scaffold.hash();
        scaffold.entries.reverse();
        assert_eq!(scaffold.hash(), original);
    }

    #[test]
    fn hash_moves_with_any_tuple_field() {
        let reference = Scaffold::reference();
        let original = reference.hash();

        let mut moved = reference.clone();
        moved.entries[0].position = "B03".into();
        assert_ne!(moved.hash(), original);

        let mut redosed = reference.clone();
        redosed.entries[2].dose_um = 9.0;
        assert_ne!(redosed.hash(), original);
    }

    #[test]
    fn registry_freezes_by_id() {
        let scaffold = Scaffold::reference();
        let registry = ScaffoldRegistry::with_frozen(&scaffold);
        assert_eq!(
            registry.expected_hash("sent-std"),
            Some(scaffold.hash().as_str())
        );
        assert_eq!(registry.expected_hash("sent-unknown"), None);
    }
}
