use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BvmError;
use crate::mechanism::Mechanism;

/// Threshold-shift buckets for one stress axis. Weights sum to 1.
///
/// The shift multiplies the effective IC50 for that axis: sensitive cells see
/// a lower threshold, resistant cells a higher one.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct StressBuckets {
    pub sensitive: f64,
    pub typical: f64,
    pub resistant: f64,
}

impl StressBuckets {
    /// Threshold shifts per bucket, fixed by the subpopulation model.
    pub const SHIFTS: [f64; 3] = [0.8, 1.0, 1.2];

    pub fn new(sensitive: f64, typical: f64, resistant: f64) -> Self {
        Self {
            sensitive,
            typical,
            resistant,
        }
    }

    /// Default heterogeneous mixture.
    pub fn mixed() -> Self {
        Self::new(0.25, 0.50, 0.25)
    }

    /// A homogeneous population at the typical threshold.
    pub fn uniform_typical() -> Self {
        Self::new(0.0, 1.0, 0.0)
    }

    pub fn weights(&self) -> [f64; 3] {
        [self.sensitive, self.typical, self.resistant]
    }

    pub fn total(&self) -> f64 {
        self.sensitive + self.typical + self.resistant
    }

    pub fn set_weights(&mut self, w: [f64; 3]) {
        self.sensitive = w[0];
        self.typical = w[1];
        self.resistant = w[2];
    }

    pub fn normalize(&mut self) {
        let total = self.total();
        if total > 0.0 {
            self.sensitive /= total;
            self.typical /= total;
            self.resistant /= total;
        }
    }
}

/// Immutable description of a well-plate format.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VesselClass {
    pub id: String,
    pub rows: u8,
    pub cols: u8,
    /// Cells at 100% confluence in one well.
    pub capacity_cells: f64,
    pub working_volume_ul: f64,
}

impl VesselClass {
    pub fn well_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Parse a position like "C05" into zero-based (row, col).
    /// Rejects anything outside the plate format.
    pub fn parse_well_pos(&self, pos: &str) -> Option<(u8, u8)> {
        let bytes = pos.as_bytes();
        if bytes.len() != 3 {
            return None;
        }
        let row_ch = bytes[0];
        if !row_ch.is_ascii_uppercase() {
            return None;
        }
        let row = row_ch - b'A';
        if row >= self.rows {
            return None;
        }
        if !bytes[1].is_ascii_digit() || !bytes[2].is_ascii_digit() {
            return None;
        }
        let col_num = (bytes[1] - b'0') * 10 + (bytes[2] - b'0');
        if col_num == 0 || col_num > self.cols {
            return None;
        }
        Some((row, col_num - 1))
    }

    pub fn well_name(&self, row: u8, col: u8) -> String {
        format!("{}{:02}", (b'A' + row) as char, col + 1)
    }

    /// Edge wells evaporate faster and read slightly brighter.
    pub fn is_edge(&self, pos: &str) -> bool {
        match self.parse_well_pos(pos) {
            Some((r, c)) => {
                r == 0 || c == 0 || r == self.rows - 1 || c == self.cols - 1
            }
            None => false,
        }
    }
}

/// Growth and stress-sensitivity parameters for one cell line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellLineSpec {
    pub id: String,
    pub doubling_time_h: f64,
    /// Hazard per hour once media age passes the starvation onset.
    pub starvation_rate_per_h: f64,
    /// Hazard per hour per pH unit below the acidosis threshold.
    pub ph_rate_per_h: f64,
    /// Hazard per hour at full over-confluence.
    pub confluence_rate_per_h: f64,
    /// Subpopulation mixture per stress axis (keyed by mechanism axis).
    pub stress_axes: BTreeMap<String, StressBuckets>,
}

impl CellLineSpec {
    pub fn buckets_for(&self, axis: &str) -> StressBuckets {
        self.stress_axes
            .get(axis)
            .copied()
            .unwrap_or_else(StressBuckets::mixed)
    }
}

/// Pharmacology of one compound in the library.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompoundSpec {
    pub id: String,
    pub mechanism: Mechanism,
    pub ic50_um: f64,
    pub hill_coefficient: f64,
    /// Kill rate per hour at saturating dose.
    pub max_kill_rate_per_h: f64,
    pub decay_k_per_h: f64,
    /// Fraction lost to plastic on addition.
    pub adsorbed_fraction: f64,
    pub min_dose_um: f64,
    pub max_dose_um: f64,
    pub price_per_umol: f64,
}

/// Flat operation costs used by the planner's ops penalty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PricingTable {
    pub dose_op: f64,
    pub washout_op: f64,
    pub feed_op: f64,
    pub assay_op: f64,
    pub well_day: f64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            dose_op: 1.0,
            washout_op: 2.0,
            feed_op: 0.5,
            assay_op: 4.0,
            well_day: 0.25,
        }
    }
}

/// Immutable library of vessels, cell lines, compounds, and pricing.
/// Loaded once at run start and threaded through the loop explicitly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Catalog {
    vessel_classes: BTreeMap<String, VesselClass>,
    cell_lines: BTreeMap<String, CellLineSpec>,
    compounds: BTreeMap<String, CompoundSpec>,
    pricing: PricingTable,
}

impl Catalog {
    pub fn empty() -> Self {
        Self {
            vessel_classes: BTreeMap::new(),
            cell_lines: BTreeMap::new(),
            compounds: BTreeMap::new(),
            pricing: PricingTable::default(),
        }
    }

    /// Built-in reference library: two plate formats, three cell lines, one
    /// probe compound per mechanism.
    pub fn reference_library() -> Self {
        let mut catalog = Self::empty();

        catalog = catalog.with_vessel_class(VesselClass {
            id: "plate_96".into(),
            rows: 8,
            cols: 12,
            capacity_cells: 4.0e4,
            working_volume_ul: 200.0,
        });
        catalog = catalog.with_vessel_class(VesselClass {
            id: "plate_384".into(),
            rows: 16,
            cols: 24,
            capacity_cells: 1.0e4,
            working_volume_ul: 50.0,
        });

        for (id, doubling) in [("A549", 22.0), ("HEPG2", 34.0), ("U2OS", 27.0)] {
            let mut axes = BTreeMap::new();
            for m in Mechanism::ALL {
                axes.insert(m.stress_axis().to_string(), StressBuckets::mixed());
            }
            catalog = catalog.with_cell_line(CellLineSpec {
                id: id.into(),
                doubling_time_h: doubling,
                starvation_rate_per_h: 0.010,
                ph_rate_per_h: 0.030,
                confluence_rate_per_h: 0.020,
                stress_axes: axes,
            });
        }

        let probes = [
            ("tunicamycin", Mechanism::ErStress, 1.2, 1.4, 0.060, 0.010),
            ("cccp", Mechanism::Mitochondrial, 4.0, 1.8, 0.080, 0.020),
            ("nocodazole", Mechanism::Microtubule, 0.8, 1.6, 0.055, 0.015),
            ("menadione", Mechanism::Oxidative, 9.0, 1.2, 0.070, 0.030),
            ("bortezomib", Mechanism::Proteasome, 0.05, 1.5, 0.065, 0.008),
            ("etoposide", Mechanism::DnaDamage, 3.0, 1.3, 0.050, 0.005),
        ];
        for (id, mechanism, ic50, hill, kill, decay) in probes {
            catalog = catalog.with_compound(CompoundSpec {
                id: id.into(),
                mechanism,
                ic50_um: ic50,
                hill_coefficient: hill,
                max_kill_rate_per_h: kill,
                decay_k_per_h: decay,
                adsorbed_fraction: 0.05,
                min_dose_um: 0.0,
                max_dose_um: ic50 * 50.0,
                price_per_umol: 12.0,
            });
        }

        catalog
    }

    pub fn with_vessel_class(mut self, class: VesselClass) -> Self {
        self.vessel_classes.insert(class.id.clone(), class);
        self
    }

    pub fn with_cell_line(mut self, line: CellLineSpec) -> Self {
        self.cell_lines.insert(line.id.clone(), line);
        self
    }

    pub fn with_compound(mut self, compound: CompoundSpec) -> Self {
        self.compounds.insert(compound.id.clone(), compound);
        self
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn vessel_class(&self, id: &str) -> Result<&VesselClass, BvmError> {
        self.vessel_classes
            .get(id)
            .ok_or_else(|| BvmError::UnknownCatalogEntry {
                kind: "vessel_class",
                name: id.to_string(),
            })
    }

    pub fn cell_line(&self, id: &str) -> Result<&CellLineSpec, BvmError> {
        self.cell_lines
            .get(id)
            .ok_or_else(|| BvmError::UnknownCatalogEntry {
                kind: "cell_line",
                name: id.to_string(),
            })
    }

    pub fn compound(&self, id: &str) -> Result<&CompoundSpec, BvmError> {
        self.compounds
            .get(id)
            .ok_or_else(|| BvmError::UnknownCatalogEntry {
                kind: "compound",
                name: id.to_string(),
            })
    }

    pub fn has_compound(&self, id: &str) -> bool {
        self.compounds.contains_key(id)
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn from_json(json: &str) -> Result<Self, BvmError> {
        serde_json::from_str(json).map_err(|e| BvmError::CatalogLoad(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, BvmError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}
