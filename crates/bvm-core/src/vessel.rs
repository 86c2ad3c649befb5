use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, StressBuckets};
use crate::error::BvmError;

/// Morphology channel order used everywhere: actin, mito, er, nucleus, rna.
pub const CHANNELS: [&str; 5] = ["actin", "mito", "er", "nucleus", "rna"];

/// Tolerance for the conservation invariant Σ death modes == 1 − viability.
pub const CONSERVATION_EPS: f64 = 1e-6;

/// Untracked death mass above this triggers attribution plus a warning.
pub const UNTRACKED_DETECT_EPS: f64 = 1e-3;

/// Cumulative death accounting modes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeathMode {
    Compound,
    Confluence,
    Starvation,
    Ph,
    Unattributed,
}

impl DeathMode {
    pub const ALL: [DeathMode; 5] = [
        DeathMode::Compound,
        DeathMode::Confluence,
        DeathMode::Starvation,
        DeathMode::Ph,
        DeathMode::Unattributed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DeathMode::Compound => "compound",
            DeathMode::Confluence => "confluence",
            DeathMode::Starvation => "starvation",
            DeathMode::Ph => "pH",
            DeathMode::Unattributed => "unattributed",
        }
    }
}

/// Per-compound exposure state inside one well.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompoundState {
    pub concentration_um: f64,
    pub decay_k_per_h: f64,
    pub adsorbed_fraction: f64,
    pub start_time_h: f64,
}

/// Latent morphology the assay layer reads. Log-folds relative to an
/// unstressed population; zero means no shift.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct MorphologyState {
    pub log_folds: [f64; 5],
    pub debris_level: f64,
}

/// Full latent state of one well.
///
/// Mutated only through BVM operations (`step`, `treat`, `washout`, `feed`,
/// `passage`). Death attribution is preserved across passages, never reset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VesselState {
    pub vessel_id: String,
    pub plate_id: String,
    pub well_position: String,
    pub cell_line: String,
    pub vessel_class: String,

    pub cell_count: f64,
    pub viability: f64,
    pub confluence: f64,
    pub capacity_cells: f64,
    pub media_volume_ul: f64,
    pub initial_volume_ul: f64,
    pub media_age_h: f64,
    /// Simulation clock in hours since seeding.
    pub clock_h: f64,

    /// Threshold-shift mixture per stress axis. Weights sum to 1.
    pub subpopulations: BTreeMap<String, StressBuckets>,

    pub death_compound: f64,
    pub death_confluence: f64,
    pub death_starvation: f64,
    pub death_ph: f64,
    pub death_unattributed: f64,

    pub compounds: BTreeMap<String, CompoundState>,

    pub lactate_mm: f64,
    pub ph_proxy: f64,

    pub attached_fraction: f64,
    pub morphology: MorphologyState,

    /// Aggregate hazard integral of the previous step; drives substepping.
    pub total_hazard_last_step: f64,
}

impl VesselState {
    pub fn death_mode(&self, mode: DeathMode) -> f64 {
        match mode {
            DeathMode::Compound => self.death_compound,
            DeathMode::Confluence => self.death_confluence,
            DeathMode::Starvation => self.death_starvation,
            DeathMode::Ph => self.death_ph,
            DeathMode::Unattributed => self.death_unattributed,
        }
    }

    pub fn death_mode_mut(&mut self, mode: DeathMode) -> &mut f64 {
        match mode {
            DeathMode::Compound => &mut self.death_compound,
            DeathMode::Confluence => &mut self.death_confluence,
            DeathMode::Starvation => &mut self.death_starvation,
            DeathMode::Ph => &mut self.death_ph,
            DeathMode::Unattributed => &mut self.death_unattributed,
        }
    }

    pub fn death_total(&self) -> f64 {
        self.death_compound
            + self.death_confluence
            + self.death_starvation
            + self.death_ph
            + self.death_unattributed
    }

    /// Signed residual of the conservation invariant.
    pub fn conservation_residual(&self) -> f64 {
        self.death_total() - (1.0 - self.viability)
    }

    pub fn assert_conservation(&self) -> Result<(), BvmError> {
        let residual = self.conservation_residual();
        if residual.abs() > CONSERVATION_EPS {
            return Err(BvmError::ConservationFailure {
                vessel_id: self.vessel_id.clone(),
                residual,
            });
        }
        Ok(())
    }

    pub fn assert_viability_finite(&self) -> Result<(), BvmError> {
        if !self.viability.is_finite() || self.viability < 0.0 {
            return Err(BvmError::NonFiniteViability {
                vessel_id: self.vessel_id.clone(),
                value: self.viability,
            });
        }
        Ok(())
    }

    pub fn viable_cells(&self) -> f64 {
        self.cell_count
    }
}

/// Create a fresh vessel from catalog entries. Called at cycle start.
#[allow(clippy::too_many_arguments)]
pub fn seed_vessel(
    catalog: &Catalog,
    cell_line: &str,
    vessel_class: &str,
    vessel_id: &str,
    plate_id: &str,
    well_position: &str,
    cell_count: f64,
) -> Result<VesselState, BvmError> {
    let line = catalog.cell_line(cell_line)?;
    let class = catalog.vessel_class(vessel_class)?;
    if class.parse_well_pos(well_position).is_none() {
        return Err(BvmError::InvalidAssayParameter(format!(
            "well position '{}' outside {} format",
            well_position, class.id
        )));
    }

    let volume = class.working_volume_ul;
    Ok(VesselState {
        vessel_id: vessel_id.to_string(),
        plate_id: plate_id.to_string(),
        well_position: well_position.to_string(),
        cell_line: line.id.clone(),
        vessel_class: class.id.clone(),
        cell_count: cell_count.max(0.0),
        viability: 1.0,
        confluence: (cell_count / class.capacity_cells).clamp(0.0, 2.0),
        capacity_cells: class.capacity_cells,
        media_volume_ul: volume,
        initial_volume_ul: volume,
        media_age_h: 0.0,
        clock_h: 0.0,
        subpopulations: line.stress_axes.clone(),
        death_compound: 0.0,
        death_confluence: 0.0,
        death_starvation: 0.0,
        death_ph: 0.0,
        death_unattributed: 0.0,
        compounds: BTreeMap::new(),
        lactate_mm: 0.0,
        ph_proxy: 7.4,
        attached_fraction: 1.0,
        morphology: MorphologyState::default(),
        total_hazard_last_step: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_vessel_conserves() {
        let catalog = Catalog::reference_library();
        let v = seed_vessel(&catalog, "A549", "plate_96", "v1", "P1", "C05", 1.0e3).unwrap();
        assert_eq!(v.viability, 1.0);
        assert_eq!(v.death_total(), 0.0);
        v.assert_conservation().unwrap();
        assert_eq!(v.ph_proxy, 7.4);
    }

    #[test]
    fn bad_well_position_rejected() {
        let catalog = Catalog::reference_library();
        let err = seed_vessel(&catalog, "A549", "plate_96", "v1", "P1", "Z99", 100.0);
        assert!(err.is_err());
    }

    #[test]
    fn conservation_residual_detects_drift() {
        let catalog = Catalog::reference_library();
        let mut v = seed_vessel(&catalog, "A549", "plate_96", "v1", "P1", "C05", 100.0).unwrap();
        v.viability = 0.8;
        v.death_compound = 0.2;
        v.assert_conservation().unwrap();
        v.death_compound = 0.1;
        assert!(v.assert_conservation().is_err());
    }
}
