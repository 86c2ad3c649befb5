use std::path::Path;

use beam_planner::PlannerParams;
use bvm_core::RunContextConfig;
use epistemic_core::ControllerParams;
use serde::{Deserialize, Serialize};

use crate::error::CampaignError;

/// Full campaign configuration. Everything the run needs beyond the seed and
/// run id, loadable from JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    pub cycles: u64,
    pub cell_line: String,
    pub vessel_class: String,
    /// Probe compound under investigation.
    pub compound: String,
    pub dose_um: f64,
    /// Hours simulated per cycle.
    pub cycle_hours: f64,
    pub wells_per_cycle: usize,
    pub seed_cells: f64,
    pub workers: usize,
    pub context: RunContextConfig,
    pub planner: PlannerParams,
    pub controller: ControllerParams,
    pub calibrator_samples_per_stratum: usize,
    pub calibrator_version: String,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            cycles: 6,
            cell_line: "A549".into(),
            vessel_class: "plate_96".into(),
            compound: "cccp".into(),
            dose_um: 4.0,
            cycle_hours: 24.0,
            wells_per_cycle: 6,
            seed_cells: 2.0e3,
            workers: 1,
            context: RunContextConfig::default(),
            planner: PlannerParams::default(),
            controller: ControllerParams::default(),
            calibrator_samples_per_stratum: 200,
            calibrator_version: "cal-v1".into(),
        }
    }
}

impl CampaignConfig {
    pub fn from_json(raw: &str) -> Result<Self, CampaignError> {
        serde_json::from_str(raw).map_err(|e| CampaignError::Config(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self, CampaignError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<(), CampaignError> {
        if self.cycles == 0 {
            return Err(CampaignError::Config("cycles must be positive".into()));
        }
        if self.cycle_hours <= 0.0 {
            return Err(CampaignError::Config("cycle_hours must be positive".into()));
        }
        if self.wells_per_cycle == 0 {
            return Err(CampaignError::Config(
                "wells_per_cycle must be positive".into(),
            ));
        }
        if self.workers == 0 {
            return Err(CampaignError::Config("workers must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        CampaignConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_overrides_defaults() {
        let config =
            CampaignConfig::from_json(r#"{"cycles": 3, "compound": "nocodazole"}"#).unwrap();
        assert_eq!(config.cycles, 3);
        assert_eq!(config.compound, "nocodazole");
        assert_eq!(config.cell_line, "A549");
        config.validate().unwrap();
    }

    #[test]
    fn zero_cycles_rejected() {
        let config = CampaignConfig::from_json(r#"{"cycles": 0}"#).unwrap();
        assert!(config.validate().is_err());
    }
}
