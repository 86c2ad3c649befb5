use bvm_core::Mechanism;
use serde::{Deserialize, Serialize};

use crate::rollout::RolloutObservation;

/// Rescue interventions available when belief quality stalls.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RescueTarget {
    Timepoint,
    CalibrationWells,
    DoseContrast,
}

/// One scheduled action in a plan.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum PlanAction {
    Continue {
        dose_fraction: f64,
        washout: bool,
        feed: bool,
    },
    Commit {
        mechanism: Mechanism,
    },
    Rescue {
        target: RescueTarget,
    },
}

impl PlanAction {
    pub fn is_commit(&self) -> bool {
        matches!(self, PlanAction::Commit { .. })
    }

    /// How many interventions this action consumes.
    pub fn intervention_cost(&self) -> u32 {
        match self {
            PlanAction::Continue { washout, feed, dose_fraction } => {
                let mut cost = 0;
                if *washout {
                    cost += 1;
                }
                if *feed {
                    cost += 1;
                }
                if *dose_fraction > 0.0 {
                    cost += 1;
                }
                cost
            }
            PlanAction::Commit { .. } => 0,
            PlanAction::Rescue { .. } => 1,
        }
    }
}

/// One node in the beam: a schedule prefix plus its cached rollout.
#[derive(Clone, Debug)]
pub struct BeamNode {
    pub t_step: u32,
    pub schedule: Vec<PlanAction>,
    pub washout_count: u32,
    pub feed_count: u32,
    pub interventions_used: u32,
    pub observation: Option<RolloutObservation>,
    /// Exploration quality. Excludes calibrated confidence and nuisance.
    pub heuristic_score: f64,
    /// Terminal utility; present only on COMMIT nodes.
    pub commit_utility: Option<f64>,
    pub is_terminal: bool,
    pub dominated: bool,
}

impl BeamNode {
    pub fn root() -> Self {
        Self {
            t_step: 0,
            schedule: Vec::new(),
            washout_count: 0,
            feed_count: 0,
            interventions_used: 0,
            observation: None,
            heuristic_score: 0.0,
            commit_utility: None,
            is_terminal: false,
            dominated: false,
        }
    }

    pub fn viability(&self) -> f64 {
        self.observation.as_ref().map(|o| o.viability).unwrap_or(1.0)
    }
}
