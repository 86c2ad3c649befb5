use bvm_core::Mechanism;
use epistemic_core::BeliefState;
use serde::{Deserialize, Serialize};

use crate::node::PlanAction;
use crate::PlannerError;

/// What a simulated prefix rollout observed: belief plus the calibrated
/// confidence computed for it, and exploration-quality inputs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RolloutObservation {
    pub belief: BeliefState,
    pub top_mechanism: Mechanism,
    pub calibrated_confidence: f64,
    pub viability: f64,
    pub margin: f64,
    /// Margin movement per step over the rollout tail.
    pub margin_gradient: f64,
    pub nuisance_fraction: f64,
    /// 1.0 for a smooth, artifact-free trajectory; falls with
    /// replicate scatter and sentinel drift.
    pub trajectory_cleanliness: f64,
    /// Simulated hours covered by the schedule prefix.
    pub elapsed_h: f64,
}

/// Rollout oracle over an immutable world snapshot. Implementations must not
/// mutate shared state: each call simulates a schedule prefix from the same
/// snapshot.
pub trait RolloutFn {
    fn rollout(&self, schedule: &[PlanAction]) -> Result<RolloutObservation, PlannerError>;
}

impl<F> RolloutFn for F
where
    F: Fn(&[PlanAction]) -> Result<RolloutObservation, PlannerError>,
{
    fn rollout(&self, schedule: &[PlanAction]) -> Result<RolloutObservation, PlannerError> {
        self(schedule)
    }
}
