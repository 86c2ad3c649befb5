//! Planner scenarios: the commit gate, earlier commits under clean
//! observation, and terminal/heuristic separation.

use beam_planner::{
    BeamPlanner, PlanAction, PlannerParams, RolloutObservation,
};
use bvm_core::Mechanism;
use epistemic_core::BeliefState;

/// Scripted rollout: calibrated confidence grows with elapsed steps and is
/// depressed by nuisance. The planner sees nothing else of the world.
fn scripted_rollout(
    nuisance: f64,
) -> impl Fn(&[PlanAction]) -> Result<RolloutObservation, beam_planner::PlannerError> {
    move |schedule: &[PlanAction]| {
        let t = schedule
            .iter()
            .filter(|a| !matches!(a, PlanAction::Commit { .. }))
            .count() as f64;
        let confidence = (0.5 + 0.08 * t - 0.6 * nuisance).clamp(0.0, 1.0);
        let viability = (1.0 - 0.02 * t).max(0.0);
        Ok(RolloutObservation {
            belief: BeliefState {
                top_probability: (0.5 + 0.05 * t).min(0.97),
                margin: (0.2 + 0.04 * t).min(0.9),
                entropy_bits: (2.0 - 0.15 * t).max(0.2),
                nuisance_fraction: nuisance,
                timepoint_h: t * 24.0,
                dose_relative: 1.0,
                viability,
            },
            top_mechanism: Mechanism::Mitochondrial,
            calibrated_confidence: confidence,
            viability,
            margin: (0.2 + 0.04 * t).min(0.9),
            margin_gradient: 0.05,
            nuisance_fraction: nuisance,
            trajectory_cleanliness: 1.0 - nuisance,
            elapsed_h: t * 24.0,
        })
    }
}

#[test]
fn clean_observation_commits_early() {
    let planner = BeamPlanner::new(PlannerParams::default());
    let rollout = scripted_rollout(0.1);
    let outcome = planner.plan(&rollout, 0).unwrap();

    assert!(outcome.committed);
    assert!(
        outcome.best.t_step <= 4,
        "clean run committed late at t_step {}",
        outcome.best.t_step
    );
    assert!(outcome.best.schedule.last().unwrap().is_commit());
}

#[test]
fn noisy_observation_defers_commit() {
    let planner = BeamPlanner::new(PlannerParams::default());
    let rollout = scripted_rollout(0.5);
    let outcome = planner.plan(&rollout, 0).unwrap();

    if outcome.committed {
        assert!(
            outcome.best.t_step >= 6,
            "noisy run committed early at t_step {}",
            outcome.best.t_step
        );
    }
    for record in &outcome.forensics {
        assert!(record.t_step >= 6);
    }
}

#[test]
fn every_commit_clears_the_confidence_gate() {
    let planner = BeamPlanner::new(PlannerParams::default());
    for nuisance in [0.05, 0.2, 0.35, 0.5] {
        let rollout = scripted_rollout(nuisance);
        let outcome = planner.plan(&rollout, 3).unwrap();
        for record in &outcome.forensics {
            assert!(record.calibrated_conf >= record.threshold);
            assert_eq!(record.cycle, 3);
        }
    }
}

#[test]
fn unreachable_gate_returns_exploration_plan() {
    let params = PlannerParams {
        commit_conf_threshold: 1.1,
        ..PlannerParams::default()
    };
    let planner = BeamPlanner::new(params);
    let rollout = scripted_rollout(0.1);
    let outcome = planner.plan(&rollout, 0).unwrap();

    assert!(!outcome.committed);
    assert!(outcome.forensics.is_empty());
    assert!(!outcome.best.is_terminal);
    assert!(outcome.best.t_step >= 1);
}

#[test]
fn commit_does_not_advance_time() {
    let planner = BeamPlanner::new(PlannerParams::default());
    let rollout = scripted_rollout(0.0);
    let outcome = planner.plan(&rollout, 0).unwrap();

    assert!(outcome.committed);
    // The commit action is appended at the parent's t_step; schedule length
    // minus the commit equals the steps actually taken.
    let steps = outcome
        .best
        .schedule
        .iter()
        .filter(|a| !a.is_commit())
        .count() as u32;
    assert_eq!(steps, outcome.best.t_step);
}

#[test]
fn intervention_budget_bounds_rescues_and_washouts() {
    let planner = BeamPlanner::new(PlannerParams::default());
    let rollout = scripted_rollout(0.5);
    let outcome = planner.plan(&rollout, 0).unwrap();

    let max = planner.params().max_interventions;
    assert!(outcome.best.interventions_used <= max);
    assert!(outcome.expansions > 0);
}
