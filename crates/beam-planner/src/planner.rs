use serde::{Deserialize, Serialize};

use crate::node::{BeamNode, PlanAction, RescueTarget};
use crate::rollout::RolloutFn;
use crate::PlannerError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlannerParams {
    pub beam_width: usize,
    pub horizon: u32,
    pub commit_conf_threshold: f64,
    pub max_interventions: u32,
    pub dose_levels: Vec<f64>,
    /// Terminal utility weights.
    pub w_conf: f64,
    pub w_time: f64,
    pub w_ops: f64,
    pub w_viability: f64,
    /// Exploration heuristic weights.
    pub w_margin_gradient: f64,
    pub w_cleanliness: f64,
}

impl Default for PlannerParams {
    fn default() -> Self {
        Self {
            beam_width: 8,
            horizon: 8,
            commit_conf_threshold: 0.75,
            max_interventions: 4,
            dose_levels: vec![0.0, 0.5, 1.0],
            w_conf: 2.0,
            w_time: 0.01,
            w_ops: 0.05,
            w_viability: 0.5,
            w_margin_gradient: 1.0,
            w_cleanliness: 0.5,
        }
    }
}

/// Forensic record emitted for every COMMIT node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitForensics {
    pub cycle: u64,
    pub t_step: u32,
    pub posterior_top_prob: f64,
    pub posterior_margin: f64,
    pub nuisance_fraction: f64,
    pub calibrated_conf: f64,
    pub commit_utility: f64,
    pub threshold: f64,
}

#[derive(Clone, Debug)]
pub struct PlanOutcome {
    pub best: BeamNode,
    pub committed: bool,
    pub forensics: Vec<CommitForensics>,
    pub expansions: usize,
}

/// Bounded-width beam search over intervention schedules.
pub struct BeamPlanner {
    params: PlannerParams,
}

impl BeamPlanner {
    pub fn new(params: PlannerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PlannerParams {
        &self.params
    }

    pub fn plan(
        &self,
        rollout: &dyn RolloutFn,
        cycle: u64,
    ) -> Result<PlanOutcome, PlannerError> {
        let mut root = BeamNode::root();
        self.score_non_terminal(&mut root, rollout)?;
        let mut beam = vec![root];
        let mut forensics = Vec::new();
        let mut expansions = 0usize;

        for _generation in 0..self.params.horizon {
            if beam.is_empty() || beam.iter().all(|n| n.is_terminal) {
                break;
            }

            let mut next: Vec<BeamNode> = Vec::new();
            // Terminals ride along; they are not expanded further.
            next.extend(beam.iter().filter(|n| n.is_terminal).cloned());

            for node in beam.iter().filter(|n| !n.is_terminal) {
                expansions += 1;
                self.expand(node, rollout, cycle, &mut next, &mut forensics)?;
            }

            mark_dominated(&mut next);
            next.retain(|n| !n.dominated);
            self.prune(&mut next);
            beam = next;
        }

        let best_terminal = beam
            .iter()
            .filter(|n| n.is_terminal)
            .max_by(|a, b| {
                a.commit_utility
                    .unwrap_or(f64::NEG_INFINITY)
                    .total_cmp(&b.commit_utility.unwrap_or(f64::NEG_INFINITY))
            })
            .cloned();

        let (best, committed) = match best_terminal {
            Some(node) => (node, true),
            None => {
                let fallback = beam
                    .iter()
                    .max_by(|a, b| a.heuristic_score.total_cmp(&b.heuristic_score))
                    .cloned()
                    .ok_or(PlannerError::EmptyBeam)?;
                (fallback, false)
            }
        };

        Ok(PlanOutcome {
            best,
            committed,
            forensics,
            expansions,
        })
    }

    fn expand(
        &self,
        node: &BeamNode,
        rollout: &dyn RolloutFn,
        cycle: u64,
        next: &mut Vec<BeamNode>,
        forensics: &mut Vec<CommitForensics>,
    ) -> Result<(), PlannerError> {
        // COMMIT: gated on calibrated confidence, same t_step as the parent.
        if let Some(obs) = &node.observation {
            if obs.calibrated_confidence >= self.params.commit_conf_threshold {
                let ops_penalty = f64::from(node.interventions_used);
                let utility = self.params.w_conf * obs.calibrated_confidence
                    - self.params.w_time * obs.elapsed_h
                    - self.params.w_ops * ops_penalty
                    - self.params.w_viability * (1.0 - obs.viability);

                let record = CommitForensics {
                    cycle,
                    t_step: node.t_step,
                    posterior_top_prob: obs.belief.top_probability,
                    posterior_margin: obs.margin,
                    nuisance_fraction: obs.nuisance_fraction,
                    calibrated_conf: obs.calibrated_confidence,
                    commit_utility: utility,
                    threshold: self.params.commit_conf_threshold,
                };
                tracing::info!(
                    cycle = record.cycle,
                    t_step = record.t_step,
                    calibrated_conf = record.calibrated_conf,
                    commit_utility = record.commit_utility,
                    threshold = record.threshold,
                    "commit candidate emitted"
                );
                forensics.push(record);

                let mut schedule = node.schedule.clone();
                schedule.push(PlanAction::Commit {
                    mechanism: obs.top_mechanism,
                });
                next.push(BeamNode {
                    t_step: node.t_step,
                    schedule,
                    washout_count: node.washout_count,
                    feed_count: node.feed_count,
                    interventions_used: node.interventions_used,
                    observation: node.observation.clone(),
                    heuristic_score: node.heuristic_score,
                    commit_utility: Some(utility),
                    is_terminal: true,
                    dominated: false,
                });
            }
        }

        // CONTINUE successors: dose levels x washout x feed.
        for &dose_fraction in &self.params.dose_levels {
            for washout in [false, true] {
                for feed in [false, true] {
                    let action = PlanAction::Continue {
                        dose_fraction,
                        washout,
                        feed,
                    };
                    let cost = action.intervention_cost();
                    if node.interventions_used + cost > self.params.max_interventions {
                        continue;
                    }
                    let mut child = BeamNode {
                        t_step: node.t_step + 1,
                        schedule: node.schedule.clone(),
                        washout_count: node.washout_count + u32::from(washout),
                        feed_count: node.feed_count + u32::from(feed),
                        interventions_used: node.interventions_used + cost,
                        observation: None,
                        heuristic_score: 0.0,
                        commit_utility: None,
                        is_terminal: false,
                        dominated: false,
                    };
                    child.schedule.push(action);
                    self.score_non_terminal(&mut child, rollout)?;
                    next.push(child);
                }
            }
        }

        // RESCUE successors, while intervention budget remains.
        if node.interventions_used < self.params.max_interventions {
            for target in [
                RescueTarget::Timepoint,
                RescueTarget::CalibrationWells,
                RescueTarget::DoseContrast,
            ] {
                let mut child = BeamNode {
                    t_step: node.t_step + 1,
                    schedule: node.schedule.clone(),
                    washout_count: node.washout_count,
                    feed_count: node.feed_count,
                    interventions_used: node.interventions_used + 1,
                    observation: None,
                    heuristic_score: 0.0,
                    commit_utility: None,
                    is_terminal: false,
                    dominated: false,
                };
                child.schedule.push(PlanAction::Rescue { target });
                self.score_non_terminal(&mut child, rollout)?;
                next.push(child);
            }
        }

        Ok(())
    }

    /// Exploration heuristic: trajectory cleanliness and margin movement.
    /// Deliberately blind to calibrated confidence and nuisance.
    fn score_non_terminal(
        &self,
        node: &mut BeamNode,
        rollout: &dyn RolloutFn,
    ) -> Result<(), PlannerError> {
        let obs = rollout.rollout(&node.schedule)?;
        node.heuristic_score = self.params.w_margin_gradient * obs.margin_gradient
            + self.params.w_cleanliness * obs.trajectory_cleanliness;
        node.observation = Some(obs);
        Ok(())
    }

    /// Keep up to beam_width/2 top terminals by commit utility, then fill
    /// the remainder with top non-terminals by heuristic score.
    fn prune(&self, nodes: &mut Vec<BeamNode>) {
        let mut terminals: Vec<BeamNode> =
            nodes.iter().filter(|n| n.is_terminal).cloned().collect();
        let mut open: Vec<BeamNode> =
            nodes.iter().filter(|n| !n.is_terminal).cloned().collect();

        terminals.sort_by(|a, b| {
            b.commit_utility
                .unwrap_or(f64::NEG_INFINITY)
                .total_cmp(&a.commit_utility.unwrap_or(f64::NEG_INFINITY))
        });
        open.sort_by(|a, b| b.heuristic_score.total_cmp(&a.heuristic_score));

        let terminal_quota = (self.params.beam_width / 2).max(1);
        terminals.truncate(terminal_quota);
        let remainder = self.params.beam_width.saturating_sub(terminals.len());
        open.truncate(remainder);

        nodes.clear();
        nodes.extend(terminals);
        nodes.extend(open);
    }
}

/// A non-terminal node is dominated when a same-step peer is at least as
/// good on both the heuristic and viability, and strictly better on one.
fn mark_dominated(nodes: &mut [BeamNode]) {
    let snapshot: Vec<(u32, bool, f64, f64)> = nodes
        .iter()
        .map(|n| (n.t_step, n.is_terminal, n.heuristic_score, n.viability()))
        .collect();
    for (i, node) in nodes.iter_mut().enumerate() {
        if node.is_terminal {
            continue;
        }
        let mine = (node.heuristic_score, node.viability());
        for (j, &(t_step, terminal, heuristic, viability)) in snapshot.iter().enumerate() {
            if i == j || terminal || t_step != node.t_step {
                continue;
            }
            let at_least_as_good = heuristic >= mine.0 && viability >= mine.1;
            let strictly_better = heuristic > mine.0 || viability > mine.1;
            if at_least_as_good && strictly_better {
                node.dominated = true;
                break;
            }
        }
    }
}
