use bvm_core::CellPaintingReadout;
use epistemic_core::{BeliefState, MechanismPosterior, Resolution};
use serde::{Deserialize, Serialize};

use crate::error::CampaignError;

/// Append-only evidence events. Belief changes only through these.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EvidenceEvent {
    Assay {
        cycle: u64,
        vessel_id: String,
        timepoint_h: f64,
        readout: CellPaintingReadout,
        scalar_viability: f64,
        cell_count: u64,
    },
    BeliefUpdate {
        cycle: u64,
        posterior: MechanismPosterior,
        belief: BeliefState,
    },
    ClaimResolved {
        cycle: u64,
        resolution: Resolution,
    },
    Refusal {
        cycle: u64,
        design_id: String,
        violation_code: String,
    },
}

impl EvidenceEvent {
    pub fn cycle(&self) -> u64 {
        match self {
            EvidenceEvent::Assay { cycle, .. }
            | EvidenceEvent::BeliefUpdate { cycle, .. }
            | EvidenceEvent::ClaimResolved { cycle, .. }
            | EvidenceEvent::Refusal { cycle, .. } => *cycle,
        }
    }
}

/// Belief ledger: an append-only event log plus the belief derived from it.
/// The only mutation path is `apply_event`; events must arrive in cycle
/// order. There is no other way to change the current belief.
#[derive(Debug, Default)]
pub struct BeliefLedger {
    events: Vec<EvidenceEvent>,
    current: Option<BeliefState>,
    last_cycle: u64,
}

impl BeliefLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_event(&mut self, event: EvidenceEvent) -> Result<(), CampaignError> {
        let cycle = event.cycle();
        if cycle < self.last_cycle {
            return Err(CampaignError::BeliefLedgerInvariant(format!(
                "event for cycle {cycle} arrived after cycle {}",
                self.last_cycle
            )));
        }
        self.last_cycle = cycle;
        if let EvidenceEvent::BeliefUpdate { belief, .. } = &event {
            self.current = Some(belief.clone());
        }
        self.events.push(event);
        Ok(())
    }

    pub fn current_belief(&self) -> Option<&BeliefState> {
        self.current.as_ref()
    }

    pub fn events(&self) -> &[EvidenceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn belief(cycle: u64) -> EvidenceEvent {
        EvidenceEvent::BeliefUpdate {
            cycle,
            posterior: MechanismPosterior::uniform(),
            belief: BeliefState {
                top_probability: 0.5,
                margin: 0.1,
                entropy_bits: 2.0,
                nuisance_fraction: 0.2,
                timepoint_h: 24.0,
                dose_relative: 1.0,
                viability: 0.9,
            },
        }
    }

    #[test]
    fn belief_updates_through_events_only() {
        let mut ledger = BeliefLedger::new();
        assert!(ledger.current_belief().is_none());
        ledger.apply_event(belief(1)).unwrap();
        assert!(ledger.current_belief().is_some());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn out_of_order_events_violate_the_ledger() {
        let mut ledger = BeliefLedger::new();
        ledger.apply_event(belief(3)).unwrap();
        let err = ledger.apply_event(belief(2)).unwrap_err();
        assert!(matches!(err, CampaignError::BeliefLedgerInvariant(_)));
    }
}
