use beam_planner::PlannerError;
use bvm_core::BvmError;
use design_bridge::BridgeError;
use epistemic_core::{EpistemicError, EpistemicInvariantError};
use thiserror::Error;

/// Campaign-level failures, mapped onto the process exit-code contract:
/// 0 success, 1 runtime error, 2 invariant violation, 3 IO/persistence
/// error, 4 audit-degraded refusal.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("decision receipt invariant: missing required field '{field}'")]
    DecisionReceiptInvariant { field: &'static str },

    #[error("belief ledger invariant: {0}")]
    BeliefLedgerInvariant(String),

    #[error("audit degraded: refusal enforced but artifact write failed: {0}")]
    AuditDegraded(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Bvm(#[from] BvmError),

    #[error(transparent)]
    Epistemic(#[from] EpistemicError),

    #[error(transparent)]
    EpistemicInvariant(#[from] EpistemicInvariantError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CampaignError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CampaignError::DecisionReceiptInvariant { .. }
            | CampaignError::BeliefLedgerInvariant(_)
            | CampaignError::EpistemicInvariant(_) => 2,
            CampaignError::Epistemic(EpistemicError::Invariant(_)) => 2,
            CampaignError::Bvm(err) => match err {
                BvmError::ConservationFailure { .. }
                | BvmError::ObserverDependence { .. }
                | BvmError::NonFiniteViability { .. } => 2,
                BvmError::Io(_) => 3,
                _ => 1,
            },
            CampaignError::AuditDegraded(_) => 4,
            CampaignError::Bridge(BridgeError::Io(_)) => 3,
            CampaignError::Bridge(BridgeError::Invalid(inner)) => {
                if inner.audit_degraded {
                    4
                } else {
                    2
                }
            }
            CampaignError::Io(_) => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use design_bridge::{InvalidDesignError, ValidatorMode};

    #[test]
    fn exit_codes_follow_the_contract() {
        let receipt = CampaignError::DecisionReceiptInvariant { field: "template" };
        assert_eq!(receipt.exit_code(), 2);

        let conservation = CampaignError::Bvm(BvmError::ConservationFailure {
            vessel_id: "v".into(),
            residual: 1e-3,
        });
        assert_eq!(conservation.exit_code(), 2);

        let io = CampaignError::Io(std::io::Error::other("disk gone"));
        assert_eq!(io.exit_code(), 3);

        let refusal = CampaignError::Bridge(BridgeError::Invalid(InvalidDesignError::new(
            "duplicate_well_positions",
            "C05 twice".into(),
            ValidatorMode::Full,
            "abc".into(),
        )));
        assert_eq!(refusal.exit_code(), 2);

        let mut degraded_inner = InvalidDesignError::new(
            "duplicate_well_positions",
            "C05 twice".into(),
            ValidatorMode::Full,
            "abc".into(),
        );
        degraded_inner.audit_degraded = true;
        let degraded = CampaignError::Bridge(BridgeError::Invalid(degraded_inner));
        assert_eq!(degraded.exit_code(), 4);

        let runtime = CampaignError::Config("bad cycles".into());
        assert_eq!(runtime.exit_code(), 1);
    }
}
