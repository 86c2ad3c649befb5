use thiserror::Error;

/// Violation of an epistemic covenant. Fatal: the run terminates.
/// Never catch-and-continue one of these.
#[derive(Debug, Clone, Error)]
#[error("epistemic invariant violated [{violation_code}/{covenant_id}]: {details}")]
pub struct EpistemicInvariantError {
    pub violation_code: String,
    pub covenant_id: String,
    pub details: String,
}

impl EpistemicInvariantError {
    pub fn duplicate_claim(claim_id: &str) -> Self {
        Self {
            violation_code: "duplicate_claim".into(),
            covenant_id: "ledger.single_receipt".into(),
            details: format!("claim '{claim_id}' already open"),
        }
    }

    pub fn claim_without_receipt(claim_id: &str) -> Self {
        Self {
            violation_code: "claim_without_receipt".into(),
            covenant_id: "ledger.single_receipt".into(),
            details: format!("resolve for unknown claim '{claim_id}'"),
        }
    }

    pub fn belief_mutation_without_evidence(details: &str) -> Self {
        Self {
            violation_code: "belief_mutation_without_evidence".into(),
            covenant_id: "ledger.evidence_only".into(),
            details: details.to_string(),
        }
    }
}

/// Recoverable epistemic-layer errors.
#[derive(Debug, Error)]
pub enum EpistemicError {
    #[error("mechanism covariance is singular or not positive definite")]
    SingularCovariance,

    #[error("posterior degenerated: {0}")]
    DegeneratePosterior(String),

    #[error("calibrator training set is empty or single-class")]
    DegenerateTraining,

    #[error("calibrator blob rejected: {0}")]
    CalibratorDecode(String),

    #[error(transparent)]
    Invariant(#[from] EpistemicInvariantError),
}
