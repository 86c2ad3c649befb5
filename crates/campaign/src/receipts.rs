use serde::{Deserialize, Serialize};

use crate::error::CampaignError;

/// One decision receipt per cycle. Required fields must be present and
/// non-empty; a receipt missing one is an invariant violation, not a
/// loggable warning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecisionReceipt {
    pub cycle: u64,
    pub template: String,
    pub forced: bool,
    pub trigger: String,
    pub regime: String,
    pub gate_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforcement_layer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_plan: Option<String>,
}

pub fn validate_receipt(receipt: &DecisionReceipt) -> Result<(), CampaignError> {
    if receipt.template.trim().is_empty() {
        return Err(CampaignError::DecisionReceiptInvariant { field: "template" });
    }
    if receipt.trigger.trim().is_empty() {
        return Err(CampaignError::DecisionReceiptInvariant { field: "trigger" });
    }
    if receipt.regime.trim().is_empty() {
        return Err(CampaignError::DecisionReceiptInvariant { field: "regime" });
    }
    if receipt.gate_state.trim().is_empty() {
        return Err(CampaignError::DecisionReceiptInvariant { field: "gate_state" });
    }
    Ok(())
}

/// Nuisance regime label used in receipts and diagnostics.
pub fn regime_label(nuisance_fraction: f64) -> &'static str {
    if nuisance_fraction < 0.2 {
        "low_nuisance"
    } else if nuisance_fraction < 0.4 {
        "medium_nuisance"
    } else {
        "high_nuisance"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt() -> DecisionReceipt {
        DecisionReceipt {
            cycle: 1,
            template: "continue".into(),
            forced: false,
            trigger: "planner".into(),
            regime: "low_nuisance".into(),
            gate_state: "commit_gate_blocked".into(),
            enforcement_layer: None,
            attempted_template: None,
            calibration_plan: None,
        }
    }

    #[test]
    fn complete_receipt_passes() {
        validate_receipt(&receipt()).unwrap();
    }

    #[test]
    fn missing_fields_are_invariant_violations() {
        let mut bad = receipt();
        bad.gate_state = "".into();
        let err = validate_receipt(&bad).unwrap_err();
        assert!(matches!(
            err,
            CampaignError::DecisionReceiptInvariant { field: "gate_state" }
        ));

        let mut bad = receipt();
        bad.template = "  ".into();
        assert!(validate_receipt(&bad).is_err());
    }

    #[test]
    fn regime_labels_cover_the_range() {
        assert_eq!(regime_label(0.1), "low_nuisance");
        assert_eq!(regime_label(0.3), "medium_nuisance");
        assert_eq!(regime_label(0.6), "high_nuisance");
    }
}
