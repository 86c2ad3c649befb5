use std::io::Write;
use std::path::{Path, PathBuf};

use epistemic_core::ConfidenceCalibrator;
use serde::Serialize;

use crate::error::CampaignError;
use crate::evidence::EvidenceEvent;
use crate::receipts::{validate_receipt, DecisionReceipt};

/// On-disk layout of one run:
///
/// ```text
/// {run_root}/
///   designs/
///     {run_id}_cycle_{ccc}_{prefix}.json
///     rejected/
///       ..._REJECTED.json
///       ..._REJECTED.reason.json
///   evidence.jsonl
///   diagnostics.jsonl
///   decisions.jsonl
///   calibrator.bin
/// ```
#[derive(Clone, Debug)]
pub struct RunArtifacts {
    root: PathBuf,
}

impl RunArtifacts {
    pub fn create(root: &Path) -> Result<Self, CampaignError> {
        std::fs::create_dir_all(root.join("designs").join("rejected"))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn designs_dir(&self) -> PathBuf {
        self.root.join("designs")
    }

    pub fn rejected_dir(&self) -> PathBuf {
        self.root.join("designs").join("rejected")
    }

    pub fn evidence_path(&self) -> PathBuf {
        self.root.join("evidence.jsonl")
    }

    pub fn diagnostics_path(&self) -> PathBuf {
        self.root.join("diagnostics.jsonl")
    }

    pub fn decisions_path(&self) -> PathBuf {
        self.root.join("decisions.jsonl")
    }

    pub fn calibrator_path(&self) -> PathBuf {
        self.root.join("calibrator.bin")
    }

    pub fn append_evidence(&self, event: &EvidenceEvent) -> Result<(), CampaignError> {
        append_jsonl(&self.evidence_path(), event)
    }

    pub fn append_diagnostic(&self, line: &serde_json::Value) -> Result<(), CampaignError> {
        append_jsonl(&self.diagnostics_path(), line)
    }

    /// Receipts are validated before they are written; an incomplete receipt
    /// never reaches disk.
    pub fn append_decision(&self, receipt: &DecisionReceipt) -> Result<(), CampaignError> {
        validate_receipt(receipt)?;
        append_jsonl(&self.decisions_path(), receipt)
    }

    pub fn write_calibrator(
        &self,
        calibrator: &ConfidenceCalibrator,
    ) -> Result<(), CampaignError> {
        std::fs::write(self.calibrator_path(), calibrator.to_bytes())?;
        Ok(())
    }

    /// Final summary line appended to diagnostics before exit.
    pub fn write_summary(
        &self,
        status: &str,
        reason: &str,
        last_cycle: u64,
        exit_code: i32,
    ) -> Result<(), CampaignError> {
        self.append_diagnostic(&serde_json::json!({
            "status": status,
            "reason": reason,
            "last_cycle": last_cycle,
            "exit_code": exit_code,
        }))
    }
}

fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<(), CampaignError> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let line = serde_json::to_string(value)
        .map_err(|e| CampaignError::Config(format!("jsonl encode: {e}")))?;
    writeln!(file, "{line}")?;
    Ok(())
}
