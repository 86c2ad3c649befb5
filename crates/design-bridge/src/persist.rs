use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::design::Design;
use crate::error::{BridgeError, InvalidDesignError};
use crate::hash::compute_hash;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 10;

/// Provenance of a refusal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaughtAt {
    pub cycle: u64,
    pub run_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,
}

/// Companion reason artifact written beside every rejected design.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RejectionReason {
    pub violation_code: String,
    pub violation_message: String,
    pub validator_mode: String,
    pub design_hash: String,
    pub caught_at: CaughtAt,
    pub design_path: String,
}

fn design_filename(run_id: &str, cycle: u64, design_id: &str, suffix: &str) -> String {
    let prefix: String = design_id.chars().take(8).collect();
    format!("{run_id}_cycle_{cycle:03}_{prefix}{suffix}.json")
}

/// Bounded retry with exponential backoff for transient IO.
fn with_retry<T>(mut attempt: impl FnMut() -> std::io::Result<T>) -> std::io::Result<T> {
    let mut last_err = None;
    for k in 0..RETRY_ATTEMPTS {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_err = Some(err);
                if k + 1 < RETRY_ATTEMPTS {
                    std::thread::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS << k));
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::other("retry exhausted")))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    with_retry(|| std::fs::write(path, &bytes))
}

/// Persist an accepted design under `{dir}/{run_id}_cycle_{ccc}_{prefix}.json`.
pub fn persist(
    design: &Design,
    dir: &Path,
    run_id: &str,
    cycle: u64,
) -> Result<PathBuf, BridgeError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(design_filename(run_id, cycle, &design.design_id, ""));
    write_json(&path, design)?;
    Ok(path)
}

/// Persist a rejected design and its companion reason file into the
/// quarantine directory, returning the error to raise.
///
/// If the artifacts cannot be written the refusal is still enforced: the
/// returned error carries `audit_degraded = true` and the IO failure.
pub fn persist_rejected(
    design: &Design,
    mut error: InvalidDesignError,
    dir: &Path,
    run_id: &str,
    cycle: u64,
    git_sha: Option<String>,
) -> (InvalidDesignError, Option<PathBuf>) {
    let result = (|| -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let design_path =
            dir.join(design_filename(run_id, cycle, &design.design_id, "_REJECTED"));
        write_json(&design_path, design)?;

        let reason = RejectionReason {
            violation_code: error.violation_code.clone(),
            violation_message: error.message.clone(),
            validator_mode: error.validator_mode.label().to_string(),
            design_hash: if error.design_hash.is_empty() {
                compute_hash(design)
            } else {
                error.design_hash.clone()
            },
            caught_at: CaughtAt {
                cycle,
                run_id: run_id.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                git_sha,
            },
            design_path: design_path.display().to_string(),
        };
        let reason_path = dir.join(design_filename(
            run_id,
            cycle,
            &design.design_id,
            "_REJECTED.reason",
        ));
        write_json(&reason_path, &reason)?;
        Ok(design_path)
    })();

    match result {
        Ok(path) => {
            tracing::info!(
                design = %design.design_id,
                code = %error.violation_code,
                path = %path.display(),
                "design refused and quarantined"
            );
            (error, Some(path))
        }
        Err(io) => {
            tracing::error!(
                design = %design.design_id,
                code = %error.violation_code,
                io = %io,
                "design refused but refusal artifact could not be written"
            );
            error.audit_degraded = true;
            error.io_error = Some(io.to_string());
            (error, None)
        }
    }
}

/// Reload a persisted design.
pub fn load_design(path: &Path) -> Result<Design, BridgeError> {
    let raw = with_retry(|| std::fs::read(path))?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Reload a persisted rejection reason.
pub fn load_reason(path: &Path) -> Result<RejectionReason, BridgeError> {
    let raw = with_retry(|| std::fs::read(path))?;
    Ok(serde_json::from_slice(&raw)?)
}
