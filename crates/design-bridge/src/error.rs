use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which validator produced a verdict.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidatorMode {
    Placeholder,
    Full,
}

impl ValidatorMode {
    pub fn label(self) -> &'static str {
        match self {
            ValidatorMode::Placeholder => "placeholder",
            ValidatorMode::Full => "full",
        }
    }
}

impl std::fmt::Display for ValidatorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A refused proposal. This is an expected outcome, not a crash: the run
/// continues after persisting the refusal.
///
/// `audit_degraded` is set when the refusal artifact itself could not be
/// written; the refusal is still enforced.
#[derive(Debug, Clone, Error)]
#[error("design rejected [{violation_code}] ({validator_mode}): {message}")]
pub struct InvalidDesignError {
    pub violation_code: String,
    pub message: String,
    pub validator_mode: ValidatorMode,
    pub design_hash: String,
    pub audit_degraded: bool,
    pub io_error: Option<String>,
}

impl InvalidDesignError {
    pub fn new(
        violation_code: &str,
        message: String,
        validator_mode: ValidatorMode,
        design_hash: String,
    ) -> Self {
        Self {
            violation_code: violation_code.to_string(),
            message,
            validator_mode,
            design_hash,
            audit_degraded: false,
            io_error: None,
        }
    }
}

/// Bridge-level failures outside the refusal path.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Invalid(#[from] InvalidDesignError),

    #[error("design io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("design decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
