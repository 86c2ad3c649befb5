//! Design bridge: the refusal-and-provenance layer between proposal and
//! execution.
//!
//! Proposals are expanded into canonical design JSON, validated against lab
//! constraints and the frozen sentinel scaffold, and persisted whether
//! accepted or refused. Every refusal leaves a reason artifact; a refusal
//! whose artifact cannot be written is still enforced, flagged as
//! audit-degraded.

pub mod design;
pub mod error;
pub mod hash;
pub mod persist;
pub mod scaffold;
pub mod validate;

pub use design::{
    default_positions, to_design_json, Design, DesignMetadata, DesignWell, PlateAssignment,
    Proposal, ScaffoldMetadata, SentinelSchema, WellSpec,
};
pub use error::{BridgeError, InvalidDesignError, ValidatorMode};
pub use hash::compute_hash;
pub use persist::{
    load_design, load_reason, persist, persist_rejected, CaughtAt, RejectionReason,
};
pub use scaffold::{Scaffold, ScaffoldEntry, ScaffoldRegistry};
pub use validate::validate;
