//! Epistemic control layer: mechanism posterior, calibrated confidence,
//! and the debt ledger that keeps claimed information gain honest.
//!
//! The separation of duties is strict. The posterior evaluates likelihoods
//! under nuisance-inflated covariance and applies no penalty of its own; the
//! calibrator maps belief to P(correct); the controller settles claims
//! against realized gains.

pub mod calibrator;
pub mod controller;
pub mod ece;
pub mod error;
pub mod nuisance;
pub mod posterior;

pub use calibrator::{
    stratified_split, synthetic_calibration_set, CalibrationSample, ConfidenceCalibrator,
};
pub use controller::{
    ActionType, ClaimRecord, ClaimStatus, ControllerParams, EpistemicController, EpistemicStats,
    ProvisionalPenalty, Resolution, ResolveOutcome,
};
pub use ece::{BinStats, EceTracker};
pub use error::{EpistemicError, EpistemicInvariantError};
pub use nuisance::NuisanceModel;
pub use posterior::{
    compute_posterior, information_gain_bits, BeliefState, MechanismLibrary, MechanismPosterior,
    MechanismSignature,
};
