//! Biological virtual machine: deterministic, multi-stream,
//! observer-independent simulation of cell populations in micro-well plates
//! under chemical perturbation.
//!
//! Physics (growth, treatment, operations) and measurement (assay) draw from
//! disjoint named RNG sub-streams; conservation of death accounting is
//! enforced at every step.

pub mod assay;
pub mod catalog;
pub mod condition;
pub mod context;
pub mod error;
pub mod hazard;
pub mod mechanism;
pub mod rng;
pub mod step;
pub mod vessel;

pub use assay::{cell_painting, count_cells, scalar_viability, AssayEnv, CellPaintingReadout};
pub use catalog::{Catalog, CellLineSpec, CompoundSpec, PricingTable, StressBuckets, VesselClass};
pub use condition::{round_half_even, ConditionAggregator, ConditionKey};
pub use context::{FieldType, RunContext, RunContextConfig};
pub use error::BvmError;
pub use hazard::{propose_hazards, HazardProposal};
pub use mechanism::Mechanism;
pub use rng::{RngFabric, StreamDomain, StreamName};
pub use step::{
    feed, passage, passage_subculture, step, treat, washout, StepEnv, StepEvent, StepReport,
};
pub use vessel::{seed_vessel, CompoundState, DeathMode, MorphologyState, VesselState};
