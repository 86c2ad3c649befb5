use thiserror::Error;

/// Errors raised by the biological virtual machine.
///
/// Conservation failures, observer-dependence breaches, and non-finite
/// viability are invariant violations: they terminate the run and must not be
/// caught and ignored. Catalog and configuration errors are load-time faults.
#[derive(Debug, Error)]
pub enum BvmError {
    #[error("conservation enforcement failed for vessel {vessel_id}: residual {residual:e}")]
    ConservationFailure { vessel_id: String, residual: f64 },

    #[error("viability for vessel {vessel_id} became invalid: {value}")]
    NonFiniteViability { vessel_id: String, value: f64 },

    #[error("observer dependence: {operation} requested {domain} stream {stream}")]
    ObserverDependence {
        operation: String,
        domain: &'static str,
        stream: String,
    },

    #[error("invalid step duration: {0}")]
    InvalidDuration(f64),

    #[error("unknown catalog entry: {kind} '{name}'")]
    UnknownCatalogEntry { kind: &'static str, name: String },

    #[error("unrecognized run-context option: {0}")]
    UnknownContextField(String),

    #[error("subpopulation weights for axis '{axis}' collapsed to zero")]
    SubpopulationCollapse { axis: String },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid assay parameter: {0}")]
    InvalidAssayParameter(String),

    #[error("catalog load error: {0}")]
    CatalogLoad(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
