//! Engine fault taxonomy.
//!
//! Termination is deliberately absent: a terminate request is a normal
//! stage-selection outcome, not an error.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or missing registry reference: unknown shared datum,
    /// unresolvable binding, invalid stage request.
    #[error("Parsing fault: {0}")]
    Parsing(String),

    /// Invariant violated at runtime, e.g. data requested before
    /// initialization or a size mismatch on a fixed-size datum.
    #[error("Logic fault: {0}")]
    Logic(String),

    /// An opaque error escaping the hosted-application boundary.
    #[error("Fault in hosted application: {0}")]
    Unclassified(String),

    /// Role/communicator formation failed; uniform across the whole job.
    #[error("Formation failed: {0}")]
    Formation(String),

    /// The collective fault decision fired: at least one role registered a
    /// pending fault, the rank-ordered report ran, and the job must exit
    /// with `status`.
    #[error("Job aborted after collective fault report (exit status {status})")]
    Fault { status: i32 },

    #[error(transparent)]
    Fabric(#[from] tandem_fabric::FabricError),

    #[error(transparent)]
    Model(#[from] tandem_types::ModelError),
}

impl EngineError {
    /// Short tag used in fault banners.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Parsing(_) => "Parsing fault",
            EngineError::Logic(_) => "Logic fault",
            EngineError::Unclassified(_) => "Unclassified fault",
            EngineError::Formation(_) => "Formation fault",
            EngineError::Fault { .. } => "Collective fault",
            EngineError::Fabric(_) => "Transport fault",
            EngineError::Model(_) => "Registry fault",
        }
    }
}
