//! Registry model errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Role '{0}' declares no sub-instance names")]
    EmptyRole(String),

    #[error("Duplicate process id {0}; each role must claim a unique id")]
    DuplicateRoleId(i64),

    #[error("Duplicate shared datum '{0}'")]
    DuplicateDatum(String),

    #[error("Shared datum '{datum}' references unknown role '{role}'")]
    UnknownRole { datum: String, role: String },

    #[error("Shared datum '{datum}' of layout {layout} must have size 1, got {size}")]
    ParameterSize {
        datum: String,
        layout: String,
        size: usize,
    },

    #[error("Stage '{stage}' references shared datum '{datum}' which doesn't exist")]
    UnknownSharedData { stage: String, datum: String },

    #[error("Stage '{stage}' operation '{operation}' names unknown role '{role}'")]
    UnknownOperationRole {
        stage: String,
        operation: String,
        role: String,
    },

    #[error("Stage name '{0}' is reserved for engine use")]
    ReservedStageName(String),

    #[error("Duplicate stage '{0}'")]
    DuplicateStage(String),

    #[error("Failed to read registry file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed registry: {0}")]
    Json(#[from] serde_json::Error),
}
