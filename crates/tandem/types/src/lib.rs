//! Registry model for the tandem coordination engine.
//!
//! A computation is declared by a [`RegistrySpec`]: a role table, a
//! shared-datum table, and a stage table. The registry is authored by an
//! external tool and consumed here as an already-parsed structure; the
//! engine binds its runtime objects against it at startup.

#![deny(unsafe_code)]

mod error;
mod layout;
mod registry;

pub use error::ModelError;
pub use layout::{BroadcastSide, Layout};
pub use registry::{
    ArgumentSpec, OperationSpec, ParameterSpec, RegistrySpec, RoleSpec, SharedDatumSpec, StageSpec,
    SubOperationSpec,
};

/// Reserved stage name: rebuilds the shared-data arena and rebinds all
/// stages when the hosted application's topology has changed. Never declared
/// in a registry; the engine appends it to the stage table itself.
pub const UPDATE_SHARED_DATA_STAGE: &str = "Update Shared Data";

/// Reserved stage name: requesting it ends every role's loop cleanly.
pub const TERMINATE_STAGE_NAME: &str = "Terminate";
