//! The tandem orchestration engine.
//!
//! Several independently-implemented worker processes ("roles"), each
//! potentially running on its own process group, are composed into a single
//! multi-stage computation. The engine owns:
//!
//! 1. Role and communicator formation from the registry's role table
//! 2. The shared-data arena and its transport (field redistribution,
//!    value broadcast/reduce)
//! 3. Stage sequencing: a collectively agreed stage index drives every
//!    process through the same begin → operations → end pipeline
//! 4. The collective fault protocol: any fault anywhere fails the whole
//!    job, reported once in global rank order
//!
//! The engine never computes anything itself: numerical work lives behind
//! the [`Application`] callback, and process groups live behind
//! `tandem_fabric::ProcessGroup`.

#![deny(unsafe_code)]

mod application;
mod data;
mod env;
mod error;
mod faults;
mod formation;
mod operation;
mod orchestrator;
mod role;
mod stage;
mod topology;

pub use application::{Application, HostError, HostResult, OperationType};
pub use data::{DataLayer, DatumHandle, SharedDatum, SharedField, SharedParameter, SharedValue};
pub use env::{control_terminate, ProcessEnv, CONTROL_FILE, REGISTRY_FILE_ENV, ROLE_ID_ENV};
pub use error::{EngineError, EngineResult};
pub use faults::{FaultHandler, ReportSink};
pub use formation::{form_roles, Formation};
pub use operation::{Operation, OperationKind};
pub use orchestrator::{ArgumentMap, Orchestrator, INVALID_STAGE, TERMINATE_STAGE};
pub use role::Role;
pub use stage::Stage;
pub use topology::CommunicationTopology;
