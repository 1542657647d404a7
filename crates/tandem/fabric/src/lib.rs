//! Process-group capability for the tandem engine.
//!
//! The engine talks to its transport substrate exclusively through the
//! [`ProcessGroup`] trait: broadcast, reduce, all-reduce, all-gather, split,
//! barrier, and point-to-point send/receive over a fixed set of member
//! processes. Production deployments back the trait with a real
//! multi-process runtime; [`LocalFabric`] backs it with one OS thread per
//! simulated process so the whole engine can be exercised deterministically
//! in a single test process.

#![deny(unsafe_code)]

mod error;
mod group;
mod local;

pub use error::FabricError;
pub use group::{FabricResult, ProcessGroup, ReduceOp};
pub use local::LocalFabric;
