//! Transport errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("Rank {rank} out of range for group of size {size}")]
    RankOutOfRange { rank: usize, size: usize },

    #[error("Collective failed: {0}")]
    Collective(String),

    #[error("Received message of unexpected element type from rank {from} (tag {tag})")]
    TypeMismatch { from: usize, tag: u64 },

    #[error("Fabric poisoned: a member process died mid-collective")]
    Poisoned,
}
