//! The process-group trait.

use crate::FabricError;
use std::sync::Arc;

pub type FabricResult<T> = Result<T, FabricError>;

/// Elementwise combiner for reductions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
}

impl ReduceOp {
    pub(crate) fn combine_i64(&self, lhs: i64, rhs: i64) -> i64 {
        match self {
            ReduceOp::Sum => lhs + rhs,
            ReduceOp::Max => lhs.max(rhs),
        }
    }

    pub(crate) fn combine_f64(&self, lhs: f64, rhs: f64) -> f64 {
        match self {
            ReduceOp::Sum => lhs + rhs,
            ReduceOp::Max => lhs.max(rhs),
        }
    }
}

/// A fixed group of processes with collective and point-to-point
/// primitives.
///
/// Every collective blocks the caller until all members of the group have
/// arrived; these calls are the only cross-process synchronization points in
/// the engine. All members must issue the same sequence of collectives,
/// the usual SPMD contract. Point-to-point sends are buffered (a send
/// completes without waiting for the matching receive); receives block.
pub trait ProcessGroup: Send + Sync {
    /// This process's rank within the group, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of member processes.
    fn size(&self) -> usize;

    /// Replicate `root`'s buffer onto every member. Non-root buffers are
    /// resized to the root's length.
    fn broadcast_f64(&self, data: &mut Vec<f64>, root: usize) -> FabricResult<()>;

    /// As [`broadcast_f64`](Self::broadcast_f64), for `i64` payloads.
    fn broadcast_i64(&self, data: &mut Vec<i64>, root: usize) -> FabricResult<()>;

    /// Elementwise reduction; every member receives the combined vector.
    /// All contributions must have equal length.
    fn all_reduce_i64(&self, data: &[i64], op: ReduceOp) -> FabricResult<Vec<i64>>;

    /// Elementwise reduction onto `root`. Only the root receives the
    /// combined vector; other members get `None`.
    fn reduce_f64(&self, data: &[f64], op: ReduceOp, root: usize) -> FabricResult<Option<Vec<f64>>>;

    /// Gather every member's (variable-length) contribution; each member
    /// receives all contributions indexed by rank.
    fn all_gather_i64(&self, data: &[i64]) -> FabricResult<Vec<Vec<i64>>>;

    /// Partition the group: members sharing a `color` form a new group,
    /// ranked by `(key, parent rank)` ascending. Collective over the whole
    /// parent group.
    fn split(&self, color: i64, key: i64) -> FabricResult<Arc<dyn ProcessGroup>>;

    /// Block until every member has arrived.
    fn barrier(&self) -> FabricResult<()>;

    /// Buffered point-to-point send to `to` under `tag`.
    fn send_f64(&self, to: usize, tag: u64, data: &[f64]) -> FabricResult<()>;

    /// Blocking receive of the oldest message from `from` under `tag`.
    fn recv_f64(&self, from: usize, tag: u64) -> FabricResult<Vec<f64>>;

    /// As [`send_f64`](Self::send_f64), for `i64` payloads.
    fn send_i64(&self, to: usize, tag: u64, data: &[i64]) -> FabricResult<()>;

    /// As [`recv_f64`](Self::recv_f64), for `i64` payloads.
    fn recv_i64(&self, from: usize, tag: u64) -> FabricResult<Vec<i64>>;
}
