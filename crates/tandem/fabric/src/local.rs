//! Deterministic in-memory fabric.
//!
//! One OS thread stands in for each process. A group's collectives funnel
//! through a single generation slot: every member deposits its contribution,
//! the last arrival computes the outcome, and the slot resets once every
//! member has picked the outcome up. Point-to-point messages go through a
//! per-group mailbox keyed by `(source, destination, tag)`.
//!
//! There are no timeouts, matching the engine's protocol: a member that
//! never reaches a collective blocks the rest of its group.

use crate::{FabricError, FabricResult, ProcessGroup, ReduceOp};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

/// Entry point for running an SPMD closure over an in-memory process group.
pub struct LocalFabric;

impl LocalFabric {
    /// Spawn `size` member threads, hand each its [`ProcessGroup`] handle,
    /// and join them all, returning their results in rank order. A panic on
    /// any member is re-raised on the caller.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn ProcessGroup>) -> T + Send + Sync + 'static,
    {
        assert!(size > 0, "process group must have at least one member");
        tracing::debug!(size, "starting local fabric");
        let shared = Arc::new(GroupShared::new(size));
        let f = Arc::new(f);
        let handles: Vec<_> = (0..size)
            .map(|rank| {
                let group: Arc<dyn ProcessGroup> = Arc::new(LocalGroup {
                    shared: Arc::clone(&shared),
                    rank,
                });
                let f = Arc::clone(&f);
                std::thread::Builder::new()
                    .name(format!("tandem-{rank}"))
                    .spawn(move || f(group))
                    .expect("failed to spawn fabric member thread")
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(value) => value,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    }
}

// ── Group state ──────────────────────────────────────────────────────

enum Contribution {
    F64(Vec<f64>),
    I64(Vec<i64>),
    Split { color: i64, key: i64 },
    Unit,
}

enum Outcome {
    F64(Vec<f64>),
    I64(Vec<i64>),
    Gathered(Vec<Vec<i64>>),
    /// Child group handle and new rank, indexed by parent rank.
    Groups(Vec<(Arc<GroupShared>, usize)>),
    Unit,
    Failed(String),
}

#[derive(Clone, Copy)]
enum CollectiveOp {
    Broadcast { root: usize },
    AllReduceI64(ReduceOp),
    ReduceF64(ReduceOp),
    AllGather,
    Split,
    Barrier,
}

enum Mail {
    F64(Vec<f64>),
    I64(Vec<i64>),
}

struct Slot {
    /// False while members deposit, true while they pick the outcome up.
    draining: bool,
    arrived: usize,
    departed: usize,
    contributions: Vec<Option<Contribution>>,
    outcome: Option<Arc<Outcome>>,
}

struct GroupShared {
    size: usize,
    slot: Mutex<Slot>,
    slot_cv: Condvar,
    mail: Mutex<HashMap<(usize, usize, u64), VecDeque<Mail>>>,
    mail_cv: Condvar,
}

impl GroupShared {
    fn new(size: usize) -> Self {
        Self {
            size,
            slot: Mutex::new(Slot {
                draining: false,
                arrived: 0,
                departed: 0,
                contributions: (0..size).map(|_| None).collect(),
                outcome: None,
            }),
            slot_cv: Condvar::new(),
            mail: Mutex::new(HashMap::new()),
            mail_cv: Condvar::new(),
        }
    }

    /// Deposit a contribution, block until all members have arrived, and
    /// return the shared outcome. The last member to arrive computes it.
    fn exchange(&self, rank: usize, op: CollectiveOp, mine: Contribution) -> FabricResult<Arc<Outcome>> {
        let mut slot = self.slot.lock().map_err(|_| FabricError::Poisoned)?;
        while slot.draining {
            slot = self.slot_cv.wait(slot).map_err(|_| FabricError::Poisoned)?;
        }

        slot.contributions[rank] = Some(mine);
        slot.arrived += 1;
        if slot.arrived == self.size {
            let deposited = std::mem::replace(
                &mut slot.contributions,
                (0..self.size).map(|_| None).collect(),
            );
            slot.outcome = Some(Arc::new(compute_outcome(op, deposited)));
            slot.draining = true;
            self.slot_cv.notify_all();
        } else {
            while !slot.draining {
                slot = self.slot_cv.wait(slot).map_err(|_| FabricError::Poisoned)?;
            }
        }

        let outcome = slot.outcome.clone().ok_or(FabricError::Poisoned)?;
        slot.departed += 1;
        if slot.departed == self.size {
            slot.draining = false;
            slot.arrived = 0;
            slot.departed = 0;
            slot.outcome = None;
            self.slot_cv.notify_all();
        }
        drop(slot);

        if let Outcome::Failed(message) = &*outcome {
            return Err(FabricError::Collective(message.clone()));
        }
        Ok(outcome)
    }
}

fn compute_outcome(op: CollectiveOp, deposited: Vec<Option<Contribution>>) -> Outcome {
    let mut contributions = Vec::with_capacity(deposited.len());
    for entry in deposited {
        match entry {
            Some(contribution) => contributions.push(contribution),
            None => return Outcome::Failed("missing contribution".to_string()),
        }
    }

    match op {
        CollectiveOp::Barrier => Outcome::Unit,
        CollectiveOp::Broadcast { root } => match &contributions[root] {
            Contribution::F64(data) => Outcome::F64(data.clone()),
            Contribution::I64(data) => Outcome::I64(data.clone()),
            _ => Outcome::Failed("broadcast root deposited no data".to_string()),
        },
        CollectiveOp::AllReduceI64(reduce) => {
            let mut combined: Option<Vec<i64>> = None;
            for contribution in &contributions {
                let Contribution::I64(data) = contribution else {
                    return Outcome::Failed("all-reduce expects i64 contributions".to_string());
                };
                combined = Some(match combined {
                    None => data.clone(),
                    Some(acc) => {
                        if acc.len() != data.len() {
                            return Outcome::Failed(format!(
                                "all-reduce length mismatch: {} vs {}",
                                acc.len(),
                                data.len()
                            ));
                        }
                        acc.iter()
                            .zip(data.iter())
                            .map(|(lhs, rhs)| reduce.combine_i64(*lhs, *rhs))
                            .collect()
                    }
                });
            }
            Outcome::I64(combined.unwrap_or_default())
        }
        CollectiveOp::ReduceF64(reduce) => {
            let mut combined: Option<Vec<f64>> = None;
            for contribution in &contributions {
                let Contribution::F64(data) = contribution else {
                    return Outcome::Failed("reduce expects f64 contributions".to_string());
                };
                combined = Some(match combined {
                    None => data.clone(),
                    Some(acc) => {
                        if acc.len() != data.len() {
                            return Outcome::Failed(format!(
                                "reduce length mismatch: {} vs {}",
                                acc.len(),
                                data.len()
                            ));
                        }
                        acc.iter()
                            .zip(data.iter())
                            .map(|(lhs, rhs)| reduce.combine_f64(*lhs, *rhs))
                            .collect()
                    }
                });
            }
            Outcome::F64(combined.unwrap_or_default())
        }
        CollectiveOp::AllGather => {
            let mut gathered = Vec::with_capacity(contributions.len());
            for contribution in &contributions {
                let Contribution::I64(data) = contribution else {
                    return Outcome::Failed("all-gather expects i64 contributions".to_string());
                };
                gathered.push(data.clone());
            }
            Outcome::Gathered(gathered)
        }
        CollectiveOp::Split => {
            // Group members by color, rank children by (key, parent rank).
            let mut by_color: HashMap<i64, Vec<(i64, usize)>> = HashMap::new();
            for (parent_rank, contribution) in contributions.iter().enumerate() {
                let Contribution::Split { color, key } = contribution else {
                    return Outcome::Failed("split expects color/key contributions".to_string());
                };
                by_color.entry(*color).or_default().push((*key, parent_rank));
            }
            let mut assignments: Vec<Option<(Arc<GroupShared>, usize)>> =
                (0..contributions.len()).map(|_| None).collect();
            for members in by_color.values_mut() {
                members.sort();
                let child = Arc::new(GroupShared::new(members.len()));
                for (new_rank, (_, parent_rank)) in members.iter().enumerate() {
                    assignments[*parent_rank] = Some((Arc::clone(&child), new_rank));
                }
            }
            let mut groups = Vec::with_capacity(assignments.len());
            for assignment in assignments {
                match assignment {
                    Some(entry) => groups.push(entry),
                    None => return Outcome::Failed("split left a member unassigned".to_string()),
                }
            }
            Outcome::Groups(groups)
        }
    }
}

// ── Member handle ────────────────────────────────────────────────────

struct LocalGroup {
    shared: Arc<GroupShared>,
    rank: usize,
}

impl LocalGroup {
    fn check_rank(&self, rank: usize) -> FabricResult<()> {
        if rank >= self.shared.size {
            return Err(FabricError::RankOutOfRange {
                rank,
                size: self.shared.size,
            });
        }
        Ok(())
    }

    fn post(&self, to: usize, tag: u64, mail: Mail) -> FabricResult<()> {
        self.check_rank(to)?;
        let mut boxes = self.shared.mail.lock().map_err(|_| FabricError::Poisoned)?;
        boxes
            .entry((self.rank, to, tag))
            .or_default()
            .push_back(mail);
        self.shared.mail_cv.notify_all();
        Ok(())
    }

    fn collect(&self, from: usize, tag: u64) -> FabricResult<Mail> {
        self.check_rank(from)?;
        let key = (from, self.rank, tag);
        let mut boxes = self.shared.mail.lock().map_err(|_| FabricError::Poisoned)?;
        loop {
            if let Some(queue) = boxes.get_mut(&key) {
                if let Some(mail) = queue.pop_front() {
                    return Ok(mail);
                }
            }
            boxes = self
                .shared
                .mail_cv
                .wait(boxes)
                .map_err(|_| FabricError::Poisoned)?;
        }
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn broadcast_f64(&self, data: &mut Vec<f64>, root: usize) -> FabricResult<()> {
        self.check_rank(root)?;
        let outcome = self.shared.exchange(
            self.rank,
            CollectiveOp::Broadcast { root },
            Contribution::F64(data.clone()),
        )?;
        match &*outcome {
            Outcome::F64(result) => {
                *data = result.clone();
                Ok(())
            }
            _ => Err(FabricError::Collective("broadcast outcome mismatch".to_string())),
        }
    }

    fn broadcast_i64(&self, data: &mut Vec<i64>, root: usize) -> FabricResult<()> {
        self.check_rank(root)?;
        let outcome = self.shared.exchange(
            self.rank,
            CollectiveOp::Broadcast { root },
            Contribution::I64(data.clone()),
        )?;
        match &*outcome {
            Outcome::I64(result) => {
                *data = result.clone();
                Ok(())
            }
            _ => Err(FabricError::Collective("broadcast outcome mismatch".to_string())),
        }
    }

    fn all_reduce_i64(&self, data: &[i64], op: ReduceOp) -> FabricResult<Vec<i64>> {
        let outcome = self.shared.exchange(
            self.rank,
            CollectiveOp::AllReduceI64(op),
            Contribution::I64(data.to_vec()),
        )?;
        match &*outcome {
            Outcome::I64(result) => Ok(result.clone()),
            _ => Err(FabricError::Collective("all-reduce outcome mismatch".to_string())),
        }
    }

    fn reduce_f64(&self, data: &[f64], op: ReduceOp, root: usize) -> FabricResult<Option<Vec<f64>>> {
        self.check_rank(root)?;
        let outcome = self.shared.exchange(
            self.rank,
            CollectiveOp::ReduceF64(op),
            Contribution::F64(data.to_vec()),
        )?;
        match &*outcome {
            Outcome::F64(result) if self.rank == root => Ok(Some(result.clone())),
            Outcome::F64(_) => Ok(None),
            _ => Err(FabricError::Collective("reduce outcome mismatch".to_string())),
        }
    }

    fn all_gather_i64(&self, data: &[i64]) -> FabricResult<Vec<Vec<i64>>> {
        let outcome = self.shared.exchange(
            self.rank,
            CollectiveOp::AllGather,
            Contribution::I64(data.to_vec()),
        )?;
        match &*outcome {
            Outcome::Gathered(result) => Ok(result.clone()),
            _ => Err(FabricError::Collective("all-gather outcome mismatch".to_string())),
        }
    }

    fn split(&self, color: i64, key: i64) -> FabricResult<Arc<dyn ProcessGroup>> {
        let outcome = self.shared.exchange(
            self.rank,
            CollectiveOp::Split,
            Contribution::Split { color, key },
        )?;
        match &*outcome {
            Outcome::Groups(groups) => {
                let (child, new_rank) = &groups[self.rank];
                Ok(Arc::new(LocalGroup {
                    shared: Arc::clone(child),
                    rank: *new_rank,
                }))
            }
            _ => Err(FabricError::Collective("split outcome mismatch".to_string())),
        }
    }

    fn barrier(&self) -> FabricResult<()> {
        self.shared
            .exchange(self.rank, CollectiveOp::Barrier, Contribution::Unit)?;
        Ok(())
    }

    fn send_f64(&self, to: usize, tag: u64, data: &[f64]) -> FabricResult<()> {
        self.post(to, tag, Mail::F64(data.to_vec()))
    }

    fn recv_f64(&self, from: usize, tag: u64) -> FabricResult<Vec<f64>> {
        match self.collect(from, tag)? {
            Mail::F64(data) => Ok(data),
            Mail::I64(_) => Err(FabricError::TypeMismatch { from, tag }),
        }
    }

    fn send_i64(&self, to: usize, tag: u64, data: &[i64]) -> FabricResult<()> {
        self.post(to, tag, Mail::I64(data.to_vec()))
    }

    fn recv_i64(&self, from: usize, tag: u64) -> FabricResult<Vec<i64>> {
        match self.collect(from, tag)? {
            Mail::I64(data) => Ok(data),
            Mail::F64(_) => Err(FabricError::TypeMismatch { from, tag }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_replicates_root_buffer() {
        let results = LocalFabric::run(4, |group| {
            let mut data = if group.rank() == 2 {
                vec![1.5, 2.5, 3.5]
            } else {
                Vec::new()
            };
            group.broadcast_f64(&mut data, 2).unwrap();
            data
        });
        for data in results {
            assert_eq!(data, vec![1.5, 2.5, 3.5]);
        }
    }

    #[test]
    fn all_reduce_sums_elementwise() {
        let results = LocalFabric::run(3, |group| {
            let rank = group.rank() as i64;
            group.all_reduce_i64(&[rank, 1], ReduceOp::Sum).unwrap()
        });
        for data in results {
            assert_eq!(data, vec![3, 3]);
        }
    }

    #[test]
    fn all_reduce_max_finds_largest() {
        let results = LocalFabric::run(4, |group| {
            let candidate = if group.rank() == 1 { 7 } else { -1 };
            group.all_reduce_i64(&[candidate], ReduceOp::Max).unwrap()
        });
        for data in results {
            assert_eq!(data, vec![7]);
        }
    }

    #[test]
    fn reduce_delivers_only_to_root() {
        let results = LocalFabric::run(3, |group| {
            group
                .reduce_f64(&[group.rank() as f64], ReduceOp::Sum, 1)
                .unwrap()
        });
        assert_eq!(results[0], None);
        assert_eq!(results[1], Some(vec![3.0]));
        assert_eq!(results[2], None);
    }

    #[test]
    fn all_gather_keeps_rank_order_and_lengths() {
        let results = LocalFabric::run(3, |group| {
            let rank = group.rank() as i64;
            let mine: Vec<i64> = (0..=rank).collect();
            group.all_gather_i64(&mine).unwrap()
        });
        for gathered in results {
            assert_eq!(gathered, vec![vec![0], vec![0, 1], vec![0, 1, 2]]);
        }
    }

    #[test]
    fn split_partitions_by_color_and_orders_by_key() {
        // Ranks 0,2 -> color 0; ranks 1,3 -> color 1 with reversed keys.
        let results = LocalFabric::run(4, |group| {
            let color = (group.rank() % 2) as i64;
            let key = if color == 1 {
                -(group.rank() as i64)
            } else {
                group.rank() as i64
            };
            let child = group.split(color, key).unwrap();
            (child.rank(), child.size())
        });
        assert_eq!(results, vec![(0, 2), (1, 2), (1, 2), (0, 2)]);
    }

    #[test]
    fn split_children_run_their_own_collectives() {
        let results = LocalFabric::run(4, |group| {
            let color = (group.rank() / 2) as i64;
            let child = group.split(color, group.rank() as i64).unwrap();
            child.all_reduce_i64(&[group.rank() as i64], ReduceOp::Sum).unwrap()
        });
        assert_eq!(results, vec![vec![1], vec![1], vec![5], vec![5]]);
    }

    #[test]
    fn consecutive_collectives_reuse_the_slot() {
        let results = LocalFabric::run(2, |group| {
            let first = group.all_reduce_i64(&[1], ReduceOp::Sum).unwrap();
            group.barrier().unwrap();
            let second = group.all_reduce_i64(&[10], ReduceOp::Sum).unwrap();
            (first, second)
        });
        for (first, second) in results {
            assert_eq!(first, vec![2]);
            assert_eq!(second, vec![20]);
        }
    }

    #[test]
    fn point_to_point_preserves_fifo_per_tag() {
        let results = LocalFabric::run(2, |group| {
            if group.rank() == 0 {
                group.send_f64(1, 7, &[1.0]).unwrap();
                group.send_f64(1, 7, &[2.0]).unwrap();
                Vec::new()
            } else {
                let first = group.recv_f64(0, 7).unwrap();
                let second = group.recv_f64(0, 7).unwrap();
                vec![first[0], second[0]]
            }
        });
        assert_eq!(results[1], vec![1.0, 2.0]);
    }

    #[test]
    fn mismatched_payload_type_is_reported() {
        let results = LocalFabric::run(2, |group| {
            if group.rank() == 0 {
                group.send_i64(1, 3, &[42]).unwrap();
                true
            } else {
                matches!(
                    group.recv_f64(0, 3),
                    Err(FabricError::TypeMismatch { from: 0, tag: 3 })
                )
            }
        });
        assert!(results[1]);
    }

    #[test]
    fn all_reduce_length_mismatch_fails_on_every_rank() {
        let results = LocalFabric::run(2, |group| {
            let data: Vec<i64> = vec![0; group.rank() + 1];
            group.all_reduce_i64(&data, ReduceOp::Sum).is_err()
        });
        assert_eq!(results, vec![true, true]);
    }
}
