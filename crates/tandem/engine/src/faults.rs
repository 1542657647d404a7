//! Collective fault accumulation and reporting.
//!
//! Every fault is caught locally, tagged with the role name, and buffered.
//! Nothing is printed at registration time: the decision to fail is always
//! collective. Before every stage broadcast (and before control returns to
//! a caller) all processes sum-reduce their pending-fault counts; a nonzero
//! sum triggers one strict rank-ordered report and fails the whole job.

use crate::{EngineError, EngineResult};
use std::sync::Arc;
use tandem_fabric::{FabricResult, ProcessGroup, ReduceOp};

/// Where relayed diagnostics go. The default writes to stderr; tests
/// install their own sink to observe the relay. Threading the sink through
/// the handler keeps console handling out of global state.
pub type ReportSink = Arc<dyn Fn(usize, &str) + Send + Sync>;

const RELAY_TAG: u64 = u64::MAX;
const RULE: &str =
    " -----------------------------------------------------------------------------";

pub struct FaultHandler {
    role_name: String,
    local: Arc<dyn ProcessGroup>,
    global: Arc<dyn ProcessGroup>,
    pending: usize,
    buffer: String,
    sink: ReportSink,
}

impl FaultHandler {
    pub fn new(
        role_name: impl Into<String>,
        local: Arc<dyn ProcessGroup>,
        global: Arc<dyn ProcessGroup>,
    ) -> Self {
        Self {
            role_name: role_name.into(),
            local,
            global,
            pending: 0,
            buffer: String::new(),
            sink: Arc::new(|_, report| {
                if !report.is_empty() {
                    eprint!("{}", report);
                }
            }),
        }
    }

    pub fn with_sink(mut self, sink: ReportSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn pending_count(&self) -> usize {
        self.pending
    }

    /// Buffer a fault. Only the role's local rank 0 formats the banner, so
    /// a role spanning many processes reports each fault once.
    pub fn register(&mut self, fault: &EngineError) {
        self.pending += 1;
        tracing::debug!(role = %self.role_name, %fault, "fault registered");
        if self.local.rank() == 0 {
            self.buffer.push_str(&format!(
                " -- Fatal Error --------------------------------------------------------------\n  On role '{}':\n  {}\n{}\n",
                self.role_name, fault, RULE
            ));
        }
    }

    /// The collective decision. Sum-reduces pending counts over the global
    /// group; zero means no process anywhere holds a fault and the call is
    /// a no-op. Otherwise the rank-ordered report runs, local state clears,
    /// and every process returns the job-fatal error.
    pub fn resolve(&mut self) -> EngineResult<()> {
        let total = self
            .global
            .all_reduce_i64(&[self.pending as i64], ReduceOp::Sum)?[0];
        if total == 0 {
            return Ok(());
        }
        self.relay()?;
        self.pending = 0;
        self.buffer.clear();
        Err(EngineError::Fault { status: 1 })
    }

    /// Each global rank, in increasing order, receives a token from its
    /// predecessor, emits its buffer, and hands the token on; a barrier
    /// closes the round. Messages are shown exactly once, never
    /// interleaved.
    fn relay(&self) -> FabricResult<()> {
        let rank = self.global.rank();
        let size = self.global.size();
        if size > 1 {
            if rank > 0 {
                self.global.recv_i64(rank - 1, RELAY_TAG)?;
            }
            (self.sink)(rank, &self.buffer);
            if rank + 1 < size {
                self.global.send_i64(rank + 1, RELAY_TAG, &[0])?;
            }
            self.global.barrier()?;
        } else {
            (self.sink)(rank, &self.buffer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tandem_fabric::LocalFabric;

    type Touches = Arc<Mutex<Vec<(usize, bool)>>>;

    fn recording_sink(touches: Touches) -> ReportSink {
        Arc::new(move |rank, report| {
            touches.lock().unwrap().push((rank, !report.is_empty()));
        })
    }

    fn handler_for(group: &Arc<dyn ProcessGroup>, sink: ReportSink) -> FaultHandler {
        // Every process is its own single-member "role" here.
        let local = group.split(group.rank() as i64, 0).unwrap();
        FaultHandler::new(format!("role-{}", group.rank()), local, Arc::clone(group))
            .with_sink(sink)
    }

    #[test]
    fn no_pending_faults_resolves_clean() {
        let results = LocalFabric::run(3, |group| {
            let mut handler = handler_for(&group, Arc::new(|_, _| {}));
            handler.resolve().is_ok()
        });
        assert_eq!(results, vec![true, true, true]);
    }

    #[test]
    fn one_fault_fails_every_rank() {
        let results = LocalFabric::run(4, |group| {
            let mut handler = handler_for(&group, Arc::new(|_, _| {}));
            if group.rank() == 2 {
                handler.register(&EngineError::Logic("buffer underrun".to_string()));
            }
            matches!(handler.resolve(), Err(EngineError::Fault { status: 1 }))
        });
        assert_eq!(results, vec![true, true, true, true]);
    }

    #[test]
    fn relay_touches_every_rank_once_in_order() {
        let touches: Touches = Arc::new(Mutex::new(Vec::new()));
        let sink = recording_sink(Arc::clone(&touches));
        LocalFabric::run(4, move |group| {
            let mut handler = handler_for(&group, sink.clone());
            if group.rank() == 1 {
                handler.register(&EngineError::Parsing("bad stage".to_string()));
            }
            let _ = handler.resolve();
        });
        let touches = touches.lock().unwrap();
        let ranks: Vec<usize> = touches.iter().map(|(rank, _)| *rank).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        // Only the faulting role carries a report.
        let reported: Vec<usize> = touches
            .iter()
            .filter(|(_, nonempty)| *nonempty)
            .map(|(rank, _)| *rank)
            .collect();
        assert_eq!(reported, vec![1]);
    }

    #[test]
    fn pending_state_clears_after_a_round() {
        let results = LocalFabric::run(2, |group| {
            let mut handler = handler_for(&group, Arc::new(|_, _| {}));
            if group.rank() == 0 {
                handler.register(&EngineError::Logic("first".to_string()));
            }
            let first = handler.resolve();
            let second = handler.resolve();
            (first.is_err(), second.is_ok(), handler.pending_count())
        });
        for (first_failed, second_clean, pending) in results {
            assert!(first_failed);
            assert!(second_clean);
            assert_eq!(pending, 0);
        }
    }

    #[test]
    fn only_local_rank_zero_buffers_the_banner() {
        let results = LocalFabric::run(2, |group| {
            // One two-process role; both processes register the same fault.
            let local = group.split(0, group.rank() as i64).unwrap();
            let mut handler =
                FaultHandler::new("pair", local, Arc::clone(&group)).with_sink(Arc::new(|_, _| {}));
            handler.register(&EngineError::Logic("shared".to_string()));
            handler.buffer.len()
        });
        assert!(results[0] > 0);
        assert_eq!(results[1], 0);
    }
}
