//! Field data: values keyed by global id, redistributed by ownership.

use crate::{EngineError, EngineResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tandem_fabric::ProcessGroup;
use tandem_types::{BroadcastSide, Layout};

/// Where each locally provided value must travel, precomputed when the
/// field is created. Both sides of every transfer derive the same id list
/// (the sorted intersection of the sender's provided ids and the receiver's
/// received ids), so a message's k-th element always lands on the k-th
/// common id.
struct RedistributionPlan {
    /// (send index, recv index) pairs satisfied without any transfer.
    local: Vec<(usize, usize)>,
    /// Per peer rank, ascending: send-buffer indices to ship there.
    outgoing: Vec<(usize, Vec<usize>)>,
    /// Per peer rank, ascending: recv-buffer indices to fill from there.
    incoming: Vec<(usize, Vec<usize>)>,
}

/// A field datum. The send side holds one value per provided global id, the
/// receive side one per received global id; `transmit` moves values between
/// them with insert semantics.
pub struct SharedField {
    name: String,
    layout: Layout,
    side: Option<BroadcastSide>,
    context: String,
    global: Arc<dyn ProcessGroup>,
    tag: u64,
    send_index: HashMap<i64, usize>,
    recv_index: HashMap<i64, usize>,
    send_data: Vec<f64>,
    recv_data: Vec<f64>,
    plan: RedistributionPlan,
}

fn sorted_common(ids: &[i64], other: &HashSet<i64>) -> Vec<i64> {
    let mut common: Vec<i64> = ids.iter().copied().filter(|id| other.contains(id)).collect();
    common.sort_unstable();
    common
}

impl SharedField {
    /// Build the field and its redistribution plan. Collective over the
    /// global group: every process all-gathers its provided and received id
    /// lists, whether or not it owns any.
    pub fn new(
        name: impl Into<String>,
        layout: Layout,
        side: Option<BroadcastSide>,
        owned_ids: &[i64],
        global: Arc<dyn ProcessGroup>,
        tag: u64,
    ) -> EngineResult<Self> {
        let send_ids: Vec<i64> = if side.is_some_and(|s| s.sends()) {
            owned_ids.to_vec()
        } else {
            Vec::new()
        };
        let recv_ids: Vec<i64> = if side.is_some_and(|s| s.receives()) {
            owned_ids.to_vec()
        } else {
            Vec::new()
        };

        let all_send = global.all_gather_i64(&send_ids)?;
        let all_recv = global.all_gather_i64(&recv_ids)?;

        let send_index: HashMap<i64, usize> =
            send_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let recv_index: HashMap<i64, usize> =
            recv_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let me = global.rank();
        let my_recv_set: HashSet<i64> = recv_ids.iter().copied().collect();

        let local = sorted_common(&send_ids, &my_recv_set)
            .into_iter()
            .map(|id| (send_index[&id], recv_index[&id]))
            .collect();

        let mut outgoing = Vec::new();
        let mut incoming = Vec::new();
        for peer in 0..global.size() {
            if peer == me {
                continue;
            }
            let peer_recv_set: HashSet<i64> = all_recv[peer].iter().copied().collect();
            let to_peer = sorted_common(&send_ids, &peer_recv_set);
            if !to_peer.is_empty() {
                outgoing.push((peer, to_peer.iter().map(|id| send_index[id]).collect()));
            }
            let from_peer = sorted_common(&all_send[peer], &my_recv_set);
            if !from_peer.is_empty() {
                incoming.push((peer, from_peer.iter().map(|id| recv_index[id]).collect()));
            }
        }

        Ok(Self {
            name: name.into(),
            layout,
            side,
            context: String::new(),
            global,
            tag,
            send_data: vec![0.0; send_ids.len()],
            recv_data: vec![0.0; recv_ids.len()],
            send_index,
            recv_index,
            plan: RedistributionPlan {
                local,
                outgoing,
                incoming,
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn side(&self) -> Option<BroadcastSide> {
        self.side
    }

    /// Receive-side length where one exists, send-side length for pure
    /// senders.
    pub fn size(&self) -> usize {
        match self.side {
            Some(BroadcastSide::Sender) => self.send_data.len(),
            Some(_) => self.recv_data.len(),
            None => 0,
        }
    }

    pub fn set_data(&mut self, values: &[f64]) -> EngineResult<()> {
        if values.len() != self.send_data.len() {
            return Err(EngineError::Logic(format!(
                "field '{}' expects {} provided values, got {}",
                self.name,
                self.send_data.len(),
                values.len()
            )));
        }
        self.send_data.copy_from_slice(values);
        Ok(())
    }

    pub fn get_data(&self) -> Vec<f64> {
        self.recv_data.clone()
    }

    /// Set one provided value by global id; ids this process does not
    /// provide are ignored.
    pub fn set_at(&mut self, global_id: i64, value: f64) {
        if let Some(&index) = self.send_index.get(&global_id) {
            self.send_data[index] = value;
        }
    }

    /// Read one received value by global id.
    pub fn get_at(&self, global_id: i64) -> Option<f64> {
        self.recv_index
            .get(&global_id)
            .map(|&index| self.recv_data[index])
    }

    /// Zero the receive buffer, then move every provided value to its
    /// matching global id on the receive side. Sends are posted before any
    /// receive, in ascending peer order, so no cycle of transfers can
    /// deadlock.
    pub fn transmit(&mut self) -> EngineResult<()> {
        self.recv_data.fill(0.0);
        for (send_idx, recv_idx) in &self.plan.local {
            self.recv_data[*recv_idx] = self.send_data[*send_idx];
        }
        for (peer, indices) in &self.plan.outgoing {
            let payload: Vec<f64> = indices.iter().map(|i| self.send_data[*i]).collect();
            self.global.send_f64(*peer, self.tag, &payload)?;
        }
        for (peer, indices) in &self.plan.incoming {
            let payload = self.global.recv_f64(*peer, self.tag)?;
            if payload.len() != indices.len() {
                return Err(EngineError::Logic(format!(
                    "field '{}' expected {} values from rank {}, got {}",
                    self.name,
                    indices.len(),
                    peer,
                    payload.len()
                )));
            }
            for (value, recv_idx) in payload.iter().zip(indices.iter()) {
                self.recv_data[*recv_idx] = *value;
            }
        }
        Ok(())
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = context.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_fabric::LocalFabric;

    fn build_field(
        group: Arc<dyn ProcessGroup>,
        side: Option<BroadcastSide>,
        owned: &[i64],
    ) -> SharedField {
        SharedField::new("temperature", Layout::ScalarField, side, owned, group, 0).unwrap()
    }

    #[test]
    fn round_trip_with_matching_ownership() {
        let results = LocalFabric::run(2, |group| {
            let ids = [3_i64, 5, 9];
            if group.rank() == 0 {
                let mut field = build_field(group, Some(BroadcastSide::Sender), &ids);
                field.set_data(&[0.3, 0.5, 0.9]).unwrap();
                field.transmit().unwrap();
                field.get_data()
            } else {
                let mut field = build_field(group, Some(BroadcastSide::Receiver), &ids);
                field.transmit().unwrap();
                field.get_data()
            }
        });
        assert_eq!(results[0], Vec::<f64>::new());
        assert_eq!(results[1], vec![0.3, 0.5, 0.9]);
    }

    #[test]
    fn one_sided_ids_read_back_zero() {
        let results = LocalFabric::run(2, |group| {
            if group.rank() == 0 {
                let mut field =
                    build_field(group, Some(BroadcastSide::Sender), &[0, 1, 2]);
                field.set_data(&[1.0, 2.0, 3.0]).unwrap();
                field.transmit().unwrap();
                field.get_data()
            } else {
                let mut field =
                    build_field(group, Some(BroadcastSide::Receiver), &[1, 2, 7]);
                field.transmit().unwrap();
                field.get_data()
            }
        });
        // Receiver owns {1, 2, 7}; id 7 has no provider and stays zero.
        assert_eq!(results[1], vec![2.0, 3.0, 0.0]);
    }

    #[test]
    fn sender_and_receiver_satisfies_itself_locally() {
        let results = LocalFabric::run(1, |group| {
            let mut field = build_field(
                group,
                Some(BroadcastSide::SenderAndReceiver),
                &[10, 20],
            );
            field.set_data(&[1.5, 2.5]).unwrap();
            field.transmit().unwrap();
            field.get_data()
        });
        assert_eq!(results[0], vec![1.5, 2.5]);
    }

    #[test]
    fn stale_receive_values_are_zeroed_each_transmit() {
        let results = LocalFabric::run(2, |group| {
            if group.rank() == 0 {
                let mut field = build_field(group, Some(BroadcastSide::Sender), &[0]);
                field.set_data(&[4.0]).unwrap();
                field.transmit().unwrap();
                field.transmit().unwrap();
                field.get_data()
            } else {
                // Receives id 0 but also owns id 1, which nobody provides.
                let mut field = build_field(group, Some(BroadcastSide::Receiver), &[0, 1]);
                field.transmit().unwrap();
                field.transmit().unwrap();
                field.get_data()
            }
        });
        assert_eq!(results[1], vec![4.0, 0.0]);
    }

    #[test]
    fn set_by_global_id_targets_the_right_slot() {
        let results = LocalFabric::run(1, |group| {
            let mut field = build_field(
                group,
                Some(BroadcastSide::SenderAndReceiver),
                &[7, 3],
            );
            field.set_at(3, 9.0);
            field.set_at(99, 1.0); // not owned, ignored
            field.transmit().unwrap();
            (field.get_at(3), field.get_at(7), field.get_at(99))
        });
        assert_eq!(results[0], (Some(9.0), Some(0.0), None));
    }

    #[test]
    fn wrong_size_set_data_is_a_logic_fault() {
        let results = LocalFabric::run(1, |group| {
            let mut field = build_field(group, Some(BroadcastSide::Sender), &[1, 2]);
            matches!(
                field.set_data(&[1.0]),
                Err(EngineError::Logic(_))
            )
        });
        assert!(results[0]);
    }
}
