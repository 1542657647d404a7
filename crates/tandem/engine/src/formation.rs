//! Role and communicator formation.
//!
//! Every process arrives holding the shared registry and its own claimed
//! process id. Formation validates the claims collectively, partitions each
//! role's claimant processes over its sub-instance names, and splits the
//! global group into per-sub-instance communicators. Any defect is fatal
//! for the whole job, uniformly: partial formation never proceeds.

use crate::faults::FaultHandler;
use crate::role::Role;
use crate::{EngineError, EngineResult};
use std::sync::Arc;
use tandem_fabric::{ProcessGroup, ReduceOp};
use tandem_types::RegistrySpec;

/// The outcome of formation on one process: its role (application not yet
/// registered) and the fault handler bound to its communicators.
pub struct Formation {
    pub role: Role,
    pub faults: FaultHandler,
}

fn fatal(global: &Arc<dyn ProcessGroup>, message: String) -> EngineError {
    if global.rank() == 0 {
        tracing::error!("{}", message);
    }
    EngineError::Formation(message)
}

/// Form this process's role. Collective over the global group.
pub fn form_roles(
    registry: &RegistrySpec,
    role_id: i64,
    global: Arc<dyn ProcessGroup>,
) -> EngineResult<Formation> {
    registry.validate()?;

    let my_rank = global.rank();

    // Count the claimants of every declared id in one collective.
    let claims: Vec<i64> = registry
        .roles
        .iter()
        .map(|role| i64::from(role.id == role_id))
        .collect();
    let counts = global.all_reduce_i64(&claims, ReduceOp::Sum)?;
    for (spec, count) in registry.roles.iter().zip(counts.iter()) {
        if *count == 0 {
            return Err(fatal(
                &global,
                format!(
                    "role '{}' declares process id {} but no process claims it",
                    spec.names.join("/"),
                    spec.id
                ),
            ));
        }
    }

    // Every claimed id must have a role declaration behind it.
    let unknown = i64::from(!registry.roles.iter().any(|role| role.id == role_id));
    if global.all_reduce_i64(&[unknown], ReduceOp::Max)?[0] != 0 {
        return Err(fatal(
            &global,
            "a process claims a process id that no role declares".to_string(),
        ));
    }

    // Partition each role's claimants, in global rank order, into one
    // contiguous group per sub-instance name. The running group index keys
    // the communicator split.
    let gathered = global.all_gather_i64(&[role_id])?;
    let claimed_ids: Vec<i64> = gathered.iter().map(|entry| entry[0]).collect();

    let mut assignment: Option<(String, usize)> = None;
    let mut group_index: usize = 0;
    for (spec, count) in registry.roles.iter().zip(counts.iter()) {
        let claimants = *count as usize;
        let instances = spec.names.len();
        if claimants % instances != 0 {
            return Err(fatal(
                &global,
                format!(
                    "cannot form role with id {}: {} claimant processes do not divide evenly over {} sub-instances",
                    spec.id, claimants, instances
                ),
            ));
        }
        let group_size = claimants / instances;
        let mut seen = 0usize;
        for (rank, id) in claimed_ids.iter().enumerate() {
            if *id != spec.id {
                continue;
            }
            if rank == my_rank {
                let name_index = seen / group_size;
                assignment = Some((spec.names[name_index].clone(), group_index));
            }
            seen += 1;
            if seen % group_size == 0 {
                group_index += 1;
            }
        }
    }

    let unassigned = i64::from(assignment.is_none());
    if global.all_reduce_i64(&[unassigned], ReduceOp::Max)?[0] != 0 {
        return Err(fatal(
            &global,
            "not every process was assigned a communicator group".to_string(),
        ));
    }
    let Some((name, comm_id)) = assignment else {
        return Err(fatal(
            &global,
            "local process was left without a communicator group".to_string(),
        ));
    };

    let local = global.split(comm_id as i64, my_rank as i64)?;
    tracing::debug!(
        role = %name,
        comm_id,
        local_size = local.size(),
        "formed role"
    );

    let role = Role::new(name.as_str(), comm_id, Arc::clone(&local));
    let faults = FaultHandler::new(name, local, global);
    Ok(Formation { role, faults })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_fabric::LocalFabric;
    use tandem_types::RoleSpec;

    fn registry(roles: Vec<RoleSpec>) -> RegistrySpec {
        RegistrySpec {
            roles,
            shared_data: Vec::new(),
            stages: Vec::new(),
        }
    }

    /// One driver process plus four solver processes split over two named
    /// sub-instances.
    #[test]
    fn partitions_claimants_in_rank_order() {
        let results = LocalFabric::run(5, |group| {
            let spec = registry(vec![
                RoleSpec::new("driver", 0),
                RoleSpec::with_instances(&["solver-a", "solver-b"], 1),
            ]);
            let role_id = if group.rank() == 0 { 0 } else { 1 };
            let formation = form_roles(&spec, role_id, group).unwrap();
            (
                formation.role.name().to_string(),
                formation.role.comm_id(),
                formation.role.local_group().rank(),
                formation.role.local_group().size(),
            )
        });
        assert_eq!(results[0], ("driver".to_string(), 0, 0, 1));
        assert_eq!(results[1], ("solver-a".to_string(), 1, 0, 2));
        assert_eq!(results[2], ("solver-a".to_string(), 1, 1, 2));
        assert_eq!(results[3], ("solver-b".to_string(), 2, 0, 2));
        assert_eq!(results[4], ("solver-b".to_string(), 2, 1, 2));
    }

    #[test]
    fn uneven_partition_fails_identically_everywhere() {
        let results = LocalFabric::run(4, |group| {
            let spec = registry(vec![
                RoleSpec::new("driver", 0),
                RoleSpec::with_instances(&["solver-a", "solver-b"], 1),
            ]);
            // Three claimants over two sub-instances.
            let role_id = if group.rank() == 0 { 0 } else { 1 };
            match form_roles(&spec, role_id, group) {
                Err(EngineError::Formation(message)) => message,
                other => panic!("expected formation failure, got {:?}", other.map(|_| ())),
            }
        });
        assert!(results[0].contains("do not divide evenly"));
        assert!(results.iter().all(|message| message == &results[0]));
    }

    #[test]
    fn unclaimed_role_id_is_fatal() {
        let results = LocalFabric::run(2, |group| {
            let spec = registry(vec![
                RoleSpec::new("driver", 0),
                RoleSpec::new("phantom", 7),
            ]);
            form_roles(&spec, 0, group).is_err()
        });
        assert_eq!(results, vec![true, true]);
    }

    #[test]
    fn undeclared_claim_is_fatal() {
        let results = LocalFabric::run(2, |group| {
            let spec = registry(vec![RoleSpec::new("driver", 0)]);
            let role_id = if group.rank() == 1 { 9 } else { 0 };
            form_roles(&spec, role_id, group).is_err()
        });
        assert_eq!(results, vec![true, true]);
    }

    #[test]
    fn duplicate_ids_are_rejected_before_any_collective() {
        let results = LocalFabric::run(2, |group| {
            let spec = registry(vec![
                RoleSpec::new("driver", 0),
                RoleSpec::new("other", 0),
            ]);
            form_roles(&spec, 0, group).is_err()
        });
        assert_eq!(results, vec![true, true]);
    }
}
