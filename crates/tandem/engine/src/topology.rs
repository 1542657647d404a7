//! Communication topology: who provides and receives each datum, and which
//! global ids this process owns per field layout.

use std::collections::HashMap;
use std::sync::Arc;
use tandem_fabric::ProcessGroup;
use tandem_types::{BroadcastSide, Layout, RegistrySpec};

/// Snapshot of the communication metadata the shared-data arena is built
/// from. Recreated wholesale whenever the application's topology changes
/// (the "Update Shared Data" stage).
pub struct CommunicationTopology {
    global: Arc<dyn ProcessGroup>,
    local: Arc<dyn ProcessGroup>,
    local_role_name: String,
    /// Per-datum provider and receiver sub-instance names.
    datum_roles: HashMap<String, (Vec<String>, Vec<String>)>,
    /// Owned global ids per field layout, as exported by the application.
    owned_ids: HashMap<Layout, Vec<i64>>,
}

impl CommunicationTopology {
    pub fn new(
        global: Arc<dyn ProcessGroup>,
        local: Arc<dyn ProcessGroup>,
        local_role_name: impl Into<String>,
        registry: &RegistrySpec,
        owned_ids: HashMap<Layout, Vec<i64>>,
    ) -> Self {
        let datum_roles = registry
            .shared_data
            .iter()
            .map(|datum| {
                (
                    datum.name.clone(),
                    (datum.providers.clone(), datum.receivers.clone()),
                )
            })
            .collect();
        Self {
            global,
            local,
            local_role_name: local_role_name.into(),
            datum_roles,
            owned_ids,
        }
    }

    pub fn global(&self) -> &Arc<dyn ProcessGroup> {
        &self.global
    }

    pub fn local(&self) -> &Arc<dyn ProcessGroup> {
        &self.local
    }

    pub fn local_role_name(&self) -> &str {
        &self.local_role_name
    }

    pub fn providers(&self, datum: &str) -> &[String] {
        self.datum_roles
            .get(datum)
            .map(|(providers, _)| providers.as_slice())
            .unwrap_or(&[])
    }

    pub fn receivers(&self, datum: &str) -> &[String] {
        self.datum_roles
            .get(datum)
            .map(|(_, receivers)| receivers.as_slice())
            .unwrap_or(&[])
    }

    /// The local role's side for a datum, or `None` when it is neither
    /// provider nor receiver.
    pub fn side_for(&self, datum: &str) -> Option<BroadcastSide> {
        let (providers, receivers) = self.datum_roles.get(datum)?;
        BroadcastSide::for_role(&self.local_role_name, providers, receivers)
    }

    /// Owned global ids for a field layout; empty when the application
    /// exported none.
    pub fn owned_ids(&self, layout: Layout) -> &[i64] {
        self.owned_ids
            .get(&layout)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
