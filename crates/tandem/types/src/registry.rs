//! The registry: role, shared-datum, and stage tables.
//!
//! A registry is produced by an external authoring tool and consumed here as
//! an already-parsed structure. Roles claim a process id handed to each
//! process out-of-band; shared data name their providers and receivers by
//! sub-instance name; stages list operations binding hosted argument names
//! to shared-datum names.

use crate::{BroadcastSide, Layout, ModelError, TERMINATE_STAGE_NAME, UPDATE_SHARED_DATA_STAGE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ── Role table ───────────────────────────────────────────────────────

/// One logical participant. A role declaring K sub-instance names runs K
/// concurrent copies, each on its own process group; the processes claiming
/// `id` are partitioned among them in global rank order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Sub-instance names, in partition order. A plain role has exactly one.
    pub names: Vec<String>,
    /// The process id claimed on the launch command line.
    pub id: i64,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>, id: i64) -> Self {
        Self {
            names: vec![name.into()],
            id,
        }
    }

    pub fn with_instances(names: &[&str], id: i64) -> Self {
        Self {
            names: names.iter().map(|s| s.to_string()).collect(),
            id,
        }
    }
}

// ── Shared-datum table ───────────────────────────────────────────────

/// One named shared datum and its communication topology.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SharedDatumSpec {
    pub name: String,
    pub layout: Layout,
    /// Length of the replicated vector for `Scalar` layouts; field layouts
    /// size themselves from ownership.
    #[serde(default = "default_size")]
    pub size: usize,
    /// When true, `set_data` may change the size; the new length reaches
    /// receivers on the next transmit.
    #[serde(default)]
    pub dynamic: bool,
    /// Sub-instance names that publish this datum.
    pub providers: Vec<String>,
    /// Sub-instance names that consume this datum.
    pub receivers: Vec<String>,
}

fn default_size() -> usize {
    1
}

impl SharedDatumSpec {
    pub fn new(
        name: impl Into<String>,
        layout: Layout,
        providers: &[&str],
        receivers: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            layout,
            size: 1,
            dynamic: false,
            providers: providers.iter().map(|s| s.to_string()).collect(),
            receivers: receivers.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn sized(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// The local side for `role_name`, if it appears in either list.
    pub fn side_for(&self, role_name: &str) -> Option<BroadcastSide> {
        BroadcastSide::for_role(role_name, &self.providers, &self.receivers)
    }
}

// ── Stage table ──────────────────────────────────────────────────────

/// One argument binding: the hosted application's argument name and the
/// shared datum that backs it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub argument: String,
    pub shared_data: String,
}

impl ArgumentSpec {
    pub fn new(argument: impl Into<String>, shared_data: impl Into<String>) -> Self {
        Self {
            argument: argument.into(),
            shared_data: shared_data.into(),
        }
    }
}

/// A literal constant handed to the hosted operation. If a shared datum with
/// the argument's name exists it is bound instead of the literal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub argument: String,
    pub value: f64,
}

impl ParameterSpec {
    pub fn new(argument: impl Into<String>, value: f64) -> Self {
        Self {
            argument: argument.into(),
            value,
        }
    }
}

/// One role's share of an operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubOperationSpec {
    /// Hosting sub-instance name.
    pub role: String,
    /// Operation name dispatched to the hosted application.
    pub operation: String,
    #[serde(default)]
    pub inputs: Vec<ArgumentSpec>,
    #[serde(default)]
    pub outputs: Vec<ArgumentSpec>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl SubOperationSpec {
    pub fn new(role: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            operation: operation.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn input(mut self, argument: &str, shared_data: &str) -> Self {
        self.inputs.push(ArgumentSpec::new(argument, shared_data));
        self
    }

    pub fn output(mut self, argument: &str, shared_data: &str) -> Self {
        self.outputs.push(ArgumentSpec::new(argument, shared_data));
        self
    }

    pub fn parameter(mut self, argument: &str, value: f64) -> Self {
        self.parameters.push(ParameterSpec::new(argument, value));
        self
    }
}

/// One pipeline step. A single-role operation has exactly one sub-operation;
/// a multi-role operation aggregates several, one per participating role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationSpec {
    pub sub_operations: Vec<SubOperationSpec>,
}

impl OperationSpec {
    pub fn single(sub: SubOperationSpec) -> Self {
        Self {
            sub_operations: vec![sub],
        }
    }

    pub fn multi(subs: Vec<SubOperationSpec>) -> Self {
        Self {
            sub_operations: subs,
        }
    }

    pub fn is_multi(&self) -> bool {
        self.sub_operations.len() > 1
    }
}

/// A named, ordered pipeline of operations with stage-level inputs/outputs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn input(mut self, shared_data: &str) -> Self {
        self.inputs.push(shared_data.to_string());
        self
    }

    pub fn output(mut self, shared_data: &str) -> Self {
        self.outputs.push(shared_data.to_string());
        self
    }

    pub fn operation(mut self, op: OperationSpec) -> Self {
        self.operations.push(op);
        self
    }
}

// ── Registry ─────────────────────────────────────────────────────────

/// The complete declarative description of a computation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistrySpec {
    pub roles: Vec<RoleSpec>,
    #[serde(default)]
    pub shared_data: Vec<SharedDatumSpec>,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

impl RegistrySpec {
    pub fn from_json_str(text: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// All declared sub-instance names, in role order.
    pub fn instance_names(&self) -> Vec<&str> {
        self.roles
            .iter()
            .flat_map(|role| role.names.iter().map(String::as_str))
            .collect()
    }

    pub fn datum(&self, name: &str) -> Option<&SharedDatumSpec> {
        self.shared_data.iter().find(|datum| datum.name == name)
    }

    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// First static defect, if any. The engine refuses a registry that
    /// fails this check.
    pub fn validate(&self) -> Result<(), ModelError> {
        match self.lint().into_iter().next() {
            Some(defect) => Err(defect),
            None => Ok(()),
        }
    }

    /// All static defects: duplicate ids and names, unknown role references,
    /// unresolvable stage bindings, reserved stage names.
    pub fn lint(&self) -> Vec<ModelError> {
        let mut defects = Vec::new();

        let mut seen_ids = HashSet::new();
        for role in &self.roles {
            if role.names.is_empty() {
                defects.push(ModelError::EmptyRole(format!("id {}", role.id)));
            }
            if !seen_ids.insert(role.id) {
                defects.push(ModelError::DuplicateRoleId(role.id));
            }
        }

        let known: HashSet<&str> = self.instance_names().into_iter().collect();
        let mut seen_data = HashSet::new();
        for datum in &self.shared_data {
            if !seen_data.insert(datum.name.as_str()) {
                defects.push(ModelError::DuplicateDatum(datum.name.clone()));
            }
            if datum.layout == Layout::ScalarParameter && datum.size != 1 {
                defects.push(ModelError::ParameterSize {
                    datum: datum.name.clone(),
                    layout: datum.layout.to_string(),
                    size: datum.size,
                });
            }
            for role in datum.providers.iter().chain(datum.receivers.iter()) {
                if !known.contains(role.as_str()) {
                    defects.push(ModelError::UnknownRole {
                        datum: datum.name.clone(),
                        role: role.clone(),
                    });
                }
            }
        }

        let mut seen_stages = HashSet::new();
        for stage in &self.stages {
            if stage.name == UPDATE_SHARED_DATA_STAGE || stage.name == TERMINATE_STAGE_NAME {
                defects.push(ModelError::ReservedStageName(stage.name.clone()));
            }
            if !seen_stages.insert(stage.name.as_str()) {
                defects.push(ModelError::DuplicateStage(stage.name.clone()));
            }
            for name in stage.inputs.iter().chain(stage.outputs.iter()) {
                if self.datum(name).is_none() {
                    defects.push(ModelError::UnknownSharedData {
                        stage: stage.name.clone(),
                        datum: name.clone(),
                    });
                }
            }
            for op in &stage.operations {
                for sub in &op.sub_operations {
                    if !known.contains(sub.role.as_str()) {
                        defects.push(ModelError::UnknownOperationRole {
                            stage: stage.name.clone(),
                            operation: sub.operation.clone(),
                            role: sub.role.clone(),
                        });
                    }
                    for binding in sub.inputs.iter().chain(sub.outputs.iter()) {
                        if self.datum(&binding.shared_data).is_none() {
                            defects.push(ModelError::UnknownSharedData {
                                stage: stage.name.clone(),
                                datum: binding.shared_data.clone(),
                            });
                        }
                    }
                }
            }
        }

        defects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_registry() -> RegistrySpec {
        RegistrySpec {
            roles: vec![
                RoleSpec::new("driver", 0),
                RoleSpec::with_instances(&["solver-a", "solver-b"], 1),
            ],
            shared_data: vec![
                SharedDatumSpec::new(
                    "temperature",
                    Layout::ScalarField,
                    &["driver"],
                    &["solver-a", "solver-b"],
                ),
                SharedDatumSpec::new("residual", Layout::Scalar, &["solver-a"], &["driver"])
                    .sized(3),
            ],
            stages: vec![StageSpec::new("solve")
                .input("temperature")
                .output("residual")
                .operation(OperationSpec::single(
                    SubOperationSpec::new("solver-a", "Relax")
                        .input("T", "temperature")
                        .output("r", "residual"),
                ))],
        }
    }

    #[test]
    fn well_formed_registry_passes() {
        assert!(make_registry().validate().is_ok());
    }

    #[test]
    fn json_round_trip() {
        let registry = make_registry();
        let text = serde_json::to_string(&registry).unwrap();
        let parsed = RegistrySpec::from_json_str(&text).unwrap();
        assert_eq!(parsed.roles.len(), 2);
        assert_eq!(parsed.instance_names(), vec!["driver", "solver-a", "solver-b"]);
        assert!(parsed.datum("temperature").is_some());
        assert!(parsed.stage("solve").is_some());
    }

    #[test]
    fn size_and_dynamic_default() {
        let text = r#"{
            "roles": [{"names": ["driver"], "id": 0}],
            "shared_data": [{
                "name": "step",
                "layout": "scalar",
                "providers": ["driver"],
                "receivers": ["driver"]
            }],
            "stages": []
        }"#;
        let parsed = RegistrySpec::from_json_str(text).unwrap();
        assert_eq!(parsed.shared_data[0].size, 1);
        assert!(!parsed.shared_data[0].dynamic);
    }

    #[test]
    fn duplicate_process_id_is_flagged() {
        let mut registry = make_registry();
        registry.roles[1].id = 0;
        assert!(matches!(
            registry.validate(),
            Err(ModelError::DuplicateRoleId(0))
        ));
    }

    #[test]
    fn unknown_provider_is_flagged() {
        let mut registry = make_registry();
        registry.shared_data[0].providers.push("ghost".to_string());
        assert!(matches!(
            registry.validate(),
            Err(ModelError::UnknownRole { .. })
        ));
    }

    #[test]
    fn unresolvable_binding_is_flagged() {
        let mut registry = make_registry();
        registry.stages[0].operations[0].sub_operations[0] = SubOperationSpec::new(
            "solver-a",
            "Relax",
        )
        .input("T", "no-such-datum");
        let defects = registry.lint();
        assert!(defects
            .iter()
            .any(|d| matches!(d, ModelError::UnknownSharedData { datum, .. } if datum == "no-such-datum")));
    }

    #[test]
    fn reserved_stage_name_is_flagged() {
        let mut registry = make_registry();
        registry.stages.push(StageSpec::new(UPDATE_SHARED_DATA_STAGE));
        let defects = registry.lint();
        assert!(defects
            .iter()
            .any(|d| matches!(d, ModelError::ReservedStageName(_))));
    }

    #[test]
    fn lint_collects_every_defect() {
        let mut registry = make_registry();
        registry.roles[1].id = 0;
        registry.shared_data[0].providers.push("ghost".to_string());
        assert_eq!(registry.lint().len(), 2);
    }
}
