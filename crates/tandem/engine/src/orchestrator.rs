//! The orchestrator: the top-level driver every process runs.
//!
//! Stage selection is collectively agreed: the process at global rank 0
//! (which must belong to the stage-requesting role) broadcasts the chosen
//! stage index, or one of two sentinels. Every process then performs the
//! same stage, in the same order, as every other process. The orchestrator
//! never computes anything itself; it sequences transmits and hands local
//! work to the hosted application.

use crate::application::Application;
use crate::data::DataLayer;
use crate::env::control_terminate;
use crate::faults::FaultHandler;
use crate::formation::{form_roles, Formation};
use crate::role::Role;
use crate::stage::Stage;
use crate::topology::CommunicationTopology;
use crate::{EngineError, EngineResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tandem_fabric::ProcessGroup;
use tandem_types::{Layout, RegistrySpec, TERMINATE_STAGE_NAME, UPDATE_SHARED_DATA_STAGE};

/// Broadcast in place of a stage index to end every role's loop cleanly.
pub const TERMINATE_STAGE: i64 = -1;
/// Broadcast in place of a stage index when the requested stage does not
/// exist; raises a global parsing fault.
pub const INVALID_STAGE: i64 = -2;

/// Caller-facing argument buffers, keyed by shared-datum name.
pub type ArgumentMap = HashMap<String, Vec<f64>>;

pub struct Orchestrator {
    registry: RegistrySpec,
    global: Arc<dyn ProcessGroup>,
    role: Role,
    faults: FaultHandler,
    data: DataLayer,
    stages: Vec<Stage>,
    control_file: Option<PathBuf>,
    initialized: bool,
    done: bool,
}

impl Orchestrator {
    /// Validate the registry and form this process's role (§role table).
    /// Collective over the global group.
    pub fn new(
        registry: RegistrySpec,
        role_id: i64,
        global: Arc<dyn ProcessGroup>,
    ) -> EngineResult<Self> {
        let Formation { role, faults } = form_roles(&registry, role_id, Arc::clone(&global))?;
        Ok(Self {
            registry,
            global,
            role,
            faults,
            data: DataLayer::empty(),
            stages: Vec::new(),
            control_file: None,
            initialized: false,
            done: false,
        })
    }

    /// Poll this file for an external terminate request at every stage
    /// selection made through [`compute`](Self::compute).
    pub fn with_control_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.control_file = Some(path.into());
        self
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn data(&self) -> &DataLayer {
        &self.data
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|stage| stage.name() == name)
    }

    /// Bind the hosted application: initialize it, build the shared-data
    /// arena from its exported ownership, build and bind every declared
    /// stage plus the reserved refresh stage, and validate. Any fault is
    /// resolved collectively before control returns.
    pub fn register_application(&mut self, application: Box<dyn Application>) -> EngineResult<()> {
        self.role.set_application(application);
        if let Err(fault) = self.role.initialize() {
            self.faults.register(&fault);
        }
        if let Err(fault) = self.create_shared_data() {
            self.faults.register(&fault);
        }
        if let Err(fault) = self.create_stages() {
            self.faults.register(&fault);
        }
        self.validate_parameters();
        self.initialized = true;
        self.faults.resolve()
    }

    /// The worker loop: block on the next stage broadcast, perform it,
    /// repeat until terminated, then finalize the application.
    pub fn serve(&mut self) -> EngineResult<()> {
        self.ensure_initialized()?;
        while !self.done {
            if let Some(index) = self.next_stage(None)? {
                self.perform(index)?;
            }
        }
        self.role.finalize()
    }

    /// The caller-facing entry point: select a stage by name, bridge the
    /// caller's named buffers into the stage inputs, perform, and copy the
    /// stage outputs back out. Requesting "Terminate" (or tripping the
    /// control-file poll) ends the job instead.
    pub fn compute(&mut self, stage_name: &str, arguments: &mut ArgumentMap) -> EngineResult<()> {
        self.ensure_initialized()?;
        let Some(index) = self.next_stage(Some(stage_name))? else {
            return Ok(());
        };

        for handle in self.stages[index].input_handles() {
            let name = self.data.get(handle).name().to_string();
            match arguments.get(&name) {
                Some(buffer) => {
                    if let Err(fault) = self.data.get_mut(handle).set_data(buffer) {
                        self.faults.register(&fault);
                    }
                }
                None => {
                    let fault = EngineError::Logic(format!(
                        "stage input '{}' missing from the argument map",
                        name
                    ));
                    self.faults.register(&fault);
                }
            }
        }

        self.perform(index)?;

        // Faults registered while packing stay pending until the next
        // selection broadcast; resolving here would add a collective the
        // serving roles do not mirror.
        for handle in self.stages[index].output_handles() {
            let name = self.data.get(handle).name().to_string();
            match arguments.get_mut(&name) {
                Some(buffer) => {
                    let values = self.data.get(handle).get_data();
                    buffer.clear();
                    buffer.extend_from_slice(&values);
                }
                None => {
                    let fault = EngineError::Logic(format!(
                        "stage output '{}' missing from the argument map",
                        name
                    ));
                    self.faults.register(&fault);
                }
            }
        }
        Ok(())
    }

    /// Run several stages in declared order against one argument map.
    pub fn compute_all(
        &mut self,
        stage_names: &[&str],
        arguments: &mut ArgumentMap,
    ) -> EngineResult<()> {
        for name in stage_names {
            self.compute(name, arguments)?;
        }
        Ok(())
    }

    /// Optionally run one last stage, then request termination so every
    /// serving role leaves its loop, and finalize the local application.
    pub fn finalize(&mut self, final_stage: Option<&str>) -> EngineResult<()> {
        if let Some(name) = final_stage {
            let mut arguments = ArgumentMap::new();
            self.compute(name, &mut arguments)?;
        }
        if !self.done {
            self.next_stage(Some(TERMINATE_STAGE_NAME))?;
        }
        self.role.finalize()
    }

    /// Perform one selected stage uniformly on every process. The reserved
    /// refresh stage is intercepted: the arena is rebuilt from fresh
    /// ownership exports, every stage rebinds in place, and the
    /// application reinitializes.
    pub fn perform(&mut self, index: usize) -> EngineResult<()> {
        self.ensure_initialized()?;
        if self.stages[index].name() == UPDATE_SHARED_DATA_STAGE {
            tracing::info!(
                role = %self.role.name(),
                stage = UPDATE_SHARED_DATA_STAGE,
                "perform stage"
            );
            if let Err(fault) = self.refresh_shared_data() {
                self.faults.register(&fault);
            }
        } else if let Err(fault) = self.run_stage(index) {
            self.faults.register(&fault);
        }
        self.faults.resolve()
    }

    /// Agree on the next stage. Resolves pending faults first, then
    /// broadcasts the index chosen at global rank 0. `request` is consulted
    /// only there; every other process passes `None` and receives.
    fn next_stage(&mut self, request: Option<&str>) -> EngineResult<Option<usize>> {
        self.faults.resolve()?;

        let mut index = vec![match request {
            Some(name) => {
                let control = self
                    .control_file
                    .as_deref()
                    .is_some_and(control_terminate);
                if name == TERMINATE_STAGE_NAME || control {
                    TERMINATE_STAGE
                } else {
                    match self.stage_index(name) {
                        Some(found) => found as i64,
                        None => INVALID_STAGE,
                    }
                }
            }
            None => 0,
        }];
        self.global.broadcast_i64(&mut index, 0)?;

        match index[0] {
            TERMINATE_STAGE => {
                tracing::info!(role = %self.role.name(), "terminate requested; leaving stage loop");
                self.done = true;
                Ok(None)
            }
            INVALID_STAGE => {
                self.faults
                    .register(&EngineError::Parsing("Invalid stage requested".to_string()));
                self.faults.resolve()?;
                Err(EngineError::Fault { status: 1 })
            }
            selected => {
                let selected = selected as usize;
                if selected >= self.stages.len() {
                    self.faults.register(&EngineError::Parsing(format!(
                        "stage index {} out of range",
                        selected
                    )));
                    self.faults.resolve()?;
                    return Err(EngineError::Fault { status: 1 });
                }
                Ok(Some(selected))
            }
        }
    }

    fn ensure_initialized(&self) -> EngineResult<()> {
        if !self.initialized {
            return Err(EngineError::Logic(
                "stage requested before an application was registered".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the arena from the application's current ownership exports.
    /// Collective: the datum constructors all-gather ownership in registry
    /// order on every process. An ownership export failure is registered
    /// and replaced with empty ownership so the collectives stay aligned.
    fn create_shared_data(&mut self) -> EngineResult<()> {
        let mut owned = HashMap::new();
        for layout in [Layout::ScalarField, Layout::ElementField] {
            if self
                .registry
                .shared_data
                .iter()
                .any(|datum| datum.layout == layout)
            {
                match self.role.owned_ids(layout) {
                    Ok(ids) => {
                        owned.insert(layout, ids);
                    }
                    Err(fault) => {
                        self.faults.register(&fault);
                        owned.insert(layout, Vec::new());
                    }
                }
            }
        }
        let topology = CommunicationTopology::new(
            Arc::clone(&self.global),
            Arc::clone(self.role.local_group()),
            self.role.name(),
            &self.registry,
            owned,
        );
        self.data = DataLayer::build(&self.registry, &topology)?;
        Ok(())
    }

    fn create_stages(&mut self) -> EngineResult<()> {
        let Self {
            registry,
            role,
            data,
            stages,
            ..
        } = self;
        stages.clear();
        for spec in &registry.stages {
            stages.push(Stage::build(spec, role, data)?);
        }
        stages.push(Stage::internal(UPDATE_SHARED_DATA_STAGE));
        Ok(())
    }

    /// Rebind every declared stage against the rebuilt arena; the reserved
    /// refresh stage has nothing to rebind.
    fn update_stages(&mut self) -> EngineResult<()> {
        let Self {
            registry,
            role,
            data,
            stages,
            ..
        } = self;
        for (stage, spec) in stages.iter_mut().zip(registry.stages.iter()) {
            stage.update(spec, role, data)?;
        }
        Ok(())
    }

    fn refresh_shared_data(&mut self) -> EngineResult<()> {
        self.create_shared_data()?;
        self.update_stages()?;
        self.role.reinitialize()
    }

    /// Every declared shared parameter must be consumed by some operation
    /// parameter, else it can never reach a hosted application.
    fn validate_parameters(&mut self) {
        let mut faults = Vec::new();
        for datum in self.data.iter() {
            if datum.layout() == Layout::ScalarParameter
                && !self
                    .stages
                    .iter()
                    .any(|stage| stage.has_parameter(datum.name()))
            {
                faults.push(EngineError::Parsing(format!(
                    "A shared parameter was declared without a matching operation parameter: '{}'",
                    datum.name()
                )));
            }
        }
        for fault in &faults {
            self.faults.register(fault);
        }
    }

    fn run_stage(&mut self, index: usize) -> EngineResult<()> {
        let Self {
            stages,
            data,
            role,
            faults,
            ..
        } = self;
        let stage = &stages[index];
        tracing::info!(role = %role.name(), stage = %stage.name(), "perform stage");

        stage.begin(data)?;
        for operation in stage.operations() {
            tracing::debug!(role = %role.name(), operation = %operation.name(), "perform operation");
            operation.send_input(data)?;
            operation.send_parameters(data)?;
            for handle in operation.input_handles() {
                if let Err(fault) = operation.import_datum(role, handle, data) {
                    faults.register(&fault);
                }
            }
            if let Err(fault) = operation.compute(role, data) {
                faults.register(&fault);
            }
            for handle in operation.output_handles() {
                if let Err(fault) = operation.export_datum(role, handle, data) {
                    faults.register(&fault);
                }
            }
            operation.send_output(data)?;
        }
        stage.end(data)
    }
}
