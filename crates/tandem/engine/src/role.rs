//! The local role: this process's named participant.

use crate::application::{Application, OperationType};
use crate::data::SharedDatum;
use crate::{EngineError, EngineResult};
use std::sync::Arc;
use tandem_fabric::ProcessGroup;
use tandem_types::Layout;

/// One logical participant as seen from this process: the sub-instance name
/// it was assigned during formation, its communicator group, and the hosted
/// application once one is registered.
///
/// Roles are created once at startup and live until process exit; only the
/// application handle may be replaced.
pub struct Role {
    name: String,
    comm_id: usize,
    local: Arc<dyn ProcessGroup>,
    application: Option<Box<dyn Application>>,
}

fn host_fault(err: crate::application::HostError) -> EngineError {
    EngineError::Unclassified(err.to_string())
}

impl Role {
    pub fn new(name: impl Into<String>, comm_id: usize, local: Arc<dyn ProcessGroup>) -> Self {
        Self {
            name: name.into(),
            comm_id,
            local,
            application: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comm_id(&self) -> usize {
        self.comm_id
    }

    pub fn local_group(&self) -> &Arc<dyn ProcessGroup> {
        &self.local
    }

    pub fn set_application(&mut self, application: Box<dyn Application>) {
        self.application = Some(application);
    }

    pub fn has_application(&self) -> bool {
        self.application.is_some()
    }

    pub fn initialize(&mut self) -> EngineResult<()> {
        match &mut self.application {
            Some(app) => app.initialize().map_err(host_fault),
            None => Err(EngineError::Logic(format!(
                "role '{}' has no application to initialize",
                self.name
            ))),
        }
    }

    pub fn finalize(&mut self) -> EngineResult<()> {
        if let Some(app) = &mut self.application {
            app.finalize().map_err(host_fault)?;
        }
        Ok(())
    }

    pub fn reinitialize(&mut self) -> EngineResult<()> {
        if let Some(app) = &mut self.application {
            app.reinitialize().map_err(host_fault)?;
        }
        Ok(())
    }

    /// Dispatch a named operation on the hosted application. A role without
    /// an application silently does nothing: every process performs every
    /// operation, and non-hosting processes contribute only transmits.
    pub fn compute(&mut self, operation: &str) -> EngineResult<()> {
        if let Some(app) = &mut self.application {
            tracing::info!(role = %self.name, operation, "compute");
            app.compute(operation).map_err(host_fault)?;
        }
        Ok(())
    }

    /// Dispatch through the constrained capability set.
    pub fn compute_typed(&mut self, operation: OperationType) -> EngineResult<()> {
        if let Some(app) = &mut self.application {
            tracing::info!(role = %self.name, operation = %operation, "compute");
            let result = match operation {
                OperationType::CriterionValue => app.criterion_value(),
                OperationType::CriterionGradient => app.criterion_gradient(),
                OperationType::CriterionHessianTimesVector => {
                    app.criterion_hessian_times_vector()
                }
            };
            result.map_err(host_fault)?;
        }
        Ok(())
    }

    pub fn import_data(&mut self, argument: &str, datum: &SharedDatum) -> EngineResult<()> {
        if let Some(app) = &mut self.application {
            app.import_data(argument, datum).map_err(host_fault)?;
        }
        Ok(())
    }

    pub fn export_data(&mut self, argument: &str, datum: &mut SharedDatum) -> EngineResult<()> {
        if let Some(app) = &mut self.application {
            app.export_data(argument, datum).map_err(host_fault)?;
        }
        Ok(())
    }

    pub fn owned_ids(&self, layout: Layout) -> EngineResult<Vec<i64>> {
        match &self.application {
            Some(app) => app.owned_ids(layout).map_err(host_fault),
            None => Ok(Vec::new()),
        }
    }

    pub fn uses_constrained_interface(&self) -> bool {
        self.application
            .as_ref()
            .is_some_and(|app| app.constrained_operations().is_some())
    }

    pub fn supported_operations(&self) -> Vec<OperationType> {
        self.application
            .as_ref()
            .and_then(|app| app.constrained_operations())
            .unwrap_or_default()
    }
}
