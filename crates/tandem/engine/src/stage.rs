//! A stage: ordered operations plus stage-level inputs and outputs.
//!
//! The per-stage cycle is strict: begin (transmit inputs), every operation
//! in declared order, end (transmit outputs). One stage completes fully
//! before the next selection broadcast, so stages never interleave.

use crate::data::{DataLayer, DatumHandle};
use crate::operation::Operation;
use crate::role::Role;
use crate::{EngineError, EngineResult};
use tandem_types::StageSpec;

pub struct Stage {
    name: String,
    internal: bool,
    inputs: Vec<DatumHandle>,
    outputs: Vec<DatumHandle>,
    operations: Vec<Operation>,
}

impl Stage {
    /// Bind a declared stage against the arena.
    pub fn build(spec: &StageSpec, role: &Role, data: &mut DataLayer) -> EngineResult<Self> {
        let mut stage = Stage {
            name: spec.name.clone(),
            internal: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
            operations: Vec::new(),
        };
        stage.bind(spec, role, data)?;
        Ok(stage)
    }

    /// An engine-reserved stage with no bindings; the orchestrator
    /// intercepts it by name.
    pub fn internal(name: impl Into<String>) -> Self {
        Stage {
            name: name.into(),
            internal: true,
            inputs: Vec::new(),
            outputs: Vec::new(),
            operations: Vec::new(),
        }
    }

    /// Rebind in place against a rebuilt arena, keeping this stage's
    /// identity. Used when the topology changes.
    pub fn update(&mut self, spec: &StageSpec, role: &Role, data: &mut DataLayer) -> EngineResult<()> {
        self.bind(spec, role, data)
    }

    fn bind(&mut self, spec: &StageSpec, role: &Role, data: &mut DataLayer) -> EngineResult<()> {
        self.inputs = resolve_names(&spec.name, &spec.inputs, data)?;
        self.outputs = resolve_names(&spec.name, &spec.outputs, data)?;

        if self.operations.len() == spec.operations.len() {
            for (operation, op_spec) in self.operations.iter_mut().zip(spec.operations.iter()) {
                operation.update(op_spec, role, data)?;
            }
        } else {
            self.operations = spec
                .operations
                .iter()
                .map(|op_spec| Operation::build(op_spec, role, data))
                .collect::<EngineResult<Vec<_>>>()?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn input_handles(&self) -> Vec<DatumHandle> {
        self.inputs.clone()
    }

    pub fn output_handles(&self) -> Vec<DatumHandle> {
        self.outputs.clone()
    }

    /// Transmit stage inputs. Collective.
    pub fn begin(&self, data: &mut DataLayer) -> EngineResult<()> {
        for handle in &self.inputs {
            data.transmit(*handle)?;
        }
        Ok(())
    }

    /// Transmit stage outputs. Collective.
    pub fn end(&self, data: &mut DataLayer) -> EngineResult<()> {
        for handle in &self.outputs {
            data.transmit(*handle)?;
        }
        Ok(())
    }

    pub fn has_parameter(&self, argument: &str) -> bool {
        self.operations
            .iter()
            .any(|operation| operation.has_parameter(argument))
    }
}

fn resolve_names(
    stage: &str,
    names: &[String],
    data: &DataLayer,
) -> EngineResult<Vec<DatumHandle>> {
    names
        .iter()
        .map(|name| {
            data.handle(name).map_err(|_| {
                EngineError::Parsing(format!(
                    "While building stage '{}', requested shared datum ('{}') which doesn't exist",
                    stage, name
                ))
            })
        })
        .collect()
}
