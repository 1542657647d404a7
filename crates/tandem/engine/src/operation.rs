//! One pipeline step: argument bindings, parameters, and local dispatch.

use crate::application::OperationType;
use crate::data::{DataLayer, DatumHandle, SharedDatum, SharedParameter};
use crate::role::Role;
use crate::{EngineError, EngineResult};
use tandem_types::OperationSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    /// One role's arguments bind bidirectionally to shared data.
    Single,
    /// Several roles each contribute a sub-operation; transmits cover the
    /// union of their data, compute runs only where a sub-operation is
    /// hosted.
    Multi,
}

/// How the local compute is dispatched. Typed dispatch is chosen once at
/// bind time when the hosted application advertises the constrained
/// capability set.
enum Dispatch {
    Named,
    Typed(OperationType),
}

/// A parameter made available to the hosted operation: either a registry
/// datum bound by argument name, or a literal owned by the operation.
enum ParameterBinding {
    Datum {
        argument: String,
        handle: DatumHandle,
    },
    Literal {
        argument: String,
        datum: SharedDatum,
    },
}

pub struct Operation {
    kind: OperationKind,
    /// The locally relevant operation name (used for dispatch and logging).
    name: String,
    /// Whether this process hosts one of the operation's roles.
    hosted: bool,
    dispatch: Dispatch,
    /// Union of all sub-operations' input data.
    inputs: Vec<DatumHandle>,
    /// Union of all sub-operations' output data.
    outputs: Vec<DatumHandle>,
    /// Datum-to-argument multimap for the local sub-operation; one datum
    /// may serve several argument names.
    bindings: Vec<(DatumHandle, String)>,
    parameters: Vec<ParameterBinding>,
}

fn unrecognized_operation(name: &str, role: &Role) -> EngineError {
    let mut message = format!("Unknown operation \"{}\". Role supports:", name);
    for operation in role.supported_operations() {
        message.push_str("\n  ");
        message.push_str(operation.name());
    }
    EngineError::Parsing(message)
}

impl Operation {
    /// Bind an operation spec against the arena. Every referenced datum
    /// name must resolve, else a parsing fault.
    pub fn build(spec: &OperationSpec, role: &Role, data: &mut DataLayer) -> EngineResult<Self> {
        let kind = if spec.is_multi() {
            OperationKind::Multi
        } else {
            OperationKind::Single
        };
        let mut operation = Operation {
            kind,
            name: String::new(),
            hosted: false,
            dispatch: Dispatch::Named,
            inputs: Vec::new(),
            outputs: Vec::new(),
            bindings: Vec::new(),
            parameters: Vec::new(),
        };

        for sub in &spec.sub_operations {
            let hosted_here = sub.role == role.name();

            // A parameter whose argument names an existing datum binds that
            // datum; otherwise the literal value becomes an operation-owned
            // parameter. Single-role operations carry literals everywhere,
            // multi-role ones only where hosted.
            for parameter in &sub.parameters {
                if data.contains(&parameter.argument) {
                    let handle = data.handle(&parameter.argument)?;
                    data.get_mut(handle).set_context(sub.operation.as_str());
                    operation.parameters.push(ParameterBinding::Datum {
                        argument: parameter.argument.clone(),
                        handle,
                    });
                } else if kind == OperationKind::Single || hosted_here {
                    operation.parameters.push(ParameterBinding::Literal {
                        argument: parameter.argument.clone(),
                        datum: SharedDatum::Parameter(SharedParameter::literal(
                            parameter.argument.as_str(),
                            sub.operation.as_str(),
                            parameter.value,
                        )),
                    });
                }
            }

            for binding in &sub.inputs {
                let handle = resolve(data, &sub.operation, &binding.shared_data)?;
                if !operation.inputs.contains(&handle) {
                    operation.inputs.push(handle);
                }
            }
            for binding in &sub.outputs {
                let handle = resolve(data, &sub.operation, &binding.shared_data)?;
                if !operation.outputs.contains(&handle) {
                    operation.outputs.push(handle);
                }
            }

            // Argument names resolve for the local sub-operation only; for
            // a single-role operation they resolve unconditionally (the
            // hosted flag still gates their use).
            if hosted_here || kind == OperationKind::Single {
                operation.name = sub.operation.clone();
                operation.hosted = hosted_here;
                for binding in sub.inputs.iter().chain(sub.outputs.iter()) {
                    let handle = data.handle(&binding.shared_data)?;
                    operation
                        .bindings
                        .push((handle, binding.argument.clone()));
                }
            }
        }

        if operation.hosted && role.uses_constrained_interface() {
            match OperationType::parse(&operation.name) {
                Some(typed) => operation.dispatch = Dispatch::Typed(typed),
                None => return Err(unrecognized_operation(&operation.name, role)),
            }
        }

        Ok(operation)
    }

    /// Rebind in place against a rebuilt arena; identity is unchanged.
    pub fn update(
        &mut self,
        spec: &OperationSpec,
        role: &Role,
        data: &mut DataLayer,
    ) -> EngineResult<()> {
        *self = Operation::build(spec, role, data)?;
        Ok(())
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_hosted(&self) -> bool {
        self.hosted
    }

    pub fn input_handles(&self) -> Vec<DatumHandle> {
        self.inputs.clone()
    }

    pub fn output_handles(&self) -> Vec<DatumHandle> {
        self.outputs.clone()
    }

    pub fn has_parameter(&self, argument: &str) -> bool {
        self.parameters.iter().any(|binding| match binding {
            ParameterBinding::Datum { argument: name, .. } => name == argument,
            ParameterBinding::Literal { argument: name, .. } => name == argument,
        })
    }

    /// Transmit every input datum. Collective; all processes participate.
    pub fn send_input(&self, data: &mut DataLayer) -> EngineResult<()> {
        for handle in &self.inputs {
            data.transmit(*handle)?;
        }
        Ok(())
    }

    /// Transmit every output datum. Collective; all processes participate.
    pub fn send_output(&self, data: &mut DataLayer) -> EngineResult<()> {
        for handle in &self.outputs {
            data.transmit(*handle)?;
        }
        Ok(())
    }

    /// Transmit datum-backed parameters; literals stay in-process.
    pub fn send_parameters(&self, data: &mut DataLayer) -> EngineResult<()> {
        for binding in &self.parameters {
            if let ParameterBinding::Datum { handle, .. } = binding {
                data.transmit(*handle)?;
            }
        }
        Ok(())
    }

    /// Copy one transmitted datum into the hosted application under every
    /// argument name bound to it. No-op on non-hosting processes.
    pub fn import_datum(
        &self,
        role: &mut Role,
        handle: DatumHandle,
        data: &DataLayer,
    ) -> EngineResult<()> {
        if !self.hosted {
            return Ok(());
        }
        for (bound, argument) in &self.bindings {
            if *bound == handle {
                role.import_data(argument, data.get(handle))?;
            }
        }
        Ok(())
    }

    /// Copy the hosted application's buffers out into one datum under every
    /// argument name bound to it. No-op on non-hosting processes.
    pub fn export_datum(
        &self,
        role: &mut Role,
        handle: DatumHandle,
        data: &mut DataLayer,
    ) -> EngineResult<()> {
        if !self.hosted {
            return Ok(());
        }
        for (bound, argument) in &self.bindings {
            if *bound == handle {
                role.export_data(argument, data.get_mut(handle))?;
            }
        }
        Ok(())
    }

    /// Import parameters, then dispatch the local compute. No-op on
    /// non-hosting processes.
    pub fn compute(&self, role: &mut Role, data: &DataLayer) -> EngineResult<()> {
        if !self.hosted {
            return Ok(());
        }
        for binding in &self.parameters {
            match binding {
                ParameterBinding::Datum { argument, handle } => {
                    role.import_data(argument, data.get(*handle))?;
                }
                ParameterBinding::Literal { argument, datum } => {
                    role.import_data(argument, datum)?;
                }
            }
        }
        match &self.dispatch {
            Dispatch::Named => role.compute(&self.name),
            Dispatch::Typed(operation) => role.compute_typed(*operation),
        }
    }
}

fn resolve(data: &DataLayer, operation: &str, name: &str) -> EngineResult<DatumHandle> {
    data.handle(name).map_err(|_| {
        EngineError::Parsing(format!(
            "operation '{}' requested shared datum ('{}') that doesn't exist",
            operation, name
        ))
    })
}
