//! The shared-data arena.
//!
//! All shared data live in one [`DataLayer`] owned by the orchestrator.
//! Stages and operations address data through stable [`DatumHandle`]
//! indices rather than owning references; when the topology changes the
//! whole arena is recreated and every stage rebinds.

mod field;
mod parameter;
mod value;

pub use field::SharedField;
pub use parameter::SharedParameter;
pub use value::SharedValue;

use crate::topology::CommunicationTopology;
use crate::{EngineError, EngineResult};
use std::collections::HashMap;
use tandem_types::{Layout, RegistrySpec};

/// Stable index of a datum within the arena. Handles stay valid across an
/// arena rebuild because the arena is always built in registry order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DatumHandle(pub(crate) usize);

/// A named shared datum: field, value, or in-process parameter.
pub enum SharedDatum {
    Field(SharedField),
    Value(SharedValue),
    Parameter(SharedParameter),
}

impl SharedDatum {
    pub fn name(&self) -> &str {
        match self {
            SharedDatum::Field(field) => field.name(),
            SharedDatum::Value(value) => value.name(),
            SharedDatum::Parameter(parameter) => parameter.name(),
        }
    }

    pub fn layout(&self) -> Layout {
        match self {
            SharedDatum::Field(field) => field.layout(),
            SharedDatum::Value(value) => value.layout(),
            SharedDatum::Parameter(_) => Layout::ScalarParameter,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            SharedDatum::Field(field) => field.size(),
            SharedDatum::Value(value) => value.size(),
            SharedDatum::Parameter(parameter) => parameter.size(),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            SharedDatum::Value(value) => value.is_dynamic(),
            _ => false,
        }
    }

    /// Run the transmit step. Fields redistribute by global id, values
    /// broadcast (and aggregate across providers), parameters stay local.
    pub fn transmit(&mut self) -> EngineResult<()> {
        match self {
            SharedDatum::Field(field) => field.transmit(),
            SharedDatum::Value(value) => value.transmit(),
            SharedDatum::Parameter(_) => Ok(()),
        }
    }

    pub fn set_data(&mut self, values: &[f64]) -> EngineResult<()> {
        match self {
            SharedDatum::Field(field) => field.set_data(values),
            SharedDatum::Value(value) => value.set_data(values),
            SharedDatum::Parameter(parameter) => parameter.set_data(values),
        }
    }

    pub fn get_data(&self) -> Vec<f64> {
        match self {
            SharedDatum::Field(field) => field.get_data(),
            SharedDatum::Value(value) => value.get_data(),
            SharedDatum::Parameter(parameter) => parameter.get_data(),
        }
    }

    /// The operation name this datum serves as a parameter for, if any.
    pub fn context(&self) -> &str {
        match self {
            SharedDatum::Field(field) => field.context(),
            SharedDatum::Value(value) => value.context(),
            SharedDatum::Parameter(parameter) => parameter.context(),
        }
    }

    pub fn set_context(&mut self, context: impl Into<String>) {
        match self {
            SharedDatum::Field(field) => field.set_context(context),
            SharedDatum::Value(value) => value.set_context(context),
            SharedDatum::Parameter(parameter) => parameter.set_context(context),
        }
    }
}

/// The arena of all shared data, with name-keyed lookup.
pub struct DataLayer {
    data: Vec<SharedDatum>,
    by_name: HashMap<String, DatumHandle>,
}

impl DataLayer {
    /// An arena with no data; the state before an application registers.
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Build every declared datum against the current topology, in registry
    /// order. Collective: every process of the global group must call this
    /// with the same registry.
    pub fn build(registry: &RegistrySpec, topology: &CommunicationTopology) -> EngineResult<Self> {
        let mut data = Vec::with_capacity(registry.shared_data.len());
        let mut by_name = HashMap::new();

        for (index, spec) in registry.shared_data.iter().enumerate() {
            let datum = match spec.layout {
                Layout::ScalarField | Layout::ElementField => {
                    SharedDatum::Field(SharedField::new(
                        spec.name.as_str(),
                        spec.layout,
                        topology.side_for(&spec.name),
                        topology.owned_ids(spec.layout),
                        topology.global().clone(),
                        index as u64,
                    )?)
                }
                Layout::Scalar => SharedDatum::Value(SharedValue::new(
                    spec.name.as_str(),
                    spec.providers.clone(),
                    topology.local_role_name(),
                    topology.local().clone(),
                    topology.global().clone(),
                    spec.size,
                    spec.dynamic,
                )),
                Layout::ScalarParameter => {
                    SharedDatum::Parameter(SharedParameter::new(spec.name.as_str(), ""))
                }
            };
            by_name.insert(spec.name.clone(), DatumHandle(index));
            data.push(datum);
        }

        Ok(Self { data, by_name })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Resolve a datum name to its handle; unknown names are a parsing
    /// fault, the registry referenced something that was never declared.
    pub fn handle(&self, name: &str) -> EngineResult<DatumHandle> {
        self.by_name.get(name).copied().ok_or_else(|| {
            EngineError::Parsing(format!(
                "request for shared datum ('{}') that doesn't exist",
                name
            ))
        })
    }

    pub fn get(&self, handle: DatumHandle) -> &SharedDatum {
        &self.data[handle.0]
    }

    pub fn get_mut(&mut self, handle: DatumHandle) -> &mut SharedDatum {
        &mut self.data[handle.0]
    }

    pub fn by_name(&self, name: &str) -> EngineResult<&SharedDatum> {
        Ok(self.get(self.handle(name)?))
    }

    pub fn transmit(&mut self, handle: DatumHandle) -> EngineResult<()> {
        let datum = &mut self.data[handle.0];
        tracing::debug!(datum = %datum.name(), "transmit");
        datum.transmit()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedDatum> {
        self.data.iter()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
