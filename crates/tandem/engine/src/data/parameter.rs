//! Parameter data: an in-process scalar with no transmission step.

use crate::{EngineError, EngineResult};

/// A named constant exposed to a hosted operation. Parameters never travel:
/// every process evaluates the same registry, so every process already
/// holds the value.
#[derive(Clone, Debug)]
pub struct SharedParameter {
    name: String,
    context: String,
    data: [f64; 1],
}

impl SharedParameter {
    pub fn new(name: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: context.into(),
            data: [0.0],
        }
    }

    /// A literal parameter declared inline on an operation.
    pub fn literal(name: impl Into<String>, context: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            context: context.into(),
            data: [value],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        1
    }

    pub fn value(&self) -> f64 {
        self.data[0]
    }

    pub fn set_data(&mut self, values: &[f64]) -> EngineResult<()> {
        match values {
            [value] => {
                self.data[0] = *value;
                Ok(())
            }
            _ => Err(EngineError::Logic(format!(
                "parameter '{}' holds exactly one value, got {}",
                self.name,
                values.len()
            ))),
        }
    }

    pub fn get_data(&self) -> Vec<f64> {
        self.data.to_vec()
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

    #[test]
    fn literal_carries_its_value() {
        let parameter = SharedParameter::literal("Radius", "Filter", 0.25);
        assert_eq!(parameter.value(), 0.25);
        assert_eq!(parameter.context(), "Filter");
        assert_eq!(parameter.get_data(), vec![0.25]);
    }

    #[test]
    fn rejects_more_than_one_value() {
        let mut parameter = SharedParameter::new("Radius", "");
        assert!(parameter.set_data(&[1.0, 2.0]).is_err());
        assert!(parameter.set_data(&[3.0]).is_ok());
        assert_eq!(parameter.value(), 3.0);
    }
}
