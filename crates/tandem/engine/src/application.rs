//! The hosted-application boundary.
//!
//! A role hosts exactly one application: the externally implemented code
//! that does the actual numerical work. The engine drives it through this
//! trait and never looks inside; anything the application returns as an
//! error is wrapped generically and fed to the collective fault protocol.

use crate::data::SharedDatum;
use tandem_types::Layout;

/// Errors crossing the application boundary are opaque to the engine.
pub type HostError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type HostResult<T = ()> = Result<T, HostError>;

/// The constrained capability set. Applications that advertise it get
/// strongly-typed dispatch: the operation is resolved once at bind time
/// instead of by string on every compute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationType {
    CriterionValue,
    CriterionGradient,
    CriterionHessianTimesVector,
}

impl OperationType {
    pub const ALL: [OperationType; 3] = [
        OperationType::CriterionValue,
        OperationType::CriterionGradient,
        OperationType::CriterionHessianTimesVector,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OperationType::CriterionValue => "Criterion Value",
            OperationType::CriterionGradient => "Criterion Gradient",
            OperationType::CriterionHessianTimesVector => "Criterion Hessian Times Vector",
        }
    }

    /// Match an operation name ignoring case and whitespace, so registry
    /// authors may write "Compute Criterion Value" or "criterionvalue".
    pub fn parse(name: &str) -> Option<OperationType> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "criterionvalue" | "computecriterionvalue" => Some(OperationType::CriterionValue),
            "criteriongradient" | "computecriteriongradient" => {
                Some(OperationType::CriterionGradient)
            }
            "criterionhessian" | "criterionhessianvector" | "criterionhessiantimesvector" => {
                Some(OperationType::CriterionHessianTimesVector)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Callback interface implemented by each hosted application.
///
/// `import_data` / `export_data` move values between the application's own
/// containers and the engine's shared-data buffers, keyed by the argument
/// names declared in the registry. `owned_ids` publishes the global ids this
/// process owns for a field layout; the redistribution plans are built from
/// those lists.
pub trait Application: Send {
    fn initialize(&mut self) -> HostResult;

    fn finalize(&mut self) -> HostResult {
        Ok(())
    }

    /// Called after the engine rebuilds the shared-data arena because the
    /// application's topology changed.
    fn reinitialize(&mut self) -> HostResult {
        Ok(())
    }

    /// Dispatch a named local operation.
    fn compute(&mut self, operation: &str) -> HostResult;

    /// Copy a shared datum into the application's container for `argument`.
    fn import_data(&mut self, argument: &str, datum: &SharedDatum) -> HostResult;

    /// Copy the application's container for `argument` into a shared datum.
    fn export_data(&mut self, argument: &str, datum: &mut SharedDatum) -> HostResult;

    /// Global ids owned by this process for a field layout. The default is
    /// no ownership, which suits applications that exchange only values.
    fn owned_ids(&self, _layout: Layout) -> HostResult<Vec<i64>> {
        Ok(Vec::new())
    }

    /// Advertise the constrained capability set, or `None` for string-keyed
    /// dispatch.
    fn constrained_operations(&self) -> Option<Vec<OperationType>> {
        None
    }

    fn criterion_value(&mut self) -> HostResult {
        Err("criterion value is not supported by this application".into())
    }

    fn criterion_gradient(&mut self) -> HostResult {
        Err("criterion gradient is not supported by this application".into())
    }

    fn criterion_hessian_times_vector(&mut self) -> HostResult {
        Err("criterion hessian-times-vector is not supported by this application".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ignores_case_and_spaces() {
        assert_eq!(
            OperationType::parse("Compute Criterion Value"),
            Some(OperationType::CriterionValue)
        );
        assert_eq!(
            OperationType::parse("criterion gradient"),
            Some(OperationType::CriterionGradient)
        );
        assert_eq!(
            OperationType::parse("Criterion Hessian Times Vector"),
            Some(OperationType::CriterionHessianTimesVector)
        );
        assert_eq!(OperationType::parse("Relax"), None);
    }
}
