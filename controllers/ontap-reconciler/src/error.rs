//! Reconciler error types.
//!
//! Maps every failure onto the categories reported to the caller:
//! validation, precondition, cluster/transport, and post-condition errors.

use ontap_client::{ErrorClass, OntapError};
use thiserror::Error;

/// Kernel step a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fetching,
    Creating,
    Modifying,
    Renaming,
    Deleting,
}

impl Step {
    fn verb(self) -> &'static str {
        match self {
            Step::Fetching => "fetching",
            Step::Creating => "creating",
            Step::Modifying => "modifying",
            Step::Renaming => "renaming",
            Step::Deleting => "deleting",
        }
    }
}

/// Errors that can occur while reconciling one resource.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Parameter schema violation; nothing was sent to the cluster
    #[error("{0}")]
    Validation(String),

    /// Version too low, option incompatible with the dialect, option
    /// combinations the module refuses
    #[error("{0}")]
    Precondition(String),

    /// Transport, cluster or job error
    #[error(transparent)]
    Ontap(#[from] OntapError),

    /// The resource did not reach the expected state after a mutation
    #[error("{0}")]
    PostCondition(String),

    /// Inconsistency inside an adapter
    #[error("Internal error: {0}")]
    Internal(String),

    /// Error raised by one step of the plan, prefixed with the resource
    #[error("Error {} {kind} '{name}': {source}", .step.verb())]
    Step {
        step: Step,
        kind: &'static str,
        name: String,
        #[source]
        source: Box<ReconcileError>,
    },
}

impl ReconcileError {
    /// Wrap with the module-scoped prefix, e.g. `Error creating aggregate 'aggr1': ...`
    pub fn in_step(self, step: Step, kind: &'static str, name: &str) -> Self {
        ReconcileError::Step {
            step,
            kind,
            name: name.to_string(),
            source: Box::new(self),
        }
    }

    /// Innermost cluster error, if any
    pub fn ontap(&self) -> Option<&OntapError> {
        match self {
            ReconcileError::Ontap(e) => Some(e),
            ReconcileError::Step { source, .. } => source.ontap(),
            _ => None,
        }
    }

    /// Error class of the underlying cluster error; local errors are fatal
    pub fn class(&self) -> ErrorClass {
        self.ontap().map_or(ErrorClass::Fatal, OntapError::class)
    }
}

impl From<ontap_client::SizeError> for ReconcileError {
    fn from(err: ontap_client::SizeError) -> Self {
        ReconcileError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_prefix() {
        let err = ReconcileError::from(OntapError::zapi("aggr-create", "13115", "Invalid value"))
            .in_step(Step::Creating, "aggregate", "aggr1");
        assert_eq!(
            err.to_string(),
            "Error creating aggregate 'aggr1': ZAPI error calling aggr-create: code 13115 - Invalid value"
        );
        assert_eq!(err.class(), ErrorClass::ValueInvalid);
    }

    #[test]
    fn test_local_errors_are_fatal() {
        assert_eq!(ReconcileError::Validation("x".to_string()).class(), ErrorClass::Fatal);
    }
}
