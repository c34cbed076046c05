//! Orchestrator error taxonomy

use thiserror::Error;

use crate::module::traits::{ModuleError, ModuleState};

/// Errors raised while registering, resolving or driving modules
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Module {id} is already registered")]
    DuplicateModule { id: String },

    #[error("Module {id} declares a dependency on itself")]
    InvalidDependency { id: String },

    #[error("Module {module} depends on {missing}, which is not registered")]
    UnresolvedDependency { module: String, missing: String },

    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Module {module} setup failed: {source}")]
    ModuleSetup {
        module: String,
        #[source]
        source: ModuleError,
    },

    #[error("Module {module} start failed: {source}")]
    ModuleStart {
        module: String,
        #[source]
        source: ModuleError,
    },

    #[error("Module {module} skipped: dependency {dependency} failed (root cause: {root})")]
    DependencyFailed {
        module: String,
        dependency: String,
        root: String,
    },

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Module {module} is required by enabled module {required_by}")]
    DependencyRequired { module: String, required_by: String },

    #[error("Module {module} cannot move from {from} to {to}")]
    InvalidTransition {
        module: String,
        from: ModuleState,
        to: ModuleState,
    },
}

impl OrchestratorError {
    /// Module the error is attributed to, if any
    pub fn module(&self) -> Option<&str> {
        match self {
            OrchestratorError::DuplicateModule { id }
            | OrchestratorError::InvalidDependency { id } => Some(id.as_str()),
            OrchestratorError::UnresolvedDependency { module, .. }
            | OrchestratorError::ModuleSetup { module, .. }
            | OrchestratorError::ModuleStart { module, .. }
            | OrchestratorError::DependencyFailed { module, .. }
            | OrchestratorError::DependencyRequired { module, .. }
            | OrchestratorError::InvalidTransition { module, .. } => Some(module.as_str()),
            OrchestratorError::ModuleNotFound(id) => Some(id.as_str()),
            OrchestratorError::DependencyCycle { .. } => None,
        }
    }

    /// Whether the error rejects a whole resolution pass rather than one module
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::UnresolvedDependency { .. }
                | OrchestratorError::DependencyCycle { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = OrchestratorError::DependencyCycle {
            cycle: vec!["x".into(), "y".into(), "x".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: x -> y -> x");
        assert!(err.is_configuration_error());
        assert_eq!(err.module(), None);
    }

    #[test]
    fn test_setup_error_keeps_source() {
        use std::error::Error as _;

        let err = OrchestratorError::ModuleSetup {
            module: "claims".into(),
            source: ModuleError::SetupFailed("bad claim file".into()),
        };
        assert_eq!(err.module(), Some("claims"));
        assert!(err.source().is_some());
        assert!(!err.is_configuration_error());
    }
}
