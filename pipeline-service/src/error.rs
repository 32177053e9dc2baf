// Service Errors
// Error types surfaced by the engine API and its collaborators

use std::io;
use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::models::RunStatus;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors returned by the engine's public operations
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("Pipeline run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Pipeline '{0}' is not active")]
    Inactive(String),

    #[error("Invalid pipeline definition: {}", format_definition_errors(.0))]
    InvalidDefinition(Vec<DefinitionError>),

    #[error("Run {run_id} cannot be cancelled in status {status}")]
    InvalidState { run_id: Uuid, status: RunStatus },

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Statically detectable problems in a pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("pipeline id must not be empty")]
    EmptyPipelineId,

    #[error("stage #{0} has an empty name")]
    EmptyStageName(usize),

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("stage '{stage}' has a step with an empty name")]
    EmptyStepName { stage: String },

    #[error("step '{step}' in stage '{stage}' has an empty action")]
    EmptyAction { stage: String, step: String },

    #[error("step '{step}' in stage '{stage}' has invalid parameters: {message}")]
    InvalidParams {
        stage: String,
        step: String,
        message: String,
    },
}

/// Failures inside external collaborators (stores, SCM, deployers, notifiers)
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("source control error: {0}")]
    SourceControl(String),

    #[error("deployment error: {0}")]
    Deployment(String),

    #[error("notification error: {0}")]
    Notification(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn format_definition_errors(errors: &[DefinitionError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_definition_lists_every_error() {
        let err = ServiceError::InvalidDefinition(vec![
            DefinitionError::DuplicateStage("build".to_string()),
            DefinitionError::UnknownDependency {
                stage: "deploy".to_string(),
                dependency: "pack".to_string(),
            },
        ]);

        let message = err.to_string();
        assert!(message.contains("duplicate stage name 'build'"));
        assert!(message.contains("stage 'deploy' depends on unknown stage 'pack'"));
    }
}
