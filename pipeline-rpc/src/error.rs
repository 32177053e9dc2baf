use pipeline_service::ServiceError;
use std::fmt;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug)]
pub enum RpcError {
    ServiceError(String),
    InvalidRequest(String),
    NotFound(String),
    Conflict(String),
    InternalError(String),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::ServiceError(msg) => write!(f, "Service error: {}", msg),
            RpcError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            RpcError::NotFound(msg) => write!(f, "Not found: {}", msg),
            RpcError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            RpcError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<ServiceError> for RpcError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::PipelineNotFound(_) | ServiceError::RunNotFound(_) => {
                RpcError::NotFound(message)
            }
            ServiceError::Inactive(_)
            | ServiceError::InvalidDefinition(_)
            | ServiceError::Yaml(_) => RpcError::InvalidRequest(message),
            ServiceError::InvalidState { .. } => RpcError::Conflict(message),
            ServiceError::Collaborator(_) => RpcError::ServiceError(message),
            ServiceError::Internal(_) | ServiceError::Io(_) | ServiceError::Json(_) => {
                RpcError::InternalError(message)
            }
        }
    }
}
