pub mod api;
pub mod error;
pub mod handlers;

pub use api::RpcServer;
pub use error::{RpcError, RpcResult};
pub use handlers::{ExecuteRequest, ListRunsRequest, PipelineHandler};

// Re-export types needed by clients
pub use pipeline_service::{ExecutionEvent, PipelineDefinition, PipelineRun, RunStatus};
pub use pipeline_service;
