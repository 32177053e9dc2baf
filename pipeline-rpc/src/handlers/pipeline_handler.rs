use crate::error::{RpcError, RpcResult};

use pipeline_service::{
    Pagination, PipelineDefinition, PipelineExecutor, PipelineParser, PipelineRun,
    PipelineValidator, RunFilter, RunOptions, RunStatus, ValidationWarning,
};
use std::path::Path;
use uuid::Uuid;

const MAX_PER_PAGE: u32 = 100;

/// Request to start a run
#[derive(Debug, Clone, Default)]
pub struct ExecuteRequest {
    pub pipeline_id: String,
    pub triggered_by: String,
    pub branch: Option<String>,
    pub environment: Option<String>,
    pub manual: bool,
}

/// Request to list runs; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct ListRunsRequest {
    pub pipeline_id: Option<String>,
    pub status: Option<String>,
    pub environment: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Validates requests and forwards them to the pipeline executor
pub struct PipelineHandler {
    executor: PipelineExecutor,
}

impl PipelineHandler {
    pub fn new(executor: PipelineExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &PipelineExecutor {
        &self.executor
    }

    pub fn parse_from_file<P: AsRef<Path>>(&self, path: P) -> RpcResult<PipelineDefinition> {
        Ok(PipelineParser::from_file(path)?)
    }

    pub fn parse_from_str(&self, content: &str) -> RpcResult<PipelineDefinition> {
        Ok(PipelineParser::from_str(content)?)
    }

    /// Validate a definition, returning its warnings
    pub fn validate(&self, definition: &PipelineDefinition) -> RpcResult<Vec<ValidationWarning>> {
        PipelineValidator::validate(definition).map_err(|errors| {
            RpcError::InvalidRequest(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })
    }

    pub async fn execute_pipeline(&self, request: ExecuteRequest) -> RpcResult<PipelineRun> {
        let pipeline_id = required("pipeline_id", &request.pipeline_id)?;
        let triggered_by = required("triggered_by", &request.triggered_by)?;

        let options = RunOptions {
            branch: non_empty(request.branch),
            environment: non_empty(request.environment),
            manual: request.manual,
            trigger: None,
        };

        tracing::debug!(pipeline_id, triggered_by, "Handling execute request");
        Ok(self
            .executor
            .execute_pipeline(pipeline_id, triggered_by, options)
            .await?)
    }

    pub async fn get_run(&self, run_id: &str) -> RpcResult<PipelineRun> {
        let run_id = parse_run_id(run_id)?;
        Ok(self.executor.get_pipeline_run(run_id).await?)
    }

    pub async fn cancel_run(&self, run_id: &str) -> RpcResult<PipelineRun> {
        let run_id = parse_run_id(run_id)?;
        Ok(self.executor.cancel_pipeline_run(run_id).await?)
    }

    pub async fn wait_for_run(&self, run_id: &str) -> RpcResult<PipelineRun> {
        let run_id = parse_run_id(run_id)?;
        Ok(self.executor.wait_for_run(run_id).await?)
    }

    pub async fn list_runs(&self, request: ListRunsRequest) -> RpcResult<Vec<PipelineRun>> {
        let status = request
            .status
            .as_deref()
            .map(str::parse::<RunStatus>)
            .transpose()
            .map_err(RpcError::InvalidRequest)?;

        let defaults = Pagination::default();
        let pagination = Pagination {
            page: request.page.unwrap_or(defaults.page),
            per_page: request.per_page.unwrap_or(defaults.per_page),
        };
        if pagination.page == 0 {
            return Err(RpcError::InvalidRequest("page starts at 1".to_string()));
        }
        if pagination.per_page == 0 || pagination.per_page > MAX_PER_PAGE {
            return Err(RpcError::InvalidRequest(format!(
                "per_page must be between 1 and {}",
                MAX_PER_PAGE
            )));
        }

        let filter = RunFilter {
            pipeline_id: non_empty(request.pipeline_id),
            status,
            environment: non_empty(request.environment),
        };
        Ok(self.executor.list_pipeline_runs(&filter, pagination).await?)
    }
}

fn required<'a>(field: &str, value: &'a str) -> RpcResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RpcError::InvalidRequest(format!("{} is required", field)));
    }
    Ok(value)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_run_id(run_id: &str) -> RpcResult<Uuid> {
    Uuid::parse_str(run_id.trim())
        .map_err(|e| RpcError::InvalidRequest(format!("invalid run id '{}': {}", run_id, e)))
}
