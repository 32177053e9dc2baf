use crate::handlers::PipelineHandler;

use pipeline_service::PipelineExecutor;

/// Entry point for transports: owns the handlers they dispatch to
pub struct RpcServer {
    pipeline_handler: PipelineHandler,
}

impl RpcServer {
    pub fn new(executor: PipelineExecutor) -> Self {
        Self {
            pipeline_handler: PipelineHandler::new(executor),
        }
    }

    pub fn pipeline_handler(&self) -> &PipelineHandler {
        &self.pipeline_handler
    }
}
