pub mod pipeline_handler;

pub use pipeline_handler::{ExecuteRequest, ListRunsRequest, PipelineHandler};
