// Execution Engine Module
// Run registry, stage runner and the pipeline executor that drives runs

pub mod events;
pub mod executor;
pub mod registry;
pub mod stage;

#[cfg(test)]
pub(crate) mod fakes;

// Re-export key types
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use executor::{Pagination, PipelineExecutor, RunFilter};
pub use registry::{RunHandle, RunRegistry};
pub use stage::{RunScope, StageOutcome, StageRunner};
