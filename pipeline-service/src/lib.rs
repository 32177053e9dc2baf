// Pipeline Service Library
// Core engine for defining, executing and tracking CI/CD pipeline runs

pub mod collaborators;
pub mod config;
pub mod error;
pub mod execution;
pub mod pipeline;
pub mod runners;
pub mod store;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{CollaboratorError, DefinitionError, ServiceError, ServiceResult};

// Re-export pipeline types
pub use pipeline::{
    PipelineDefinition, PipelineParser, PipelineRun, PipelineValidator, RunOptions, RunStatus,
    StageDefinition, StageRun, StageStatus, StepDefinition, StepRun, StepStatus, TriggerKind,
    ValidationWarning,
};

// Re-export execution types
pub use execution::{
    progress_channel, ExecutionEvent, Pagination, PipelineExecutor, ProgressReceiver,
    ProgressSender, RunFilter,
};

// Re-export runner and collaborator types
pub use collaborators::{
    CommitResolver, Deployer, DeploymentConfig, DeploymentReceipt, GitCommitResolver,
    LogNotifier, Notification, Notifier,
};
pub use runners::{
    ExecutorRegistry, ShellRunner, StepContext, StepError, StepExecutor, StepTranscript,
};
pub use store::{FileStore, MemoryStore, PipelineStore, RunStore};
