pub mod dependency;
pub mod models;
pub mod params;
pub mod parser;

pub use dependency::{evaluate as evaluate_dependencies, GateDecision};
pub use models::{
    Artifact, PipelineDefinition, PipelineRun, RunOptions, RunStatus, StageDefinition, StageRun,
    StageStatus, StepDefinition, StepRun, StepStatus, Trigger, TriggerInfo, TriggerKind,
};
pub use params::{ActionKind, StepParams};
pub use parser::{PipelineParser, PipelineValidator, ValidationWarning};
