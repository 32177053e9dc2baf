// Runners Module
// Step executors selected by a step's action identifier

pub mod command;
pub mod deploy;
pub mod notify;
pub mod script;
pub mod shell;

// Re-export key types
pub use command::CommandExecutor;
pub use deploy::DeployExecutor;
pub use notify::NotifyExecutor;
pub use script::ScriptExecutor;
pub use shell::{ShellOutput, ShellRunner};

use crate::collaborators::{Deployer, Notifier};
use crate::config::EngineConfig;
use crate::error::CollaboratorError;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::pipeline::models::{StepDefinition, StepRun};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failure of a single step attempt
#[derive(Debug, Error)]
pub enum StepError {
    #[error("command exited with {}", describe_exit(.exit_code))]
    Command { exit_code: Option<i32> },

    #[error("failed to start command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    #[error("step cancelled")]
    Cancelled,

    #[error("invalid step parameters: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Unconfigured(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[cfg(test)]
    #[error("{0}")]
    Failed(String),
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {}", code),
        None => "no code (killed by signal)".to_string(),
    }
}

/// Command lines and output of one attempt, recorded as they happen.
///
/// Survives the attempt's task, so a step that times out or is cancelled
/// still keeps what it printed.
#[derive(Debug, Clone, Default)]
pub struct StepTranscript {
    lines: Arc<Mutex<Vec<String>>>,
}

impl StepTranscript {
    pub fn push(&self, line: impl Into<String>) {
        self.lock().push(line.into());
    }

    /// Remove and return everything recorded so far
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Per-step view of the run a step executes in
#[derive(Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub pipeline_id: String,
    pub stage_name: String,
    pub environment: String,
    pub working_dir: PathBuf,
    /// Pipeline env merged with step env
    pub env: HashMap<String, String>,
    pub config: Arc<EngineConfig>,
    pub events: Option<ProgressSender>,
    /// Fresh for every attempt
    pub transcript: StepTranscript,
}

impl StepContext {
    /// Callback that records command output in arrival order and forwards
    /// each line as a progress event
    pub fn output_recorder(&self, step_name: &str) -> shell::OutputCallback {
        let transcript = self.transcript.clone();
        let events = self.events.clone();
        let run_id = self.run_id;
        let stage_name = self.stage_name.clone();
        let step_name = step_name.to_string();
        Box::new(move |line: &str, is_error: bool| {
            let stream = if is_error { "stderr" } else { "stdout" };
            transcript.push(format!("[{}] {}", stream, line));
            events.send_event(ExecutionEvent::StepOutput {
                run_id,
                stage_name: stage_name.clone(),
                step_name: step_name.clone(),
                output: line.to_string(),
                is_error,
            });
        })
    }
}

/// Performs one kind of step action
#[async_trait::async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute a step, appending logs and outputs to `step_run`
    async fn execute(
        &self,
        step: &StepDefinition,
        step_run: &mut StepRun,
        ctx: &StepContext,
    ) -> Result<(), StepError>;
}

/// Maps action identifiers to executors, with a fallback for custom actions
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
    fallback: Arc<dyn StepExecutor>,
}

impl ExecutorRegistry {
    /// Registry with the built-in `build`, `test`, `deploy` and `notify`
    /// executors; deploy fails until a deployer is attached
    pub fn new() -> Self {
        let shell = ShellRunner::new();
        let mut executors: HashMap<String, Arc<dyn StepExecutor>> = HashMap::new();
        executors.insert(
            "build".to_string(),
            Arc::new(CommandExecutor::build(shell.clone())),
        );
        executors.insert(
            "test".to_string(),
            Arc::new(CommandExecutor::test(shell.clone())),
        );
        executors.insert("deploy".to_string(), Arc::new(DeployExecutor::new(None)));
        executors.insert("notify".to_string(), Arc::new(NotifyExecutor::new(Vec::new())));

        Self {
            executors,
            fallback: Arc::new(ScriptExecutor::new(shell)),
        }
    }

    /// Attach the deployment collaborator used by `deploy` steps
    pub fn with_deployer(mut self, deployer: Arc<dyn Deployer>) -> Self {
        self.executors.insert(
            "deploy".to_string(),
            Arc::new(DeployExecutor::new(Some(deployer))),
        );
        self
    }

    /// Attach the notification collaborators used by `notify` steps
    pub fn with_notifiers(mut self, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        self.executors
            .insert("notify".to_string(), Arc::new(NotifyExecutor::new(notifiers)));
        self
    }

    /// Register or replace the executor for an action
    pub fn register(mut self, action: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        self.executors.insert(action.into(), executor);
        self
    }

    /// Executor for an action, falling back to the custom script executor
    pub fn resolve(&self, action: &str) -> Arc<dyn StepExecutor> {
        self.executors
            .get(action)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::models::ParamBag;

    pub(crate) fn context() -> StepContext {
        StepContext {
            run_id: Uuid::new_v4(),
            pipeline_id: "web".to_string(),
            stage_name: "build".to_string(),
            environment: "staging".to_string(),
            working_dir: std::env::current_dir().unwrap(),
            env: HashMap::new(),
            config: Arc::new(EngineConfig::default()),
            events: None,
            transcript: StepTranscript::default(),
        }
    }

    pub(crate) fn step(action: &str, params: serde_json::Value) -> StepDefinition {
        let params: ParamBag = match params {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => ParamBag::new(),
        };
        StepDefinition {
            name: format!("{}-step", action),
            action: action.to_string(),
            params,
            condition: None,
            timeout_secs: None,
            retries: None,
            env: HashMap::new(),
        }
    }

    struct Marker;

    #[async_trait::async_trait]
    impl StepExecutor for Marker {
        async fn execute(
            &self,
            _step: &StepDefinition,
            step_run: &mut StepRun,
            _ctx: &StepContext,
        ) -> Result<(), StepError> {
            step_run.log("marker");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_registered_action_wins_over_fallback() {
        let registry = ExecutorRegistry::new().register("lint", Arc::new(Marker));
        let step = step("lint", serde_json::json!({}));
        let mut run = StepRun::pending(&step);

        registry
            .resolve("lint")
            .execute(&step, &mut run, &context())
            .await
            .unwrap();
        assert_eq!(run.logs, vec!["marker"]);
    }

    #[tokio::test]
    async fn test_unknown_action_without_script_succeeds() {
        let registry = ExecutorRegistry::new();
        let step = step("audit", serde_json::json!({}));
        let mut run = StepRun::pending(&step);

        registry
            .resolve("audit")
            .execute(&step, &mut run, &context())
            .await
            .unwrap();
        assert!(run.logs[0].contains("nothing to execute"));
    }

    #[tokio::test]
    async fn test_deploy_without_deployer_fails() {
        let registry = ExecutorRegistry::new();
        let step = step("deploy", serde_json::json!({ "image": "web:1" }));
        let mut run = StepRun::pending(&step);

        let err = registry
            .resolve("deploy")
            .execute(&step, &mut run, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Unconfigured(_)));
    }

    #[test]
    fn test_command_error_message() {
        assert_eq!(
            StepError::Command { exit_code: Some(2) }.to_string(),
            "command exited with code 2"
        );
        assert!(StepError::Command { exit_code: None }
            .to_string()
            .contains("signal"));
    }
}
