// Script Executor
// Fallback for custom actions: runs the `script` parameter when one is given

use crate::pipeline::models::{StepDefinition, StepRun};
use crate::pipeline::params::{decode, ScriptParams};
use crate::runners::command::run_logged;
use crate::runners::shell::ShellRunner;
use crate::runners::{StepContext, StepError, StepExecutor};

pub struct ScriptExecutor {
    shell: ShellRunner,
}

impl ScriptExecutor {
    pub fn new(shell: ShellRunner) -> Self {
        Self { shell }
    }
}

#[async_trait::async_trait]
impl StepExecutor for ScriptExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        step_run: &mut StepRun,
        ctx: &StepContext,
    ) -> Result<(), StepError> {
        let params: ScriptParams = decode(&step.params).map_err(StepError::InvalidParams)?;

        match params.script {
            Some(script) => {
                run_logged(
                    &self.shell,
                    &script,
                    params.working_dir.as_deref(),
                    step_run,
                    ctx,
                )
                .await
            }
            None => {
                step_run.log(format!(
                    "Action '{}' has no script; nothing to execute",
                    step.action
                ));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runners::tests::{context, step};

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_script_parameter() {
        let executor = ScriptExecutor::new(ShellRunner::new());
        let step = step("lint", serde_json::json!({ "script": "echo linted" }));
        let mut run = StepRun::pending(&step);

        executor.execute(&step, &mut run, &context()).await.unwrap();
        assert!(run.logs.contains(&"[stdout] linted".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_script() {
        let executor = ScriptExecutor::new(ShellRunner::new());
        let step = step("lint", serde_json::json!({ "script": "echo bad >&2; exit 4" }));
        let mut run = StepRun::pending(&step);

        let err = executor
            .execute(&step, &mut run, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Command { exit_code: Some(4) }));
        assert!(run.logs.contains(&"[stderr] bad".to_string()));
    }
}
