// Command Executor
// Runs `build` and `test` steps as shell commands

use crate::pipeline::models::{StepDefinition, StepRun};
use crate::pipeline::params::{decode, CommandParams};
use crate::runners::shell::ShellRunner;
use crate::runners::{StepContext, StepError, StepExecutor};

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Build,
    Test,
}

/// Executor for `build` and `test` steps
pub struct CommandExecutor {
    kind: CommandKind,
    shell: ShellRunner,
}

impl CommandExecutor {
    pub fn build(shell: ShellRunner) -> Self {
        Self {
            kind: CommandKind::Build,
            shell,
        }
    }

    pub fn test(shell: ShellRunner) -> Self {
        Self {
            kind: CommandKind::Test,
            shell,
        }
    }

    fn default_command<'a>(&self, ctx: &'a StepContext) -> &'a str {
        match self.kind {
            CommandKind::Build => &ctx.config.build_command,
            CommandKind::Test => &ctx.config.test_command,
        }
    }
}

/// Run a command line for a step, logging every output line.
///
/// Lines go to the attempt's transcript as they arrive and are moved into
/// `step_run` once the command exits. Shared with the custom script executor.
pub(crate) async fn run_logged(
    shell: &ShellRunner,
    command: &str,
    working_dir: Option<&str>,
    step_run: &mut StepRun,
    ctx: &StepContext,
) -> Result<(), StepError> {
    let dir = match working_dir {
        Some(dir) => ctx.working_dir.join(Path::new(dir)),
        None => ctx.working_dir.clone(),
    };

    ctx.transcript.push(format!("$ {}", command));
    let output = shell
        .run(command, &ctx.env, &dir, Some(ctx.output_recorder(&step_run.name)))
        .await;
    step_run.logs.extend(ctx.transcript.drain());
    let output = output?;

    if output.success() {
        Ok(())
    } else {
        Err(StepError::Command {
            exit_code: output.exit_code,
        })
    }
}

#[async_trait::async_trait]
impl StepExecutor for CommandExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        step_run: &mut StepRun,
        ctx: &StepContext,
    ) -> Result<(), StepError> {
        let params: CommandParams = decode(&step.params).map_err(StepError::InvalidParams)?;
        let command = params
            .command
            .as_deref()
            .unwrap_or_else(|| self.default_command(ctx));

        run_logged(
            &self.shell,
            command,
            params.working_dir.as_deref(),
            step_run,
            ctx,
        )
        .await?;

        if !params.artifacts.is_empty() {
            step_run
                .outputs
                .insert("artifacts".to_string(), serde_json::json!(params.artifacts));
        }

        Ok(())
    }
}
