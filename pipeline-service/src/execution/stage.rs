// Stage Runner
// Runs a stage's steps in order with per-step timeout, retry and cancellation

use crate::config::EngineConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::registry::RunHandle;
use crate::pipeline::models::{
    Artifact, PipelineRun, StageDefinition, StageRun, StageStatus, StepDefinition, StepRun,
    StepStatus,
};
use crate::runners::{ExecutorRegistry, StepContext, StepError, StepExecutor, StepTranscript};

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How a stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    Failed,
    Cancelled,
}

/// Run-wide inputs shared by every step
#[derive(Clone)]
pub struct RunScope {
    pub run_id: Uuid,
    pub pipeline_id: String,
    pub environment: String,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub cancel: CancellationToken,
}

/// Executes the steps of one stage against the run record
pub struct StageRunner {
    executors: Arc<ExecutorRegistry>,
    config: Arc<EngineConfig>,
    event_tx: Option<ProgressSender>,
}

impl StageRunner {
    pub fn new(
        executors: Arc<ExecutorRegistry>,
        config: Arc<EngineConfig>,
        event_tx: Option<ProgressSender>,
    ) -> Self {
        Self {
            executors,
            config,
            event_tx,
        }
    }

    /// Run the stage at `stage_index` of `run`.
    ///
    /// Steps run in order and the first failure ends the stage; the steps after
    /// it stay pending. `continue_on_error` is the orchestrator's business.
    /// An executor panic is returned as `ServiceError::Internal` after the step
    /// and stage have been marked failed.
    pub async fn run(
        &self,
        stage: &StageDefinition,
        stage_index: usize,
        run: &mut PipelineRun,
        handle: &RunHandle,
        scope: &RunScope,
    ) -> ServiceResult<StageOutcome> {
        let start = Instant::now();
        let deadline = stage
            .timeout_secs
            .map(|secs| start + Duration::from_secs(secs));

        stage_run_mut(run, stage_index)?.start();
        handle.publish(run).await;

        self.event_tx.send_event(ExecutionEvent::StageStarted {
            run_id: scope.run_id,
            stage_name: stage.name.clone(),
            total_steps: stage.steps.len(),
        });
        tracing::info!(run_id = %scope.run_id, stage = %stage.name, "Stage started");

        let mut outcome = StageOutcome::Success;
        let mut fault = None;

        for (step_index, step) in stage.steps.iter().enumerate() {
            if scope.cancel.is_cancelled() {
                outcome = StageOutcome::Cancelled;
                break;
            }

            let mut step_run = {
                let step_run = step_run_mut(run, stage_index, step_index)?;
                step_run.start();
                step_run.clone()
            };
            handle.publish(run).await;

            self.event_tx.send_event(ExecutionEvent::StepStarted {
                run_id: scope.run_id,
                stage_name: stage.name.clone(),
                step_name: step.name.clone(),
                step_index,
            });

            let step_start = Instant::now();
            let result = match self
                .run_step(stage, step, &mut step_run, scope, deadline)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    step_run.log_error(&e.to_string());
                    step_run.finish(StepStatus::Failed);
                    *step_run_mut(run, stage_index, step_index)? = step_run;
                    outcome = StageOutcome::Failed;
                    fault = Some(e);
                    break;
                }
            };

            let error = match &result {
                Ok(()) => {
                    step_run.finish(StepStatus::Success);
                    run.artifacts
                        .extend(collect_artifacts(&stage.name, &step_run));
                    None
                }
                Err(e) => {
                    step_run.log_error(&e.to_string());
                    step_run.finish(StepStatus::Failed);
                    tracing::warn!(
                        run_id = %scope.run_id,
                        stage = %stage.name,
                        step = %step.name,
                        error = %e,
                        "Step failed"
                    );
                    Some(e.to_string())
                }
            };

            let status = step_run.status;
            *step_run_mut(run, stage_index, step_index)? = step_run;
            handle.publish(run).await;

            self.event_tx.send_event(ExecutionEvent::StepCompleted {
                run_id: scope.run_id,
                stage_name: stage.name.clone(),
                step_name: step.name.clone(),
                step_index,
                status,
                duration: step_start.elapsed(),
                error,
            });

            match result {
                Ok(()) => {}
                Err(StepError::Cancelled) => {
                    outcome = StageOutcome::Cancelled;
                    break;
                }
                Err(_) => {
                    outcome = StageOutcome::Failed;
                    break;
                }
            }
        }

        let status = match outcome {
            StageOutcome::Success => StageStatus::Success,
            StageOutcome::Failed | StageOutcome::Cancelled => StageStatus::Failed,
        };
        {
            let stage_run = stage_run_mut(run, stage_index)?;
            if outcome == StageOutcome::Cancelled {
                stage_run.log("Stage cancelled");
            }
            stage_run.finish(status);
        }
        handle.publish(run).await;

        self.event_tx.send_event(ExecutionEvent::StageCompleted {
            run_id: scope.run_id,
            stage_name: stage.name.clone(),
            status,
            duration: start.elapsed(),
        });
        tracing::info!(
            run_id = %scope.run_id,
            stage = %stage.name,
            outcome = ?outcome,
            "Stage finished"
        );

        match fault {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// Attempt a step until it succeeds, is cancelled or runs out of retries
    async fn run_step(
        &self,
        stage: &StageDefinition,
        step: &StepDefinition,
        step_run: &mut StepRun,
        scope: &RunScope,
        deadline: Option<Instant>,
    ) -> ServiceResult<Result<(), StepError>> {
        let max_attempts = stage.retries_for(step).saturating_add(1);
        let executor = self.executors.resolve(&step.action);
        let ctx = self.step_context(stage, step, scope);
        let mut attempt = 0;

        loop {
            attempt += 1;
            step_run.attempts = attempt;

            let limit = self.attempt_limit(step, deadline);
            let error = match self
                .attempt(executor.clone(), step, step_run, &ctx, &scope.cancel, limit)
                .await?
            {
                Ok(()) => return Ok(Ok(())),
                Err(StepError::Cancelled) => return Ok(Err(StepError::Cancelled)),
                Err(e) => e,
            };

            let expired = deadline.is_some_and(|d| Instant::now() >= d);
            if attempt >= max_attempts || expired {
                return Ok(Err(error));
            }

            step_run.log(format!(
                "attempt {}/{} failed: {}",
                attempt, max_attempts, error
            ));
            tracing::debug!(
                run_id = %scope.run_id,
                step = %step.name,
                attempt,
                max_attempts,
                "Retrying step"
            );
            self.event_tx.send_event(ExecutionEvent::StepRetrying {
                run_id: scope.run_id,
                stage_name: stage.name.clone(),
                step_name: step.name.clone(),
                attempt,
                max_attempts,
                error: error.to_string(),
            });

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay()) => {}
                _ = scope.cancel.cancelled() => return Ok(Err(StepError::Cancelled)),
            }
        }
    }

    /// One attempt on its own task, bounded by `limit` and raced against cancellation
    async fn attempt(
        &self,
        executor: Arc<dyn StepExecutor>,
        step: &StepDefinition,
        step_run: &mut StepRun,
        ctx: &StepContext,
        cancel: &CancellationToken,
        limit: Option<Duration>,
    ) -> ServiceResult<Result<(), StepError>> {
        let definition = step.clone();
        let mut scratch = step_run.clone();
        let transcript = StepTranscript::default();
        let task_ctx = StepContext {
            transcript: transcript.clone(),
            ..ctx.clone()
        };
        let mut task = tokio::spawn(async move {
            let result = executor.execute(&definition, &mut scratch, &task_ctx).await;
            (scratch, result)
        });
        let abort = task.abort_handle();

        let joined = tokio::select! {
            joined = join_within(&mut task, limit) => joined,
            _ = cancel.cancelled() => {
                abort.abort();
                step_run.logs.extend(transcript.drain());
                step_run.log("Cancelled while running");
                return Ok(Err(StepError::Cancelled));
            }
        };

        match joined {
            Ok(Ok((scratch, result))) => {
                *step_run = scratch;
                Ok(result)
            }
            Ok(Err(join_error)) => Err(ServiceError::Internal(format!(
                "executor for step '{}' panicked: {}",
                step.name,
                panic_message(join_error)
            ))),
            Err(limit) => {
                abort.abort();
                step_run.logs.extend(transcript.drain());
                Ok(Err(StepError::Timeout(limit)))
            }
        }
    }

    fn step_context(
        &self,
        stage: &StageDefinition,
        step: &StepDefinition,
        scope: &RunScope,
    ) -> StepContext {
        let mut env = scope.env.clone();
        env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        StepContext {
            run_id: scope.run_id,
            pipeline_id: scope.pipeline_id.clone(),
            stage_name: stage.name.clone(),
            environment: scope.environment.clone(),
            working_dir: scope.working_dir.clone(),
            env,
            config: self.config.clone(),
            events: self.event_tx.clone(),
            transcript: StepTranscript::default(),
        }
    }

    /// Step timeout (or the configured default) capped by what is left of the stage
    fn attempt_limit(&self, step: &StepDefinition, deadline: Option<Instant>) -> Option<Duration> {
        let step_limit = step
            .timeout_secs
            .map(Duration::from_secs)
            .or_else(|| self.config.default_step_timeout());
        let stage_left = deadline.map(|d| d.saturating_duration_since(Instant::now()));

        match (step_limit, stage_left) {
            (Some(step), Some(stage)) => Some(step.min(stage)),
            (step, stage) => step.or(stage),
        }
    }
}

async fn join_within<T>(
    task: &mut JoinHandle<T>,
    limit: Option<Duration>,
) -> Result<Result<T, JoinError>, Duration> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .map_err(|_| limit),
        None => Ok(task.await),
    }
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
        Err(error) => error.to_string(),
    }
}

/// Artifacts a successful step recorded under its `artifacts` output
fn collect_artifacts(stage_name: &str, step_run: &StepRun) -> Vec<Artifact> {
    let Some(serde_json::Value::Array(names)) = step_run.outputs.get("artifacts") else {
        return Vec::new();
    };
    let created_at = Utc::now();
    names
        .iter()
        .filter_map(|name| name.as_str())
        .map(|name| Artifact {
            name: name.to_string(),
            stage: stage_name.to_string(),
            step: step_run.name.clone(),
            created_at,
        })
        .collect()
}

fn stage_run_mut(run: &mut PipelineRun, stage_index: usize) -> ServiceResult<&mut StageRun> {
    let run_id = run.id;
    run.stages.get_mut(stage_index).ok_or_else(|| {
        ServiceError::Internal(format!("run {} has no stage #{}", run_id, stage_index))
    })
}

fn step_run_mut(
    run: &mut PipelineRun,
    stage_index: usize,
    step_index: usize,
) -> ServiceResult<&mut StepRun> {
    let run_id = run.id;
    stage_run_mut(run, stage_index)?
        .steps
        .get_mut(step_index)
        .ok_or_else(|| {
            ServiceError::Internal(format!(
                "run {} has no step #{} in stage #{}",
                run_id, step_index, stage_index
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::events::progress_channel;
    use crate::execution::fakes::{self, definition, ok_step, stage, step};
    use crate::pipeline::models::{TriggerInfo, TriggerKind};
    use serde_json::json;

    struct Harness {
        runner: StageRunner,
        run: PipelineRun,
        handle: Arc<RunHandle>,
        scope: RunScope,
    }

    fn harness(stage_def: &StageDefinition, events: Option<ProgressSender>) -> Harness {
        harness_with(stage_def, events, fakes::config())
    }

    fn harness_with(
        stage_def: &StageDefinition,
        events: Option<ProgressSender>,
        config: Arc<EngineConfig>,
    ) -> Harness {
        let definition = definition("web", vec![stage_def.clone()]);
        let trigger = TriggerInfo {
            triggered_by: "tester".to_string(),
            kind: TriggerKind::Manual,
            branch: None,
            commit: None,
        };
        let run = PipelineRun::new(&definition, trigger, "staging".to_string());
        let handle = RunHandle::new(run.clone());
        let scope = RunScope {
            run_id: run.id,
            pipeline_id: "web".to_string(),
            environment: "staging".to_string(),
            working_dir: std::env::current_dir().unwrap(),
            env: HashMap::new(),
            cancel: handle.cancel_token(),
        };
        Harness {
            runner: StageRunner::new(fakes::registry(), config, events),
            run,
            handle,
            scope,
        }
    }

    impl Harness {
        async fn run(&mut self, stage_def: &StageDefinition) -> ServiceResult<StageOutcome> {
            self.runner
                .run(stage_def, 0, &mut self.run, &self.handle, &self.scope)
                .await
        }
    }

    #[tokio::test]
    async fn test_first_failure_leaves_later_steps_pending() {
        let stage_def = stage(
            "test",
            vec![
                ok_step("unit"),
                step("integration", json!({ "fail": "assertion failed" })),
                ok_step("e2e"),
            ],
            &[],
        );
        let mut h = harness(&stage_def, None);

        let outcome = h.run(&stage_def).await.unwrap();

        assert_eq!(outcome, StageOutcome::Failed);
        let stage_run = &h.run.stages[0];
        assert_eq!(stage_run.status, StageStatus::Failed);
        assert!(stage_run.completed_at.is_some());
        assert_eq!(stage_run.steps[0].status, StepStatus::Success);
        assert_eq!(stage_run.steps[1].status, StepStatus::Failed);
        assert!(stage_run.steps[1]
            .logs
            .contains(&"[error] assertion failed".to_string()));
        assert_eq!(stage_run.steps[2].status, StepStatus::Pending);
        assert!(stage_run.steps[2].started_at.is_none());
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let mut flaky = step("flaky", json!({ "failTimes": 2 }));
        flaky.retries = Some(2);
        let stage_def = stage("build", vec![flaky], &[]);
        let (tx, mut rx) = progress_channel();
        let mut h = harness(&stage_def, Some(tx));

        let outcome = h.run(&stage_def).await.unwrap();

        assert_eq!(outcome, StageOutcome::Success);
        let step_run = &h.run.stages[0].steps[0];
        assert_eq!(step_run.status, StepStatus::Success);
        assert_eq!(step_run.attempts, 3);
        assert!(step_run
            .logs
            .iter()
            .any(|l| l.starts_with("attempt 1/3 failed: flaky failure #1")));

        let mut retries = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ExecutionEvent::StepRetrying { .. }) {
                retries += 1;
            }
        }
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_step() {
        let mut stage_def = stage("build", vec![step("broken", json!({ "fail": "nope" }))], &[]);
        stage_def.retries = 1;
        let mut h = harness(&stage_def, None);

        let outcome = h.run(&stage_def).await.unwrap();

        assert_eq!(outcome, StageOutcome::Failed);
        assert_eq!(h.run.stages[0].steps[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let mut slow = step("slow", json!({ "sleepMs": 5000 }));
        slow.timeout_secs = Some(1);
        let stage_def = stage("build", vec![slow], &[]);
        let mut h = harness(&stage_def, None);

        let outcome = h.run(&stage_def).await.unwrap();

        assert_eq!(outcome, StageOutcome::Failed);
        let step_run = &h.run.stages[0].steps[0];
        assert_eq!(step_run.status, StepStatus::Failed);
        assert!(step_run.logs.iter().any(|l| l.contains("timed out")));
    }

    #[tokio::test]
    async fn test_stage_timeout_caps_steps_without_their_own() {
        let mut stage_def = stage(
            "build",
            vec![step("slow", json!({ "sleepMs": 5000 })), ok_step("after")],
            &[],
        );
        stage_def.timeout_secs = Some(1);
        let mut h = harness(&stage_def, None);

        let started = Instant::now();
        let outcome = h.run(&stage_def).await.unwrap();

        assert_eq!(outcome, StageOutcome::Failed);
        assert!(started.elapsed() < Duration::from_secs(3));
        let stage_run = &h.run.stages[0];
        assert_eq!(stage_run.steps[0].status, StepStatus::Failed);
        assert!(stage_run.steps[0]
            .logs
            .iter()
            .any(|l| l.starts_with("[error] step timed out")));
        assert_eq!(stage_run.steps[1].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_timed_out_attempt_is_retried() {
        let mut slow_once = step("warmup", json!({ "sleepMs": 5000, "slowTimes": 1 }));
        slow_once.timeout_secs = Some(1);
        slow_once.retries = Some(1);
        let stage_def = stage("build", vec![slow_once], &[]);
        let mut h = harness(&stage_def, None);

        let outcome = h.run(&stage_def).await.unwrap();

        assert_eq!(outcome, StageOutcome::Success);
        let step_run = &h.run.stages[0].steps[0];
        assert_eq!(step_run.status, StepStatus::Success);
        assert_eq!(step_run.attempts, 2);
        assert!(step_run
            .logs
            .iter()
            .any(|l| l.starts_with("attempt 1/2 failed: step timed out")));
    }

    #[tokio::test]
    async fn test_configured_default_step_timeout_applies() {
        let stage_def = stage("build", vec![step("slow", json!({ "sleepMs": 5000 }))], &[]);
        let config = Arc::new(EngineConfig {
            default_step_timeout_secs: Some(1),
            ..(*fakes::config()).clone()
        });
        let mut h = harness_with(&stage_def, None, config);

        let outcome = h.run(&stage_def).await.unwrap();

        assert_eq!(outcome, StageOutcome::Failed);
        assert!(h.run.stages[0].steps[0]
            .logs
            .contains(&"[error] step timed out after 1s".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_command_keeps_its_output() {
        let mut build = step("compile", json!({ "command": "echo started-output; sleep 5" }));
        build.action = "build".to_string();
        build.timeout_secs = Some(1);
        build.retries = Some(1);
        let stage_def = stage("build", vec![build], &[]);
        let mut h = harness(&stage_def, None);

        let outcome = h.run(&stage_def).await.unwrap();

        assert_eq!(outcome, StageOutcome::Failed);
        let logs = &h.run.stages[0].steps[0].logs;
        let commands = logs
            .iter()
            .filter(|l| *l == "$ echo started-output; sleep 5")
            .count();
        let output = logs
            .iter()
            .filter(|l| *l == "[stdout] started-output")
            .count();
        assert_eq!(commands, 2);
        assert_eq!(output, 2);
        assert_eq!(logs.last().unwrap(), "[error] step timed out after 1s");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_command_keeps_its_output() {
        let mut build = step("compile", json!({ "command": "echo partial; sleep 5" }));
        build.action = "build".to_string();
        let stage_def = stage("build", vec![build], &[]);
        let mut h = harness(&stage_def, None);
        let handle = h.handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            handle.cancel().await.unwrap();
        });

        let outcome = h.run(&stage_def).await.unwrap();

        assert_eq!(outcome, StageOutcome::Cancelled);
        let logs = &h.run.stages[0].steps[0].logs;
        assert!(logs.contains(&"[stdout] partial".to_string()));
        assert!(logs.contains(&"[error] step cancelled".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_during_step() {
        let stage_def = stage(
            "deploy",
            vec![step("rollout", json!({ "sleepMs": 5000 })), ok_step("verify")],
            &[],
        );
        let mut h = harness(&stage_def, None);
        let handle = h.handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel().await.unwrap();
        });

        let outcome = h.run(&stage_def).await.unwrap();

        assert_eq!(outcome, StageOutcome::Cancelled);
        let stage_run = &h.run.stages[0];
        assert_eq!(stage_run.status, StageStatus::Failed);
        assert!(stage_run.logs.contains(&"Stage cancelled".to_string()));
        assert_eq!(stage_run.steps[0].status, StepStatus::Failed);
        assert!(stage_run.steps[0]
            .logs
            .contains(&"[error] step cancelled".to_string()));
        assert_eq!(stage_run.steps[1].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_panicking_executor_is_a_fault() {
        let stage_def = stage("build", vec![step("boom", json!({ "panic": true }))], &[]);
        let mut h = harness(&stage_def, None);

        let err = h.run(&stage_def).await.unwrap_err();

        assert!(matches!(err, ServiceError::Internal(_)));
        assert!(err.to_string().contains("scripted panic in boom"));
        assert_eq!(h.run.stages[0].status, StageStatus::Failed);
        assert_eq!(h.run.stages[0].steps[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_artifacts_collected_on_success() {
        let stage_def = stage(
            "build",
            vec![step("package", json!({ "artifacts": ["dist/web.tar.gz"] }))],
            &[],
        );
        let mut h = harness(&stage_def, None);

        h.run(&stage_def).await.unwrap();

        assert_eq!(h.run.artifacts.len(), 1);
        assert_eq!(h.run.artifacts[0].name, "dist/web.tar.gz");
        assert_eq!(h.run.artifacts[0].stage, "build");
        assert_eq!(h.run.artifacts[0].step, "package");
    }

    #[tokio::test]
    async fn test_progress_is_published() {
        let stage_def = stage("build", vec![ok_step("compile")], &[]);
        let mut h = harness(&stage_def, None);

        h.run(&stage_def).await.unwrap();

        let snapshot = h.handle.snapshot().await;
        assert_eq!(snapshot.stages[0].status, StageStatus::Success);
        assert_eq!(snapshot.stages[0].steps[0].status, StepStatus::Success);
    }
}
