// Pipeline Executor
// Accepts runs, drives them stage by stage on their own tasks and answers queries

use crate::collaborators::CommitResolver;
use crate::config::EngineConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::registry::{RunHandle, RunRegistry};
use crate::execution::stage::{RunScope, StageOutcome, StageRunner};
use crate::pipeline::dependency::{evaluate, GateDecision};
use crate::pipeline::models::{
    PipelineDefinition, PipelineRun, RunOptions, RunStatus, TriggerInfo,
};
use crate::pipeline::parser::PipelineValidator;
use crate::runners::ExecutorRegistry;
use crate::store::{PipelineStore, RunStore};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const DEFAULT_BRANCH: &str = "main";

/// Filter for run listings; every set field must match
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFilter {
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub environment: Option<String>,
}

impl RunFilter {
    pub fn matches(&self, run: &PipelineRun) -> bool {
        self.pipeline_id
            .as_ref()
            .map_or(true, |id| &run.pipeline_id == id)
            && self.status.map_or(true, |status| run.status == status)
            && self
                .environment
                .as_ref()
                .map_or(true, |env| &run.environment == env)
    }
}

/// 1-based page selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl Pagination {
    fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let per_page = self.per_page.max(1) as usize;
        let skip = (self.page.max(1) as usize - 1).saturating_mul(per_page);
        items.into_iter().skip(skip).take(per_page).collect()
    }
}

/// Pipeline executor
///
/// Cheap to clone; clones share the run registry, stores and executors.
#[derive(Clone)]
pub struct PipelineExecutor {
    pipelines: Arc<dyn PipelineStore>,
    runs: Arc<dyn RunStore>,
    commits: Option<Arc<dyn CommitResolver>>,
    executors: Arc<ExecutorRegistry>,
    registry: Arc<RunRegistry>,
    config: Arc<EngineConfig>,
    event_tx: Option<ProgressSender>,
}

impl PipelineExecutor {
    /// Create an executor with the built-in step executors and default config
    pub fn new(pipelines: Arc<dyn PipelineStore>, runs: Arc<dyn RunStore>) -> Self {
        Self {
            pipelines,
            runs,
            commits: None,
            executors: Arc::new(ExecutorRegistry::new()),
            registry: Arc::new(RunRegistry::new()),
            config: Arc::new(EngineConfig::default()),
            event_tx: None,
        }
    }

    /// Set executor configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Replace the step executor registry
    pub fn with_executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = Arc::new(executors);
        self
    }

    /// Resolve commits for pipelines that name a repository
    pub fn with_commit_resolver(mut self, resolver: Arc<dyn CommitResolver>) -> Self {
        self.commits = Some(resolver);
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a run of `pipeline_id` and start driving it in the background.
    ///
    /// Returns the run as it was queued; it progresses independently of the
    /// caller.
    pub async fn execute_pipeline(
        &self,
        pipeline_id: &str,
        triggered_by: &str,
        options: RunOptions,
    ) -> ServiceResult<PipelineRun> {
        let definition = self
            .pipelines
            .load_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| ServiceError::PipelineNotFound(pipeline_id.to_string()))?;

        if !definition.active {
            return Err(ServiceError::Inactive(pipeline_id.to_string()));
        }

        let warnings =
            PipelineValidator::validate(&definition).map_err(ServiceError::InvalidDefinition)?;

        let branch = options
            .branch
            .clone()
            .or_else(|| definition.default_branch.clone())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        let commit = self.resolve_commit(&definition, &branch).await;
        let environment = options
            .environment
            .clone()
            .unwrap_or_else(|| definition.environment.clone());

        let trigger = TriggerInfo {
            triggered_by: triggered_by.to_string(),
            kind: options.trigger_kind(),
            branch: Some(branch),
            commit,
        };

        let mut run = PipelineRun::new(&definition, trigger, environment);
        for warning in &warnings {
            run.log(format!("Warning: stage '{}' {}", warning.stage, warning.message));
        }

        let handle = RunHandle::new(run.clone());
        self.registry.insert(handle.clone()).await;
        self.persist(&run).await;

        self.event_tx.send_event(ExecutionEvent::RunQueued {
            run_id: run.id,
            pipeline_id: definition.id.clone(),
        });
        tracing::info!(
            run_id = %run.id,
            pipeline_id = %definition.id,
            triggered_by,
            "Pipeline run queued"
        );

        let queued = run.clone();
        let executor = self.clone();
        tokio::spawn(async move {
            executor.drive(definition, run, handle).await;
        });

        Ok(queued)
    }

    /// Current view of a run: live registry snapshot first, then the run store
    pub async fn get_pipeline_run(&self, run_id: Uuid) -> ServiceResult<PipelineRun> {
        if let Some(handle) = self.registry.get(run_id).await {
            return Ok(handle.snapshot().await);
        }

        self.runs
            .load_run(run_id)
            .await?
            .ok_or(ServiceError::RunNotFound(run_id))
    }

    /// Request cancellation of a queued or running run
    pub async fn cancel_pipeline_run(&self, run_id: Uuid) -> ServiceResult<PipelineRun> {
        let Some(handle) = self.registry.get(run_id).await else {
            // Not live: either unknown or already finished and evicted
            let run = self.get_pipeline_run(run_id).await?;
            return Err(ServiceError::InvalidState {
                run_id,
                status: run.status,
            });
        };

        let run = handle
            .cancel()
            .await
            .map_err(|status| ServiceError::InvalidState { run_id, status })?;

        tracing::info!(run_id = %run_id, "Pipeline run cancellation requested");
        Ok(run)
    }

    /// Runs matching `filter`, newest first.
    ///
    /// Live snapshots take precedence over persisted records of the same run.
    pub async fn list_pipeline_runs(
        &self,
        filter: &RunFilter,
        pagination: Pagination,
    ) -> ServiceResult<Vec<PipelineRun>> {
        let mut runs: HashMap<Uuid, PipelineRun> = self
            .runs
            .list_runs()
            .await?
            .into_iter()
            .map(|run| (run.id, run))
            .collect();
        for run in self.registry.snapshots().await {
            runs.insert(run.id, run);
        }

        let mut runs: Vec<PipelineRun> = runs
            .into_values()
            .filter(|run| filter.matches(run))
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(pagination.apply(runs))
    }

    /// Wait until a run has finished and its final record is persisted
    pub async fn wait_for_run(&self, run_id: Uuid) -> ServiceResult<PipelineRun> {
        if let Some(handle) = self.registry.get(run_id).await {
            handle.wait().await;
            // The handle may already be evicted; its last snapshot is final
            return Ok(handle.snapshot().await);
        }

        self.get_pipeline_run(run_id).await
    }

    async fn resolve_commit(&self, definition: &PipelineDefinition, branch: &str) -> Option<String> {
        let repository = definition.repository.as_deref()?;
        let resolver = self.commits.as_ref()?;

        let limit = self.config.commit_lookup_timeout();
        let error = match tokio::time::timeout(limit, resolver.resolve_commit(repository, branch))
            .await
        {
            Ok(Ok(commit)) => return Some(commit),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("lookup timed out after {:?}", limit),
        };
        tracing::warn!(
            pipeline_id = %definition.id,
            repository,
            branch,
            error = %error,
            "Could not resolve commit"
        );
        None
    }

    /// Drive a run to a terminal status, then persist it
    async fn drive(self, definition: PipelineDefinition, mut run: PipelineRun, handle: Arc<RunHandle>) {
        let start = Instant::now();
        let cancel = handle.cancel_token();

        if !cancel.is_cancelled() {
            run.start();
            run.log(format!("Pipeline run started by {}", run.trigger.triggered_by));
            handle.publish(&mut run).await;

            self.event_tx.send_event(ExecutionEvent::RunStarted {
                run_id: run.id,
                pipeline_id: definition.id.clone(),
                total_stages: definition.stages.len(),
            });

            if let Err(e) = self.run_stages(&definition, &mut run, &handle).await {
                tracing::error!(run_id = %run.id, error = %e, "Pipeline run aborted by a fault");
                run.status = RunStatus::Failed;
                run.log(format!("Pipeline run failed: {}", e));
            }
        }

        if cancel.is_cancelled() {
            run.status = RunStatus::Cancelled;
            run.log("Pipeline run cancelled");
        }
        run.finish();
        handle.publish(&mut run).await;
        self.persist(&run).await;

        self.event_tx.send_event(ExecutionEvent::RunCompleted {
            run_id: run.id,
            status: run.status,
            duration: start.elapsed(),
        });
        tracing::info!(
            run_id = %run.id,
            pipeline_id = %run.pipeline_id,
            status = %run.status,
            duration_ms = run.duration_ms.unwrap_or_default(),
            "Pipeline run finished"
        );

        // Evict before waking waiters; later lookups go to the run store
        if !self.config.retain_completed_runs {
            self.registry.remove(run.id).await;
        }
        handle.mark_done();
    }

    /// Single ordered pass over the stages.
    ///
    /// Leaves the status `running` when the pass was cut short by cancellation.
    async fn run_stages(
        &self,
        definition: &PipelineDefinition,
        run: &mut PipelineRun,
        handle: &RunHandle,
    ) -> ServiceResult<()> {
        let runner = StageRunner::new(
            self.executors.clone(),
            self.config.clone(),
            self.event_tx.clone(),
        );
        let scope = RunScope {
            run_id: run.id,
            pipeline_id: definition.id.clone(),
            environment: run.environment.clone(),
            working_dir: self.config.resolve_working_dir(),
            env: definition.env.clone(),
            cancel: handle.cancel_token(),
        };

        for (index, stage) in definition.stages.iter().enumerate() {
            if scope.cancel.is_cancelled() {
                return Ok(());
            }

            if let GateDecision::Skip { reason } = evaluate(stage, &run.stages[..index]) {
                if let Some(stage_run) = run.stages.get_mut(index) {
                    stage_run.skip(reason.clone());
                }
                run.log(format!("Stage '{}' skipped: {}", stage.name, reason));
                handle.publish(run).await;

                self.event_tx.send_event(ExecutionEvent::StageSkipped {
                    run_id: run.id,
                    stage_name: stage.name.clone(),
                    reason,
                });
                continue;
            }

            match runner.run(stage, index, run, handle, &scope).await? {
                StageOutcome::Success => {}
                StageOutcome::Cancelled => return Ok(()),
                StageOutcome::Failed if stage.continue_on_error => {
                    run.log(format!(
                        "Stage '{}' failed; continuing because continueOnError is set",
                        stage.name
                    ));
                }
                StageOutcome::Failed => {
                    run.status = RunStatus::Failed;
                    run.log(format!("Stage '{}' failed; aborting run", stage.name));
                    return Ok(());
                }
            }
        }

        run.status = RunStatus::Success;
        run.log("Pipeline run completed successfully");
        Ok(())
    }

    /// Store a run record; failures are logged, never propagated
    async fn persist(&self, run: &PipelineRun) {
        if let Err(e) = self.runs.persist_run(run).await {
            tracing::error!(run_id = %run.id, error = %e, "Failed to persist pipeline run");
        }
    }
}
