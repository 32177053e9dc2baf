use crate::commands::GlobalArgs;
use crate::output;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::Result;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use pipeline_rpc::{ExecuteRequest, RpcServer};
use pipeline_service::pipeline::params::{decode, NotifyParams};
use pipeline_service::pipeline::ActionKind;
use pipeline_service::{
    progress_channel, ExecutionEvent, ExecutorRegistry, FileStore, GitCommitResolver,
    LogNotifier, Notifier, PipelineDefinition, PipelineExecutor, PipelineParser, RunStatus,
    StageStatus, StepStatus,
};

/// Run a pipeline locally
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    /// Branch to record on the run (default: the pipeline's default branch, then main)
    #[arg(long, short = 'b')]
    pub branch: Option<String>,

    /// Target environment (default: the pipeline's environment)
    #[arg(long = "env", short = 'e', value_name = "ENV")]
    pub environment: Option<String>,

    /// Who started the run (default: $USER)
    #[arg(long, env = "USER", default_value = "local")]
    pub triggered_by: String,

    /// Working directory for step commands
    #[arg(long, short = 'w', value_name = "DIR")]
    pub working_dir: Option<PathBuf>,
}

pub async fn execute(args: RunArgs, global: &GlobalArgs) -> Result<()> {
    let pipeline_path = &args.pipeline;

    if !pipeline_path.exists() {
        color_eyre::eyre::bail!("Pipeline file not found: {}", pipeline_path.display());
    }

    let mut config = global.load_config()?;
    if let Some(dir) = &args.working_dir {
        config.working_dir = Some(dir.clone());
    }

    output::status("Parsing", &format!("{}", pipeline_path.display()));
    let pipeline = PipelineParser::from_file(pipeline_path)?;

    let steps_count: usize = pipeline.stages.iter().map(|s| s.steps.len()).sum();
    output::info(&format!(
        "Pipeline '{}': {} stages, {} steps",
        pipeline.display_name(),
        pipeline.stages.len(),
        steps_count
    ));

    // The executor loads definitions by id, so register this one in the store
    let store = Arc::new(FileStore::new(&config.data_dir));
    store.save_pipeline(&pipeline)?;

    let (tx, rx) = progress_channel();
    let executors = ExecutorRegistry::new().with_notifiers(log_notifiers(&pipeline));
    let executor = PipelineExecutor::new(store.clone(), store)
        .with_config(config)
        .with_executors(executors)
        .with_commit_resolver(Arc::new(GitCommitResolver::new()))
        .with_progress(tx);
    let server = RpcServer::new(executor);
    let handler = server.pipeline_handler();

    let run = handler
        .execute_pipeline(ExecuteRequest {
            pipeline_id: pipeline.id.clone(),
            triggered_by: args.triggered_by.clone(),
            branch: args.branch.clone(),
            environment: args.environment.clone(),
            manual: true,
        })
        .await?;
    let run_id = run.id.to_string();

    output::status("Queued", &format!("run {}", run_id));
    for line in run.logs.iter().filter(|l| l.starts_with("Warning:")) {
        output::warning(line);
    }

    let mut events = UnboundedReceiverStream::new(rx);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    let finished = matches!(event, ExecutionEvent::RunCompleted { run_id, .. } if run_id == run.id);
                    render(&event);
                    if finished {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut ctrl_c, if !cancel_requested => {
                cancel_requested = true;
                output::warning("Interrupted; cancelling run...");
                if let Err(e) = handler.cancel_run(&run_id).await {
                    output::error(&format!("Could not cancel run: {}", e));
                }
            }
        }
    }

    let finished = handler.wait_for_run(&run_id).await?;
    println!();
    output::dim(&format!("Run record: {}", run_id));

    if finished.status != RunStatus::Success {
        std::process::exit(1);
    }

    Ok(())
}

/// Log-backed notifiers for every channel the pipeline's notify steps name
fn log_notifiers(pipeline: &PipelineDefinition) -> Vec<Arc<dyn Notifier>> {
    let channels: BTreeSet<String> = pipeline
        .stages
        .iter()
        .flat_map(|stage| &stage.steps)
        .filter(|step| ActionKind::parse(&step.action) == ActionKind::Notify)
        .filter_map(|step| decode::<NotifyParams>(&step.params).ok())
        .flat_map(|params| params.channels)
        .collect();

    channels
        .into_iter()
        .map(|channel| Arc::new(LogNotifier::new(channel)) as Arc<dyn Notifier>)
        .collect()
}

fn render(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunQueued { .. } => {}

        ExecutionEvent::RunStarted {
            pipeline_id,
            total_stages,
            ..
        } => {
            println!();
            output::header(&format!(
                "Pipeline '{}' ({} stages)",
                pipeline_id, total_stages
            ));
        }

        ExecutionEvent::RunCompleted {
            status, duration, ..
        } => {
            println!();
            let secs = duration.as_secs_f64();
            match status {
                RunStatus::Success => {
                    output::success(&format!("Pipeline completed successfully in {:.2}s", secs))
                }
                RunStatus::Cancelled => {
                    output::warning(&format!("Pipeline cancelled after {:.2}s", secs))
                }
                _ => output::failure(&format!("Pipeline {} after {:.2}s", status, secs)),
            }
        }

        ExecutionEvent::StageStarted {
            stage_name,
            total_steps,
            ..
        } => output::stage_header(stage_name, *total_steps),

        ExecutionEvent::StageCompleted {
            stage_name,
            status,
            duration,
            ..
        } => {
            let line = format!(
                "  Stage '{}' {} ({:.2}s)",
                stage_name,
                output::stage_symbol(*status),
                duration.as_secs_f64()
            );
            if *status == StageStatus::Success {
                output::dim_success(&line);
            } else {
                output::dim_failure(&line);
            }
        }

        ExecutionEvent::StageSkipped {
            stage_name, reason, ..
        } => {
            output::warning(&format!("  Stage '{}' skipped: {}", stage_name, reason));
        }

        ExecutionEvent::StepStarted {
            step_name,
            step_index,
            ..
        } => {
            println!("      [Step {}] {}", step_index + 1, step_name);
        }

        ExecutionEvent::StepOutput {
            output, is_error, ..
        } => {
            for line in output.lines() {
                if *is_error {
                    output::step_error(line);
                } else {
                    output::step_output(line);
                }
            }
        }

        ExecutionEvent::StepRetrying {
            step_name,
            attempt,
            max_attempts,
            error,
            ..
        } => {
            output::warning(&format!(
                "        {} attempt {}/{} failed: {}",
                step_name, attempt, max_attempts, error
            ));
        }

        ExecutionEvent::StepCompleted {
            status,
            duration,
            error,
            ..
        } => {
            let line = format!(
                "        {} ({:.2}s)",
                output::step_symbol(*status),
                duration.as_secs_f64()
            );
            match status {
                StepStatus::Success => output::dim_success(&line),
                StepStatus::Failed => {
                    output::dim_failure(&line);
                    if let Some(error) = error {
                        output::dim_failure(&format!("        {}", error));
                    }
                }
                _ => println!("{}", line),
            }
        }
    }
}
