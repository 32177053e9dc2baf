use crate::commands::{query_server, GlobalArgs};
use crate::output;

use clap::{Args, Subcommand};
use color_eyre::Result;

use pipeline_rpc::ListRunsRequest;
use pipeline_service::PipelineRun;

/// Inspect recorded pipeline runs
#[derive(Args, Debug)]
pub struct RunsArgs {
    #[command(subcommand)]
    pub command: RunsCommand,
}

#[derive(Subcommand, Debug)]
pub enum RunsCommand {
    /// List runs, newest first
    List {
        /// Only runs of this pipeline
        #[arg(long)]
        pipeline: Option<String>,

        /// Only runs in this status (queued, running, success, failed, cancelled)
        #[arg(long)]
        status: Option<String>,

        /// Only runs targeting this environment
        #[arg(long = "env", value_name = "ENV")]
        environment: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },

    /// Show one run with its stages and steps
    Show {
        run_id: String,

        /// Print the raw run record as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn execute(args: RunsArgs, global: &GlobalArgs) -> Result<()> {
    let server = query_server(global.load_config()?);
    let handler = server.pipeline_handler();

    match args.command {
        RunsCommand::List {
            pipeline,
            status,
            environment,
            page,
            per_page,
        } => {
            let runs = handler
                .list_runs(ListRunsRequest {
                    pipeline_id: pipeline,
                    status,
                    environment,
                    page: Some(page),
                    per_page: Some(per_page),
                })
                .await?;

            if runs.is_empty() {
                output::info("No runs recorded");
                return Ok(());
            }
            for run in &runs {
                print_summary(run);
            }
        }

        RunsCommand::Show { run_id, json } => {
            let run = handler.get_run(&run_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                print_detail(&run);
            }
        }
    }

    Ok(())
}

fn print_summary(run: &PipelineRun) {
    println!(
        "{}  {}  {:<20} {:<12} {}",
        run.id,
        output::run_status_label(run.status),
        run.pipeline_id,
        run.environment,
        run.created_at.format("%Y-%m-%d %H:%M:%S")
    );
}

fn print_detail(run: &PipelineRun) {
    output::header(&format!("Run {} of '{}'", run.id, run.pipeline_name));
    println!("  Status:       {}", output::run_status_label(run.status));
    println!("  Environment:  {}", run.environment);
    println!(
        "  Triggered by: {} ({:?})",
        run.trigger.triggered_by, run.trigger.kind
    );
    if let Some(branch) = &run.trigger.branch {
        println!("  Branch:       {}", branch);
    }
    if let Some(commit) = &run.trigger.commit {
        println!("  Commit:       {}", commit);
    }
    if let Some(ms) = run.duration_ms {
        println!("  Duration:     {:.2}s", ms as f64 / 1000.0);
    }

    for stage in &run.stages {
        println!();
        println!("  [{}] {}", output::stage_symbol(stage.status), stage.name);
        for line in &stage.logs {
            output::dim(&format!("      {}", line));
        }
        for step in &stage.steps {
            println!(
                "    [{}] {} (attempts: {})",
                output::step_symbol(step.status),
                step.name,
                step.attempts
            );
            for line in &step.logs {
                println!("        | {}", line);
            }
        }
    }

    if !run.artifacts.is_empty() {
        println!();
        println!("  Artifacts:");
        for artifact in &run.artifacts {
            println!("    {} ({}/{})", artifact.name, artifact.stage, artifact.step);
        }
    }

    if !run.logs.is_empty() {
        println!();
        for line in &run.logs {
            output::dim(&format!("  {}", line));
        }
    }
}
