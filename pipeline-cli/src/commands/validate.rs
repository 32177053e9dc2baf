use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use pipeline_service::{PipelineParser, PipelineValidator};

/// Validate a pipeline YAML file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let pipeline_path = &args.pipeline;

    if !pipeline_path.exists() {
        color_eyre::eyre::bail!("Pipeline file not found: {}", pipeline_path.display());
    }

    output::status("Validating", &format!("{}", pipeline_path.display()));

    let pipeline = match PipelineParser::from_file(pipeline_path) {
        Ok(p) => p,
        Err(e) => {
            output::error(&format!("Parse error: {}", e));
            std::process::exit(1);
        }
    };

    output::check("YAML syntax valid");

    let steps_count: usize = pipeline.stages.iter().map(|s| s.steps.len()).sum();
    output::check(&format!(
        "Pipeline '{}': {} stages, {} steps",
        pipeline.display_name(),
        pipeline.stages.len(),
        steps_count
    ));

    match PipelineValidator::validate(&pipeline) {
        Ok(warnings) => {
            output::check("Semantic validation passed");
            for warning in &warnings {
                output::warning(&format!("Stage '{}' {}", warning.stage, warning.message));
            }
        }
        Err(errors) => {
            output::error(&format!("{} validation error(s):", errors.len()));
            for error in &errors {
                output::error(&format!("  - {}", error));
            }
            std::process::exit(1);
        }
    }

    if !pipeline.active {
        output::info("Pipeline is marked inactive; runs will be rejected");
    }

    println!();
    output::success("Pipeline is valid");

    Ok(())
}
