use crate::error::DefinitionError;
use crate::pipeline::models::PipelineDefinition;
use crate::pipeline::params::StepParams;
use crate::ServiceResult;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

pub struct PipelineParser;

impl PipelineParser {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ServiceResult<PipelineDefinition> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> ServiceResult<PipelineDefinition> {
        let pipeline: PipelineDefinition = serde_yaml::from_str(content)?;
        Ok(pipeline)
    }
}

/// Non-fatal finding about a definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub stage: String,
    pub message: String,
}

pub struct PipelineValidator;

impl PipelineValidator {
    /// Check a definition before it is run.
    ///
    /// Errors make the definition unrunnable. Warnings flag definitions that run
    /// but behave surprisingly, such as a stage depending on a stage declared
    /// after it (the dependency gate evaluates in declaration order, so that
    /// stage is always skipped).
    pub fn validate(
        pipeline: &PipelineDefinition,
    ) -> Result<Vec<ValidationWarning>, Vec<DefinitionError>> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if pipeline.id.trim().is_empty() {
            errors.push(DefinitionError::EmptyPipelineId);
        }

        let positions: HashMap<&str, usize> = pipeline
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        let mut seen = HashSet::new();
        for (index, stage) in pipeline.stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                errors.push(DefinitionError::EmptyStageName(index));
                continue;
            }
            if !seen.insert(stage.name.as_str()) {
                errors.push(DefinitionError::DuplicateStage(stage.name.clone()));
            }

            for dep in &stage.depends_on {
                match positions.get(dep.as_str()) {
                    None => errors.push(DefinitionError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dep.clone(),
                    }),
                    Some(&pos) if pos >= index => warnings.push(ValidationWarning {
                        stage: stage.name.clone(),
                        message: format!(
                            "depends on '{}' which is not declared before it; the stage will always be skipped",
                            dep
                        ),
                    }),
                    Some(_) => {}
                }
            }

            for step in &stage.steps {
                if step.name.trim().is_empty() {
                    errors.push(DefinitionError::EmptyStepName {
                        stage: stage.name.clone(),
                    });
                }
                if step.action.trim().is_empty() {
                    errors.push(DefinitionError::EmptyAction {
                        stage: stage.name.clone(),
                        step: step.name.clone(),
                    });
                    continue;
                }
                if let Err(message) = StepParams::from_step(step) {
                    errors.push(DefinitionError::InvalidParams {
                        stage: stage.name.clone(),
                        step: step.name.clone(),
                        message,
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(errors)
        }
    }
}
