// Scripted executors and definition builders shared by the execution tests

use crate::config::EngineConfig;
use crate::pipeline::models::{
    ParamBag, PipelineDefinition, StageDefinition, StepDefinition, StepRun,
};
use crate::runners::{ExecutorRegistry, StepContext, StepError, StepExecutor};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const SCRIPTED: &str = "scripted";

/// Executor driven by its step's params:
/// `fail` (message), `failTimes` (fail the first n attempts), `sleepMs`,
/// `slowTimes` (only sleep on the first n attempts), `panic` (bool) and
/// `artifacts` (names recorded in outputs).
#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    attempts: Mutex<HashMap<String, u32>>,
}

#[async_trait::async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        step_run: &mut StepRun,
        _ctx: &StepContext,
    ) -> Result<(), StepError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(step.name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        step_run.log(format!("ran {} (attempt {})", step.name, attempt));

        let slow = step
            .params
            .get("slowTimes")
            .and_then(|v| v.as_u64())
            .map_or(true, |times| u64::from(attempt) <= times);
        if let Some(ms) = step.params.get("sleepMs").and_then(|v| v.as_u64()) {
            if slow {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
        if step.params.get("panic").and_then(|v| v.as_bool()) == Some(true) {
            panic!("scripted panic in {}", step.name);
        }
        if let Some(times) = step.params.get("failTimes").and_then(|v| v.as_u64()) {
            if u64::from(attempt) <= times {
                return Err(StepError::Failed(format!("flaky failure #{}", attempt)));
            }
        }
        if let Some(message) = step.params.get("fail").and_then(|v| v.as_str()) {
            return Err(StepError::Failed(message.to_string()));
        }
        if let Some(artifacts) = step.params.get("artifacts") {
            step_run
                .outputs
                .insert("artifacts".to_string(), artifacts.clone());
        }
        Ok(())
    }
}

pub(crate) fn registry() -> Arc<ExecutorRegistry> {
    Arc::new(ExecutorRegistry::new().register(SCRIPTED, Arc::new(ScriptedExecutor::default())))
}

pub(crate) fn config() -> Arc<EngineConfig> {
    Arc::new(EngineConfig {
        retry_delay_ms: 0,
        working_dir: std::env::current_dir().ok(),
        ..EngineConfig::default()
    })
}

pub(crate) fn step(name: &str, params: serde_json::Value) -> StepDefinition {
    let params: ParamBag = match params {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => ParamBag::new(),
    };
    StepDefinition {
        name: name.to_string(),
        action: SCRIPTED.to_string(),
        params,
        condition: None,
        timeout_secs: None,
        retries: None,
        env: HashMap::new(),
    }
}

pub(crate) fn ok_step(name: &str) -> StepDefinition {
    step(name, serde_json::json!({}))
}

pub(crate) fn stage(name: &str, steps: Vec<StepDefinition>, depends_on: &[&str]) -> StageDefinition {
    StageDefinition {
        name: name.to_string(),
        steps,
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        continue_on_error: false,
        timeout_secs: None,
        retries: 0,
        category: None,
    }
}

pub(crate) fn definition(id: &str, stages: Vec<StageDefinition>) -> PipelineDefinition {
    PipelineDefinition {
        id: id.to_string(),
        name: None,
        description: None,
        environment: "staging".to_string(),
        active: true,
        triggers: vec![],
        repository: None,
        default_branch: None,
        env: HashMap::new(),
        stages,
    }
}
