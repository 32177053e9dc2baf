// Typed Step Parameters
// Decodes the free-form parameter bag of a step according to its action

use crate::pipeline::models::{ParamBag, StepDefinition};

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Built-in step actions; anything else is a custom action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Build,
    Test,
    Deploy,
    Notify,
    Custom(String),
}

impl ActionKind {
    pub fn parse(action: &str) -> Self {
        match action {
            "build" => ActionKind::Build,
            "test" => ActionKind::Test,
            "deploy" => ActionKind::Deploy,
            "notify" => ActionKind::Notify,
            other => ActionKind::Custom(other.to_string()),
        }
    }
}

/// Parameters for `build` and `test` steps
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandParams {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Paths recorded as run artifacts once the command succeeds
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// Parameters for `deploy` steps
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployParams {
    #[serde(default)]
    pub application: Option<String>,
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Overrides the run's target environment
    #[serde(default)]
    pub environment: Option<String>,
}

/// Parameters for `notify` steps
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyParams {
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Parameters for custom steps
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParams {
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// A step's parameters decoded for its action
#[derive(Debug, Clone)]
pub enum StepParams {
    Build(CommandParams),
    Test(CommandParams),
    Deploy(DeployParams),
    Notify(NotifyParams),
    Custom(ScriptParams),
}

fn default_replicas() -> u32 {
    1
}

/// Decode a parameter bag into a typed parameter struct
pub fn decode<T: DeserializeOwned>(params: &ParamBag) -> Result<T, String> {
    let value = serde_json::Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    serde_json::from_value(value).map_err(|e| e.to_string())
}

impl StepParams {
    pub fn from_step(step: &StepDefinition) -> Result<Self, String> {
        let params = &step.params;
        Ok(match ActionKind::parse(&step.action) {
            ActionKind::Build => StepParams::Build(decode(params)?),
            ActionKind::Test => StepParams::Test(decode(params)?),
            ActionKind::Deploy => StepParams::Deploy(decode(params)?),
            ActionKind::Notify => StepParams::Notify(decode(params)?),
            ActionKind::Custom(_) => StepParams::Custom(decode(params)?),
        })
    }
}
