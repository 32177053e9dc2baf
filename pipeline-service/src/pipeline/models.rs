use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Free-form step parameters as declared in the pipeline definition
pub type ParamBag = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub environment: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<Trigger>,
    /// Repository used to stamp the commit on new runs
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub stages: Vec<StageDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDefinition {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retries: u32,
    /// Informational only
    #[serde(default, rename = "type")]
    pub category: Option<StageCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub name: String,
    pub action: String,
    #[serde(default)]
    pub params: ParamBag,
    /// Evaluated by whoever prepares the definition, never by the engine
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Overrides the stage retry budget when set
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageCategory {
    Build,
    Test,
    Security,
    Deploy,
    Notify,
}

/// When an external scheduler or webhook layer should start the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Push {
        #[serde(default)]
        branches: Vec<String>,
    },
    PullRequest {
        #[serde(default)]
        branches: Vec<String>,
    },
    Schedule {
        cron: String,
    },
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Schedule,
    Manual,
}

fn default_active() -> bool {
    true
}

impl PipelineDefinition {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl StageDefinition {
    /// Retry budget for a step, preferring the step's own declaration
    pub fn retries_for(&self, step: &StepDefinition) -> u32 {
        step.retries.unwrap_or(self.retries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl RunStatus {
    pub fn is_cancellable(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// Who or what started a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInfo {
    pub triggered_by: String,
    pub kind: TriggerKind,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

/// Caller-supplied options for a new run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub manual: bool,
    /// Set by webhook or scheduler layers; `manual` wins when both are given
    #[serde(default)]
    pub trigger: Option<TriggerKind>,
}

impl RunOptions {
    pub fn trigger_kind(&self) -> TriggerKind {
        if self.manual {
            TriggerKind::Manual
        } else {
            self.trigger.unwrap_or(TriggerKind::Push)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub name: String,
    pub stage: String,
    pub step: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub trigger: TriggerInfo,
    pub environment: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub stages: Vec<StageRun>,
    pub logs: Vec<String>,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRun {
    pub name: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub steps: Vec<StepRun>,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRun {
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub logs: Vec<String>,
    #[serde(default)]
    pub outputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub attempts: u32,
}

fn elapsed_ms(start: Option<DateTime<Utc>>, end: DateTime<Utc>) -> Option<u64> {
    start.map(|s| (end - s).num_milliseconds().max(0) as u64)
}

impl PipelineRun {
    /// Create a queued run with a pending record for every declared stage and step
    pub fn new(definition: &PipelineDefinition, trigger: TriggerInfo, environment: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id: definition.id.clone(),
            pipeline_name: definition.display_name().to_string(),
            status: RunStatus::Queued,
            trigger,
            environment,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            stages: definition.stages.iter().map(StageRun::pending).collect(),
            logs: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(message.into());
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Stamp completion time and duration; the status is left to the caller
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = elapsed_ms(self.started_at.or(Some(self.created_at)), now);
    }
}

impl StageRun {
    pub fn pending(definition: &StageDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            steps: definition.steps.iter().map(StepRun::pending).collect(),
            logs: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, status: StageStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = elapsed_ms(self.started_at, now);
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = StageStatus::Skipped;
        self.logs.push(reason.into());
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(message.into());
    }
}

impl StepRun {
    pub fn pending(definition: &StepDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            logs: Vec::new(),
            outputs: HashMap::new(),
            attempts: 0,
        }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, status: StepStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = elapsed_ms(self.started_at, now);
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(message.into());
    }

    pub fn log_error(&mut self, message: &str) {
        self.logs.push(format!("[error] {}", message));
    }
}
