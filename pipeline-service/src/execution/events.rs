// Execution Events
// Progress reporting and event types for pipeline runs

use crate::pipeline::models::{RunStatus, StageStatus, StepStatus};

use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while runs are driven. Every event carries its run id so one
/// channel can observe many concurrent runs.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run record created and registered
    RunQueued { run_id: Uuid, pipeline_id: String },

    /// Run started driving its stages
    RunStarted {
        run_id: Uuid,
        pipeline_id: String,
        total_stages: usize,
    },

    /// Run reached a terminal status and was handed to persistence
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
        duration: Duration,
    },

    /// Stage execution started
    StageStarted {
        run_id: Uuid,
        stage_name: String,
        total_steps: usize,
    },

    /// Stage execution completed
    StageCompleted {
        run_id: Uuid,
        stage_name: String,
        status: StageStatus,
        duration: Duration,
    },

    /// Stage was skipped by the dependency gate
    StageSkipped {
        run_id: Uuid,
        stage_name: String,
        reason: String,
    },

    /// Step execution started
    StepStarted {
        run_id: Uuid,
        stage_name: String,
        step_name: String,
        step_index: usize,
    },

    /// Step output (stdout/stderr)
    StepOutput {
        run_id: Uuid,
        stage_name: String,
        step_name: String,
        output: String,
        is_error: bool,
    },

    /// A failed attempt will be retried
    StepRetrying {
        run_id: Uuid,
        stage_name: String,
        step_name: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },

    /// Step execution completed
    StepCompleted {
        run_id: Uuid,
        stage_name: String,
        step_name: String,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        error: Option<String>,
    },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            ExecutionEvent::RunQueued { run_id, .. }
            | ExecutionEvent::RunStarted { run_id, .. }
            | ExecutionEvent::RunCompleted { run_id, .. }
            | ExecutionEvent::StageStarted { run_id, .. }
            | ExecutionEvent::StageCompleted { run_id, .. }
            | ExecutionEvent::StageSkipped { run_id, .. }
            | ExecutionEvent::StepStarted { run_id, .. }
            | ExecutionEvent::StepOutput { run_id, .. }
            | ExecutionEvent::StepRetrying { run_id, .. }
            | ExecutionEvent::StepCompleted { run_id, .. } => *run_id,
        }
    }
}

/// Extension trait for sending events through an optional sender
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(tx) = self {
            // A dropped receiver only means nobody is watching
            let _ = tx.send(event);
        }
    }
}
