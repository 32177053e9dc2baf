// Output formatting helpers for CLI commands

use pipeline_service::{RunStatus, StageStatus, StepStatus};

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

/// Print a check/pass item
pub fn check(message: &str) {
    eprintln!("\x1b[32m  \u{2713}\x1b[0m {}", message);
}

/// Print a warning message
pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

/// Print an info message
pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

/// Print a dim/muted message
pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

pub fn dim_success(message: &str) {
    eprintln!("\x1b[32m{}\x1b[0m", message);
}

pub fn dim_failure(message: &str) {
    eprintln!("\x1b[31m{}\x1b[0m", message);
}

/// Print a stage header
pub fn stage_header(name: &str, total_steps: usize) {
    eprintln!("\x1b[1;34m  Stage\x1b[0m '{}' ({} steps)", name, total_steps);
}

/// Print step output (indented)
pub fn step_output(line: &str) {
    println!("        | {}", line);
}

/// Print step error output (indented, red)
pub fn step_error(line: &str) {
    eprintln!("\x1b[31m        | {}\x1b[0m", line);
}

/// Print a header line
pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}

pub fn run_status_label(status: RunStatus) -> String {
    let color = match status {
        RunStatus::Success => "32",
        RunStatus::Failed => "31",
        RunStatus::Cancelled => "33",
        RunStatus::Queued | RunStatus::Running => "36",
    };
    format!("\x1b[{}m{:<9}\x1b[0m", color, status)
}

pub fn stage_symbol(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Success => "OK",
        StageStatus::Failed => "FAIL",
        StageStatus::Skipped => "SKIP",
        StageStatus::Running => "RUN",
        StageStatus::Pending => "-",
    }
}

pub fn step_symbol(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Success => "OK",
        StepStatus::Failed => "FAIL",
        StepStatus::Skipped => "SKIP",
        StepStatus::Running => "RUN",
        StepStatus::Pending => "-",
    }
}
