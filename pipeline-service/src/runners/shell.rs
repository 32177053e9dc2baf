// Shell Runner
// Executes step commands through the platform shell and captures their output

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Output collected during command execution
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    /// Standard output lines
    pub stdout: Vec<String>,
    /// Standard error lines
    pub stderr: Vec<String>,
    /// Exit code (None if the process was killed by a signal)
    pub exit_code: Option<i32>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Callback for handling output lines in real-time (line, is_stderr)
pub type OutputCallback = Box<dyn Fn(&str, bool) + Send + Sync>;

/// Shell runner for executing step commands
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    fn shell_command() -> (&'static str, &'static [&'static str]) {
        if cfg!(target_os = "windows") {
            ("cmd", &["/C"])
        } else {
            ("sh", &["-c"])
        }
    }

    /// Run a command line, streaming each line to `on_output` as it arrives.
    ///
    /// The child is killed if the returned future is dropped, so callers can
    /// bound it with a timeout or abort it on cancellation.
    pub async fn run(
        &self,
        command: &str,
        env: &HashMap<String, String>,
        working_dir: &Path,
        on_output: Option<OutputCallback>,
    ) -> std::io::Result<ShellOutput> {
        let (shell_cmd, shell_args) = Self::shell_command();

        let mut cmd = Command::new(shell_cmd);
        cmd.args(shell_args);
        cmd.arg(command);
        cmd.current_dir(working_dir);
        cmd.envs(env);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;

        let on_output = std::sync::Arc::new(on_output);
        let on_output_stdout = on_output.clone();
        let on_output_stderr = on_output;

        // Read output streams concurrently
        let stdout_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut output = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(cb) = on_output_stdout.as_ref() {
                    cb(&line, false);
                }
                output.push(line);
            }
            output
        });

        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut output = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(cb) = on_output_stderr.as_ref() {
                    cb(&line, true);
                }
                output.push(line);
            }
            output
        });

        let status = child.wait().await?;

        Ok(ShellOutput {
            stdout: stdout_handle.await.unwrap_or_default(),
            stderr: stderr_handle.await.unwrap_or_default(),
            exit_code: status.code(),
        })
    }
}
