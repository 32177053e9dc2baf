// External Collaborators
// Source control, deployment and notification interfaces used by the engine

use crate::error::CollaboratorError;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use uuid::Uuid;

/// Resolves the head commit of a branch
#[async_trait::async_trait]
pub trait CommitResolver: Send + Sync {
    async fn resolve_commit(
        &self,
        repository: &str,
        branch: &str,
    ) -> Result<String, CollaboratorError>;
}

/// Everything a deployer needs to roll out one application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub application: String,
    pub image: String,
    pub environment: String,
    pub replicas: u32,
    pub port: Option<u16>,
    pub namespace: Option<String>,
}

/// Acknowledgement returned by a deployer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReceipt {
    pub deployment_id: String,
    pub message: String,
}

/// Generates and applies deployment manifests
#[async_trait::async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, config: &DeploymentConfig)
        -> Result<DeploymentReceipt, CollaboratorError>;
}

/// Message handed to a notifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub run_id: Uuid,
    pub pipeline_id: String,
    pub environment: String,
    pub message: String,
}

/// Delivers notifications over one channel (chat, email, ...)
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name matched against a notify step's `channels`
    fn channel(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<(), CollaboratorError>;
}

/// Resolves commits with `git ls-remote`
pub struct GitCommitResolver {
    git: Option<PathBuf>,
}

impl GitCommitResolver {
    pub fn new() -> Self {
        Self {
            git: which::which("git").ok(),
        }
    }
}

impl Default for GitCommitResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CommitResolver for GitCommitResolver {
    async fn resolve_commit(
        &self,
        repository: &str,
        branch: &str,
    ) -> Result<String, CollaboratorError> {
        let git = self
            .git
            .as_ref()
            .ok_or_else(|| CollaboratorError::SourceControl("git executable not found".to_string()))?;

        let output = Command::new(git)
            .args(ls_remote_args(repository, branch))
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(CollaboratorError::SourceControl(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_ls_remote(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            CollaboratorError::SourceControl(format!(
                "branch '{}' not found in {}",
                branch, repository
            ))
        })
    }
}

/// `--` keeps a repository value such as `--upload-pack=..` from being read as an option
fn ls_remote_args(repository: &str, branch: &str) -> [String; 4] {
    [
        "ls-remote".to_string(),
        "--".to_string(),
        repository.to_string(),
        format!("refs/heads/{}", branch),
    ]
}

fn parse_ls_remote(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .find(|hash| !hash.is_empty())
        .map(str::to_string)
}

/// Notifier that writes messages to the process log
pub struct LogNotifier {
    channel: String,
}

impl LogNotifier {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn send(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        tracing::info!(
            channel = %self.channel,
            run_id = %notification.run_id,
            pipeline_id = %notification.pipeline_id,
            "{}",
            notification.message
        );
        Ok(())
    }
}
