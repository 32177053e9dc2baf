// Engine Configuration
// Defaults for step commands, timeouts, retries and run retention

use crate::ServiceResult;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the pipeline engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Command run by `build` steps without an explicit command
    pub build_command: String,
    /// Command run by `test` steps without an explicit command
    pub test_command: String,
    /// Timeout applied to steps that declare none (None = no timeout)
    pub default_step_timeout_secs: Option<u64>,
    /// Delay between retry attempts of a failing step
    pub retry_delay_ms: u64,
    /// Keep finished runs in the registry instead of serving them from the run store
    pub retain_completed_runs: bool,
    /// Upper bound on resolving a run's commit at submission
    pub commit_lookup_timeout_ms: u64,
    /// Working directory for step commands (default: current directory)
    pub working_dir: Option<PathBuf>,
    /// Root directory for the file store (default: ~/.local/share/roxid-pipelines)
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            build_command: "npm run build".to_string(),
            test_command: "npm test".to_string(),
            default_step_timeout_secs: None,
            retry_delay_ms: 1000,
            retain_completed_runs: false,
            commit_lookup_timeout_ms: 5000,
            working_dir: None,
            data_dir: default_data_dir(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> ServiceResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> ServiceResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn default_step_timeout(&self) -> Option<Duration> {
        self.default_step_timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn commit_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_lookup_timeout_ms)
    }

    /// Resolve the directory step commands run in
    pub fn resolve_working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

/// Platform data directory for persisted pipelines and runs
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("roxid-pipelines")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.build_command, "npm run build");
        assert_eq!(config.test_command, "npm test");
        assert!(!config.retain_completed_runs);
        assert_eq!(config.commit_lookup_timeout(), Duration::from_secs(5));
        assert_eq!(config.default_step_timeout(), None);
        assert!(config.data_dir.ends_with("roxid-pipelines"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_str(
            r#"
buildCommand: cargo build --release
defaultStepTimeoutSecs: 120
retryDelayMs: 0
"#,
        )
        .unwrap();

        assert_eq!(config.build_command, "cargo build --release");
        assert_eq!(config.test_command, "npm test");
        assert_eq!(config.default_step_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.retry_delay(), Duration::ZERO);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        fs::write(&path, "retainCompletedRuns: true\n").unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert!(config.retain_completed_runs);
    }
}
