// Pipeline and Run Stores
// Persistence collaborators with in-memory and file-backed implementations

use crate::error::CollaboratorError;
use crate::pipeline::models::{PipelineDefinition, PipelineRun};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Source of pipeline definitions
#[async_trait::async_trait]
pub trait PipelineStore: Send + Sync {
    async fn load_pipeline(
        &self,
        pipeline_id: &str,
    ) -> Result<Option<PipelineDefinition>, CollaboratorError>;
}

/// Durable home of run records
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    async fn persist_run(&self, run: &PipelineRun) -> Result<(), CollaboratorError>;

    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>, CollaboratorError>;

    async fn list_runs(&self) -> Result<Vec<PipelineRun>, CollaboratorError>;
}

/// In-memory store for pipelines and runs
#[derive(Default, Clone)]
pub struct MemoryStore {
    pipelines: Arc<RwLock<HashMap<String, PipelineDefinition>>>,
    runs: Arc<RwLock<HashMap<Uuid, PipelineRun>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_pipeline(&self, pipeline: PipelineDefinition) {
        let mut pipelines = self.pipelines.write().await;
        pipelines.insert(pipeline.id.clone(), pipeline);
    }
}

#[async_trait::async_trait]
impl PipelineStore for MemoryStore {
    async fn load_pipeline(
        &self,
        pipeline_id: &str,
    ) -> Result<Option<PipelineDefinition>, CollaboratorError> {
        let pipelines = self.pipelines.read().await;
        Ok(pipelines.get(pipeline_id).cloned())
    }
}

#[async_trait::async_trait]
impl RunStore for MemoryStore {
    async fn persist_run(&self, run: &PipelineRun) -> Result<(), CollaboratorError> {
        let mut runs = self.runs.write().await;
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>, CollaboratorError> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).cloned())
    }

    async fn list_runs(&self) -> Result<Vec<PipelineRun>, CollaboratorError> {
        let runs = self.runs.read().await;
        Ok(runs.values().cloned().collect())
    }
}

/// File-backed store.
///
/// Pipelines are read from `<root>/pipelines/<id>.yaml`; runs are written as
/// `<root>/runs/<run-id>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pipelines_dir(&self) -> PathBuf {
        self.root.join("pipelines")
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    /// Path of a definition file; ids that would leave `pipelines/` are rejected
    fn pipeline_path(&self, pipeline_id: &str) -> Result<PathBuf, CollaboratorError> {
        let escapes = pipeline_id.is_empty()
            || pipeline_id == "."
            || pipeline_id == ".."
            || pipeline_id.contains(['/', '\\'])
            || Path::new(pipeline_id).is_absolute();
        if escapes {
            return Err(CollaboratorError::Storage(format!(
                "invalid pipeline id '{}'",
                pipeline_id
            )));
        }
        Ok(self.pipelines_dir().join(format!("{}.yaml", pipeline_id)))
    }

    fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir().join(format!("{}.json", run_id))
    }

    /// Save a definition so later runs can load it by id
    pub fn save_pipeline(&self, pipeline: &PipelineDefinition) -> Result<(), CollaboratorError> {
        let path = self.pipeline_path(&pipeline.id)?;
        fs::create_dir_all(self.pipelines_dir())?;
        let content = serde_yaml::to_string(pipeline)
            .map_err(|e| CollaboratorError::Storage(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PipelineStore for FileStore {
    async fn load_pipeline(
        &self,
        pipeline_id: &str,
    ) -> Result<Option<PipelineDefinition>, CollaboratorError> {
        let path = self.pipeline_path(pipeline_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let pipeline = serde_yaml::from_str(&content)
            .map_err(|e| CollaboratorError::Storage(format!("{}: {}", path.display(), e)))?;
        Ok(Some(pipeline))
    }
}

#[async_trait::async_trait]
impl RunStore for FileStore {
    async fn persist_run(&self, run: &PipelineRun) -> Result<(), CollaboratorError> {
        tokio::fs::create_dir_all(self.runs_dir()).await?;
        let content = serde_json::to_vec_pretty(run)
            .map_err(|e| CollaboratorError::Storage(e.to_string()))?;

        // Write then rename so readers never observe a partial record
        let path = self.run_path(run.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>, CollaboratorError> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read(&path).await?;
        let run = serde_json::from_slice(&content)
            .map_err(|e| CollaboratorError::Storage(format!("{}: {}", path.display(), e)))?;
        Ok(Some(run))
    }

    async fn list_runs(&self) -> Result<Vec<PipelineRun>, CollaboratorError> {
        let dir = self.runs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<PipelineRun>(&content) {
                Ok(run) => runs.push(run),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable run record")
                }
            }
        }
        Ok(runs)
    }
}
