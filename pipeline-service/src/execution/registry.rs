// Run Registry
// Concurrent map of in-flight (and retained) runs, keyed by run id

use crate::pipeline::models::{PipelineRun, RunStatus};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared state of one run.
///
/// The owning task is the only writer of the run record; it publishes
/// snapshots here. Cancellation and publishing take the same lock, so once a
/// cancel has been accepted no later snapshot can report the run as active.
pub struct RunHandle {
    run_id: Uuid,
    snapshot: RwLock<PipelineRun>,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

impl RunHandle {
    pub fn new(run: PipelineRun) -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            run_id: run.id,
            snapshot: RwLock::new(run),
            cancel: CancellationToken::new(),
            done,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Point-in-time copy of the run
    pub async fn snapshot(&self) -> PipelineRun {
        self.snapshot.read().await.clone()
    }

    /// Publish the owner's current record, folding in a pending cancellation
    pub async fn publish(&self, run: &mut PipelineRun) {
        let mut snapshot = self.snapshot.write().await;
        if self.cancel.is_cancelled() && run.status.is_cancellable() {
            run.status = RunStatus::Cancelled;
            run.log("Cancellation requested");
        }
        *snapshot = run.clone();
    }

    /// Flip a queued or running run to cancelled and signal its task.
    ///
    /// Returns the updated snapshot, or the current status when the run is
    /// already terminal.
    pub async fn cancel(&self) -> Result<PipelineRun, RunStatus> {
        let mut snapshot = self.snapshot.write().await;
        if !snapshot.status.is_cancellable() {
            return Err(snapshot.status);
        }
        snapshot.status = RunStatus::Cancelled;
        snapshot.log("Cancellation requested");
        self.cancel.cancel();
        Ok(snapshot.clone())
    }

    /// Mark the run as fully processed (final record persisted)
    pub fn mark_done(&self) {
        self.done.send_replace(true);
    }

    /// Wait until the owning task has finished with the run
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives as long as self, so this only ends once done is set
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Registry of runs known to this process
#[derive(Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<Uuid, Arc<RunHandle>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: Arc<RunHandle>) {
        let mut runs = self.runs.write().await;
        runs.insert(handle.run_id(), handle);
    }

    pub async fn get(&self, run_id: Uuid) -> Option<Arc<RunHandle>> {
        let runs = self.runs.read().await;
        runs.get(&run_id).cloned()
    }

    pub async fn remove(&self, run_id: Uuid) -> Option<Arc<RunHandle>> {
        let mut runs = self.runs.write().await;
        runs.remove(&run_id)
    }

    /// Snapshots of every registered run
    pub async fn snapshots(&self) -> Vec<PipelineRun> {
        let handles: Vec<Arc<RunHandle>> = {
            let runs = self.runs.read().await;
            runs.values().cloned().collect()
        };

        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.snapshot().await);
        }
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::models::{PipelineDefinition, TriggerInfo, TriggerKind};
    use std::collections::HashMap as Map;

    fn run() -> PipelineRun {
        let definition = PipelineDefinition {
            id: "p".to_string(),
            name: None,
            description: None,
            environment: "dev".to_string(),
            active: true,
            triggers: vec![],
            repository: None,
            default_branch: None,
            env: Map::new(),
            stages: vec![],
        };
        let trigger = TriggerInfo {
            triggered_by: "tester".to_string(),
            kind: TriggerKind::Manual,
            branch: None,
            commit: None,
        };
        PipelineRun::new(&definition, trigger, "dev".to_string())
    }

    #[tokio::test]
    async fn test_cancel_only_while_active() {
        let handle = RunHandle::new(run());

        let cancelled = handle.cancel().await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert!(handle.cancel_token().is_cancelled());

        assert_eq!(handle.cancel().await.unwrap_err(), RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_publish_after_cancel_keeps_cancelled() {
        let mut local = run();
        let handle = RunHandle::new(local.clone());
        handle.cancel().await.unwrap();

        local.start();
        handle.publish(&mut local).await;

        assert_eq!(local.status, RunStatus::Cancelled);
        assert_eq!(handle.snapshot().await.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_terminal_run_rejects_cancel() {
        let mut local = run();
        let handle = RunHandle::new(local.clone());
        local.status = RunStatus::Success;
        handle.publish(&mut local).await;

        assert_eq!(handle.cancel().await.unwrap_err(), RunStatus::Success);
        assert!(!handle.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_registry_keyed_isolation() {
        let registry = RunRegistry::new();
        let first = RunHandle::new(run());
        let second = RunHandle::new(run());
        registry.insert(first.clone()).await;
        registry.insert(second.clone()).await;

        first.cancel().await.unwrap();

        let other = registry.get(second.run_id()).await.unwrap();
        assert_eq!(other.snapshot().await.status, RunStatus::Queued);
        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.snapshots().await.len(), 2);

        registry.remove(first.run_id()).await;
        assert!(registry.get(first.run_id()).await.is_none());
    }

    #[tokio::test]
    async fn test_wait_returns_once_done() {
        let handle = RunHandle::new(run());
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };

        handle.mark_done();
        waiter.await.unwrap();
    }
}
