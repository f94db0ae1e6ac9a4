//! Persisted registry of background tasks.
//!
//! Exports and material generations must survive navigation and process
//! restarts, so the registry mirrors every mutation to disk at
//! `{working_dir}/.slideflow/tasks.json`. On startup `restore_active` hands
//! back the tasks that were still in flight at last shutdown so their
//! pollers can be re-attached; a restart never orphans an in-flight export.
//!
//! Terminal tasks accumulate until explicitly cleared. List-growth management
//! is the UI collaborator's call, not ours.

use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use crate::task::{TaskHandle, TaskStatus};

/// Filter for `list`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub project_id: Option<String>,
    pub active_only: bool,
}

/// Disk-backed collection of background task handles.
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: RwLock<Vec<TaskHandle>>,
    storage_path: PathBuf,
}

impl TaskRegistry {
    /// Open the registry, loading any persisted tasks.
    pub async fn open(working_dir: &Path) -> Self {
        let storage_path = working_dir.join(".slideflow/tasks.json");

        let tasks = if storage_path.exists() {
            match Self::load_from_path(&storage_path) {
                Ok(tasks) => {
                    tracing::info!(
                        count = tasks.len(),
                        "loaded task registry from {}",
                        storage_path.display()
                    );
                    tasks
                }
                Err(e) => {
                    tracing::warn!(
                        "failed to load task registry from {}: {}, starting empty",
                        storage_path.display(),
                        e
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Self {
            tasks: RwLock::new(tasks),
            storage_path,
        }
    }

    fn load_from_path(path: &Path) -> Result<Vec<TaskHandle>, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    async fn save_to_disk(&self) -> Result<(), std::io::Error> {
        let tasks = self.tasks.read().await;

        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&*tasks)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.storage_path, contents)?;
        tracing::debug!("saved task registry to {}", self.storage_path.display());
        Ok(())
    }

    /// Insert a handle, or replace the stored one with the same id.
    /// Replacement respects status monotonicity: a persisted terminal status
    /// is never regressed by a stale update.
    pub async fn upsert(&self, handle: TaskHandle) {
        {
            let mut tasks = self.tasks.write().await;
            match tasks.iter_mut().find(|t| t.id == handle.id) {
                Some(existing) => {
                    if existing.status.can_advance_to(handle.status) {
                        *existing = handle;
                    } else {
                        tracing::warn!(
                            task_id = %handle.id,
                            from = %existing.status,
                            to = %handle.status,
                            "dropping stale registry update"
                        );
                    }
                }
                None => tasks.push(handle),
            }
        }
        if let Err(e) = self.save_to_disk().await {
            tracing::warn!("failed to persist task registry: {}", e);
        }
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskHandle> {
        self.tasks
            .read()
            .await
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
    }

    /// Tasks matching `filter`, newest first.
    pub async fn list(&self, filter: &TaskFilter) -> Vec<TaskHandle> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<TaskHandle> = tasks
            .iter()
            .filter(|t| {
                if let Some(project_id) = &filter.project_id {
                    if t.project_id.as_ref() != Some(project_id) {
                        return false;
                    }
                }
                !filter.active_only || t.is_active()
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched
    }

    /// Remove one task (user-initiated, any status).
    pub async fn remove(&self, task_id: &str) -> bool {
        let removed = {
            let mut tasks = self.tasks.write().await;
            let before = tasks.len();
            tasks.retain(|t| t.id != task_id);
            tasks.len() != before
        };
        if removed {
            if let Err(e) = self.save_to_disk().await {
                tracing::warn!("failed to persist task registry: {}", e);
            }
        }
        removed
    }

    /// Clear COMPLETED and FAILED tasks, returning how many were dropped.
    pub async fn clear_terminal(&self) -> usize {
        let dropped = {
            let mut tasks = self.tasks.write().await;
            let before = tasks.len();
            tasks.retain(|t| t.is_active());
            before - tasks.len()
        };
        if dropped > 0 {
            if let Err(e) = self.save_to_disk().await {
                tracing::warn!("failed to persist task registry: {}", e);
            }
        }
        dropped
    }

    /// Tasks that were active (PENDING/PROCESSING/RUNNING) at last shutdown.
    /// Called once at startup; the caller re-attaches a poller to each.
    pub async fn restore_active(&self) -> Vec<TaskHandle> {
        let active: Vec<TaskHandle> = self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| t.is_active())
            .cloned()
            .collect();
        if !active.is_empty() {
            tracing::info!(count = active.len(), "restoring pollers for active tasks");
        }
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::task::{ResourceKey, TaskKind};

    fn handle(id: &str, status: TaskStatus) -> TaskHandle {
        let mut h = TaskHandle::new(
            id,
            TaskKind::Export,
            ResourceKey::Global,
            Some("pr".into()),
        );
        h.status = status;
        h
    }

    #[tokio::test]
    async fn test_upsert_list_remove() {
        let temp = tempdir().unwrap();
        let registry = TaskRegistry::open(temp.path()).await;

        registry.upsert(handle("t1", TaskStatus::Pending)).await;
        registry.upsert(handle("t2", TaskStatus::Completed)).await;

        let all = registry.list(&TaskFilter::default()).await;
        assert_eq!(all.len(), 2);

        let active = registry
            .list(&TaskFilter {
                active_only: true,
                ..Default::default()
            })
            .await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "t1");

        assert!(registry.remove("t2").await);
        assert!(!registry.remove("t2").await);
        assert_eq!(registry.list(&TaskFilter::default()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_update_cannot_regress_terminal_status() {
        let temp = tempdir().unwrap();
        let registry = TaskRegistry::open(temp.path()).await;

        registry.upsert(handle("t1", TaskStatus::Completed)).await;
        registry.upsert(handle("t1", TaskStatus::Processing)).await;

        assert_eq!(
            registry.get("t1").await.unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_restore_active_after_reopen() {
        let temp = tempdir().unwrap();
        {
            let registry = TaskRegistry::open(temp.path()).await;
            registry.upsert(handle("running", TaskStatus::Running)).await;
            registry.upsert(handle("done", TaskStatus::Completed)).await;
        }

        // Simulated process restart: reopen from the same directory.
        let registry = TaskRegistry::open(temp.path()).await;
        let restored = registry.restore_active().await;
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].id, "running");

        // Terminal history survives too, until explicitly cleared.
        assert_eq!(registry.list(&TaskFilter::default()).await.len(), 2);
        assert_eq!(registry.clear_terminal().await, 1);
        assert_eq!(registry.list(&TaskFilter::default()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_project_filter() {
        let temp = tempdir().unwrap();
        let registry = TaskRegistry::open(temp.path()).await;

        let mut other = handle("t-other", TaskStatus::Pending);
        other.project_id = Some("different".into());
        registry.upsert(handle("t1", TaskStatus::Pending)).await;
        registry.upsert(other).await;

        let mine = registry
            .list(&TaskFilter {
                project_id: Some("pr".into()),
                active_only: false,
            })
            .await;
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, "t1");
    }
}
