//! Requirement history accumulator for AI refine calls.
//!
//! Every refine request carries the full, ordered prior history so the
//! backend interprets the newest instruction in light of everything already
//! requested ("make it shorter" ... "now also add a chart"). History is
//! append-only and scoped to one editing session; it is not persisted across
//! restarts (see DESIGN.md).

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::backend::Backend;
use crate::task::ResourceKey;

/// One editing session's refine channel for a resource.
pub struct RefineSession {
    backend: Arc<dyn Backend>,
    project_id: String,
    resource: ResourceKey,
    history: RwLock<Vec<String>>,
}

impl RefineSession {
    pub fn new(backend: Arc<dyn Backend>, project_id: impl Into<String>, resource: ResourceKey) -> Self {
        Self {
            backend,
            project_id: project_id.into(),
            resource,
            history: RwLock::new(Vec::new()),
        }
    }

    /// Submit a refine instruction. On success the instruction is appended to
    /// the history and the backend's confirmation message returned; on
    /// failure the history is left unchanged and the error propagates.
    pub async fn submit(&self, requirement: &str) -> anyhow::Result<String> {
        let requirement = requirement.trim();
        if requirement.is_empty() {
            anyhow::bail!("refine requirement is empty");
        }

        let previous = self.history.read().await.clone();
        let message = self
            .backend
            .refine(&self.project_id, &self.resource, requirement, &previous)
            .await?;

        self.history.write().await.push(requirement.to_string());
        tracing::debug!(
            resource = %self.resource,
            history_len = previous.len() + 1,
            "refine accepted"
        );
        Ok(message)
    }

    /// Ordered snapshot of the session's history.
    pub async fn history(&self) -> Vec<String> {
        self.history.read().await.clone()
    }
}
