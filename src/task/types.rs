//! Core task types: kinds, statuses, progress, and the handle itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier that single-flight guarding and reconciliation key on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "id")]
pub enum ResourceKey {
    /// One page of the presentation.
    Page(String),
    /// One uploaded reference file.
    File(String),
    /// Project-wide operations (batch description generation, export,
    /// outline, material generation).
    Global,
}

impl ResourceKey {
    pub fn page(id: impl Into<String>) -> Self {
        ResourceKey::Page(id.into())
    }

    pub fn file(id: impl Into<String>) -> Self {
        ResourceKey::File(id.into())
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKey::Page(id) => write!(f, "page/{}", id),
            ResourceKey::File(id) => write!(f, "file/{}", id),
            ResourceKey::Global => write!(f, "global"),
        }
    }
}

/// The kind of remote job a handle tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Description,
    Image,
    Export,
    Material,
    FileParse,
    Outline,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::Description => "description",
            TaskKind::Image => "image",
            TaskKind::Export => "export",
            TaskKind::Material => "material",
            TaskKind::FileParse => "file-parse",
            TaskKind::Outline => "outline",
        };
        f.write_str(s)
    }
}

/// Server-reported task status.
///
/// PROCESSING and RUNNING are both "in progress" - some backend workers
/// report one, some the other - and rank equally for transition purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Ordering rank along the monotonic lifecycle.
    fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Processing | TaskStatus::Running => 1,
            TaskStatus::Completed | TaskStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether a transition to `next` respects monotonicity. Staying on the
    /// same rank is allowed (PROCESSING <-> RUNNING and repeated reports of
    /// the same status), regression is not, and terminal states are final.
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Progress reported by the server while a task runs, plus warnings attached
/// to completed exports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Structured per-element failure details for export warnings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_details: Option<serde_json::Value>,
    /// Server-provided hint shown alongside a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
}

/// One outstanding remote job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHandle {
    /// Opaque server-assigned task id.
    pub id: String,
    pub kind: TaskKind,
    pub resource: ResourceKey,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Download link for completed exports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl TaskHandle {
    /// Create a handle for a freshly submitted job.
    pub fn new(
        id: impl Into<String>,
        kind: TaskKind,
        resource: ResourceKey,
        project_id: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            resource,
            status: TaskStatus::Pending,
            progress: None,
            error_message: None,
            download_url: None,
            created_at: Utc::now(),
            project_id,
        }
    }

    /// Apply a server-reported status, enforcing monotonicity. Returns false
    /// and leaves the handle unchanged if the transition would regress.
    pub fn advance(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_advance_to(next) {
            tracing::warn!(
                task_id = %self.id,
                from = %self.status,
                to = %next,
                "ignoring status regression"
            );
            return false;
        }
        self.status = next;
        true
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(TaskStatus::Pending.can_advance_to(TaskStatus::Processing));
        assert!(TaskStatus::Pending.can_advance_to(TaskStatus::Completed));
        assert!(TaskStatus::Processing.can_advance_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_advance_to(TaskStatus::Processing));
        assert!(TaskStatus::Running.can_advance_to(TaskStatus::Failed));

        assert!(!TaskStatus::Processing.can_advance_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_advance_to(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_advance_to(TaskStatus::Completed));
        assert!(TaskStatus::Completed.can_advance_to(TaskStatus::Completed));
    }

    #[test]
    fn test_handle_rejects_regression() {
        let mut handle = TaskHandle::new(
            "t1",
            TaskKind::Image,
            ResourceKey::page("p1"),
            Some("proj".into()),
        );
        assert!(handle.advance(TaskStatus::Processing));
        assert!(handle.advance(TaskStatus::Completed));
        assert!(!handle.advance(TaskStatus::Pending));
        assert_eq!(handle.status, TaskStatus::Completed);
    }

    #[test]
    fn test_status_wire_format() {
        let status: TaskStatus = serde_json::from_str("\"PROCESSING\"").unwrap();
        assert_eq!(status, TaskStatus::Processing);
        assert_eq!(
            serde_json::to_string(&TaskStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
    }

    #[test]
    fn test_task_kind_wire_format() {
        let kind: TaskKind = serde_json::from_str("\"file-parse\"").unwrap();
        assert_eq!(kind, TaskKind::FileParse);
    }
}
