//! Request and response types for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::orchestrator::ExportFormat;
use crate::task::TaskHandle;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend_url: String,
}

/// Response wrapping a freshly created task.
#[derive(Debug, Serialize)]
pub struct TaskCreatedResponse {
    pub task: TaskHandle,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub format: ExportFormat,
    /// Subset of pages to export; omitted means all.
    #[serde(default)]
    pub page_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct OutlineRequest {
    pub idea: String,
}

#[derive(Debug, Deserialize)]
pub struct MaterialRequest {
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadFileRequest {
    /// Client-assigned id; generated server-side when omitted.
    #[serde(default)]
    pub file_id: Option<String>,
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct RefineRequest {
    pub requirement: String,
}

#[derive(Debug, Serialize)]
pub struct RefineResult {
    pub message: String,
    pub history: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub cleared: usize,
}

#[derive(Debug, Deserialize)]
pub struct BusyQuery {
    /// "page", "file", or "global".
    pub scope: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BusyResponse {
    pub busy: bool,
}
