//! Typed extraction of result payloads from COMPLETED tasks.
//!
//! A COMPLETED status with a missing expected field is an error in its own
//! right (`TaskError::MissingResult`), never silent success.

use serde_json::Value;

use super::types::TaskKind;
use crate::error::TaskError;

/// Result payload of a completed task, typed per task kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    /// Generated page image.
    Image { image_url: String },
    /// Finished export ready for download.
    Export { download_url: String },
    /// Generated materials; ids may be absent when the server only updates
    /// the library in place.
    Material { material_ids: Vec<String> },
    /// Reference file parsed and indexed.
    FileParsed,
    /// Page descriptions written server-side; a sync picks them up.
    Descriptions,
    /// Outline written server-side; a sync picks it up.
    Outline,
}

fn require_str(result: Option<&Value>, field: &'static str) -> Result<String, TaskError> {
    result
        .and_then(|r| r.get(field))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or(TaskError::MissingResult { field })
}

/// Extract the typed payload for `kind` from the server's `result` object.
pub fn extract_result(kind: TaskKind, result: Option<&Value>) -> Result<TaskResult, TaskError> {
    match kind {
        TaskKind::Image => Ok(TaskResult::Image {
            image_url: require_str(result, "image_url")?,
        }),
        TaskKind::Export => Ok(TaskResult::Export {
            download_url: require_str(result, "download_url")?,
        }),
        TaskKind::Material => {
            let material_ids = result
                .and_then(|r| r.get("material_ids"))
                .and_then(|v| v.as_array())
                .map(|ids| {
                    ids.iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            Ok(TaskResult::Material { material_ids })
        }
        TaskKind::FileParse => Ok(TaskResult::FileParsed),
        TaskKind::Description => Ok(TaskResult::Descriptions),
        TaskKind::Outline => Ok(TaskResult::Outline),
    }
}
