//! The project aggregate: pages, reference files, and materials.
//!
//! One mutable structure owns everything the editor shows. All server-driven
//! mutation funnels through `apply_snapshot` (which reconciles against
//! locally-pending ids) or the explicit local-edit setters; reads hand out
//! cloned snapshots, never references into the store.
//!
//! Page and file sub-states are derived from content presence plus explicit
//! in-flight flags. No status enum is persisted that content could drift out
//! of sync with.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::merge::{reconcile, Keyed};

/// One slide page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_image_path: Option<String>,
}

/// An uploaded reference file. `parsed_content` presence is what "parsed"
/// means; there is no separate status field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFile {
    pub id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_content: Option<String>,
}

/// A generated material (image or text snippet) in the project library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// The project aggregate as served by the backend and held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(default)]
    pub files: Vec<ReferenceFile>,
    #[serde(default)]
    pub materials: Vec<Material>,
}

impl Keyed for Page {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for ReferenceFile {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for Material {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Stage of a page, derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageStage {
    Draft,
    DescriptionReady,
    Generating,
    ImageReady,
    Failed,
}

/// Derive the display stage for a page from its content plus the caller's
/// in-flight and last-failure flags.
pub fn page_stage(page: &Page, in_flight: bool, failed: bool) -> PageStage {
    if page.description_content.is_none() {
        return PageStage::Draft;
    }
    if in_flight {
        return PageStage::Generating;
    }
    if failed {
        return PageStage::Failed;
    }
    if page.generated_image_path.is_some() {
        PageStage::ImageReady
    } else {
        PageStage::DescriptionReady
    }
}

/// Local edits applied to a page without a round trip.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageEdit {
    pub title: Option<String>,
    pub description_content: Option<String>,
}

#[derive(Debug, Default)]
struct ProjectInner {
    project: Option<Project>,
    /// Ids created or triggered locally that the server read path may not
    /// reflect yet. Protected by reconciliation until confirmed.
    pending_ids: HashSet<String>,
}

/// Store owning the project aggregate.
#[derive(Debug, Default)]
pub struct ProjectStore {
    inner: RwLock<ProjectInner>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cloned snapshot of the current project, if one is loaded.
    pub async fn snapshot(&self) -> Option<Project> {
        self.inner.read().await.project.clone()
    }

    pub async fn pending_ids(&self) -> HashSet<String> {
        self.inner.read().await.pending_ids.clone()
    }

    /// Replace the aggregate wholesale (initial load / project switch).
    /// Pending ids from the previous project are discarded.
    pub async fn replace(&self, project: Project) {
        let mut inner = self.inner.write().await;
        inner.project = Some(project);
        inner.pending_ids.clear();
    }

    /// Fold an authoritative server snapshot into the store. Entries in the
    /// pending set that the snapshot does not contain keep their local copy;
    /// everything else the server wins. Confirmed pending ids are cleared.
    pub async fn apply_snapshot(&self, server: Project) {
        let mut inner = self.inner.write().await;
        let pending = inner.pending_ids.clone();

        // Captured before the merge: the merged aggregate also contains the
        // retained pending entries, which must not count as confirmation.
        let server_ids: HashSet<String> = server
            .pages
            .iter()
            .map(|p| p.id.clone())
            .chain(server.files.iter().map(|f| f.id.clone()))
            .chain(server.materials.iter().map(|m| m.id.clone()))
            .collect();

        let merged = match inner.project.take() {
            Some(local) if local.id == server.id => Project {
                pages: reconcile(&server.pages, &local.pages, &pending),
                files: reconcile(&server.files, &local.files, &pending),
                materials: reconcile(&server.materials, &local.materials, &pending),
                ..server
            },
            _ => server,
        };

        // A pending id the server now reports is confirmed.
        inner.pending_ids.retain(|id| !server_ids.contains(id));
        inner.project = Some(merged);
    }

    /// Mark an id as locally pending so reconciliation retains it.
    pub async fn mark_pending(&self, id: impl Into<String>) {
        self.inner.write().await.pending_ids.insert(id.into());
    }

    /// Drop pending protection for an id (e.g. the triggering job failed).
    pub async fn clear_pending(&self, id: &str) {
        self.inner.write().await.pending_ids.remove(id);
    }

    /// Register a file the UI just uploaded, ahead of server visibility.
    /// The id is marked pending so the next reconciliation keeps it.
    pub async fn add_file(&self, file: ReferenceFile) {
        let mut inner = self.inner.write().await;
        inner.pending_ids.insert(file.id.clone());
        if let Some(project) = inner.project.as_mut() {
            if !project.files.iter().any(|f| f.id == file.id) {
                project.files.push(file);
            }
        }
    }

    /// Apply a local edit to a page. Returns false if the page is unknown.
    pub async fn update_page_local(&self, page_id: &str, edit: PageEdit) -> bool {
        let mut inner = self.inner.write().await;
        let Some(project) = inner.project.as_mut() else {
            return false;
        };
        let Some(page) = project.pages.iter_mut().find(|p| p.id == page_id) else {
            return false;
        };
        if let Some(title) = edit.title {
            page.title = title;
        }
        if let Some(description) = edit.description_content {
            page.description_content = Some(description);
        }
        true
    }

    /// Record a freshly generated image URL on a page.
    pub async fn set_page_image(&self, page_id: &str, image_url: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(project) = inner.project.as_mut() else {
            return false;
        };
        let Some(page) = project.pages.iter_mut().find(|p| p.id == page_id) else {
            return false;
        };
        page.generated_image_path = Some(image_url.to_string());
        true
    }
}
