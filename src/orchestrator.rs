//! Orchestrator: the flow behind every generation, refinement, export, and
//! file-parse action.
//!
//! One submission path serves every job kind: the single-flight guard admits
//! or rejects, the backend creates the job, a handle lands in the registry,
//! a poll loop drives it, and the outcome is folded back into the registry
//! and the project aggregate. Guard release and poll teardown share one exit
//! (`drive` returning drops the permit and the cancellation entry), so no
//! terminal path can leave a resource locked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, JobRequest};
use crate::error::TaskError;
use crate::guard::{FlightPermit, SingleFlight};
use crate::poll::{PollConfig, PollOutcome, Poller};
use crate::project::{page_stage, PageStage, Project, ProjectStore, ReferenceFile};
use crate::refine::RefineSession;
use crate::registry::{TaskFilter, TaskRegistry};
use crate::task::{
    extract_result, ResourceKey, TaskHandle, TaskKind, TaskResult, TaskStatus,
};

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    Pptx,
    Pdf,
    EditablePptx,
}

impl ExportFormat {
    fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Pptx => "pptx",
            ExportFormat::Pdf => "pdf",
            ExportFormat::EditablePptx => "editable-pptx",
        }
    }
}

/// Coordinates backend jobs against the shared project state.
pub struct Orchestrator {
    backend: Arc<dyn Backend>,
    guard: SingleFlight,
    registry: Arc<TaskRegistry>,
    project: Arc<ProjectStore>,
    poll_config: PollConfig,
    project_id: RwLock<Option<String>>,
    refine_session: RwLock<Option<Arc<RefineSession>>>,
    /// Live cancellation tokens, one per active poll loop.
    cancels: Mutex<HashMap<String, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<TaskRegistry>,
        poll_config: PollConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            guard: SingleFlight::new(),
            registry,
            project: Arc::new(ProjectStore::new()),
            poll_config,
            project_id: RwLock::new(None),
            refine_session: RwLock::new(None),
            cancels: Mutex::new(HashMap::new()),
        })
    }

    /// Load a project and make it current. Starts a fresh refine session.
    pub async fn open_project(self: &Arc<Self>, project_id: &str) -> anyhow::Result<Project> {
        let project = self.fetch_snapshot(project_id).await?;
        self.project.replace(project.clone()).await;
        *self.project_id.write().await = Some(project_id.to_string());
        *self.refine_session.write().await = Some(Arc::new(RefineSession::new(
            Arc::clone(&self.backend),
            project_id,
            ResourceKey::Global,
        )));
        tracing::info!(project_id, pages = project.pages.len(), "project opened");
        Ok(project)
    }

    async fn current_project_id(&self) -> Result<String, TaskError> {
        self.project_id
            .read()
            .await
            .clone()
            .ok_or_else(|| TaskError::Submission("no project open".into()))
    }

    /// Snapshot of the current project.
    pub async fn project_snapshot(&self) -> Option<Project> {
        self.project.snapshot().await
    }

    pub fn project_store(&self) -> &Arc<ProjectStore> {
        &self.project
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Whether a resource currently has a job in flight.
    pub fn is_busy(&self, key: &ResourceKey) -> bool {
        self.guard.is_busy(key)
    }

    /// Derived display stage per page: content presence from the snapshot,
    /// in-flight from the guard, last failure from the newest registry task
    /// for that page.
    pub async fn page_stages(&self) -> HashMap<String, PageStage> {
        let Some(project) = self.project.snapshot().await else {
            return HashMap::new();
        };
        // Newest first, so the first match per resource is the latest word.
        let tasks = self.registry.list(&TaskFilter::default()).await;

        let mut stages = HashMap::new();
        for page in &project.pages {
            let key = ResourceKey::page(&page.id);
            let in_flight = self.guard.is_busy(&key);
            let failed = tasks
                .iter()
                .find(|t| t.resource == key)
                .map(|t| t.status == TaskStatus::Failed)
                .unwrap_or(false);
            stages.insert(page.id.clone(), page_stage(page, in_flight, failed));
        }
        stages
    }

    // ==================== Submission flows ====================

    pub async fn generate_page_description(
        self: &Arc<Self>,
        page_id: &str,
    ) -> Result<TaskHandle, TaskError> {
        self.submit(
            TaskKind::Description,
            ResourceKey::page(page_id),
            json!({ "page_id": page_id }),
        )
        .await
    }

    pub async fn generate_all_descriptions(self: &Arc<Self>) -> Result<TaskHandle, TaskError> {
        self.submit(TaskKind::Description, ResourceKey::Global, json!(null))
            .await
    }

    pub async fn generate_page_image(
        self: &Arc<Self>,
        page_id: &str,
    ) -> Result<TaskHandle, TaskError> {
        self.submit(
            TaskKind::Image,
            ResourceKey::page(page_id),
            json!({ "page_id": page_id }),
        )
        .await
    }

    pub async fn generate_outline(self: &Arc<Self>, idea: &str) -> Result<TaskHandle, TaskError> {
        self.submit(
            TaskKind::Outline,
            ResourceKey::Global,
            json!({ "idea": idea }),
        )
        .await
    }

    pub async fn export(
        self: &Arc<Self>,
        format: ExportFormat,
        page_ids: Option<Vec<String>>,
    ) -> Result<TaskHandle, TaskError> {
        self.submit(
            TaskKind::Export,
            ResourceKey::Global,
            json!({ "format": format.as_str(), "page_ids": page_ids }),
        )
        .await
    }

    pub async fn generate_material(self: &Arc<Self>, prompt: &str) -> Result<TaskHandle, TaskError> {
        self.submit(
            TaskKind::Material,
            ResourceKey::Global,
            json!({ "prompt": prompt }),
        )
        .await
    }

    /// Register an uploaded file locally (pending until the server read path
    /// reflects it) and submit its parse job.
    pub async fn parse_file(self: &Arc<Self>, file: ReferenceFile) -> Result<TaskHandle, TaskError> {
        let file_id = file.id.clone();
        self.project.add_file(file).await;
        self.submit(
            TaskKind::FileParse,
            ResourceKey::file(&file_id),
            json!({ "file_id": file_id }),
        )
        .await
    }

    /// The one submission path. Rejection, submission failure, and every
    /// terminal outcome all release the guard.
    async fn submit(
        self: &Arc<Self>,
        kind: TaskKind,
        resource: ResourceKey,
        payload: serde_json::Value,
    ) -> Result<TaskHandle, TaskError> {
        let project_id = self.current_project_id().await?;

        let permit = self
            .guard
            .try_acquire(resource.clone())
            .ok_or_else(|| TaskError::Busy(resource.clone()))?;

        let request = JobRequest {
            kind,
            resource: resource.clone(),
            payload,
        };
        // On submission failure the permit drops right here: guard released,
        // no handle, no polling.
        let task_id = self.backend.submit_job(&project_id, &request).await?;

        let handle = TaskHandle::new(task_id, kind, resource, Some(project_id.clone()));
        self.registry.upsert(handle.clone()).await;
        tracing::info!(task_id = %handle.id, kind = %kind, resource = %handle.resource, "job submitted");

        self.attach_poller(project_id, handle.clone(), Some(permit));
        Ok(handle)
    }

    /// Re-attach poll loops to tasks that were active at last shutdown.
    /// Called once at startup.
    pub async fn restore_active(self: &Arc<Self>) {
        for handle in self.registry.restore_active().await {
            let Some(project_id) = handle.project_id.clone() else {
                continue;
            };
            // Fresh process, fresh guard: re-acquire so duplicate submissions
            // stay blocked while the restored poller runs.
            let permit = self.guard.try_acquire(handle.resource.clone());
            if permit.is_none() {
                tracing::warn!(task_id = %handle.id, "resource busy during restore, skipping");
                continue;
            }
            self.attach_poller(project_id, handle, permit);
        }
    }

    fn attach_poller(
        self: &Arc<Self>,
        project_id: String,
        handle: TaskHandle,
        permit: Option<FlightPermit>,
    ) {
        let cancel = CancellationToken::new();
        self.cancels
            .lock()
            .expect("cancel map lock poisoned")
            .insert(handle.id.clone(), cancel.clone());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive(project_id, handle, permit, cancel).await;
        });
    }

    /// Poll one task to its end and fold the outcome into shared state.
    /// `_permit` is held for the whole duration and drops on every path.
    async fn drive(
        self: Arc<Self>,
        project_id: String,
        handle: TaskHandle,
        _permit: Option<FlightPermit>,
        cancel: CancellationToken,
    ) {
        let task_id = handle.id.clone();
        let poller = Poller::new(Arc::clone(&self.backend), self.poll_config.clone());
        let (tx, mut rx) = mpsc::channel(32);

        let poll_loop = poller.run(&project_id, &task_id, cancel, tx);
        let registry = Arc::clone(&self.registry);
        let update_loop = async move {
            let mut tracked = handle;
            while let Some(snapshot) = rx.recv().await {
                tracked.advance(snapshot.status);
                if snapshot.progress.is_some() {
                    tracked.progress = snapshot.progress;
                }
                if snapshot.error_message.is_some() {
                    tracked.error_message = snapshot.error_message;
                }
                registry.upsert(tracked.clone()).await;
            }
            tracked
        };

        let (outcome, mut tracked) = futures::future::join(poll_loop, update_loop).await;
        self.finish(&project_id, &mut tracked, outcome).await;

        self.cancels
            .lock()
            .expect("cancel map lock poisoned")
            .remove(&task_id);
    }

    /// Shared terminal path: map the poll outcome onto the handle and the
    /// project aggregate. Each error kind keeps its own distinct message.
    async fn finish(&self, project_id: &str, tracked: &mut TaskHandle, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Completed(snapshot) => {
                // Exports attach their warnings to the final snapshot.
                if snapshot.progress.is_some() {
                    tracked.progress = snapshot.progress.clone();
                }
                match extract_result(tracked.kind, snapshot.result.as_ref()) {
                    Ok(result) => {
                        self.fold_result(project_id, tracked, result).await;
                        tracked.advance(TaskStatus::Completed);
                        self.registry.upsert(tracked.clone()).await;
                    }
                    // COMPLETED without the expected payload is an error,
                    // never silent success.
                    Err(e) => self.settle_error(tracked, e).await,
                }
            }
            PollOutcome::Failed { message } => {
                self.settle_error(tracked, TaskError::Remote(message)).await;
            }
            PollOutcome::TimedOut => {
                self.settle_error(tracked, TaskError::Timeout).await;
            }
            PollOutcome::Cancelled => {
                tracing::info!(task_id = %tracked.id, "polling cancelled client-side");
            }
        }
    }

    /// Record a terminal error on the handle. An error whose remote job may
    /// still complete leaves the task active so a later restore or sync can
    /// observe it; anything else marks it FAILED.
    async fn settle_error(&self, tracked: &mut TaskHandle, err: TaskError) {
        if err.may_still_complete() {
            tracing::info!(task_id = %tracked.id, "{}", err);
        } else {
            tracked.advance(TaskStatus::Failed);
            tracing::error!(task_id = %tracked.id, "{}", err);
            if let ResourceKey::File(id) = &tracked.resource {
                // The upload will never become server-visible; stop
                // protecting it from reconciliation.
                self.project.clear_pending(id).await;
            }
        }
        tracked.error_message = Some(err.to_string());
        self.registry.upsert(tracked.clone()).await;
    }

    /// Per-kind success folding into the project aggregate.
    async fn fold_result(&self, project_id: &str, tracked: &mut TaskHandle, result: TaskResult) {
        match result {
            TaskResult::Image { image_url } => {
                if let ResourceKey::Page(page_id) = &tracked.resource {
                    self.project.set_page_image(page_id, &image_url).await;
                }
            }
            TaskResult::Export { download_url } => {
                tracked.download_url = Some(download_url);
            }
            TaskResult::Material { material_ids } => {
                for id in &material_ids {
                    self.project.mark_pending(id.clone()).await;
                }
                self.resync(project_id).await;
            }
            TaskResult::FileParsed | TaskResult::Descriptions | TaskResult::Outline => {
                self.resync(project_id).await;
            }
        }
    }

    /// Authoritative server view: the project body plus the dedicated
    /// file-list read path, which lags uploads independently.
    async fn fetch_snapshot(&self, project_id: &str) -> anyhow::Result<Project> {
        let mut server = self.backend.fetch_project(project_id).await?;
        server.files = self.backend.list_files(project_id).await?;
        Ok(server)
    }

    async fn resync(&self, project_id: &str) {
        match self.fetch_snapshot(project_id).await {
            Ok(server) => self.project.apply_snapshot(server).await,
            Err(e) => tracing::warn!(project_id, "post-task sync failed: {}", e),
        }
    }

    /// Fetch the authoritative snapshot and reconcile it into the store.
    pub async fn sync_project(&self) -> anyhow::Result<()> {
        let project_id = self
            .project_id
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no project open"))?;
        let server = self.fetch_snapshot(&project_id).await?;
        self.project.apply_snapshot(server).await;
        Ok(())
    }

    /// Submit a refine instruction with the session history as context, then
    /// sync so server-side edits land in the aggregate.
    pub async fn refine(&self, requirement: &str) -> anyhow::Result<String> {
        let session = self
            .refine_session
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no project open"))?;
        let message = session.submit(requirement).await?;
        if let Err(e) = self.sync_project().await {
            tracing::warn!("sync after refine failed: {}", e);
        }
        Ok(message)
    }

    /// Ordered refine history for the current session.
    pub async fn refine_history(&self) -> Vec<String> {
        match self.refine_session.read().await.clone() {
            Some(session) => session.history().await,
            None => Vec::new(),
        }
    }

    /// Stop polling a task. Client-side only - there is no server abort; the
    /// remote job may still finish and show up in a later sync.
    pub fn cancel(&self, task_id: &str) -> bool {
        let cancels = self.cancels.lock().expect("cancel map lock poisoned");
        match cancels.get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
