//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::backend::HttpBackend;
use crate::config::Config;
use crate::error::TaskError;
use crate::orchestrator::Orchestrator;
use crate::project::{PageEdit, PageStage, Project, ReferenceFile};
use crate::registry::{TaskFilter, TaskRegistry};
use crate::task::TaskHandle;

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    url::Url::parse(&config.backend_url)
        .map_err(|e| anyhow::anyhow!("invalid backend URL {}: {}", config.backend_url, e))?;

    let backend = Arc::new(HttpBackend::new(config.backend_url.clone()));
    let registry = Arc::new(TaskRegistry::open(&config.working_dir).await);
    let orchestrator = Orchestrator::new(backend, registry, config.poll.clone());

    // Re-attach pollers to tasks that were in flight at last shutdown.
    orchestrator.restore_active().await;

    let state = Arc::new(AppState {
        config: config.clone(),
        orchestrator,
    });

    let app = Router::new()
        .route("/api/health", get(health))
        // Project lifecycle
        .route("/api/projects/:id/open", post(open_project))
        .route("/api/project", get(get_project))
        .route("/api/project/sync", post(sync_project))
        // Page operations
        .route("/api/pages/stages", get(page_stages))
        .route("/api/pages/:id", post(update_page))
        .route("/api/pages/:id/description", post(generate_page_description))
        .route("/api/pages/:id/image", post(generate_page_image))
        .route("/api/descriptions", post(generate_all_descriptions))
        // Project-wide generation
        .route("/api/outline", post(generate_outline))
        .route("/api/export", post(export))
        .route("/api/materials", post(generate_material))
        .route("/api/files", post(upload_file))
        // Guard state
        .route("/api/busy", get(resource_busy))
        // Refinement
        .route("/api/refine", post(refine))
        .route("/api/refine/history", get(refine_history))
        // Task registry
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/clear", post(clear_tasks))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id", delete(remove_task))
        .route("/api/tasks/:id/cancel", post(cancel_task))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for SIGTERM/SIGINT. In-flight tasks need no teardown: the registry
/// is already on disk and pollers are restored at next startup.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("failed to install signal handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received; active tasks resume on next start");
}

/// Translate a task error into an HTTP response. BUSY is a conflict the UI
/// handles by leaving its button disabled; everything else is a gateway
/// problem.
fn task_error_response(e: TaskError) -> (StatusCode, String) {
    let status = match &e {
        TaskError::Busy(_) => StatusCode::CONFLICT,
        TaskError::Submission(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend_url: state.config.backend_url.clone(),
    })
}

/// POST /api/projects/:id/open - Load a project and make it current.
async fn open_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Result<Json<Project>, (StatusCode, String)> {
    let project = state
        .orchestrator
        .open_project(&project_id)
        .await
        .map_err(internal)?;
    Ok(Json(project))
}

/// GET /api/project - Current reconciled project snapshot.
async fn get_project(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Project>, (StatusCode, String)> {
    state
        .orchestrator
        .project_snapshot()
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "no project open".to_string()))
}

/// POST /api/project/sync - Fetch the server snapshot and reconcile.
async fn sync_project(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Project>, (StatusCode, String)> {
    state.orchestrator.sync_project().await.map_err(internal)?;
    state
        .orchestrator
        .project_snapshot()
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "no project open".to_string()))
}

/// GET /api/pages/stages - Derived display stage for every page.
async fn page_stages(
    State(state): State<Arc<AppState>>,
) -> Json<std::collections::HashMap<String, PageStage>> {
    Json(state.orchestrator.page_stages().await)
}

/// POST /api/pages/:id - Apply a local edit to a page.
async fn update_page(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
    Json(edit): Json<PageEdit>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state
        .orchestrator
        .project_store()
        .update_page_local(&page_id, edit)
        .await
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("no page {}", page_id)))
    }
}

/// POST /api/pages/:id/description - Generate one page's description.
async fn generate_page_description(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
) -> Result<Json<TaskCreatedResponse>, (StatusCode, String)> {
    let task = state
        .orchestrator
        .generate_page_description(&page_id)
        .await
        .map_err(task_error_response)?;
    Ok(Json(TaskCreatedResponse { task }))
}

/// POST /api/pages/:id/image - Generate one page's image.
async fn generate_page_image(
    State(state): State<Arc<AppState>>,
    Path(page_id): Path<String>,
) -> Result<Json<TaskCreatedResponse>, (StatusCode, String)> {
    let task = state
        .orchestrator
        .generate_page_image(&page_id)
        .await
        .map_err(task_error_response)?;
    Ok(Json(TaskCreatedResponse { task }))
}

/// POST /api/descriptions - Generate descriptions for all pages.
async fn generate_all_descriptions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TaskCreatedResponse>, (StatusCode, String)> {
    let task = state
        .orchestrator
        .generate_all_descriptions()
        .await
        .map_err(task_error_response)?;
    Ok(Json(TaskCreatedResponse { task }))
}

/// POST /api/outline - Generate a page outline from an idea.
async fn generate_outline(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OutlineRequest>,
) -> Result<Json<TaskCreatedResponse>, (StatusCode, String)> {
    let task = state
        .orchestrator
        .generate_outline(&req.idea)
        .await
        .map_err(task_error_response)?;
    Ok(Json(TaskCreatedResponse { task }))
}

/// POST /api/export - Start an export job.
async fn export(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<TaskCreatedResponse>, (StatusCode, String)> {
    let task = state
        .orchestrator
        .export(req.format, req.page_ids)
        .await
        .map_err(task_error_response)?;
    Ok(Json(TaskCreatedResponse { task }))
}

/// POST /api/materials - Generate a material from a prompt.
async fn generate_material(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MaterialRequest>,
) -> Result<Json<TaskCreatedResponse>, (StatusCode, String)> {
    let task = state
        .orchestrator
        .generate_material(&req.prompt)
        .await
        .map_err(task_error_response)?;
    Ok(Json(TaskCreatedResponse { task }))
}

/// POST /api/files - Register an uploaded file and start parsing it.
async fn upload_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadFileRequest>,
) -> Result<Json<TaskCreatedResponse>, (StatusCode, String)> {
    let file = ReferenceFile {
        id: req
            .file_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        filename: req.filename,
        parsed_content: None,
    };
    let task = state
        .orchestrator
        .parse_file(file)
        .await
        .map_err(task_error_response)?;
    Ok(Json(TaskCreatedResponse { task }))
}

/// GET /api/busy?scope=page&id=p1 - Whether a resource has a job in flight.
async fn resource_busy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BusyQuery>,
) -> Result<Json<BusyResponse>, (StatusCode, String)> {
    let key = match (query.scope.as_str(), query.id) {
        ("page", Some(id)) => crate::task::ResourceKey::Page(id),
        ("file", Some(id)) => crate::task::ResourceKey::File(id),
        ("global", _) => crate::task::ResourceKey::Global,
        (scope, _) => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("unknown scope {} (or missing id)", scope),
            ))
        }
    };
    Ok(Json(BusyResponse {
        busy: state.orchestrator.is_busy(&key),
    }))
}

/// POST /api/refine - Refine descriptions with accumulated context.
async fn refine(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefineRequest>,
) -> Result<Json<RefineResult>, (StatusCode, String)> {
    let message = state
        .orchestrator
        .refine(&req.requirement)
        .await
        .map_err(internal)?;
    let history = state.orchestrator.refine_history().await;
    Ok(Json(RefineResult { message, history }))
}

/// GET /api/refine/history - Ordered refine history for the session.
async fn refine_history(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.orchestrator.refine_history().await)
}

/// GET /api/tasks - List tasks, newest first.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTasksQuery>,
) -> Json<Vec<TaskHandle>> {
    let filter = TaskFilter {
        project_id: query.project_id,
        active_only: query.active_only,
    };
    Json(state.orchestrator.registry().list(&filter).await)
}

/// GET /api/tasks/:id - One task by id.
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskHandle>, (StatusCode, String)> {
    state
        .orchestrator
        .registry()
        .get(&task_id)
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("no task {}", task_id)))
}

/// POST /api/tasks/:id/cancel - Stop polling a task client-side.
async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.orchestrator.cancel(&task_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("no active poll loop for task {}", task_id),
        ))
    }
}

/// DELETE /api/tasks/:id - Remove a task from the registry.
async fn remove_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.orchestrator.registry().remove(&task_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("no task {}", task_id)))
    }
}

/// POST /api/tasks/clear - Drop all terminal tasks.
async fn clear_tasks(State(state): State<Arc<AppState>>) -> Json<ClearedResponse> {
    Json(ClearedResponse {
        cleared: state.orchestrator.registry().clear_terminal().await,
    })
}
