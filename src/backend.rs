//! Backend collaborator client.
//!
//! The generation backend is opaque to this crate: jobs go in, task handles
//! and status snapshots come out. `Backend` is the seam the orchestration
//! core depends on; `HttpBackend` is the reqwest implementation. Tests swap
//! in scripted doubles.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{classify_http_status, TaskError, TransportErrorKind};
use crate::project::{Project, ReferenceFile};
use crate::task::{ResourceKey, TaskKind, TaskProgress, TaskStatus};

/// A job submission.
#[derive(Debug, Clone, Serialize)]
pub struct JobRequest {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub resource: ResourceKey,
    /// Kind-specific parameters (export format, material prompt, ...).
    #[serde(skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

/// One polled status snapshot for a task.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatusResponse {
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: Option<TaskProgress>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JobSubmitted {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct RefineResponse {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<ReferenceFile>,
}

/// Contract this core consumes from the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Create a remote job. Failure here means no task exists.
    async fn submit_job(&self, project_id: &str, request: &JobRequest)
        -> Result<String, TaskError>;

    /// Query one task's status. Failure is a transport error the poller
    /// absorbs within its attempt budget.
    async fn task_status(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> Result<TaskStatusResponse, TaskError>;

    /// Single request/response refine call with the full prior history as
    /// context. Returns the backend's confirmation message.
    async fn refine(
        &self,
        project_id: &str,
        resource: &ResourceKey,
        requirement: &str,
        previous_requirements: &[String],
    ) -> anyhow::Result<String>;

    /// Authoritative project snapshot (input to reconciliation).
    async fn fetch_project(&self, project_id: &str) -> anyhow::Result<Project>;

    /// Authoritative reference-file list (input to reconciliation).
    async fn list_files(&self, project_id: &str) -> anyhow::Result<Vec<ReferenceFile>>;
}

/// Retry policy for idempotent reads. Job submission is deliberately never
/// retried at this layer: a replayed submission is a second billable job.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// HTTP implementation of the backend contract.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_retry_config(base_url, RetryConfig::default())
    }

    pub fn with_retry_config(base_url: impl Into<String>, retry: RetryConfig) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: Client::new(),
            base_url,
            retry,
        }
    }

    fn project_url(&self, project_id: &str, tail: &str) -> String {
        let mut url = format!(
            "{}/api/projects/{}",
            self.base_url,
            urlencoding::encode(project_id)
        );
        if !tail.is_empty() {
            url.push('/');
            url.push_str(tail);
        }
        url
    }

    /// GET with bounded retry on 429/5xx and connection errors.
    async fn get_json_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> anyhow::Result<T> {
        let mut attempt = 0;
        loop {
            match self.get_json::<T>(url).await {
                Ok(value) => return Ok(value),
                Err((kind, message)) => {
                    let retryable = matches!(
                        kind,
                        TransportErrorKind::Retryable | TransportErrorKind::Network
                    );
                    if !retryable || attempt >= self.retry.max_retries {
                        anyhow::bail!("GET {} failed: {}", url, message);
                    }
                    let delay = self.retry.base_delay * 2u32.pow(attempt);
                    tracing::warn!(
                        url,
                        attempt = attempt + 1,
                        "transient backend error, retrying in {:?}: {}",
                        delay,
                        message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, (TransportErrorKind, String)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| (TransportErrorKind::Network, e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err((
                classify_http_status(status.as_u16()),
                format!("{} - {}", status, body),
            ));
        }
        serde_json::from_str(&body).map_err(|e| {
            (
                TransportErrorKind::Client,
                format!("unparseable response: {} (body: {})", e, body),
            )
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn submit_job(
        &self,
        project_id: &str,
        request: &JobRequest,
    ) -> Result<String, TaskError> {
        let url = self.project_url(project_id, "jobs");
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| TaskError::Submission(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(TaskError::Submission(format!("{} - {}", status, body)));
        }

        let submitted: JobSubmitted = serde_json::from_str(&body)
            .map_err(|e| TaskError::Submission(format!("bad submit response: {}", e)))?;
        Ok(submitted.task_id)
    }

    async fn task_status(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> Result<TaskStatusResponse, TaskError> {
        let url = self.project_url(
            project_id,
            &format!("tasks/{}", urlencoding::encode(task_id)),
        );
        self.get_json(&url)
            .await
            .map_err(|(_, message)| TaskError::PollTransport(message))
    }

    async fn refine(
        &self,
        project_id: &str,
        resource: &ResourceKey,
        requirement: &str,
        previous_requirements: &[String],
    ) -> anyhow::Result<String> {
        let url = self.project_url(project_id, "refine");
        let body = serde_json::json!({
            "resource": resource,
            "requirement": requirement,
            "previous_requirements": previous_requirements,
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("refine failed: {} - {}", status, text);
        }

        let parsed: RefineResponse = serde_json::from_str(&text)?;
        Ok(parsed.message.unwrap_or_else(|| "ok".to_string()))
    }

    async fn fetch_project(&self, project_id: &str) -> anyhow::Result<Project> {
        let url = self.project_url(project_id, "");
        self.get_json_with_retry(&url).await
    }

    async fn list_files(&self, project_id: &str) -> anyhow::Result<Vec<ReferenceFile>> {
        let url = self.project_url(project_id, "files");
        let list: FileList = self.get_json_with_retry(&url).await?;
        Ok(list.files)
    }
}
