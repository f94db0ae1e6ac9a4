//! Error taxonomy for the orchestration core.
//!
//! Every terminal outcome a UI collaborator can observe maps to exactly one
//! variant with its own message. Transient poll transport errors stay
//! internal: they are retried within the attempt budget and never surfaced
//! individually.

use thiserror::Error;

use crate::task::ResourceKey;

/// Errors produced while driving a remote task to a terminal state.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The job-creation call itself failed. No task exists, no polling starts.
    #[error("job submission failed: {0}")]
    Submission(String),

    /// A single status query failed. Counts toward the attempt budget but does
    /// not stop polling; only the poll loop itself constructs and consumes
    /// this variant.
    #[error("status query failed: {0}")]
    PollTransport(String),

    /// The server reported the task FAILED. The message is surfaced verbatim.
    #[error("{0}")]
    Remote(String),

    /// The server reported COMPLETED but the expected result payload was
    /// absent. Must never be conflated with success.
    #[error("task completed but result is missing `{field}`")]
    MissingResult { field: &'static str },

    /// The client-side attempt budget ran out while the task was still
    /// non-terminal. The remote job may still finish; this is not a failure.
    #[error("task is taking longer than expected and is still running on the server")]
    Timeout,

    /// A submission was rejected because another job holds the resource.
    #[error("resource `{0}` already has a job in flight")]
    Busy(ResourceKey),
}

impl TaskError {
    /// Whether the underlying remote job may still be running despite this
    /// error. Callers use this to keep the task visible as in-progress
    /// instead of marking it failed.
    pub fn may_still_complete(&self) -> bool {
        matches!(self, TaskError::Timeout)
    }
}

/// Classification of an HTTP failure from the backend transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// 429 or 5xx; worth retrying after a delay.
    Retryable,
    /// 4xx other than 429; retrying will not help.
    Client,
    /// Connection-level failure (refused, timeout, DNS).
    Network,
}

/// Map an HTTP status code to a transport error classification.
pub fn classify_http_status(status: u16) -> TransportErrorKind {
    match status {
        429 => TransportErrorKind::Retryable,
        500..=599 => TransportErrorKind::Retryable,
        _ => TransportErrorKind::Client,
    }
}
