//! Polling scheduler: drives one remote task to a terminal state.
//!
//! One poll loop exists per active task. It queries status at a fixed
//! cadence, tolerates isolated transport errors, and stops on exactly one of:
//! server-reported terminal status, the client-side attempt budget, or its
//! cancellation token. Exhausting the budget is a client-only TIMEOUT - the
//! remote job may still complete, so it is surfaced as "still running",
//! never as failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, TaskStatusResponse};

/// Cadence and budget for one poll loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between consecutive status queries.
    pub interval: Duration,
    /// Attempt budget. 60 attempts at 2 s is a ~120 s client bound,
    /// independent of the server's own execution limit.
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2_000),
            max_attempts: 60,
        }
    }
}

/// How a poll loop ended.
#[derive(Debug)]
pub enum PollOutcome {
    /// Server reported COMPLETED; carries the final status snapshot so the
    /// caller can extract the typed result payload.
    Completed(TaskStatusResponse),
    /// Server reported FAILED.
    Failed { message: String },
    /// Attempt budget exhausted while the task was still non-terminal.
    TimedOut,
    /// The cancellation token fired. Client-side only; the remote job keeps
    /// running and a later sync may still observe its effects.
    Cancelled,
}

/// Explicit lifecycle of a poll loop. "Stop polling" is one action -
/// cancelling the token - not a side effect scattered across call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollState {
    Submitted,
    Polling { attempt: u32 },
    Terminal,
}

/// Polls a task's status until terminal, timeout, or cancellation.
pub struct Poller {
    backend: Arc<dyn Backend>,
    config: PollConfig,
}

impl Poller {
    pub fn new(backend: Arc<dyn Backend>, config: PollConfig) -> Self {
        Self { backend, config }
    }

    /// Drive `task_id` to a terminal outcome. Every non-terminal status
    /// snapshot is forwarded through `updates`; a dropped receiver does not
    /// stop the loop.
    pub async fn run(
        &self,
        project_id: &str,
        task_id: &str,
        cancel: CancellationToken,
        updates: mpsc::Sender<TaskStatusResponse>,
    ) -> PollOutcome {
        let mut state = PollState::Submitted;
        tracing::trace!(task_id, ?state, "poll loop starting");

        for attempt in 1..=self.config.max_attempts {
            if cancel.is_cancelled() {
                return PollOutcome::Cancelled;
            }
            state = PollState::Polling { attempt };
            tracing::trace!(task_id, ?state, "querying status");

            match self.backend.task_status(project_id, task_id).await {
                Ok(snapshot) => {
                    if snapshot.status == crate::task::TaskStatus::Failed {
                        state = PollState::Terminal;
                        tracing::debug!(task_id, ?state, "task failed remotely");
                        return PollOutcome::Failed {
                            message: snapshot
                                .error_message
                                .unwrap_or_else(|| "task failed".to_string()),
                        };
                    }
                    if snapshot.status == crate::task::TaskStatus::Completed {
                        state = PollState::Terminal;
                        tracing::debug!(task_id, ?state, "task completed");
                        return PollOutcome::Completed(snapshot);
                    }

                    // Terminal snapshots travel in the outcome, not here: the
                    // caller decides what COMPLETED means after checking the
                    // result payload.
                    let _ = updates.send(snapshot).await;
                }
                Err(e) => {
                    // A transient query failure only spends an attempt. It is
                    // never surfaced individually; sustained outages end in
                    // TimedOut once the budget runs out.
                    tracing::debug!(task_id, attempt, "status query failed: {}", e);
                }
            }

            if attempt == self.config.max_attempts {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        tracing::info!(
            task_id,
            attempts = self.config.max_attempts,
            "polling budget exhausted; task may still be running server-side"
        );
        PollOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::backend::JobRequest;
    use crate::error::TaskError;
    use crate::project::{Project, ReferenceFile};
    use crate::task::{ResourceKey, TaskStatus};

    /// Backend double that replays a scripted sequence of status responses.
    /// Once the script is exhausted the last entry repeats.
    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<TaskStatusResponse, TaskError>>>,
        calls: AtomicU32,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<TaskStatusResponse, TaskError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn status(status: TaskStatus) -> TaskStatusResponse {
        TaskStatusResponse {
            status,
            progress: None,
            error_message: None,
            result: None,
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn submit_job(&self, _: &str, _: &JobRequest) -> Result<String, TaskError> {
            Ok("task-1".into())
        }

        async fn task_status(
            &self,
            _: &str,
            _: &str,
        ) -> Result<TaskStatusResponse, TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                match script.front().unwrap() {
                    Ok(r) => Ok(r.clone()),
                    Err(_) => Err(TaskError::PollTransport("scripted".into())),
                }
            }
        }

        async fn refine(
            &self,
            _: &str,
            _: &ResourceKey,
            _: &str,
            _: &[String],
        ) -> anyhow::Result<String> {
            anyhow::bail!("not scripted")
        }

        async fn fetch_project(&self, _: &str) -> anyhow::Result<Project> {
            anyhow::bail!("not scripted")
        }

        async fn list_files(&self, _: &str) -> anyhow::Result<Vec<ReferenceFile>> {
            Ok(vec![])
        }
    }

    fn collecting_sender() -> (
        mpsc::Sender<TaskStatusResponse>,
        mpsc::Receiver<TaskStatusResponse>,
    ) {
        mpsc::channel(64)
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_on_third_poll() {
        // Scenario A: two PROCESSING polls, then COMPLETED with a result.
        let mut done = status(TaskStatus::Completed);
        done.result = Some(json!({"image_url": "x"}));
        let backend = ScriptedBackend::new(vec![
            Ok(status(TaskStatus::Processing)),
            Ok(status(TaskStatus::Processing)),
            Ok(done),
        ]);

        let poller = Poller::new(backend.clone(), PollConfig::default());
        let (tx, mut rx) = collecting_sender();
        let outcome = poller
            .run("pr", "task-1", CancellationToken::new(), tx)
            .await;

        match outcome {
            PollOutcome::Completed(snapshot) => {
                assert_eq!(snapshot.result.unwrap()["image_url"], "x");
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        assert_eq!(backend.calls(), 3);

        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update.status);
        }
        // Only the two non-terminal snapshots travel through the channel; the
        // terminal one rides in the outcome.
        assert_eq!(updates, vec![TaskStatus::Processing, TaskStatus::Processing]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_is_timeout_not_failure() {
        // Scenario B: the server never reaches a terminal state.
        let backend = ScriptedBackend::new(vec![Ok(status(TaskStatus::Processing))]);
        let poller = Poller::new(
            backend.clone(),
            PollConfig {
                interval: Duration::from_millis(2_000),
                max_attempts: 60,
            },
        );

        let (tx, _rx) = collecting_sender();
        let outcome = poller
            .run("pr", "task-1", CancellationToken::new(), tx)
            .await;

        assert!(matches!(outcome, PollOutcome::TimedOut));
        assert_eq!(backend.calls(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_does_not_abort_polling() {
        // Scenario C: poll 1 errors at the transport level, poll 2 completes.
        let backend = ScriptedBackend::new(vec![
            Err(TaskError::PollTransport("connection reset".into())),
            Ok(status(TaskStatus::Completed)),
        ]);
        let poller = Poller::new(backend.clone(), PollConfig::default());

        let (tx, _rx) = collecting_sender();
        let outcome = poller
            .run("pr", "task-1", CancellationToken::new(), tx)
            .await;

        assert!(matches!(outcome, PollOutcome::Completed(_)));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_surfaces_message_verbatim() {
        let mut failed = status(TaskStatus::Failed);
        failed.error_message = Some("No template image found".into());
        let backend = ScriptedBackend::new(vec![Ok(failed)]);
        let poller = Poller::new(backend, PollConfig::default());

        let (tx, _rx) = collecting_sender();
        let outcome = poller
            .run("pr", "task-1", CancellationToken::new(), tx)
            .await;

        match outcome {
            PollOutcome::Failed { message } => {
                assert_eq!(message, "No template image found");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_the_loop() {
        let backend = ScriptedBackend::new(vec![Ok(status(TaskStatus::Processing))]);
        let poller = Poller::new(backend.clone(), PollConfig::default());
        let cancel = CancellationToken::new();

        let (tx, _rx) = collecting_sender();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            poller.run("pr", "task-1", loop_cancel, tx).await
        });

        // Let a couple of polls happen, then cancel mid-sleep.
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap();

        assert!(matches!(outcome, PollOutcome::Cancelled));
        assert!(backend.calls() < 60);
    }
}
