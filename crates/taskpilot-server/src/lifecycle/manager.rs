//! In-flight task table and per-task execution.
//!
//! [`TaskManager::submit`] admits a task and spawns one tokio task that builds
//! its context, runs the agent, and settles the outcome. A settled record
//! stays in the in-flight table only while `response.json` is being written;
//! after that it is evicted and served from disk through [`TaskStore::load`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use taskpilot_core::ndjson;
use taskpilot_core::task::now_millis;
use taskpilot_core::{TaskMetrics, TaskRequest, TaskResponse, TaskResult, TaskStatus};
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::store::TaskStore;
use crate::context::TaskContextBuilder;
use crate::error::TaskError;
use crate::subprocess::SubprocessRunner;

/// Default in-flight ceiling when configured as zero.
const DEFAULT_MAX_CONCURRENT_TASKS: usize = 5;

/// Admission and validation limits.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub max_concurrent_tasks: usize,
    /// Upper bound for a request's `timeoutSeconds`.
    pub max_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            max_timeout_secs: 3600,
        }
    }
}

/// Snapshot served by `/stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub active: usize,
    pub capacity: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub rejected: u64,
}

struct TaskEntry {
    response: TaskResponse,
    cancel_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, status: TaskStatus) {
        match status {
            TaskStatus::Completed => Self::bump(&self.completed),
            TaskStatus::Timeout => Self::bump(&self.timed_out),
            TaskStatus::Failed => Self::bump(&self.failed),
            TaskStatus::Pending | TaskStatus::Running => {}
        }
    }
}

/// Owns the in-flight table and drives tasks to a terminal state.
pub struct TaskManager {
    config: ManagerConfig,
    tasks: RwLock<HashMap<String, TaskEntry>>,
    builder: TaskContextBuilder,
    runner: SubprocessRunner,
    counters: Counters,
}

impl TaskManager {
    pub fn new(config: ManagerConfig, builder: TaskContextBuilder, runner: SubprocessRunner) -> Self {
        let config = ManagerConfig {
            max_concurrent_tasks: if config.max_concurrent_tasks == 0 {
                DEFAULT_MAX_CONCURRENT_TASKS
            } else {
                config.max_concurrent_tasks
            },
            ..config
        };
        info!(
            max_concurrent_tasks = config.max_concurrent_tasks,
            tasks_dir = %builder.store().root().display(),
            agent = %runner.binary(),
            "TaskManager created"
        );
        Self {
            config,
            tasks: RwLock::new(HashMap::new()),
            builder,
            runner,
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &TaskStore {
        self.builder.store()
    }

    pub const fn capacity(&self) -> usize {
        self.config.max_concurrent_tasks
    }

    /// Tasks admitted and not yet settled.
    pub async fn active_count(&self) -> usize {
        unsettled(&*self.tasks.read().await)
    }

    /// Validate and admit a request, then start it in the background.
    ///
    /// Returns the initial `pending` record. Only validation and admission
    /// errors are returned here; everything later ends up in the task record.
    pub async fn submit(self: &Arc<Self>, request: TaskRequest) -> Result<TaskResponse, TaskError> {
        request.validate(self.config.max_timeout_secs)?;

        let id = Uuid::new_v4().to_string();
        let response = TaskResponse::pending(id.clone(), &request, now_millis());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        {
            let mut tasks = self.tasks.write().await;
            let active = unsettled(&tasks);
            if active >= self.config.max_concurrent_tasks {
                Counters::bump(&self.counters.rejected);
                warn!(
                    active,
                    max = self.config.max_concurrent_tasks,
                    "Rejecting task submission"
                );
                return Err(TaskError::AdmissionRejected {
                    current: active,
                    max: self.config.max_concurrent_tasks,
                });
            }
            tasks.insert(
                id.clone(),
                TaskEntry {
                    response: response.clone(),
                    cancel_tx,
                },
            );
        }
        Counters::bump(&self.counters.submitted);
        info!(task_id = %id, task_type = %request.task_type, "Task submitted");

        let this = Arc::clone(self);
        let created_at = response.created_at;
        tokio::spawn(async move {
            this.execute(id, request, created_at, cancel_rx).await;
        });

        Ok(response)
    }

    /// Current record for `id`, from memory or reconstructed from disk.
    pub async fn get(&self, id: &str) -> Result<TaskResponse, TaskError> {
        if Uuid::parse_str(id).is_err() {
            return Err(TaskError::NotFound(id.to_string()));
        }
        if let Some(entry) = self.tasks.read().await.get(id) {
            return Ok(entry.response.clone());
        }
        match self.store().load(id).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(TaskError::NotFound(id.to_string())),
            Err(e) => {
                error!(task_id = id, error = %e, "Failed to load task from disk");
                Err(e.into())
            }
        }
    }

    /// Stop an in-flight task and record it as failed.
    pub async fn cancel(&self, id: &str) -> Result<TaskResponse, TaskError> {
        let response = {
            let mut tasks = self.tasks.write().await;
            let Some(entry) = tasks
                .get_mut(id)
                .filter(|e| !e.response.status.is_terminal())
            else {
                return Err(TaskError::NotFound(id.to_string()));
            };
            // Receiver may already be gone if the run just finished.
            let _ = entry.cancel_tx.send(true);
            entry
                .response
                .fail(TaskStatus::Failed, TaskError::Cancelled.to_string(), now_millis());
            entry.response.clone()
        };
        Counters::bump(&self.counters.cancelled);
        self.persist_and_evict(&response).await;

        info!(task_id = id, "Task cancelled");
        Ok(response)
    }

    pub async fn stats(&self) -> TaskStats {
        let c = &self.counters;
        TaskStats {
            active: self.active_count().await,
            capacity: self.capacity(),
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
        }
    }

    async fn execute(
        self: Arc<Self>,
        id: String,
        request: TaskRequest,
        created_at: i64,
        cancel: watch::Receiver<bool>,
    ) {
        let started_at = now_millis();
        if let Some(entry) = self.tasks.write().await.get_mut(&id) {
            if !entry.response.status.is_terminal() {
                entry.response.started_at = Some(started_at);
            }
        }

        let outcome = self.run(&id, &request, created_at, started_at, cancel).await;
        self.settle(&id, outcome).await;
    }

    async fn run(
        &self,
        id: &str,
        request: &TaskRequest,
        created_at: i64,
        started_at: i64,
        cancel: watch::Receiver<bool>,
    ) -> Result<(TaskResult, TaskMetrics), TaskError> {
        let ctx = self.builder.build(id, request, created_at, started_at).await?;
        debug!(
            task_id = id,
            task_dir = %ctx.task_dir.display(),
            branch = ?ctx.branch,
            "Launching agent"
        );
        if *cancel.borrow() {
            return Err(TaskError::Cancelled);
        }

        let output = self.runner.run(&ctx.invocation, cancel).await?;
        let written = self.store().write_output(id, &output.stdout).await;
        output.check(ctx.invocation.timeout)?;
        written?;

        let event = ndjson::interpret(&output.stdout)?;
        debug!(
            task_id = id,
            subtype = %event.subtype,
            num_turns = event.num_turns,
            elapsed_ms = output.elapsed.as_millis(),
            "Agent result interpreted"
        );
        Ok((event.task_result(), event.metrics()))
    }

    /// Mark the record terminal in memory, then persist and evict it.
    async fn settle(&self, id: &str, outcome: Result<(TaskResult, TaskMetrics), TaskError>) {
        let response = {
            let mut tasks = self.tasks.write().await;
            let Some(entry) = tasks
                .get_mut(id)
                .filter(|e| !e.response.status.is_terminal())
            else {
                debug!(task_id = id, "Task already settled by cancellation");
                return;
            };

            let completed_at = now_millis();
            match outcome {
                Ok((result, metrics)) => entry.response.complete(result, metrics, completed_at),
                Err(e) => {
                    warn!(task_id = id, error = %e, "Task failed");
                    entry.response.fail(e.status(), e.to_string(), completed_at);
                }
            }
            entry.response.clone()
        };
        self.counters.record(response.status);
        self.persist_and_evict(&response).await;

        info!(task_id = id, status = %response.status, "Task settled");
    }

    /// Write `response.json` without holding the table lock, then drop the entry.
    ///
    /// Until eviction, reads are served the terminal in-memory record, which
    /// matches what lands on disk.
    async fn persist_and_evict(&self, response: &TaskResponse) {
        if let Err(e) = self.store().write_response(response).await {
            error!(task_id = %response.id, error = %e, "Failed to persist task response");
        }
        self.tasks.write().await.remove(&response.id);
    }
}

fn unsettled(tasks: &HashMap<String, TaskEntry>) -> usize {
    tasks
        .values()
        .filter(|e| !e.response.status.is_terminal())
        .count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::ContextSettings;
    use crate::subprocess::AgentBinary;
    use taskpilot_core::TemplateCatalog;

    fn manager(root: &std::path::Path, max: usize) -> Arc<TaskManager> {
        let builder = TaskContextBuilder::new(
            TaskStore::new(root),
            TemplateCatalog::builtin(),
            ContextSettings::default(),
        );
        let runner = SubprocessRunner::new(AgentBinary::with_leading_args(
            "sh",
            ["-c", "exec sleep 30", "agent"],
        ));
        Arc::new(TaskManager::new(
            ManagerConfig {
                max_concurrent_tasks: max,
                max_timeout_secs: 60,
            },
            builder,
            runner,
        ))
    }

    fn request() -> TaskRequest {
        TaskRequest {
            task_type: "custom".into(),
            prompt: Some("hello".into()),
            ..Default::default()
        }
    }

    #[test]
    fn zero_capacity_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let builder = TaskContextBuilder::new(
            TaskStore::new(dir.path()),
            TemplateCatalog::builtin(),
            ContextSettings::default(),
        );
        let m = TaskManager::new(
            ManagerConfig {
                max_concurrent_tasks: 0,
                max_timeout_secs: 10,
            },
            builder,
            SubprocessRunner::new(AgentBinary::direct("true")),
        );
        assert_eq!(m.capacity(), DEFAULT_MAX_CONCURRENT_TASKS);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_admission() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), 1);
        let err = m
            .submit(TaskRequest {
                task_type: String::new(),
                ..request()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
        assert_eq!(m.stats().await.submitted, 0);
    }

    #[tokio::test]
    async fn non_uuid_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), 1);
        for id in ["../etc", "abc", ""] {
            assert!(matches!(m.get(id).await, Err(TaskError::NotFound(_))));
        }
    }

    #[tokio::test]
    async fn unknown_uuid_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), 1);
        let id = Uuid::new_v4().to_string();
        assert!(matches!(m.get(&id).await, Err(TaskError::NotFound(_))));
        assert!(matches!(m.cancel(&id).await, Err(TaskError::NotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn admission_ceiling_rejects_excess() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), 1);
        let first = m.submit(request()).await.unwrap();
        assert_eq!(first.status, TaskStatus::Pending);

        let err = m.submit(request()).await.unwrap_err();
        assert!(matches!(err, TaskError::AdmissionRejected { current: 1, max: 1 }));

        m.cancel(&first.id).await.unwrap();
        let stats = m.stats().await;
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.active, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_persists_failed_response() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), 2);
        let task = m.submit(request()).await.unwrap();

        let cancelled = m.cancel(&task.id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Failed);
        assert_eq!(cancelled.error.as_deref(), Some("Task cancelled"));

        let fetched = m.get(&task.id).await.unwrap();
        assert_eq!(fetched, cancelled);
        assert!(matches!(m.cancel(&task.id).await, Err(TaskError::NotFound(_))));
    }

    /// Put a pending record straight into the table without spawning a run.
    async fn insert_pending(m: &TaskManager) -> (String, watch::Receiver<bool>) {
        let id = Uuid::new_v4().to_string();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        m.tasks.write().await.insert(
            id.clone(),
            TaskEntry {
                response: TaskResponse::pending(id.clone(), &request(), now_millis()),
                cancel_tx,
            },
        );
        (id, cancel_rx)
    }

    #[tokio::test]
    async fn settle_persists_then_evicts() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), 2);
        let (id, _rx) = insert_pending(&m).await;

        m.settle(&id, Err(TaskError::TimedOut { secs: 1 })).await;

        assert!(m.tasks.read().await.is_empty());
        let stored = m.store().load(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Timeout);
        assert_eq!(m.get(&id).await.unwrap(), stored);
        assert_eq!(m.stats().await.timed_out, 1);
    }

    #[tokio::test]
    async fn settle_after_cancel_keeps_cancelled_record() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), 2);
        let (id, rx) = insert_pending(&m).await;

        m.cancel(&id).await.unwrap();
        assert!(*rx.borrow());
        m.settle(&id, Err(TaskError::Cancelled)).await;

        let stored = m.store().load(&id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("Task cancelled"));
        let stats = m.stats().await;
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn terminal_record_awaiting_eviction_frees_its_slot() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), 1);
        let (id, _rx) = insert_pending(&m).await;
        assert_eq!(m.active_count().await, 1);

        if let Some(entry) = m.tasks.write().await.get_mut(&id) {
            entry
                .response
                .fail(TaskStatus::Failed, "boom".into(), now_millis());
        }

        assert_eq!(m.active_count().await, 0);
        assert_eq!(m.get(&id).await.unwrap().error.as_deref(), Some("boom"));
        assert!(matches!(m.cancel(&id).await, Err(TaskError::NotFound(_))));

        let (second, _rx2) = insert_pending(&m).await;
        assert_eq!(m.active_count().await, 1);
        let err = m.submit(request()).await.unwrap_err();
        assert!(matches!(err, TaskError::AdmissionRejected { current: 1, max: 1 }));
        m.tasks.write().await.remove(&second);
    }
}
