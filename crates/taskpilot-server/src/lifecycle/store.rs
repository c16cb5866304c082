//! On-disk task artifacts.
//!
//! Layout per task:
//!
//! ```text
//! <root>/<task_id>/
//!   request.json    resolved request, written before execution
//!   prompt.txt      prompt piped to the agent
//!   output.jsonl    raw agent stdout, written before interpretation
//!   response.json   terminal TaskResponse
//!   workspace/      agent working directory
//! ```
//!
//! These files are the only persistent state; [`TaskStore::load`] rebuilds a
//! task record from them after a restart.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use taskpilot_core::ndjson;
use taskpilot_core::{TaskRequest, TaskResponse, TaskStatus};
use thiserror::Error;
use tracing::debug;

pub const REQUEST_FILE: &str = "request.json";
pub const PROMPT_FILE: &str = "prompt.txt";
pub const OUTPUT_FILE: &str = "output.jsonl";
pub const RESPONSE_FILE: &str = "response.json";
pub const WORKSPACE_DIR: &str = "workspace";

/// Error recorded for tasks whose request was persisted but which never settled.
pub const INTERRUPTED_MESSAGE: &str = "Task interrupted before completion";

/// Errors from reading or writing task artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt task artifact {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Contents of `request.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTask {
    pub id: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// Request with defaults applied.
    pub request: TaskRequest,
}

/// Filesystem-backed store rooted at the tasks directory.
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Create (if needed) and return the task's directory.
    pub async fn create_task_dir(&self, id: &str) -> Result<PathBuf, StoreError> {
        let dir = self.task_dir(id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    pub async fn write_request(&self, task: &PersistedTask) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(task).map_err(|source| StoreError::Corrupt {
            path: self.task_dir(&task.id).join(REQUEST_FILE),
            source,
        })?;
        self.write_atomic(&task.id, REQUEST_FILE, &bytes).await
    }

    pub async fn write_prompt(&self, id: &str, prompt: &str) -> Result<(), StoreError> {
        self.write_atomic(id, PROMPT_FILE, prompt.as_bytes()).await
    }

    pub async fn write_output(&self, id: &str, raw: &str) -> Result<(), StoreError> {
        self.write_atomic(id, OUTPUT_FILE, raw.as_bytes()).await
    }

    pub async fn write_response(&self, response: &TaskResponse) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(response).map_err(|source| StoreError::Corrupt {
            path: self.task_dir(&response.id).join(RESPONSE_FILE),
            source,
        })?;
        self.write_atomic(&response.id, RESPONSE_FILE, &bytes).await
    }

    /// Write via a temp file and rename so readers never see a torn file.
    async fn write_atomic(&self, id: &str, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = self.create_task_dir(id).await?;
        let tmp = dir.join(format!(".{name}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, dir.join(name)).await?;
        Ok(())
    }

    /// Rebuild a task record from disk.
    ///
    /// Returns `Ok(None)` when nothing is known about `id`.
    pub async fn load(&self, id: &str) -> Result<Option<TaskResponse>, StoreError> {
        let dir = self.task_dir(id);

        let response_path = dir.join(RESPONSE_FILE);
        if let Some(bytes) = read_optional(&response_path).await? {
            let response = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: response_path,
                source,
            })?;
            return Ok(Some(response));
        }

        let request_path = dir.join(REQUEST_FILE);
        let Some(bytes) = read_optional(&request_path).await? else {
            return Ok(None);
        };
        let task: PersistedTask =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: request_path.clone(),
                source,
            })?;

        debug!(task_id = id, "Reconstructing task from request and output");
        let mut response = TaskResponse::pending(task.id.clone(), &task.request, task.created_at);
        response.started_at = task.started_at;

        let output_path = dir.join(OUTPUT_FILE);
        match read_optional(&output_path).await? {
            Some(raw) => {
                let completed_at = modified_millis(&output_path).await;
                match ndjson::interpret(&String::from_utf8_lossy(&raw)) {
                    Ok(event) => {
                        response.complete(event.task_result(), event.metrics(), completed_at);
                    }
                    Err(e) => response.fail(TaskStatus::Failed, e.to_string(), completed_at),
                }
            }
            None => {
                let at = modified_millis(&request_path).await;
                response.fail(TaskStatus::Failed, INTERRUPTED_MESSAGE.to_string(), at);
            }
        }
        Ok(Some(response))
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn modified_millis(path: &Path) -> i64 {
    tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or_else(taskpilot_core::task::now_millis, |d| {
            i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn persisted(id: &str) -> PersistedTask {
        PersistedTask {
            id: id.into(),
            created_at: 1_000,
            started_at: Some(1_010),
            request: TaskRequest {
                task_type: "custom".into(),
                prompt: Some("Calculate 5 + 5.".into()),
                max_turns: Some(1),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn unknown_task_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn response_file_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let task = persisted("t1");
        store.write_request(&task).await.unwrap();
        let mut response = TaskResponse::pending("t1".into(), &task.request, 1_000);
        response.fail(TaskStatus::Timeout, "Task timed out after 1 seconds".into(), 2_000);
        store.write_response(&response).await.unwrap();

        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded, response);
    }

    #[tokio::test]
    async fn rebuilds_completed_task_from_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        store.write_request(&persisted("t2")).await.unwrap();
        store
            .write_output(
                "t2",
                "noise\n{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"10\",\"num_turns\":1,\"duration_ms\":7}\n",
            )
            .await
            .unwrap();

        let loaded = store.load("t2").await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.result.unwrap().content, "10");
        assert_eq!(loaded.metrics.unwrap().duration_ms, 7);
        assert_eq!(loaded.started_at, Some(1_010));
    }

    #[tokio::test]
    async fn request_without_output_is_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        store.write_request(&persisted("t3")).await.unwrap();

        let loaded = store.load("t3").await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some(INTERRUPTED_MESSAGE));
    }

    #[tokio::test]
    async fn corrupt_response_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let task_dir = store.create_task_dir("t4").await.unwrap();
        std::fs::write(task_dir.join(RESPONSE_FILE), "{not json").unwrap();
        assert!(matches!(
            store.load("t4").await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        store.write_prompt("t5", "hi").await.unwrap();
        let names: Vec<_> = std::fs::read_dir(store.task_dir("t5"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![PROMPT_FILE.to_string()]);
    }
}
