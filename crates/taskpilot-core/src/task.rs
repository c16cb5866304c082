//! Task request/response data model.
//!
//! These types are the externally visible JSON shapes (camelCase) and are
//! also what gets persisted to each task's working directory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Upper bound on inline prompt length (characters).
pub const MAX_PROMPT_CHARS: usize = 100_000;

/// Upper bound on the per-task turn budget.
pub const MAX_TURNS_LIMIT: u32 = 100;

/// Caller-supplied task submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    /// Task category, e.g. `code-review` or `custom`.
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Path to a prompt file, relative to the server's prompts directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disallowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append_system_prompt: Option<String>,
    /// JSON schema constraining the agent's structured output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryRef>,
}

/// Reference to a source repository to materialise as the task workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRef {
    /// Project path on the hosting service, e.g. `group/project`.
    pub project: String,
    /// Ref to branch from. Defaults to the project's default branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    /// Name of the working branch to create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
}

impl TaskRequest {
    /// Validate request shape. Nothing here touches the filesystem.
    pub fn validate(&self, max_timeout_secs: u64) -> Result<()> {
        if self.task_type.trim().is_empty() {
            return Err(Error::Validation("taskType is required".into()));
        }
        if !is_safe_name(&self.task_type) {
            return Err(Error::Validation(format!(
                "taskType contains invalid characters: {}",
                self.task_type
            )));
        }
        if let Some(prompt) = &self.prompt {
            if prompt.chars().count() > MAX_PROMPT_CHARS {
                return Err(Error::Validation(format!(
                    "prompt exceeds {MAX_PROMPT_CHARS} characters"
                )));
            }
        }
        if let Some(turns) = self.max_turns {
            if turns == 0 || turns > MAX_TURNS_LIMIT {
                return Err(Error::Validation(format!(
                    "maxTurns must be between 1 and {MAX_TURNS_LIMIT}"
                )));
            }
        }
        if let Some(secs) = self.timeout_seconds {
            if secs == 0 || secs > max_timeout_secs {
                return Err(Error::Validation(format!(
                    "timeoutSeconds must be between 1 and {max_timeout_secs}"
                )));
            }
        }
        for tools in [&self.allowed_tools, &self.disallowed_tools]
            .into_iter()
            .flatten()
        {
            if tools.iter().any(|t| t.trim().is_empty()) {
                return Err(Error::Validation("tool names cannot be empty".into()));
            }
        }
        if let Some(schema) = &self.output_schema {
            if !schema.is_object() {
                return Err(Error::Validation("outputSchema must be a JSON object".into()));
            }
        }
        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                return Err(Error::Validation("model cannot be empty".into()));
            }
        }
        if let Some(repo) = &self.repository {
            repo.validate()?;
        }
        Ok(())
    }
}

impl RepositoryRef {
    fn validate(&self) -> Result<()> {
        if self.project.is_empty() || !is_safe_name(&self.project) {
            return Err(Error::Validation(format!(
                "invalid repository project: {}",
                self.project
            )));
        }
        for branch in [&self.base_branch, &self.branch_name].into_iter().flatten() {
            if !is_safe_name(branch) {
                return Err(Error::Validation(format!("invalid branch name: {branch}")));
            }
        }
        Ok(())
    }
}

/// Alphanumerics plus `-_./`, no leading dash, no `..`.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl TaskStatus {
    /// Whether the status is final. Terminal responses never change.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload extracted from the agent's terminal result event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Final text produced by the agent.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Execution metrics reported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetrics {
    pub duration_ms: u64,
    #[serde(default)]
    pub duration_api_ms: u64,
    pub num_turns: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub permission_denials: usize,
}

/// Externally visible task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: String,
    pub task_type: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<TaskMetrics>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl TaskResponse {
    /// A fresh `pending` record for a just-submitted request.
    pub fn pending(id: String, request: &TaskRequest, created_at: i64) -> Self {
        Self {
            id,
            task_type: request.task_type.clone(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            metrics: None,
            created_at,
            started_at: None,
            completed_at: None,
            metadata: request.metadata.clone(),
        }
    }

    /// Move to `completed` with the given result and metrics.
    pub fn complete(&mut self, result: TaskResult, metrics: TaskMetrics, at: i64) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.metrics = Some(metrics);
        self.error = None;
        self.completed_at = Some(at);
    }

    /// Move to a terminal failure status.
    pub fn fail(&mut self, status: TaskStatus, error: String, at: i64) {
        debug_assert!(status.is_terminal() && status != TaskStatus::Completed);
        self.status = status;
        self.error = Some(error);
        self.completed_at = Some(at);
    }
}

/// Current time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
