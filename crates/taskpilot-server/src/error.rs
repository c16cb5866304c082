//! Task-level error taxonomy.

use taskpilot_core::TaskStatus;
use thiserror::Error;

/// Everything that can end a task (or reject its submission).
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No prompt resolved: provide prompt, promptFile, or a taskType with a default prompt")]
    EmptyPrompt,

    #[error("Repository setup failed: {0}")]
    RepositorySetupFailed(String),

    #[error("Failed to launch agent process: {0}")]
    ProcessLaunch(String),

    #[error("{message}")]
    NonZeroExit { code: Option<i32>, message: String },

    #[error("Task timed out after {secs} seconds")]
    TimedOut { secs: u64 },

    #[error("{0}")]
    NoResultFound(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Too many concurrent tasks ({current}/{max})")]
    AdmissionRejected { current: usize, max: usize },

    #[error("Task cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Terminal status a task ends in when it fails with this error.
    pub const fn status(&self) -> TaskStatus {
        match self {
            Self::TimedOut { .. } => TaskStatus::Timeout,
            _ => TaskStatus::Failed,
        }
    }

    /// Build a [`TaskError::NonZeroExit`], preferring captured stderr.
    pub fn non_zero_exit(code: Option<i32>, stderr: &str) -> Self {
        let stderr = stderr.trim();
        let message = if stderr.is_empty() {
            match code {
                Some(c) => format!("Agent process exited with non-zero code {c}"),
                None => "Agent process terminated by signal".to_string(),
            }
        } else {
            stderr.to_string()
        };
        Self::NonZeroExit { code, message }
    }
}

impl From<taskpilot_core::Error> for TaskError {
    fn from(err: taskpilot_core::Error) -> Self {
        match err {
            taskpilot_core::Error::Validation(msg) => Self::Validation(msg),
            taskpilot_core::Error::Io(e) => Self::Io(e),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<crate::lifecycle::StoreError> for TaskError {
    fn from(err: crate::lifecycle::StoreError) -> Self {
        match err {
            crate::lifecycle::StoreError::Io(e) => Self::Io(e),
            other => Self::Io(std::io::Error::other(other.to_string())),
        }
    }
}

impl From<taskpilot_core::ndjson::InterpretError> for TaskError {
    fn from(err: taskpilot_core::ndjson::InterpretError) -> Self {
        Self::NoResultFound(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_zero_exit_prefers_stderr() {
        let err = TaskError::non_zero_exit(Some(2), "  boom: bad flag\n");
        assert_eq!(err.to_string(), "boom: bad flag");
    }

    #[test]
    fn non_zero_exit_falls_back_to_code() {
        let err = TaskError::non_zero_exit(Some(3), "");
        assert_eq!(err.to_string(), "Agent process exited with non-zero code 3");
    }

    #[test]
    fn only_timeout_maps_to_timeout_status() {
        assert_eq!(TaskError::TimedOut { secs: 1 }.status(), TaskStatus::Timeout);
        assert_eq!(TaskError::EmptyPrompt.status(), TaskStatus::Failed);
        assert_eq!(TaskError::Cancelled.status(), TaskStatus::Failed);
    }

    #[test]
    fn timeout_message_names_duration() {
        assert_eq!(
            TaskError::TimedOut { secs: 30 }.to_string(),
            "Task timed out after 30 seconds"
        );
    }
}
