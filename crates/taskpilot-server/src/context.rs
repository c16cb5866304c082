//! Task context builder: turns a validated request into an execution-ready
//! context (working directory, resolved prompt and defaults, optional
//! repository checkout).

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use taskpilot_core::task::RepositoryRef;
use taskpilot_core::{TaskRequest, TemplateCatalog};
use taskpilot_core::templates::{DEFAULT_ALLOWED_TOOLS, DEFAULT_MAX_TURNS};
use tracing::{debug, info, warn};

use crate::error::TaskError;
use crate::lifecycle::{PersistedTask, TaskStore, WORKSPACE_DIR};
use crate::repo::RepositorySource;
use crate::subprocess::AgentInvocation;

/// Prefix for auto-generated working branch names.
const BRANCH_PREFIX: &str = "taskpilot";

/// Defaults applied to every request.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub default_timeout_secs: u64,
    pub default_model: Option<String>,
    /// Base directory for relative `promptFile` paths.
    pub prompts_dir: PathBuf,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 300,
            default_model: None,
            prompts_dir: PathBuf::from("."),
        }
    }
}

/// Everything needed to run one task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_dir: PathBuf,
    /// Ref the repository was fetched at, when one was materialised.
    pub branch: Option<String>,
    pub invocation: AgentInvocation,
}

/// Builds [`TaskContext`]s.
#[derive(Clone)]
pub struct TaskContextBuilder {
    store: TaskStore,
    templates: TemplateCatalog,
    settings: ContextSettings,
    repo: Option<Arc<dyn RepositorySource>>,
}

impl TaskContextBuilder {
    pub fn new(store: TaskStore, templates: TemplateCatalog, settings: ContextSettings) -> Self {
        Self {
            store,
            templates,
            settings,
            repo: None,
        }
    }

    /// Enable repository materialisation.
    #[must_use]
    pub fn with_repository_source(mut self, repo: Arc<dyn RepositorySource>) -> Self {
        self.repo = Some(repo);
        self
    }

    pub const fn store(&self) -> &TaskStore {
        &self.store
    }

    pub const fn templates(&self) -> &TemplateCatalog {
        &self.templates
    }

    /// Resolve, persist, and prepare the workspace for a task.
    ///
    /// The prompt is resolved before anything touches disk, so an
    /// [`TaskError::EmptyPrompt`] leaves no artifacts behind.
    pub async fn build(
        &self,
        id: &str,
        request: &TaskRequest,
        created_at: i64,
        started_at: i64,
    ) -> Result<TaskContext, TaskError> {
        let prompt = self.resolve_prompt(request).await?;
        let resolved = self.resolve_defaults(request);

        let task_dir = self.store.create_task_dir(id).await?;
        self.store
            .write_request(&PersistedTask {
                id: id.to_string(),
                created_at,
                started_at: Some(started_at),
                request: resolved.clone(),
            })
            .await?;
        self.store.write_prompt(id, &prompt).await?;

        let workspace = task_dir.join(WORKSPACE_DIR);
        tokio::fs::create_dir_all(&workspace).await?;

        let branch = match &resolved.repository {
            Some(repo_ref) => Some(self.materialize(id, repo_ref, &workspace).await?),
            None => None,
        };

        let invocation = AgentInvocation {
            prompt,
            working_dir: workspace,
            allowed_tools: resolved.allowed_tools.clone().unwrap_or_default(),
            disallowed_tools: resolved.disallowed_tools.clone().unwrap_or_default(),
            max_turns: resolved.max_turns.unwrap_or(DEFAULT_MAX_TURNS),
            model: resolved.model.clone(),
            system_prompt: resolved.system_prompt.clone(),
            append_system_prompt: resolved.append_system_prompt.clone(),
            output_schema: resolved.output_schema.clone(),
            timeout: Duration::from_secs(
                resolved
                    .timeout_seconds
                    .unwrap_or(self.settings.default_timeout_secs),
            ),
        };

        debug!(task_id = id, task_dir = %task_dir.display(), "Task context ready");

        Ok(TaskContext {
            task_dir,
            branch,
            invocation,
        })
    }

    /// Inline prompt, then prompt file, then the category's default prompt.
    pub async fn resolve_prompt(&self, request: &TaskRequest) -> Result<String, TaskError> {
        if let Some(prompt) = request.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            return Ok(prompt.to_string());
        }

        if let Some(file) = &request.prompt_file {
            let path = self.prompt_file_path(file)?;
            let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
                TaskError::Validation(format!("prompt file {file} could not be read: {e}"))
            })?;
            if !text.trim().is_empty() {
                return Ok(text);
            }
            debug!(file, "Prompt file is empty, falling back to category default");
        }

        self.templates
            .for_category(&request.task_type)
            .map(|t| t.prompt.to_string())
            .ok_or(TaskError::EmptyPrompt)
    }

    /// Fill unset tools, turn budget, model and timeout.
    pub fn resolve_defaults(&self, request: &TaskRequest) -> TaskRequest {
        let template = self.templates.for_category(&request.task_type);
        let mut resolved = request.clone();

        if resolved.allowed_tools.is_none() {
            let tools = template.map_or(DEFAULT_ALLOWED_TOOLS, |t| t.allowed_tools);
            resolved.allowed_tools = Some(tools.iter().map(|s| (*s).to_string()).collect());
        }
        if resolved.max_turns.is_none() {
            resolved.max_turns = Some(template.map_or(DEFAULT_MAX_TURNS, |t| t.max_turns));
        }
        if resolved.model.is_none() {
            resolved.model.clone_from(&self.settings.default_model);
        }
        if resolved.timeout_seconds.is_none() {
            resolved.timeout_seconds = Some(self.settings.default_timeout_secs);
        }
        resolved
    }

    fn prompt_file_path(&self, file: &str) -> Result<PathBuf, TaskError> {
        let relative = Path::new(file);
        let confined = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if file.is_empty() || !confined {
            return Err(TaskError::Validation(format!(
                "promptFile must be a relative path without '..': {file}"
            )));
        }
        Ok(self.settings.prompts_dir.join(relative))
    }

    /// Create a working branch (best effort) and unpack the repository.
    ///
    /// Returns the ref that was fetched.
    async fn materialize(
        &self,
        id: &str,
        repo_ref: &RepositoryRef,
        dest: &Path,
    ) -> Result<String, TaskError> {
        let source = self.repo.as_ref().ok_or_else(|| {
            TaskError::RepositorySetupFailed("no repository source is configured".into())
        })?;
        let project = repo_ref.project.as_str();

        let base = match &repo_ref.base_branch {
            Some(base) => base.clone(),
            None => source.default_branch(project).await.map_err(|e| {
                TaskError::RepositorySetupFailed(format!("{project}: {e}"))
            })?,
        };
        let feature = repo_ref.branch_name.clone().unwrap_or_else(|| {
            let short: String = id.chars().take(8).collect();
            format!("{BRANCH_PREFIX}/{short}")
        });

        let git_ref = match source.create_branch(project, &feature, &base).await {
            Ok(()) => {
                info!(task_id = id, project, branch = %feature, base = %base, "Created working branch");
                feature
            }
            Err(e) => {
                warn!(
                    task_id = id,
                    project,
                    branch = %feature,
                    base = %base,
                    error = %e,
                    "Branch creation failed, falling back to base branch"
                );
                base
            }
        };

        source
            .fetch_into(project, &git_ref, dest)
            .await
            .map_err(|e| TaskError::RepositorySetupFailed(format!("{project}@{git_ref}: {e}")))?;
        info!(task_id = id, project, git_ref = %git_ref, "Repository materialised");
        Ok(git_ref)
    }
}
