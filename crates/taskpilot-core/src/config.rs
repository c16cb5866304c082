//! Configuration resolution for TaskPilot.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/taskpilot/settings.json) or an explicit file
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete TaskPilot configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub gitlab: GitLabSettings,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: "info".to_string(),
        }
    }
}

/// Task execution defaults and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Admission ceiling: in-flight tasks beyond this are rejected.
    pub max_concurrent_tasks: usize,
    /// Where per-task working directories live. `None` means `~/.taskpilot/tasks`.
    pub tasks_dir: Option<PathBuf>,
    /// Base directory for relative `promptFile` paths. `None` means the current directory.
    pub prompts_dir: Option<PathBuf>,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            tasks_dir: None,
            prompts_dir: None,
            default_timeout_secs: 300,
            max_timeout_secs: 3600,
        }
    }
}

/// Agent CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name or path of the agent binary.
    pub binary: String,
    /// Model passed when a request does not name one. `None` leaves it to the CLI.
    pub default_model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            default_model: None,
        }
    }
}

/// Optional GitLab instance used to materialise task repositories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitLabSettings {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

impl GitLabSettings {
    /// Both URL and token present and non-empty.
    pub fn is_configured(&self) -> bool {
        self.base_url.as_deref().is_some_and(|s| !s.is_empty())
            && self.token.as_deref().is_some_and(|s| !s.is_empty())
    }
}

impl Config {
    /// Validate cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.tasks.max_concurrent_tasks == 0 {
            return Err(Error::Config("max_concurrent_tasks must be at least 1".into()));
        }
        if self.tasks.default_timeout_secs == 0 {
            return Err(Error::Config("default_timeout_secs must be at least 1".into()));
        }
        if self.tasks.default_timeout_secs > self.tasks.max_timeout_secs {
            return Err(Error::Config(format!(
                "default_timeout_secs ({}) exceeds max_timeout_secs ({})",
                self.tasks.default_timeout_secs, self.tasks.max_timeout_secs
            )));
        }
        if self.agent.binary.trim().is_empty() {
            return Err(Error::Config("agent binary cannot be empty".into()));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit_path` replaces the global settings file; it must exist.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config> {
    let mut config = match explicit_path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(path) if path.exists() => load_config_file(&path)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config);
    config.validate()?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".taskpilot").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/taskpilot/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("taskpilot").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    parse_config(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file {}: {}", path.display(), e)))
}

fn parse_config(content: &str) -> std::result::Result<Config, serde_json::Error> {
    serde_json::from_str(content)
}

fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("TASKPILOT_MAX_CONCURRENT_TASKS").and_then(|v| v.parse().ok()) {
        config.tasks.max_concurrent_tasks = n;
    }
    if let Some(n) = lookup("TASKPILOT_DEFAULT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.tasks.default_timeout_secs = n;
    }
    if let Some(val) = lookup("TASKPILOT_TASKS_DIR") {
        config.tasks.tasks_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("TASKPILOT_AGENT_BIN") {
        config.agent.binary = val;
    }
    if let Some(val) = lookup("TASKPILOT_DEFAULT_MODEL") {
        config.agent.default_model = Some(val);
    }
    if let Some(val) = lookup("TASKPILOT_LOG_LEVEL") {
        config.server.log_level = val;
    }
    if let Some(val) = lookup("TASKPILOT_GITLAB_URL") {
        config.gitlab.base_url = Some(val);
    }
    if let Some(val) = lookup("TASKPILOT_GITLAB_TOKEN") {
        config.gitlab.token = Some(val);
    }
}
