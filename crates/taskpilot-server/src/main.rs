//! `TaskPilot` Server
//!
//! Accepts agent tasks over HTTP, runs each one as a CLI agent subprocess,
//! and serves the results for polling.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use taskpilot_core::TemplateCatalog;
use taskpilot_core::config::load_config;
use taskpilot_server::context::{ContextSettings, TaskContextBuilder};
use taskpilot_server::lifecycle::{ManagerConfig, TaskManager, TaskStore};
use taskpilot_server::repo::{GitLabClient, GitLabConfig};
use taskpilot_server::server::{AppState, build_router};
use taskpilot_server::subprocess::{AgentBinary, SubprocessRunner};

#[derive(Parser, Debug)]
#[command(name = "taskpilot-server")]
#[command(version, about = "TaskPilot server - asynchronous agent task execution")]
struct Args {
    /// TCP bind address. Defaults to 0.0.0.0 on the configured port.
    #[arg(long, env = "TASKPILOT_ADDR")]
    addr: Option<SocketAddr>,

    /// Path to a JSON config file
    #[arg(long, env = "TASKPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding per-task working directories
    #[arg(long, env = "TASKPILOT_TASKS_DIR")]
    tasks_dir: Option<PathBuf>,

    /// Base directory for relative `promptFile` paths
    #[arg(long, env = "TASKPILOT_PROMPTS_DIR")]
    prompts_dir: Option<PathBuf>,

    /// Agent CLI binary name or path
    #[arg(long, env = "TASKPILOT_AGENT_BIN")]
    agent_bin: Option<String>,

    /// Maximum number of in-flight tasks
    #[arg(long, env = "TASKPILOT_MAX_CONCURRENT_TASKS")]
    max_concurrent_tasks: Option<usize>,

    /// Default task timeout in seconds
    #[arg(long, env = "TASKPILOT_DEFAULT_TIMEOUT_SECS")]
    default_timeout: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, env = "TASKPILOT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "TASKPILOT_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    apply_args(&mut config, &args);
    config.validate()?;

    let log_filter =
        taskpilot_core::tracing_init::default_filter("taskpilot_server", &config.server.log_level);
    taskpilot_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_concurrent_tasks = config.tasks.max_concurrent_tasks,
        "Starting taskpilot-server"
    );

    let tasks_dir = match config.tasks.tasks_dir.clone() {
        Some(dir) => dir,
        None => default_tasks_dir()?,
    };
    tokio::fs::create_dir_all(&tasks_dir).await?;
    let prompts_dir = match config.tasks.prompts_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    if std::env::var_os("ANTHROPIC_API_KEY").is_none() {
        warn!("ANTHROPIC_API_KEY is not set; agent runs will likely fail");
    }

    let binary = AgentBinary::resolve(&config.agent.binary);
    info!(agent = %binary, "Agent binary resolved");

    let templates = TemplateCatalog::builtin();
    let mut builder = TaskContextBuilder::new(
        TaskStore::new(&tasks_dir),
        templates,
        ContextSettings {
            default_timeout_secs: config.tasks.default_timeout_secs,
            default_model: config.agent.default_model.clone(),
            prompts_dir,
        },
    );
    if let (Some(base_url), Some(token)) = (&config.gitlab.base_url, &config.gitlab.token) {
        let client = GitLabClient::new(&GitLabConfig {
            base_url: base_url.clone(),
            token: token.clone(),
        })?;
        info!(base_url = %base_url, "GitLab repository source enabled");
        builder = builder.with_repository_source(Arc::new(client));
    }

    let manager = Arc::new(TaskManager::new(
        ManagerConfig {
            max_concurrent_tasks: config.tasks.max_concurrent_tasks,
            max_timeout_secs: config.tasks.max_timeout_secs,
        },
        builder,
        SubprocessRunner::new(binary.clone()),
    ));

    let app = build_router(AppState::new(manager, templates, binary.to_string()));
    let addr = args
        .addr
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.server.port)));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // `true` unsets $NOTIFY_SOCKET so agent subprocesses can't notify systemd.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    info!(addr = %addr, tasks_dir = %tasks_dir.display(), "HTTP server ready");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    info!("Server stopped");
    Ok(())
}

/// CLI flags override the config file and environment.
fn apply_args(config: &mut taskpilot_core::Config, args: &Args) {
    if let Some(dir) = &args.tasks_dir {
        config.tasks.tasks_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.prompts_dir {
        config.tasks.prompts_dir = Some(dir.clone());
    }
    if let Some(bin) = &args.agent_bin {
        config.agent.binary.clone_from(bin);
    }
    if let Some(max) = args.max_concurrent_tasks {
        config.tasks.max_concurrent_tasks = max;
    }
    if let Some(secs) = args.default_timeout {
        config.tasks.default_timeout_secs = secs;
    }
    if let Some(level) = &args.log_level {
        config.server.log_level.clone_from(level);
    }
}

/// Default tasks directory: ~/.taskpilot/tasks
fn default_tasks_dir() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".taskpilot").join("tasks"))
}
