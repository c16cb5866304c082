//! Shared fixtures: a shell-script stand-in for the agent CLI.

#![allow(dead_code, clippy::unwrap_used, clippy::panic)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use taskpilot_core::{TaskRequest, TaskResponse, TaskStatus, TemplateCatalog};
use taskpilot_server::context::{ContextSettings, TaskContextBuilder};
use taskpilot_server::lifecycle::{ManagerConfig, TaskManager, TaskStore};
use taskpilot_server::subprocess::{AgentBinary, SubprocessRunner};

/// Reads the prompt from stdin and picks a behaviour from its contents.
pub const FAKE_AGENT: &str = r#"
prompt=$(cat)
case "$prompt" in
  *sleep*)
    echo $$ > agent.pid
    echo '{"type":"system","subtype":"init","session_id":"s-sleep"}'
    exec sleep 30 ;;
  *crash*)
    echo 'invalid api key' >&2
    exit 3 ;;
  *silent*)
    echo 'nothing structured here'
    exit 0 ;;
esac
echo 'starting up...'
echo '{"type":"system","subtype":"init","session_id":"s-1","model":"claude-sonnet-4"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"thinking"}]}}'
echo 'WARN: something noisy'
echo '{"type":"result","subtype":"success","is_error":false,"duration_ms":1500,"duration_api_ms":1200,"num_turns":1,"result":"10","session_id":"s-1","total_cost_usd":0.5,"permission_denials":[]}'
"#;

pub fn fake_runner() -> SubprocessRunner {
    SubprocessRunner::new(AgentBinary::with_leading_args(
        "sh",
        ["-c", FAKE_AGENT, "agent"],
    ))
}

pub fn manager(tasks_dir: &Path, max_concurrent_tasks: usize) -> Arc<TaskManager> {
    let builder = TaskContextBuilder::new(
        TaskStore::new(tasks_dir),
        TemplateCatalog::builtin(),
        ContextSettings {
            default_timeout_secs: 30,
            default_model: None,
            prompts_dir: tasks_dir.to_path_buf(),
        },
    );
    Arc::new(TaskManager::new(
        ManagerConfig {
            max_concurrent_tasks,
            max_timeout_secs: 60,
        },
        builder,
        fake_runner(),
    ))
}

pub fn request(prompt: &str) -> TaskRequest {
    TaskRequest {
        task_type: "custom".into(),
        prompt: Some(prompt.into()),
        max_turns: Some(1),
        ..Default::default()
    }
}

/// Pid the fake agent recorded in its working directory before sleeping.
pub async fn agent_pid(tasks_dir: &Path, id: &str) -> u32 {
    let path = tasks_dir.join(id).join("workspace").join("agent.pid");
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(text) = std::fs::read_to_string(&path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        assert!(Instant::now() < deadline, "agent never wrote {}", path.display());
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Whether a process with `pid` still exists.
pub fn process_alive(pid: u32) -> bool {
    std::process::Command::new("sh")
        .args(["-c", &format!("kill -0 {pid}")])
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Poll until the task leaves `pending`.
pub async fn wait_terminal(manager: &TaskManager, id: &str) -> TaskResponse {
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let response = manager.get(id).await.unwrap();
        if response.status != TaskStatus::Pending {
            return response;
        }
        assert!(Instant::now() < deadline, "task {id} never settled");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
