//! One-shot agent subprocess runner.
//!
//! Spawns the agent, writes the prompt to stdin, captures stdout/stderr, and
//! races process exit against the task timeout and cancellation.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::binary::AgentBinary;
use crate::error::TaskError;

/// Flags passed on every run: print mode, streaming JSON, no permission prompts.
pub const FIXED_FLAGS: &[&str] = &[
    "-p",
    "--output-format",
    "stream-json",
    "--verbose",
    "--dangerously-skip-permissions",
];

/// Environment forwarded to the agent even when the server runs with a
/// stripped environment (e.g. under systemd).
const FORWARDED_ENV: &[&str] = &["HOME", "PATH", "ANTHROPIC_API_KEY"];

/// How long to keep draining output pipes after the process is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Fully resolved parameters for one agent run.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub max_turns: u32,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub append_system_prompt: Option<String>,
    pub output_schema: Option<Value>,
    pub timeout: Duration,
}

impl AgentInvocation {
    /// The agent argument vector. The prompt itself goes through stdin.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = FIXED_FLAGS.iter().map(|s| (*s).to_string()).collect();
        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".into());
            args.push(self.allowed_tools.join(","));
        }
        if !self.disallowed_tools.is_empty() {
            args.push("--disallowedTools".into());
            args.push(self.disallowed_tools.join(","));
        }
        args.push("--max-turns".into());
        args.push(self.max_turns.to_string());
        if let Some(model) = &self.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        if let Some(prompt) = &self.system_prompt {
            args.push("--system-prompt".into());
            args.push(prompt.clone());
        }
        if let Some(prompt) = &self.append_system_prompt {
            args.push("--append-system-prompt".into());
            args.push(prompt.clone());
        }
        if let Some(schema) = &self.output_schema {
            args.push("--json-schema".into());
            args.push(schema.to_string());
        }
        args
    }
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Everything captured from one run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub termination: Termination,
    pub elapsed: Duration,
}

impl RunOutput {
    /// Map the termination onto the task error taxonomy.
    pub fn check(&self, timeout: Duration) -> Result<(), TaskError> {
        match self.termination {
            Termination::TimedOut => Err(TaskError::TimedOut {
                secs: timeout.as_secs(),
            }),
            Termination::Cancelled => Err(TaskError::Cancelled),
            Termination::Exited(status) if !status.success() => {
                Err(TaskError::non_zero_exit(status.code(), &self.stderr))
            }
            Termination::Exited(_) => Ok(()),
        }
    }
}

/// Runs the agent binary as a child process, one process per call.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    binary: AgentBinary,
}

impl SubprocessRunner {
    pub const fn new(binary: AgentBinary) -> Self {
        Self { binary }
    }

    pub const fn binary(&self) -> &AgentBinary {
        &self.binary
    }

    /// Run the agent to completion, timeout, or cancellation.
    ///
    /// Only launch and wait failures are returned as `Err`; every other outcome comes
    /// back as a [`RunOutput`] carrying whatever output was captured.
    pub async fn run(
        &self,
        invocation: &AgentInvocation,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunOutput, TaskError> {
        let mut cmd = self.binary.command();
        cmd.args(invocation.args())
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for key in FORWARDED_ENV {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }

        info!(
            binary = %self.binary,
            working_dir = %invocation.working_dir.display(),
            max_turns = invocation.max_turns,
            model = ?invocation.model,
            timeout_secs = invocation.timeout.as_secs(),
            "Spawning agent subprocess"
        );
        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| TaskError::ProcessLaunch(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TaskError::ProcessLaunch("Failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskError::ProcessLaunch("Failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TaskError::ProcessLaunch("Failed to capture stderr".into()))?;

        let prompt = invocation.prompt.clone();
        let stdin_task = tokio::spawn(async move {
            let mut stdin = stdin;
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                debug!(error = %e, "Failed to write prompt to stdin");
                return;
            }
            if let Err(e) = stdin.shutdown().await {
                debug!(error = %e, "Failed to close stdin");
            }
        });
        let stdout_capture = Capture::spawn(stdout);
        let stderr_capture = Capture::spawn(stderr);

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            () = tokio::time::sleep(invocation.timeout) => Waited::TimedOut,
            () = cancelled(cancel) => Waited::Cancelled,
        };

        let termination = match waited {
            Waited::Exited(Ok(status)) => Termination::Exited(status),
            Waited::Exited(Err(e)) => {
                warn!(error = %e, "Error waiting for agent process");
                kill(&mut child).await;
                return Err(TaskError::Io(e));
            }
            Waited::TimedOut => {
                warn!(
                    timeout_secs = invocation.timeout.as_secs(),
                    "Agent timed out, killing subprocess"
                );
                kill(&mut child).await;
                Termination::TimedOut
            }
            Waited::Cancelled => {
                info!("Cancellation requested, killing subprocess");
                kill(&mut child).await;
                Termination::Cancelled
            }
        };

        stdin_task.abort();
        let stdout = stdout_capture.finish().await;
        let stderr = stderr_capture.finish().await;
        let elapsed = start.elapsed();

        info!(
            ?termination,
            elapsed_ms = elapsed.as_millis(),
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Agent subprocess finished"
        );

        Ok(RunOutput {
            stdout,
            stderr,
            termination,
            elapsed,
        })
    }
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Resolves once the flag flips to `true`. A dropped sender never cancels.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill agent subprocess");
    }
}

/// Background reader accumulating a pipe into a shared buffer.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl Capture {
    fn spawn<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => sink.lock().await.extend_from_slice(&line),
                    Err(e) => {
                        debug!(error = %e, "Output pipe read failed");
                        break;
                    }
                }
            }
        });
        Self { buf, handle }
    }

    /// Wait for EOF (bounded), then return everything read so far.
    async fn finish(self) -> String {
        let Self { buf, mut handle } = self;
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await.is_err() {
            warn!("Output pipe still open after process exit, keeping partial output");
            handle.abort();
        }
        let bytes = buf.lock().await;
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn invocation(dir: &std::path::Path, timeout: Duration) -> AgentInvocation {
        AgentInvocation {
            prompt: "hello agent".into(),
            working_dir: dir.to_path_buf(),
            allowed_tools: vec!["Read".into(), "Bash".into()],
            disallowed_tools: Vec::new(),
            max_turns: 3,
            model: None,
            system_prompt: None,
            append_system_prompt: None,
            output_schema: None,
            timeout,
        }
    }

    fn script(body: &str) -> SubprocessRunner {
        SubprocessRunner::new(AgentBinary::with_leading_args("sh", ["-c", body, "agent"]))
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[test]
    fn args_include_fixed_flags_and_limits() {
        let mut inv = invocation(std::path::Path::new("/tmp"), Duration::from_secs(1));
        inv.model = Some("claude-sonnet-4".into());
        inv.disallowed_tools = vec!["WebFetch".into()];
        inv.output_schema = Some(serde_json::json!({"type":"object"}));
        let args = inv.args();
        assert_eq!(&args[..5], FIXED_FLAGS);
        let joined = args.join(" ");
        assert!(joined.contains("--allowedTools Read,Bash"));
        assert!(joined.contains("--disallowedTools WebFetch"));
        assert!(joined.contains("--max-turns 3"));
        assert!(joined.contains("--model claude-sonnet-4"));
        assert!(joined.contains(r#"--json-schema {"type":"object"}"#));
        assert!(!joined.contains("hello agent"), "prompt must not be an argument");
    }

    #[test]
    fn args_omit_empty_tool_lists() {
        let mut inv = invocation(std::path::Path::new("/tmp"), Duration::from_secs(1));
        inv.allowed_tools.clear();
        let args = inv.args();
        assert!(!args.iter().any(|a| a == "--allowedTools"));
        assert!(!args.iter().any(|a| a == "--disallowedTools"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prompt_is_piped_to_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = script("cat")
            .run(&invocation(dir.path(), Duration::from_secs(10)), no_cancel())
            .await
            .unwrap();
        assert_eq!(out.stdout, "hello agent");
        assert!(out.check(Duration::from_secs(10)).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = script("cat >/dev/null; pwd")
            .run(&invocation(dir.path(), Duration::from_secs(10)), no_cancel())
            .await
            .unwrap();
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let timeout = Duration::from_secs(10);
        let out = script("cat >/dev/null; echo 'bad credentials' >&2; exit 4")
            .run(&invocation(dir.path(), timeout), no_cancel())
            .await
            .unwrap();
        match out.check(timeout) {
            Err(TaskError::NonZeroExit { code, message }) => {
                assert_eq!(code, Some(4));
                assert_eq!(message, "bad credentials");
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_process_and_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let timeout = Duration::from_millis(300);
        let start = Instant::now();
        let out = script(r#"echo '{"type":"system","subtype":"init"}'; exec sleep 30"#)
            .run(&invocation(dir.path(), timeout), no_cancel())
            .await
            .unwrap();
        assert_eq!(out.termination, Termination::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(out.stdout.contains(r#""type":"system""#));
        assert!(matches!(out.check(timeout), Err(TaskError::TimedOut { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        let runner = script("exec sleep 30");
        let inv = invocation(dir.path(), Duration::from_secs(30));
        let handle = tokio::spawn(async move { runner.run(&inv, rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let out = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run should stop after cancel")
            .unwrap()
            .unwrap();
        assert_eq!(out.termination, Termination::Cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropped_cancel_sender_does_not_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let out = script("cat >/dev/null; echo done")
            .run(&invocation(dir.path(), Duration::from_secs(10)), rx)
            .await
            .unwrap();
        assert!(matches!(out.termination, Termination::Exited(_)));
        assert_eq!(out.stdout.trim(), "done");
    }

    #[tokio::test]
    async fn missing_binary_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SubprocessRunner::new(AgentBinary::direct("/nonexistent/agent-binary"));
        let err = runner
            .run(&invocation(dir.path(), Duration::from_secs(1)), no_cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::ProcessLaunch(_)));
    }
}
