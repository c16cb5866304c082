//! Agent executable resolution.
//!
//! The executable is resolved once, when the runner is built. On Windows the
//! agent is usually installed as a `.cmd` shim, which cannot be spawned
//! directly and is run through `cmd /C` instead.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

/// A resolved program plus any arguments that must precede the agent flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentBinary {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl AgentBinary {
    /// Resolve `name` against `PATH`.
    ///
    /// If resolution fails the name is kept as-is, and the spawn itself will
    /// report the launch error.
    pub fn resolve(name: &str) -> Self {
        match which::which(name) {
            Ok(path) => {
                debug!(binary = name, resolved = %path.display(), "Resolved agent binary");
                Self::from_path(path, cfg!(windows))
            }
            Err(e) => {
                warn!(binary = name, error = %e, "Agent binary not found on PATH, spawning by name");
                Self::direct(name)
            }
        }
    }

    /// Run `program` directly with no leading arguments.
    pub fn direct(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Run `program` with fixed arguments placed before the agent flags.
    pub fn with_leading_args<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            leading_args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn from_path(path: PathBuf, on_windows: bool) -> Self {
        if needs_shell(&path, on_windows) {
            Self::with_leading_args("cmd", [OsString::from("/C"), path.into_os_string()])
        } else {
            Self::direct(path)
        }
    }

    /// A fresh command for this binary, leading arguments applied.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);
        cmd
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl std::fmt::Display for AgentBinary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.leading_args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

fn needs_shell(path: &Path, on_windows: bool) -> bool {
    on_windows
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("cmd") || e.eq_ignore_ascii_case("bat"))
}
