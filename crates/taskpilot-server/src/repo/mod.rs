//! Source repository materialisation.
//!
//! A task may name a repository on a Git hosting service. The context builder
//! uses a [`RepositorySource`] to create a working branch and unpack the
//! repository contents into the task workspace. [`GitLabClient`] is the
//! production implementation.

mod archive;
mod client;
pub mod types;


use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub use archive::extract_tar_gz;
pub use client::{GitLabClient, GitLabConfig};

/// Repository source errors.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitLab API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Archive extraction failed: {0}")]
    Extract(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote repository operations needed to prepare a task workspace.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// The project's default branch name.
    async fn default_branch(&self, project: &str) -> Result<String, RepoError>;

    /// Create `branch` from `from`.
    async fn create_branch(&self, project: &str, branch: &str, from: &str) -> Result<(), RepoError>;

    /// Download the repository at `git_ref` and unpack it into `dest`.
    async fn fetch_into(&self, project: &str, git_ref: &str, dest: &Path) -> Result<(), RepoError>;
}
