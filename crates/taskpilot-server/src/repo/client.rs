//! GitLab REST API v4 repository client.
//!
//! Uses reqwest to read project metadata, create branches and download
//! repository archives.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::debug;

use super::archive::extract_tar_gz;
use super::types::{Branch, Project};
use super::{RepoError, RepositorySource};

/// Configuration for connecting to a GitLab instance.
#[derive(Debug, Clone)]
pub struct GitLabConfig {
    /// GitLab instance URL (e.g., "<https://gitlab.com>").
    pub base_url: String,
    /// Personal access token or OAuth token.
    pub token: String,
}

/// GitLab REST API v4 client.
#[derive(Debug)]
pub struct GitLabClient {
    http: reqwest::Client,
    base_url: String,
}

impl GitLabClient {
    /// Create a new GitLab API client.
    pub fn new(config: &GitLabConfig) -> Result<Self, RepoError> {
        if config.base_url.is_empty() {
            return Err(RepoError::Config("base_url is empty".into()));
        }
        if config.token.is_empty() {
            return Err(RepoError::Config("token is empty".into()));
        }

        let mut headers = HeaderMap::new();
        let token_val = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| RepoError::Config("Invalid token format".into()))?;
        headers.insert(AUTHORIZATION, token_val);

        // reqwest is built with rustls-no-provider; `Err` means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    /// Build the API v4 URL for a given path.
    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    /// URL-encode a project path or ref (e.g., "group/project" -> "group%2Fproject").
    pub(crate) fn encode_path(value: &str) -> String {
        value.replace('/', "%2F")
    }

    /// Check HTTP response status, returning error for non-success codes.
    fn check_status(resp: &reqwest::Response) -> Result<(), RepoError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(RepoError::Api {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").into(),
            });
        }
        Ok(())
    }

    /// Fetch a project's metadata.
    pub async fn get_project(&self, project: &str) -> Result<Project, RepoError> {
        let url = self.api_url(&format!("/projects/{}", Self::encode_path(project)));
        let resp = self.http.get(&url).send().await?;
        Self::check_status(&resp)?;
        Ok(resp.json().await?)
    }

    pub(crate) fn create_branch_url(&self, project: &str, branch: &str, from: &str) -> String {
        format!(
            "{}?branch={}&ref={}",
            self.api_url(&format!(
                "/projects/{}/repository/branches",
                Self::encode_path(project)
            )),
            Self::encode_path(branch),
            Self::encode_path(from)
        )
    }

    pub(crate) fn archive_url(&self, project: &str, git_ref: &str) -> String {
        format!(
            "{}?sha={}",
            self.api_url(&format!(
                "/projects/{}/repository/archive.tar.gz",
                Self::encode_path(project)
            )),
            Self::encode_path(git_ref)
        )
    }
}

#[async_trait]
impl RepositorySource for GitLabClient {
    async fn default_branch(&self, project: &str) -> Result<String, RepoError> {
        let project = self.get_project(project).await?;
        project
            .default_branch
            .filter(|b| !b.is_empty())
            .ok_or_else(|| RepoError::Config(format!("{} has no default branch", project.path_with_namespace)))
    }

    async fn create_branch(&self, project: &str, branch: &str, from: &str) -> Result<(), RepoError> {
        let url = self.create_branch_url(project, branch, from);
        let resp = self.http.post(&url).send().await?;
        Self::check_status(&resp)?;
        let created: Branch = resp.json().await?;
        debug!(project, branch = %created.name, from, "Created branch");
        Ok(())
    }

    async fn fetch_into(&self, project: &str, git_ref: &str, dest: &Path) -> Result<(), RepoError> {
        let url = self.archive_url(project, git_ref);
        let resp = self.http.get(&url).send().await?;
        Self::check_status(&resp)?;
        let bytes = resp.bytes().await?;
        debug!(project, git_ref, bytes = bytes.len(), "Downloaded repository archive");
        extract_tar_gz(&bytes, dest).await
    }
}
