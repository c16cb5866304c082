//! GitLab API v4 response types.
//!
//! Deserialization structs matching GitLab REST API JSON responses.

use serde::Deserialize;

/// Project from GitLab API v4 (subset of fields).
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub id: u64,
    pub path_with_namespace: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// Branch from GitLab API v4 (subset of fields).
#[derive(Debug, Clone, Deserialize)]
pub struct Branch {
    pub name: String,
}
