//! `TaskPilot` Core Library
//!
//! Shared functionality for `TaskPilot` components:
//! - Task request/response data model
//! - Stream-json interpretation of agent output
//! - Task category templates and built-in defaults
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod ndjson;
pub mod task;
pub mod templates;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use task::{TaskMetrics, TaskRequest, TaskResponse, TaskResult, TaskStatus};
pub use templates::{TaskTemplate, TemplateCatalog};
