//! `TaskPilot` server library.
//!
//! Runs CLI agent tasks asynchronously behind an HTTP API:
//! - [`subprocess`]: one agent child process per task, with timeout and cancellation
//! - [`context`]: prompt and default resolution, working directory, repository checkout
//! - [`lifecycle`]: admission, settlement, on-disk artifacts and recovery
//! - [`repo`]: GitLab branch creation and archive download
//! - [`server`]: axum routes

pub mod context;
pub mod error;
pub mod lifecycle;
pub mod repo;
pub mod server;
pub mod subprocess;
