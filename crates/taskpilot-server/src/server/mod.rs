//! HTTP surface over the task manager.

mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use taskpilot_core::TemplateCatalog;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

use crate::lifecycle::TaskManager;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TaskManager>,
    pub templates: TemplateCatalog,
    /// Displayed by `/health`.
    pub agent_binary: String,
    pub api_key_configured: bool,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(manager: Arc<TaskManager>, templates: TemplateCatalog, agent_binary: String) -> Self {
        Self {
            manager,
            templates,
            agent_binary,
            api_key_configured: std::env::var_os("ANTHROPIC_API_KEY").is_some_and(|v| !v.is_empty()),
            started_at: Instant::now(),
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/tasks", axum::routing::post(routes::submit_task))
        .route(
            "/tasks/{id}",
            get(routes::get_task).delete(routes::cancel_task),
        )
        .route("/health", get(routes::health))
        .route("/stats", get(routes::stats))
        .route("/templates", get(routes::list_templates))
        .route("/templates/{id}", get(routes::get_template))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
