use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use taskpilot_core::{TaskRequest, TaskResponse, TaskTemplate};

use super::AppState;
use super::error::ApiError;
use crate::error::TaskError;
use crate::lifecycle::TaskStats;

/// Health report.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub agent_binary: String,
    pub api_key_configured: bool,
    pub uptime_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct TemplateQuery {
    pub category: Option<String>,
}

/// `POST /tasks`
pub async fn submit_task(
    State(state): State<AppState>,
    body: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let Json(request) = body.map_err(|e| TaskError::Validation(e.body_text()))?;
    let response = state.manager.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// `GET /tasks/{id}`
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    Ok(Json(state.manager.get(&id).await?))
}

/// `DELETE /tasks/{id}`
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let response = state.manager.cancel(&id).await?;
    Ok(Json(json!({
        "id": response.id,
        "status": "cancelled",
        "message": response.error,
    }))
    .into_response())
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        agent_binary: state.agent_binary.clone(),
        api_key_configured: state.api_key_configured,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// `GET /stats`
pub async fn stats(State(state): State<AppState>) -> Json<TaskStats> {
    Json(state.manager.stats().await)
}

/// `GET /templates[?category=]`
pub async fn list_templates(
    State(state): State<AppState>,
    Query(query): Query<TemplateQuery>,
) -> Json<Vec<&'static TaskTemplate>> {
    Json(state.templates.list(query.category.as_deref()))
}

/// `GET /templates/{id}`
pub async fn get_template(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.templates.by_id(&id) {
        Some(template) => Json(template).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Template not found: {id}") })),
        )
            .into_response(),
    }
}
