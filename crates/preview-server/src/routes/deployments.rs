use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::Json;
use preview_core::paths::normalize_id;
use preview_core::types::parse_status_filter;
use preview_core::DeploymentSummary;
use serde::Deserialize;

use crate::error::AppError;
use crate::lifecycle::CreateRequest;
use crate::proxy::request_host;
use crate::state::AppState;

fn join_error(e: tokio::task::JoinError) -> AppError {
    AppError(anyhow::anyhow!("task join error: {e}"))
}

/// POST /deploy: accept a deployment; orchestration continues in the background.
pub async fn create_deployment(
    State(app): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DeploymentSummary>), AppError> {
    let Json(req) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    let host = request_host(&headers, &uri);
    let deployment = app.lifecycle.create(req, &host).await?;
    Ok((StatusCode::CREATED, Json(deployment.summary())))
}

/// GET /{id}: current record.
pub async fn get_deployment(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentSummary>, AppError> {
    let id = normalize_id(&id).ok_or_else(|| AppError::not_found(id))?;
    let store = app.store.clone();
    let deployment = tokio::task::spawn_blocking(move || store.get(&id))
        .await
        .map_err(join_error)??;
    Ok(Json(deployment.summary()))
}

/// DELETE /{id}: signal the preview process and mark the record stopped.
pub async fn delete_deployment(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentSummary>, AppError> {
    let id = normalize_id(&id).ok_or_else(|| AppError::not_found(id))?;
    let supervisor = app.supervisor.clone();
    let deployment = tokio::task::spawn_blocking(move || supervisor.stop(&id))
        .await
        .map_err(join_error)??;
    Ok(Json(deployment.summary()))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Comma-separated statuses; all records when absent.
    pub status: Option<String>,
}

/// GET /deployments?status=running,starting: newest first.
pub async fn list_deployments(
    State(app): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DeploymentSummary>>, AppError> {
    let filter = match query.status.as_deref() {
        Some(raw) => parse_status_filter(raw)?,
        None => Vec::new(),
    };
    let store = app.store.clone();
    let deployments = tokio::task::spawn_blocking(move || store.list(&filter))
        .await
        .map_err(join_error)??;
    Ok(Json(deployments.iter().map(|d| d.summary()).collect()))
}
