//! Saved-transcript handlers.

use super::{authenticate, ApiError, AppState};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(super) struct ListParams {
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    20
}

pub(super) async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let owner = authenticate(&state, &headers).await?;
    let transcripts = state.transcripts.list_recent(&owner, params.limit.min(100))?;
    Ok(Json(json!({ "transcripts": transcripts })))
}

pub(super) async fn get_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let owner = authenticate(&state, &headers).await?;
    let transcript = state.transcripts.get(&owner, &id)?;
    Ok(Json(json!({ "transcript": transcript })))
}

pub(super) async fn delete_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let owner = authenticate(&state, &headers).await?;
    state.transcripts.delete(&owner, &id)?;
    Ok(Json(json!({ "success": true })))
}
