//! Dictionary CRUD handlers.

use super::{authenticate, ApiError, AppState};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(super) struct EntryPayload {
    #[serde(default)]
    phrase: String,
    #[serde(default)]
    correction: String,
}

pub(super) async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let owner = authenticate(&state, &headers).await?;
    let entries = state.dictionary.list(&owner)?;
    Ok(Json(json!({ "entries": entries })))
}

pub(super) async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<EntryPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let owner = authenticate(&state, &headers).await?;
    let entry = state
        .dictionary
        .create(&owner, &payload.phrase, &payload.correction)?;
    Ok(Json(json!({ "entry": entry })))
}

pub(super) async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<EntryPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let owner = authenticate(&state, &headers).await?;
    let entry = state
        .dictionary
        .update(&owner, &id, &payload.phrase, &payload.correction)?;
    Ok(Json(json!({ "entry": entry })))
}

pub(super) async fn delete_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let owner = authenticate(&state, &headers).await?;
    state.dictionary.delete(&owner, &id)?;
    Ok(Json(json!({ "success": true })))
}
