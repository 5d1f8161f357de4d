//! HTTP surface of the voxnote server
//!
//! Thin axum handlers over the pipeline: every route authenticates
//! first, then delegates to the stores or the transcribe pipeline.
//! Errors map onto the taxonomy with one distinct JSON message per
//! variant.

mod dictionary;
mod library;
mod transcribe;

use crate::auth::{bearer_token, IdentityProvider};
use crate::config::MergeRetentionPolicy;
use crate::error::TranscribeError;
use crate::merge::MergeStore;
use crate::store::{DictionaryStore, StoreError, TranscriptStore};
use crate::stt::SpeechToText;
use axum::extract::DefaultBodyLimit;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state behind every handler.
pub struct AppState {
    pub identity: Arc<dyn IdentityProvider>,
    pub speech: Arc<dyn SpeechToText>,
    pub transcripts: Arc<dyn TranscriptStore>,
    pub dictionary: Arc<dyn DictionaryStore>,
    pub merges: MergeStore,
    pub max_payload_bytes: usize,
    pub merge_retention: MergeRetentionPolicy,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    // The body limit sits well above our own payload ceiling (with
    // headroom for multipart framing) so oversized uploads reach the
    // taxonomy check and get a PayloadTooLarge response instead of a
    // generic rejection. Saturating math keeps a pathological
    // configured ceiling from overflowing.
    let body_limit = state
        .max_payload_bytes
        .saturating_mul(2)
        .saturating_add(64 * 1024);
    Router::new()
        .route("/healthz", get(health))
        .route("/api/transcribe", post(transcribe::handle))
        .route("/api/transcripts", get(library::list))
        .route(
            "/api/transcripts/:id",
            get(library::get_one).delete(library::delete_one),
        )
        .route(
            "/api/dictionary",
            get(dictionary::list).post(dictionary::create),
        )
        .route(
            "/api/dictionary/:id",
            put(dictionary::update).delete(dictionary::delete_one),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Verify the bearer credential and resolve the owner id.
pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<String, ApiError> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let token = bearer_token(header).ok_or(TranscribeError::Unauthenticated)?;
    Ok(state.identity.verify_token(token).await?)
}

/// Handler-level error with a JSON body `{ "error": code, "message": text }`.
#[derive(Debug)]
pub enum ApiError {
    Transcribe(TranscribeError),
    Store(StoreError),
    BadRequest(String),
}

impl From<TranscribeError> for ApiError {
    fn from(e: TranscribeError) -> Self {
        ApiError::Transcribe(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Transcribe(e) => {
                let status = match e {
                    TranscribeError::Unauthenticated => StatusCode::UNAUTHORIZED,
                    TranscribeError::EmptyPayload => StatusCode::BAD_REQUEST,
                    TranscribeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    TranscribeError::UpstreamQuotaExceeded => StatusCode::PAYMENT_REQUIRED,
                    TranscribeError::UpstreamRateLimited => StatusCode::TOO_MANY_REQUESTS,
                    TranscribeError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    TranscribeError::UpstreamRejectedFormat(_) => {
                        StatusCode::UNSUPPORTED_MEDIA_TYPE
                    }
                    TranscribeError::UpstreamUnknown { .. } | TranscribeError::Network(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                    TranscribeError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.code())
            }
            ApiError::Store(e) => match e {
                StoreError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                StoreError::PhraseConflict => (StatusCode::CONFLICT, "phrase_conflict"),
                StoreError::InvalidEntry => (StatusCode::BAD_REQUEST, "invalid_entry"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_failure"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Transcribe(e) => e.to_string(),
            ApiError::Store(e) => e.to_string(),
            ApiError::BadRequest(m) => m.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = Json(json!({ "error": code, "message": self.message() }));
        (status, body).into_response()
    }
}
