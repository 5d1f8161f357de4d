//! The transcribe pipeline handler
//!
//! Accepts a decodable audio unit (segments 0..=k concatenated),
//! transcribes it upstream, applies the owner's dictionary
//! corrections, and merges the result into the owner's running
//! transcript. On the final unit the consolidated text is persisted
//! and the merge entry cleared.

use super::{authenticate, ApiError, AppState};
use crate::config::MergeRetentionPolicy;
use crate::correction::apply_corrections;
use crate::error::TranscribeError;
use crate::merge::MergeStore;
use crate::stt::validate_payload;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TranscribeReply {
    text: String,
    is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    transcript_id: Option<String>,
}

struct TranscribeRequest {
    audio: Vec<u8>,
    content_type: String,
    is_final: bool,
    session: Option<String>,
    seq: Option<usize>,
}

/// A body cut short by the transport's length limit belongs to the
/// payload-size taxonomy, not to generic bad-request handling. The
/// exact size is unknown at that point (`size: 0`).
fn multipart_error(e: MultipartError, max: usize) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return TranscribeError::PayloadTooLarge { size: 0, max }.into();
    }
    ApiError::BadRequest(format!("Invalid multipart body: {e}"))
}

async fn read_multipart(mut multipart: Multipart, max: usize) -> Result<TranscribeRequest, ApiError> {
    let mut audio = None;
    let mut content_type = "audio/webm".to_string();
    let mut is_final = false;
    let mut session = None;
    let mut seq = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max))?
    {
        match field.name() {
            Some("audio") => {
                if let Some(ct) = field.content_type() {
                    content_type = ct.to_string();
                }
                let bytes = field.bytes().await.map_err(|e| multipart_error(e, max))?;
                audio = Some(bytes.to_vec());
            }
            Some("final") => {
                let value = field.text().await.unwrap_or_default();
                is_final = value == "true";
            }
            Some("session") => {
                let value = field.text().await.unwrap_or_default();
                if !value.is_empty() {
                    session = Some(value);
                }
            }
            Some("seq") => {
                let value = field.text().await.unwrap_or_default();
                seq = value.parse::<usize>().ok();
            }
            _ => {}
        }
    }

    let audio = audio.ok_or_else(|| ApiError::BadRequest("Missing audio field".to_string()))?;
    Ok(TranscribeRequest {
        audio,
        content_type,
        is_final,
        session,
        seq,
    })
}

pub(super) async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<TranscribeReply>, ApiError> {
    let owner = authenticate(&state, &headers).await?;
    let request = read_multipart(multipart, state.max_payload_bytes).await?;

    validate_payload(request.audio.len(), state.max_payload_bytes)?;

    debug!(
        owner = %owner,
        bytes = request.audio.len(),
        is_final = request.is_final,
        session = ?request.session,
        seq = ?request.seq,
        "Transcribing audio unit"
    );

    let raw = state
        .speech
        .transcribe(request.audio, &request.content_type)
        .await?;

    // A broken dictionary must not block transcription.
    let rules = match state.dictionary.rules(&owner) {
        Ok(rules) => rules,
        Err(e) => {
            warn!("Failed to load dictionary, skipping corrections: {}", e);
            Vec::new()
        }
    };
    let corrected = apply_corrections(&raw, &rules);

    // Everything that touches merge state for this owner happens under
    // the per-owner lock, including the final persist, so a late
    // retried partial can never interleave with the final save.
    let mut merge = state.merges.lock_owner(&owner).await;

    // Discard anything a crashed or abandoned session left behind. The
    // session id catches new sessions whose first surviving request is
    // not segment 0 (segment-0 dispatch failed and was retried inside
    // a later, larger unit).
    MergeStore::bind_session(&mut merge, request.session.as_deref(), request.seq);

    if !request.is_final {
        let merged = MergeStore::append(&mut merge, &corrected);
        return Ok(Json(TranscribeReply {
            text: merged,
            is_final: false,
            transcript_id: None,
        }));
    }

    // The final unit covers the entire recording, so its corrected
    // transcription is the consolidated transcript.
    let text = MergeStore::take_final(&mut merge, &corrected);

    match state.transcripts.create(&owner, &text) {
        Ok(record) => Ok(Json(TranscribeReply {
            text,
            is_final: true,
            transcript_id: Some(record.id),
        })),
        Err(e) => {
            error!("Failed to save transcript: {}", e);
            if state.merge_retention == MergeRetentionPolicy::Retain {
                MergeStore::retain(&mut merge, text.clone());
            }
            // The transcription itself succeeded; return the text and
            // let the client see the save failed via the missing id.
            Ok(Json(TranscribeReply {
                text,
                is_final: true,
                transcript_id: None,
            }))
        }
    }
}
