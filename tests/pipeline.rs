//! End-to-end tests for the transcribe pipeline over the HTTP surface,
//! with a scripted speech backend standing in for the upstream API.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use voxnote::auth::StaticIdentityProvider;
use voxnote::config::{DictionaryConflictPolicy, MergeRetentionPolicy};
use voxnote::error::TranscribeError;
use voxnote::merge::MergeStore;
use voxnote::server::{router, AppState};
use voxnote::store::{DictionaryStore, SqliteStore, StoreError, TranscriptRecord, TranscriptStore};
use voxnote::stt::SpeechToText;

const BOUNDARY: &str = "test-boundary-7c2a";
const TOKEN: &str = "dev-token";

/// Pops one scripted result per transcription call.
struct ScriptedStt {
    script: Mutex<VecDeque<Result<String, TranscribeError>>>,
    calls: AtomicUsize,
}

impl ScriptedStt {
    fn new(script: Vec<Result<String, TranscribeError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn transcribe(
        &self,
        _audio: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, TranscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// Transcript store that always fails to save.
struct BrokenTranscripts;

impl TranscriptStore for BrokenTranscripts {
    fn create(&self, _owner: &str, _text: &str) -> Result<TranscriptRecord, StoreError> {
        Err(StoreError::NotFound)
    }
    fn list_recent(&self, _owner: &str, _limit: u32) -> Result<Vec<TranscriptRecord>, StoreError> {
        Ok(Vec::new())
    }
    fn get(&self, _owner: &str, _id: &str) -> Result<TranscriptRecord, StoreError> {
        Err(StoreError::NotFound)
    }
    fn delete(&self, _owner: &str, _id: &str) -> Result<(), StoreError> {
        Err(StoreError::NotFound)
    }
}

struct TestApp {
    app: Router,
    stt: Arc<ScriptedStt>,
    store: Arc<SqliteStore>,
}

fn test_app(script: Vec<Result<String, TranscribeError>>) -> TestApp {
    test_app_with(script, 1024, None)
}

fn test_app_with(
    script: Vec<Result<String, TranscribeError>>,
    max_payload_bytes: usize,
    transcripts_override: Option<Arc<dyn TranscriptStore>>,
) -> TestApp {
    let stt = Arc::new(ScriptedStt::new(script));
    let store = Arc::new(
        SqliteStore::open_in_memory(DictionaryConflictPolicy::Reject)
            .expect("in-memory database"),
    );
    let state = Arc::new(AppState {
        identity: Arc::new(StaticIdentityProvider::new(
            [(TOKEN.to_string(), "user-1".to_string())].into(),
        )),
        speech: stt.clone(),
        transcripts: match transcripts_override {
            Some(transcripts) => transcripts,
            None => store.clone(),
        },
        dictionary: store.clone(),
        merges: MergeStore::new(),
        max_payload_bytes,
        merge_retention: MergeRetentionPolicy::Retain,
    });
    TestApp {
        app: router(state),
        stt,
        store,
    }
}

fn multipart_body(
    audio: &[u8],
    content_type: &str,
    is_final: bool,
    session: Option<&str>,
    seq: Option<usize>,
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"audio\"; \
             filename=\"audio.wav\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(audio);
    body.extend_from_slice(
        format!("\r\n--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"final\"\r\n\r\n{is_final}\r\n")
            .as_bytes(),
    );
    if let Some(session) = session {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"session\"\r\n\r\n{session}\r\n")
                .as_bytes(),
        );
    }
    if let Some(seq) = seq {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"seq\"\r\n\r\n{seq}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn transcribe_request(
    audio: &[u8],
    is_final: bool,
    session: Option<&str>,
    seq: Option<usize>,
    token: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/transcribe")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(Body::from(multipart_body(
            audio,
            "audio/webm;codecs=opus",
            is_final,
            session,
            seq,
        )))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn rejects_missing_and_unknown_credentials() {
    let t = test_app(vec![]);

    let response = t
        .app
        .clone()
        .oneshot(transcribe_request(b"xx", false, Some("s-1"), Some(0), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "unauthenticated");

    let response = t
        .app
        .oneshot(transcribe_request(b"xx", false, Some("s-1"), Some(0), Some("wrong")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(t.stt.call_count(), 0, "no upstream call without auth");
}

#[tokio::test]
async fn oversized_payload_rejected_before_upstream() {
    let t = test_app(vec![Ok("should not be reached".into())]);
    let big = vec![0u8; 2048]; // app limit is 1024

    let response = t
        .app
        .oneshot(transcribe_request(&big, false, Some("s-1"), Some(0), Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert_eq!(body["error"], "payload_too_large");
    assert_eq!(t.stt.call_count(), 0);
}

#[tokio::test]
async fn body_beyond_transport_limit_still_maps_to_payload_too_large() {
    let t = test_app(vec![Ok("should not be reached".into())]);
    // Far beyond the transport body limit (2x the 1024-byte app limit
    // plus framing headroom), so the read is cut short mid-field.
    let huge = vec![0u8; 512 * 1024];

    let response = t
        .app
        .oneshot(transcribe_request(&huge, false, Some("s-1"), Some(0), Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert_eq!(body["error"], "payload_too_large");
    assert_eq!(t.stt.call_count(), 0);
}

#[tokio::test]
async fn extreme_payload_ceiling_does_not_overflow() {
    // Router construction doubles the ceiling for the transport limit;
    // a pathological configured value must saturate, not panic.
    let t = test_app_with(vec![], usize::MAX, None);
    let response = t
        .app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn empty_payload_rejected_before_upstream() {
    let t = test_app(vec![]);
    let response = t
        .app
        .oneshot(transcribe_request(b"", false, Some("s-1"), Some(0), Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "empty_payload");
    assert_eq!(t.stt.call_count(), 0);
}

#[tokio::test]
async fn partials_merge_and_final_persists() {
    let t = test_app(vec![
        Ok("hello".into()),
        Ok("hello world".into()),
        Ok("hello world again".into()),
    ]);

    // Each partial unit covers segments 0..=k, so each transcription is
    // a fresh pass over the growing prefix; the merge keeps appending.
    let r0 = t
        .app
        .clone()
        .oneshot(transcribe_request(b"AAA", false, Some("s-1"), Some(0), Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(r0.status(), StatusCode::OK);
    let b0 = json_body(r0).await;
    assert_eq!(b0["text"], "hello");
    assert_eq!(b0["isFinal"], false);
    assert!(b0.get("transcriptId").is_none());

    let r1 = t
        .app
        .clone()
        .oneshot(transcribe_request(b"AAABB", false, Some("s-1"), Some(1), Some(TOKEN)))
        .await
        .unwrap();
    let b1 = json_body(r1).await;
    assert_eq!(b1["text"], "hello hello world");

    // The final unit covers the whole recording, so its transcription
    // replaces the accumulated partials.
    let rf = t
        .app
        .clone()
        .oneshot(transcribe_request(b"AAABBC", true, Some("s-1"), Some(2), Some(TOKEN)))
        .await
        .unwrap();
    let bf = json_body(rf).await;
    assert_eq!(bf["text"], "hello world again");
    assert_eq!(bf["isFinal"], true);
    let id = bf["transcriptId"].as_str().expect("persisted id").to_string();

    let saved = t.store.get("user-1", &id).unwrap();
    assert_eq!(saved.text, "hello world again");
}

#[tokio::test]
async fn dictionary_corrections_apply_to_every_chunk() {
    let t = test_app(vec![Ok("i met sarah in new york".into())]);
    DictionaryStore::create(&*t.store, "user-1", "sarah", "Sara").expect("rule one");
    DictionaryStore::create(&*t.store, "user-1", "new york", "New York").expect("rule two");

    let response = t
        .app
        .oneshot(transcribe_request(b"AAA", true, Some("s-1"), Some(0), Some(TOKEN)))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["text"], "i met Sara in New York");
}

#[tokio::test]
async fn new_session_discards_stale_merge_state() {
    let t = test_app(vec![
        Ok("left over".into()),
        Ok("fresh start".into()),
    ]);

    // A session that never finalizes leaves merged text behind.
    t.app
        .clone()
        .oneshot(transcribe_request(b"AAA", false, Some("s-a"), Some(0), Some(TOKEN)))
        .await
        .unwrap();

    // The next session's first surviving request may carry seq > 0
    // (segment-0 dispatch failed client-side and was retried as part
    // of a larger unit); the changed session id still resets the slot.
    let response = t
        .app
        .oneshot(transcribe_request(b"BBBCC", false, Some("s-b"), Some(1), Some(TOKEN)))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["text"], "fresh start");
}

#[tokio::test]
async fn without_session_id_segment_zero_resets_merge_state() {
    let t = test_app(vec![
        Ok("left over".into()),
        Ok("fresh start".into()),
    ]);

    t.app
        .clone()
        .oneshot(transcribe_request(b"AAA", false, None, Some(0), Some(TOKEN)))
        .await
        .unwrap();

    let response = t
        .app
        .oneshot(transcribe_request(b"BBB", false, None, Some(0), Some(TOKEN)))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["text"], "fresh start");
}

#[tokio::test]
async fn upstream_failures_map_to_distinct_statuses() {
    let t = test_app(vec![
        Err(TranscribeError::UpstreamRateLimited),
        Err(TranscribeError::UpstreamQuotaExceeded),
        Err(TranscribeError::UpstreamTimeout(60)),
        Err(TranscribeError::UpstreamRejectedFormat("bad container".into())),
    ]);

    let expectations = [
        (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        (StatusCode::PAYMENT_REQUIRED, "quota_exceeded"),
        (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "rejected_format"),
    ];
    for (status, code) in expectations {
        let response = t
            .app
            .clone()
            .oneshot(transcribe_request(b"AAA", false, Some("s-1"), Some(0), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), status);
        let body = json_body(response).await;
        assert_eq!(body["error"], code);
    }
}

#[tokio::test]
async fn failed_final_save_returns_text_without_id() {
    let t = test_app_with(
        vec![Ok("unsaved words".into())],
        1024,
        Some(Arc::new(BrokenTranscripts)),
    );

    let response = t
        .app
        .oneshot(transcribe_request(b"AAA", true, Some("s-1"), Some(0), Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["text"], "unsaved words");
    assert_eq!(body["isFinal"], true);
    assert!(body.get("transcriptId").is_none(), "no id when the save failed");
}

#[tokio::test]
async fn dictionary_routes_enforce_conflicts() {
    let t = test_app(vec![]);

    let create = |phrase: &str, correction: &str| {
        Request::builder()
            .method("POST")
            .uri("/api/dictionary")
            .header("authorization", format!("Bearer {TOKEN}"))
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "phrase": phrase, "correction": correction }).to_string(),
            ))
            .unwrap()
    };

    let response = t.app.clone().oneshot(create("acme", "ACME Corp")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["entry"]["phrase"], "acme");

    // Case-insensitive duplicate is a conflict under the reject policy.
    let response = t.app.clone().oneshot(create("Acme", "Acme Inc")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["error"], "phrase_conflict");

    let response = t.app.clone().oneshot(create(" ", "x")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn transcript_routes_are_owner_scoped() {
    let t = test_app(vec![Ok("saved text".into())]);
    t.app
        .clone()
        .oneshot(transcribe_request(b"AAA", true, Some("s-1"), Some(0), Some(TOKEN)))
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/transcripts")
                .header("authorization", format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let transcripts = body["transcripts"].as_array().unwrap();
    assert_eq!(transcripts.len(), 1);
    assert_eq!(transcripts[0]["text"], "saved text");
    let id = transcripts[0]["id"].as_str().unwrap().to_string();

    // Unknown id is indistinguishable from another owner's record.
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/transcripts/no-such-id")
                .header("authorization", format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = t
        .app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/transcripts/{id}"))
                .header("authorization", format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(matches!(
        t.store.get("user-1", &id),
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let t = test_app(vec![]);
    let response = t
        .app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
