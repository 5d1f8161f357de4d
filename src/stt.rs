//! Upstream speech-to-text client
//!
//! Submits a decodable audio unit to an OpenAI-compatible
//! `/audio/transcriptions` endpoint and returns raw text. Payload
//! validation happens before any network traffic; upstream failures
//! are translated into the pipeline's error taxonomy rather than
//! collapsed into one generic failure.

use crate::config::SpeechSettings;
use crate::error::TranscribeError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};
use zeroize::Zeroize;

/// Converts one decodable audio unit into raw text.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>, content_type: &str)
        -> Result<String, TranscribeError>;
}

/// Successful transcription response body.
#[derive(Debug, Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    text: String,
}

/// Upstream error payload (`{ "error": { "message": ... } }`).
#[derive(Debug, Deserialize)]
struct UpstreamErrorBody {
    #[serde(default)]
    error: UpstreamErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct UpstreamErrorDetail {
    #[serde(default)]
    message: String,
}

/// Reject unusable payloads before any network call.
pub fn validate_payload(size: usize, max: usize) -> Result<(), TranscribeError> {
    if size == 0 {
        return Err(TranscribeError::EmptyPayload);
    }
    if size > max {
        return Err(TranscribeError::PayloadTooLarge { size, max });
    }
    Ok(())
}

/// Normalize a declared content type to a base encoding and filename
/// extension.
///
/// The upstream service rejects format strings carrying codec
/// parameters ("audio/webm;codecs=opus"), and picks the decoder from
/// the filename extension, so both must be derived from the base type.
pub fn normalize_content_type(declared: &str) -> (&'static str, &'static str) {
    let base = declared.split(';').next().unwrap_or("").trim();
    if base.contains("wav") {
        ("audio/wav", "wav")
    } else if base.contains("ogg") {
        ("audio/ogg", "ogg")
    } else if base.contains("mp3") || base.contains("mpeg") {
        ("audio/mpeg", "mp3")
    } else {
        ("audio/webm", "webm")
    }
}

/// Classify an upstream HTTP failure into the error taxonomy.
fn classify_upstream(status: u16, message: &str) -> TranscribeError {
    let lower = message.to_lowercase();
    if lower.contains("quota") || lower.contains("billing") || lower.contains("insufficient") {
        return TranscribeError::UpstreamQuotaExceeded;
    }
    if status == 429 || lower.contains("rate limit") {
        return TranscribeError::UpstreamRateLimited;
    }
    if lower.contains("file format") || lower.contains("invalid file") || lower.contains("decode") {
        return TranscribeError::UpstreamRejectedFormat(message.to_string());
    }
    TranscribeError::UpstreamUnknown {
        status,
        message: message.to_string(),
    }
}

/// Client for an OpenAI-compatible transcription API.
pub struct OpenAiSpeechClient {
    base_url: String,
    api_key: String,
    model: String,
    language: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAiSpeechClient {
    pub fn new(settings: &SpeechSettings, api_key: String) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client for OpenAiSpeechClient")?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
            language: settings.language.clone(),
            timeout_secs: settings.request_timeout_secs,
            client,
        })
    }
}

#[async_trait]
impl SpeechToText for OpenAiSpeechClient {
    /// Submit one decodable audio unit and return its raw transcript.
    ///
    /// The call is bounded by the configured timeout; reqwest aborts
    /// the outbound request when the deadline passes.
    #[instrument(skip(self, audio), fields(payload_bytes = audio.len(), content_type))]
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        content_type: &str,
    ) -> Result<String, TranscribeError> {
        let (mime, extension) = normalize_content_type(content_type);
        let url = format!("{}/audio/transcriptions", self.base_url);

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(format!("audio.{extension}"))
            .mime_str(mime)
            .map_err(|e| TranscribeError::Network(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let result = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!("Upstream transcription timed out after {}s", self.timeout_secs);
                return Err(TranscribeError::UpstreamTimeout(self.timeout_secs));
            }
            Err(e) => return Err(TranscribeError::Network(e.to_string())),
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = match response.json::<UpstreamErrorBody>().await {
                Ok(body) if !body.error.message.is_empty() => body.error.message,
                _ => format!("upstream returned status {status}"),
            };
            warn!(status, %message, "Upstream transcription failed");
            return Err(classify_upstream(status, &message));
        }

        let body: WhisperResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::Network(format!("unparseable response: {e}")))?;
        info!(chars = body.text.len(), "Transcription received");
        Ok(body.text)
    }
}

impl Drop for OpenAiSpeechClient {
    fn drop(&mut self) {
        // Clear API key from memory
        self.api_key.zeroize();
    }
}
