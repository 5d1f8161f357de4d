//! Client-side transcribe API
//!
//! The accumulator dispatches decodable units through the
//! `TranscribeApi` trait; the real implementation posts multipart
//! requests to the voxnote server, tests substitute a scripted one.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Wire response for the transcribe operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeResponse {
    pub text: String,
    pub is_final: bool,
    #[serde(default)]
    pub transcript_id: Option<String>,
}

/// Errors from dispatching a unit to the server.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server rejected the request ({status}): {message}")]
    Server { status: u16, message: String },
}

/// Dispatches decodable audio units to the transcription gateway.
#[async_trait]
pub trait TranscribeApi: Send + Sync {
    /// `session` identifies the recording session so the server can
    /// discard merge state left by a previous one; `seq` is the index
    /// of the last segment covered by this unit.
    async fn transcribe(
        &self,
        unit: Vec<u8>,
        session: &str,
        seq: usize,
        is_final: bool,
    ) -> Result<TranscribeResponse, ApiError>;
}

/// JSON error body returned by the server.
#[derive(Debug, Deserialize)]
struct ServerErrorBody {
    #[serde(default)]
    message: String,
}

/// reqwest-backed implementation talking to a voxnote server.
pub struct HttpTranscribeApi {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpTranscribeApi {
    pub fn new(base_url: &str, token: &str) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client for HttpTranscribeApi")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }
}

#[async_trait]
impl TranscribeApi for HttpTranscribeApi {
    async fn transcribe(
        &self,
        unit: Vec<u8>,
        session: &str,
        seq: usize,
        is_final: bool,
    ) -> Result<TranscribeResponse, ApiError> {
        let part = reqwest::multipart::Part::bytes(unit)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("audio", part)
            .text("final", if is_final { "true" } else { "false" })
            .text("session", session.to_string())
            .text("seq", seq.to_string());

        let response = self
            .client
            .post(format!("{}/api/transcribe", self.base_url))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = match response.json::<ServerErrorBody>().await {
                Ok(body) if !body.message.is_empty() => body.message,
                _ => "Unknown error".to_string(),
            };
            return Err(ApiError::Server { status, message });
        }

        response
            .json::<TranscribeResponse>()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))
    }
}
