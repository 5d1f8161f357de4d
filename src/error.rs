//! Error taxonomy for the transcription pipeline.
//!
//! Each variant carries its own user-facing message; quota, rate-limit,
//! timeout and format rejections stay distinct so the user (and support)
//! can tell which ones are actionable.

use thiserror::Error;

/// Errors surfaced by the transcribe operation.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("Not authenticated. A valid bearer token is required.")]
    Unauthenticated,

    #[error("Audio payload is empty.")]
    EmptyPayload,

    /// `size` is 0 when the transport cut the read short before the
    /// full payload size was known.
    #[error("Audio payload is too large (max: {max} bytes).")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Speech service quota exceeded. Check your plan and billing with the provider.")]
    UpstreamQuotaExceeded,

    #[error("Speech service is rate limiting requests. Try again in a moment.")]
    UpstreamRateLimited,

    #[error("Speech service did not respond within {0} seconds. The request was cancelled.")]
    UpstreamTimeout(u64),

    #[error("Speech service rejected the audio format: {0}")]
    UpstreamRejectedFormat(String),

    #[error("Speech service error ({status}): {message}")]
    UpstreamUnknown { status: u16, message: String },

    #[error("Network error reaching the speech service: {0}")]
    Network(String),

    #[error("Failed to persist transcript: {0}")]
    Persistence(String),
}

impl TranscribeError {
    /// Stable machine-readable code, used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            TranscribeError::Unauthenticated => "unauthenticated",
            TranscribeError::EmptyPayload => "empty_payload",
            TranscribeError::PayloadTooLarge { .. } => "payload_too_large",
            TranscribeError::UpstreamQuotaExceeded => "quota_exceeded",
            TranscribeError::UpstreamRateLimited => "rate_limited",
            TranscribeError::UpstreamTimeout(_) => "upstream_timeout",
            TranscribeError::UpstreamRejectedFormat(_) => "rejected_format",
            TranscribeError::UpstreamUnknown { .. } => "upstream_error",
            TranscribeError::Network(_) => "network_error",
            TranscribeError::Persistence(_) => "persistence_failure",
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_codes_per_variant() {
        let errors = [
            TranscribeError::Unauthenticated,
            TranscribeError::EmptyPayload,
            TranscribeError::PayloadTooLarge { size: 1, max: 0 },
            TranscribeError::UpstreamQuotaExceeded,
            TranscribeError::UpstreamRateLimited,
            TranscribeError::UpstreamTimeout(60),
            TranscribeError::UpstreamRejectedFormat("audio/flac".into()),
            TranscribeError::UpstreamUnknown {
                status: 500,
                message: "boom".into(),
            },
            TranscribeError::Network("connection reset".into()),
            TranscribeError::Persistence("disk full".into()),
        ];

        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn messages_are_not_interchangeable() {
        let quota = TranscribeError::UpstreamQuotaExceeded.to_string();
        let rate = TranscribeError::UpstreamRateLimited.to_string();
        assert_ne!(quota, rate);
        assert!(quota.contains("quota"));
        assert!(rate.contains("rate limiting"));
    }
}
