//! Service configuration
//!
//! Settings are read from `config.toml` (path overridable via
//! `VOXNOTE_CONFIG`), with the speech API key taken from the
//! environment so it never lives in a checked-in file. Every section
//! has serde defaults, so an empty file is a valid configuration for
//! local development.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::info;
use zeroize::Zeroizing;

/// Default upstream payload ceiling (25 MB, the Whisper API limit).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Default bound on the upstream transcription call.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Top-level service configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub speech: SpeechSettings,
    pub auth: AuthSettings,
    pub policies: PolicySettings,
}

/// HTTP listener and storage settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the axum listener binds to.
    pub listen_addr: String,
    /// SQLite database path (None = default under the user data dir).
    pub database_path: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            database_path: None,
        }
    }
}

/// Upstream speech-to-text service settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    /// Base URL of the OpenAI-compatible API (no trailing slash needed).
    pub base_url: String,
    /// Transcription model name.
    pub model: String,
    /// Language hint sent with every request.
    pub language: String,
    /// Reject payloads above this size before any network call.
    pub max_payload_bytes: usize,
    /// Bound on the upstream call; past this the request is aborted.
    pub request_timeout_secs: u64,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
            language: "en".to_string(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Identity verification settings.
///
/// `remote` delegates to an external identity provider's tokeninfo
/// endpoint; `static` maps configured tokens to user ids (development
/// and tests only).
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub mode: AuthMode,
    /// Tokeninfo endpoint for `remote` mode.
    pub tokeninfo_url: Option<String>,
    /// Token -> user id table for `static` mode.
    pub static_tokens: HashMap<String, String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            mode: AuthMode::Static,
            tokeninfo_url: None,
            static_tokens: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Remote,
    #[default]
    Static,
}

/// Behavior choices the upstream source left ambiguous; made explicit
/// configuration instead of guessing.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// What a write with a duplicate (owner, phrase) does.
    pub dictionary_conflict: DictionaryConflictPolicy,
    /// Whether a merge-store entry survives a failed final save.
    pub merge_retention: MergeRetentionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DictionaryConflictPolicy {
    /// Second write for the same phrase is rejected with a conflict.
    #[default]
    Reject,
    /// Second write replaces the existing correction.
    Overwrite,
}

impl fmt::Display for DictionaryConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictionaryConflictPolicy::Reject => write!(f, "reject"),
            DictionaryConflictPolicy::Overwrite => write!(f, "overwrite"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeRetentionPolicy {
    /// Keep the merged text for a manual retry; cleared anyway when the
    /// next recording begins.
    #[default]
    Retain,
    /// Drop it immediately (the source's behavior; risks silent loss).
    Drop,
}

impl Settings {
    /// Load settings from disk.
    ///
    /// Reads `VOXNOTE_CONFIG` if set, otherwise `./config.toml`; a
    /// missing default file yields `Settings::default()`.
    pub fn load() -> Result<Self, ConfigError> {
        let (path, required) = match std::env::var("VOXNOTE_CONFIG") {
            Ok(p) => (PathBuf::from(p), true),
            Err(_) => (PathBuf::from("config.toml"), false),
        };

        if !path.exists() {
            if required {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "config file not found",
                    ),
                });
            }
            info!("No config.toml found, using default settings");
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let settings: Settings = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        settings.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(settings)
    }

    /// Reject configurations that cannot work before the server starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.speech.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "speech.max_payload_bytes must be greater than zero".into(),
            ));
        }
        if self.speech.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "speech.request_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.auth.mode == AuthMode::Remote && self.auth.tokeninfo_url.is_none() {
            return Err(ConfigError::Invalid(
                "auth.mode = \"remote\" requires auth.tokeninfo_url".into(),
            ));
        }
        Ok(())
    }

    /// Speech API key from the environment, zeroized when dropped.
    pub fn speech_api_key() -> Result<Zeroizing<String>, ConfigError> {
        std::env::var("OPENAI_API_KEY")
            .map(Zeroizing::new)
            .map_err(|_| ConfigError::Invalid("OPENAI_API_KEY is not set".into()))
    }

    /// Database path: configured value or the default under the user
    /// data directory.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref path) = self.server.database_path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|d| d.join("voxnote").join("voxnote.db"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine a data directory".into()))
    }
}
