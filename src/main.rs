//! voxnote server entry point.

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voxnote::auth::{IdentityProvider, RemoteIdentityProvider, StaticIdentityProvider};
use voxnote::config::{AuthMode, Settings};
use voxnote::merge::MergeStore;
use voxnote::server::{router, AppState};
use voxnote::store::SqliteStore;
use voxnote::stt::OpenAiSpeechClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (for OPENAI_API_KEY etc.)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load().context("Failed to load configuration")?;
    let api_key = Settings::speech_api_key()?;

    let speech = OpenAiSpeechClient::new(&settings.speech, (*api_key).clone())
        .context("Failed to create speech client")?;

    let db_path = settings.database_path()?;
    let store = Arc::new(
        SqliteStore::open(&db_path, settings.policies.dictionary_conflict)
            .context("Failed to open database")?,
    );

    let identity: Arc<dyn IdentityProvider> = match settings.auth.mode {
        AuthMode::Remote => {
            let url = settings
                .auth
                .tokeninfo_url
                .clone()
                .context("auth.tokeninfo_url is required when auth.mode = \"remote\"")?;
            Arc::new(RemoteIdentityProvider::new(url)?)
        }
        AuthMode::Static => {
            if settings.auth.static_tokens.is_empty() {
                warn!("auth.static_tokens is empty; every request will be rejected");
            }
            Arc::new(StaticIdentityProvider::new(
                settings.auth.static_tokens.clone(),
            ))
        }
    };

    let state = Arc::new(AppState {
        identity,
        speech: Arc::new(speech),
        transcripts: store.clone(),
        dictionary: store,
        merges: MergeStore::new(),
        max_payload_bytes: settings.speech.max_payload_bytes,
        merge_retention: settings.policies.merge_retention,
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&settings.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.listen_addr))?;
    info!("voxnote server listening on {}", settings.server.listen_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
