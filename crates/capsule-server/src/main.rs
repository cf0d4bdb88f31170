//! # capsule-server
//!
//! HTTP backend for time capsules.
//!
//! This binary provides:
//! - **REST API** (axum) for accounts, capsules and their attachments
//! - **SQLite persistence** through `capsule-store`
//! - **Attachment storage** on local disk, released only after unlock
//! - **Unlock sweep** that announces each capsule once its instant passes
//! - **Admin API** guarded by a static bearer token

mod api;
mod attachments;
mod auth;
mod config;
mod error;
mod unlock;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use capsule_shared::constants::APP_NAME;
use capsule_shared::SystemClock;
use capsule_store::Database;

use crate::api::AppState;
use crate::attachments::AttachmentStore;
use crate::auth::TokenKeys;
use crate::config::ServerConfig;
use crate::unlock::LogNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,capsule_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Database opened");
    }

    let attachments = Arc::new(
        AttachmentStore::new(config.attachment_path.clone(), config.max_attachment_size).await?,
    );

    let token_keys = match &config.token_signing_key {
        Some(seed) => TokenKeys::from_seed(seed, config.token_ttl_secs),
        None => {
            warn!("TOKEN_SIGNING_KEY not set; sessions will not survive a restart");
            TokenKeys::generate(config.token_ttl_secs)
        }
    };

    let http_addr = config.http_addr;
    let sweep_secs = config.unlock_sweep_secs;

    let app_state = AppState {
        db: Arc::new(Mutex::new(db)),
        attachments,
        token_keys: Arc::new(token_keys),
        clock: Arc::new(SystemClock),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    if sweep_secs > 0 {
        unlock::spawn_unlock_sweeper(
            app_state.clone(),
            Arc::new(LogNotifier),
            Duration::from_secs(sweep_secs),
        );
        info!(every_secs = sweep_secs, "Unlock sweep scheduled");
    }

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
