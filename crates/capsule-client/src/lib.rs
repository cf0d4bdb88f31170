//! Client side of the time capsule service: session lifecycle, token
//! persistence and the capsule operations a user interface drives.

pub mod capsules;
pub mod config;
pub mod error;
pub mod http;
pub mod repository;
pub mod session;
pub mod token_store;

#[cfg(test)]
pub(crate) mod fake;

use std::sync::Arc;

use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use capsule_shared::SystemClock;

pub use capsules::{CapsuleClient, CapsuleDraft, CapsuleView, Dashboard, EditDraft};
pub use config::ClientConfig;
pub use error::ClientError;
pub use session::{SessionContext, SessionManager, SessionState};
pub use token_store::{Tier, TokenStore};

/// Install the log subscriber. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("capsule_client=debug,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Wire the REST backend, both token tiers and the session manager.
pub fn connect(config: &ClientConfig) -> Result<CapsuleClient, ClientError> {
    let backend = Arc::new(http::HttpBackend::new(config)?);

    let durable: Box<dyn token_store::TokenSlot> = match config.token_path() {
        Some(path) => Box::new(token_store::FileSlot::new(path)),
        None => {
            warn!("No data directory; \"remember me\" will not survive a restart");
            Box::<token_store::MemorySlot>::default()
        }
    };
    let tokens = TokenStore::new(durable, Box::<token_store::MemorySlot>::default());

    let session = Arc::new(SessionManager::new(backend.clone(), tokens));
    Ok(CapsuleClient::new(session, backend, Arc::new(SystemClock)))
}
