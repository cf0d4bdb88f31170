//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use capsule_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_TOKEN_TTL_SECS, DEFAULT_UNLOCK_SWEEP_SECS, MAX_ATTACHMENT_SIZE,
};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory (see `capsule_store::Database::new`).
    pub database_path: Option<PathBuf>,

    /// Directory where sealed attachments are stored.
    /// Env: `ATTACHMENT_PATH`
    /// Default: `./attachments`
    pub attachment_path: PathBuf,

    /// Maximum attachment size in bytes.
    /// Env: `MAX_ATTACHMENT_SIZE`
    /// Default: 10 MiB
    pub max_attachment_size: usize,

    /// 32-byte Ed25519 seed used to sign session tokens (hex-encoded, 64 chars).
    /// Env: `TOKEN_SIGNING_KEY`
    /// Default: none, a random key is generated at startup and every
    /// token is invalidated by a restart.
    pub token_signing_key: Option<[u8; 32]>,

    /// Session token lifetime in seconds.
    /// Env: `TOKEN_TTL_SECS`
    /// Default: 86400
    pub token_ttl_secs: i64,

    /// Admin API bearer token. Required to access /api/admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Seconds between unlock notification sweeps (0 disables the sweep).
    /// Env: `UNLOCK_SWEEP_SECS`
    /// Default: 60
    pub unlock_sweep_secs: u64,

    /// Whether new accounts may be registered.
    /// Env: `REGISTRATION_OPEN` (true/false)
    /// Default: `true`
    pub registration_open: bool,
}

// Hand-written so secrets never reach the log line that prints the config.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("attachment_path", &self.attachment_path)
            .field("max_attachment_size", &self.max_attachment_size)
            .field("token_signing_key", &self.token_signing_key.map(|_| "<set>"))
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<set>"))
            .field("unlock_sweep_secs", &self.unlock_sweep_secs)
            .field("registration_open", &self.registration_open)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            attachment_path: PathBuf::from("./attachments"),
            max_attachment_size: MAX_ATTACHMENT_SIZE,
            token_signing_key: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            admin_token: None,
            unlock_sweep_secs: DEFAULT_UNLOCK_SWEEP_SECS,
            registration_open: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = get("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(path) = get("ATTACHMENT_PATH") {
            config.attachment_path = PathBuf::from(path);
        }

        if let Some(val) = get("MAX_ATTACHMENT_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_attachment_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_ATTACHMENT_SIZE, using default"),
            }
        }

        if let Some(hex_key) = get("TOKEN_SIGNING_KEY") {
            match parse_hex_key(&hex_key) {
                Ok(key) => config.token_signing_key = Some(key),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid TOKEN_SIGNING_KEY, generating an ephemeral key"
                    );
                }
            }
        }

        if let Some(val) = get("TOKEN_TTL_SECS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.token_ttl_secs = n,
                _ => tracing::warn!(value = %val, "Invalid TOKEN_TTL_SECS, using default"),
            }
        }

        if let Some(token) = get("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = get("UNLOCK_SWEEP_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.unlock_sweep_secs = n;
            }
        }

        if let Some(val) = get("REGISTRATION_OPEN") {
            config.registration_open = val != "false" && val != "0";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_key(hex: &str) -> Result<[u8; 32], String> {
    let hex = hex.trim();
    if hex.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex.len()));
    }

    let bytes = hex::decode(hex).map_err(|e| e.to_string())?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
