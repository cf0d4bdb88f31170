//! Client configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

use capsule_shared::constants::DEFAULT_HTTP_PORT;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const TOKEN_FILE_NAME: &str = "session.token";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the capsule server, without a trailing slash.
    /// Env: `CAPSULE_SERVER_URL`
    pub server_url: String,

    /// Per-request timeout for the HTTP client.
    /// Env: `CAPSULE_REQUEST_TIMEOUT_SECS`
    pub request_timeout: Duration,

    /// Directory holding the durable session token.
    /// Env: `CAPSULE_DATA_DIR`
    /// Default: platform data directory, if one exists.
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            data_dir: ProjectDirs::from("com", "timecapsule", "timecapsule")
                .map(|dirs| dirs.data_dir().to_path_buf()),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = get("CAPSULE_SERVER_URL") {
            let url = url.trim().trim_end_matches('/');
            if url.starts_with("http://") || url.starts_with("https://") {
                config.server_url = url.to_string();
            } else {
                tracing::warn!(value = %url, "Invalid CAPSULE_SERVER_URL, using default");
            }
        }

        if let Some(val) = get("CAPSULE_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.request_timeout = Duration::from_secs(n),
                _ => tracing::warn!(
                    value = %val,
                    "Invalid CAPSULE_REQUEST_TIMEOUT_SECS, using default"
                ),
            }
        }

        if let Some(dir) = get("CAPSULE_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        config
    }

    /// Where the durable ("remember me") token tier lives.
    pub fn token_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(TOKEN_FILE_NAME))
    }
}
