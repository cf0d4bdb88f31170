/// Application name
pub const APP_NAME: &str = "Time Capsule";

/// Maximum capsule message length in characters
pub const MAX_MESSAGE_LEN: usize = 5000;

/// Maximum attachment size in bytes (10 MiB)
pub const MAX_ATTACHMENT_SIZE: usize = 10 * 1024 * 1024;

/// Username length bounds (inclusive)
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 50;

/// Default session token lifetime in seconds (24 h)
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default interval between unlock sweeps in seconds
pub const DEFAULT_UNLOCK_SWEEP_SECS: u64 = 60;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_PASSWORD: &str = "timecapsule-password-hash-v1";
