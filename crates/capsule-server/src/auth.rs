//! Credentials and bearer authentication.
//!
//! Passwords are stored as a salted BLAKE3 derived key. Session tokens are
//! Ed25519-signed by the server (see `capsule_shared::token`); every request
//! to a protected route presents one as `Authorization: Bearer <token>`.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::debug;

use capsule_shared::constants::KDF_CONTEXT_PASSWORD;
use capsule_shared::token::{authenticate, issue_token};
use capsule_shared::{Clock, TokenError, Username};
use capsule_store::StoreError;

use crate::api::AppState;
use crate::error::ServerError;

/// Signing half of the session token scheme.
pub struct TokenKeys {
    signing_key: SigningKey,
    verifying_key: [u8; 32],
    ttl: Duration,
}

impl TokenKeys {
    pub fn from_seed(seed: &[u8; 32], ttl_secs: i64) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key().to_bytes();
        Self {
            signing_key,
            verifying_key,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn generate(ttl_secs: i64) -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(&seed, ttl_secs)
    }

    /// Issue an encoded token for `username` valid from `now` for the
    /// configured lifetime.
    pub fn issue(&self, username: &Username, now: DateTime<Utc>) -> String {
        issue_token(username, now + self.ttl, &self.signing_key).encode()
    }

    pub fn verify(&self, raw: &str, now: DateTime<Utc>) -> Result<Username, TokenError> {
        authenticate(raw, &self.verifying_key, now)
    }
}

// TODO: move to a memory-hard KDF (argon2id) before opening registration to
// untrusted networks.
fn derive_password_key(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_PASSWORD);
    hasher.update(salt);
    hasher.update(password.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Hash a new password. Returns `(hash_hex, salt_hex)`.
pub fn hash_password(password: &str) -> (String, String) {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let key = derive_password_key(&salt, password);
    (hex::encode(key), hex::encode(salt))
}

pub fn verify_password(password: &str, hash_hex: &str, salt_hex: &str) -> bool {
    let (Ok(expected), Ok(salt)) = (hex::decode(hash_hex), hex::decode(salt_hex)) else {
        return false;
    };
    let actual = derive_password_key(&salt, password);
    expected.len() == actual.len() && actual.as_slice().ct_eq(expected.as_slice()).unwrap_u8() == 1
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// The authenticated caller of a protected route.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Username);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = bearer_token(&parts.headers)
            .ok_or_else(|| ServerError::Unauthorized("Missing bearer token".into()))?;

        let username = state
            .token_keys
            .verify(raw, state.clock.now())
            .map_err(|e| {
                debug!(error = %e, "Rejected session token");
                ServerError::Unauthorized(e.to_string())
            })?;

        // A valid signature for an account that no longer exists is not a session.
        match state.with_db(|db| db.get_user(&username)) {
            Ok(_) => Ok(AuthUser(username)),
            Err(ServerError::NotFound(_)) => {
                Err(ServerError::Unauthorized("Unknown account".into()))
            }
            Err(e) => Err(e),
        }
    }
}

pub fn verify_admin_token(headers: &HeaderMap, admin_token: Option<&str>) -> Result<(), ServerError> {
    let Some(expected) = admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let token = bearer_token(headers).unwrap_or("");

    // Constant-time comparison to prevent timing attacks on admin token.
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

/// Map a store lookup failure during login to a uniform credential error.
pub fn login_failure(e: StoreError) -> ServerError {
    match e {
        StoreError::NotFound => ServerError::Unauthorized("Invalid credentials".into()),
        other => ServerError::from(other),
    }
}
