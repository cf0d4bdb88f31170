use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::types::Username;

// Token signed by the server at login, presented as a bearer credential
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionToken {
    pub username: Username,
    pub expires_at: DateTime<Utc>,
    /// Ed25519 signature, hex-encoded.
    pub signature: String,
}

impl SessionToken {
    /// Opaque string form carried in `Authorization: Bearer ...`.
    pub fn encode(&self) -> String {
        // Serializing a struct of strings and a timestamp cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(s: &str) -> Result<Self, TokenError> {
        let json = URL_SAFE_NO_PAD
            .decode(s.trim())
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| TokenError::Malformed(e.to_string()))
    }
}

// payload = username || expires_at (rfc3339)
fn signing_payload(username: &Username, expires_at: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(username.as_str().as_bytes());
    payload.push(0);
    payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
    payload
}

pub fn issue_token(
    username: &Username,
    expires_at: DateTime<Utc>,
    signing_key: &SigningKey,
) -> SessionToken {
    let signature = signing_key.sign(&signing_payload(username, &expires_at));

    SessionToken {
        username: username.clone(),
        expires_at,
        signature: hex::encode(signature.to_bytes()),
    }
}

pub fn verify_token(
    token: &SessionToken,
    server_pubkey: &[u8; 32],
    now: DateTime<Utc>,
) -> Result<(), TokenError> {
    if now >= token.expires_at {
        return Err(TokenError::Expired);
    }

    let verifying_key =
        VerifyingKey::from_bytes(server_pubkey).map_err(|_| TokenError::InvalidKey)?;

    let sig_bytes = hex::decode(&token.signature).map_err(|_| TokenError::BadSignature)?;
    let signature = Signature::from_slice(&sig_bytes).map_err(|_| TokenError::BadSignature)?;

    verifying_key
        .verify(&signing_payload(&token.username, &token.expires_at), &signature)
        .map_err(|_| TokenError::BadSignature)
}

/// Decode and verify in one step, returning the authenticated username.
pub fn authenticate(
    raw: &str,
    server_pubkey: &[u8; 32],
    now: DateTime<Utc>,
) -> Result<Username, TokenError> {
    let token = SessionToken::decode(raw)?;
    verify_token(&token, server_pubkey, now)?;
    Ok(token.username)
}
