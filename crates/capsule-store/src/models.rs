//! Records persisted in the SQLite database that have no shared wire form.
//!
//! Capsules are stored and returned as [`capsule_shared::Capsule`] directly.

use chrono::{DateTime, Utc};

use capsule_shared::{Role, Username};

/// A registered account, including its credential material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: Username,
    pub email: String,
    /// Hex-encoded derived password key.
    pub password_hash: String,
    /// Hex-encoded per-user random salt.
    pub password_salt: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// A capsule whose unlock instant has passed but whose owner has not yet
/// been told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUnlock {
    pub capsule_id: capsule_shared::CapsuleId,
    pub title: String,
    pub owner: Username,
    pub owner_email: String,
    pub unlock_at: DateTime<Utc>,
}
