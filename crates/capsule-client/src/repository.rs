//! Collaborators the client talks to: the capsule system of record and the
//! authentication service. [`crate::http::HttpBackend`] implements both
//! against the REST server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use capsule_shared::{Capsule, CapsuleId, Identity, Visibility};

use crate::session::SessionContext;

/// Failure reported by a remote collaborator, classified by what the client
/// should do about it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoError {
    /// The credential itself was refused.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The credential is fine but this resource is off limits.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Capsule is still locked")]
    StillLocked,

    #[error("Rejected: {0}")]
    Rejected(String),

    /// Network failure or server error; retrying may help.
    #[error("Transient: {0}")]
    Transient(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub file_name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCapsule {
    pub title: String,
    pub message: Option<String>,
    pub unlock_at: DateTime<Utc>,
    pub visibility: Visibility,
    pub attachment: Option<NewAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsuleEdit {
    pub title: String,
    pub message: Option<String>,
    pub unlock_at: DateTime<Utc>,
}

#[async_trait]
pub trait CapsuleRepository: Send + Sync {
    async fn create_capsule(
        &self,
        ctx: &SessionContext,
        capsule: &NewCapsule,
    ) -> Result<Capsule, RepoError>;

    async fn get_capsule(&self, ctx: &SessionContext, id: CapsuleId)
        -> Result<Capsule, RepoError>;

    /// The caller's own capsules whose unlock instant has passed.
    async fn list_unlocked(&self, ctx: &SessionContext) -> Result<Vec<Capsule>, RepoError>;

    /// The caller's own capsules that are still sealed.
    async fn list_locked(&self, ctx: &SessionContext) -> Result<Vec<Capsule>, RepoError>;

    async fn update_capsule(
        &self,
        ctx: &SessionContext,
        id: CapsuleId,
        edit: &CapsuleEdit,
    ) -> Result<Capsule, RepoError>;

    async fn delete_capsule(&self, ctx: &SessionContext, id: CapsuleId) -> Result<(), RepoError>;

    async fn fetch_attachment(
        &self,
        ctx: &SessionContext,
        id: CapsuleId,
    ) -> Result<Vec<u8>, RepoError>;
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Exchange credentials for a session token.
    async fn login(&self, username: &str, password: &str) -> Result<String, RepoError>;

    async fn resolve_identity(&self, token: &str) -> Result<Identity, RepoError>;

    async fn register(&self, username: &str, password: &str, email: &str)
        -> Result<(), RepoError>;
}
