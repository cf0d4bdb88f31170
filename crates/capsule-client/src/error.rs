use thiserror::Error;

use capsule_shared::{AuthzError, ValidationError};

use crate::repository::RepoError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected locally; nothing was sent.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Authz(#[from] AuthzError),

    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    /// The session ended while, or because, this request was in flight.
    #[error("Session is no longer valid, please sign in again")]
    SessionInvalidated,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Temporary failure: {0}")]
    Transient(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Capsule is still locked")]
    StillLocked,

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Token storage error: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

/// Mapping for failures of an authorized capsule operation. A 401 never gets
/// here: the session manager turns it into a forced sign-out first.
impl From<RepoError> for ClientError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Unauthorized(_) => ClientError::SessionInvalidated,
            RepoError::Forbidden(_) => ClientError::Authz(AuthzError::Forbidden),
            RepoError::Conflict(_) => ClientError::Authz(AuthzError::AlreadyUnlocked),
            RepoError::NotFound(msg) => ClientError::NotFound(msg),
            RepoError::StillLocked => ClientError::StillLocked,
            RepoError::Rejected(msg) => ClientError::Rejected(msg),
            RepoError::Transient(msg) => ClientError::Transient(msg),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Storage(e.to_string())
    }
}
