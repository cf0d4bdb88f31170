//! JSON bodies exchanged between the client and the REST server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Role, Username, Visibility};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub email: String,
}

/// File content sealed with a new capsule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentUpload {
    pub file_name: String,
    /// Raw file bytes, standard base64.
    pub data_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCapsuleRequest {
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    pub unlock_at: DateTime<Utc>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub attachment: Option<AttachmentUpload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCapsuleRequest {
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    pub unlock_at: DateTime<Utc>,
}

/// Error payload returned by the server for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// User record as exposed by the admin API. Never carries credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub username: Username,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}
