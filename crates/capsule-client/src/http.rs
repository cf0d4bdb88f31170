//! REST implementation of the repository and authentication collaborators.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use capsule_shared::protocol::{
    AttachmentUpload, CreateCapsuleRequest, ErrorBody, LoginRequest, LoginResponse,
    RegisterRequest, UpdateCapsuleRequest,
};
use capsule_shared::{Capsule, CapsuleId, Identity};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::repository::{
    Authenticator, CapsuleEdit, CapsuleRepository, NewCapsule, RepoError,
};
use crate::session::SessionContext;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Transient(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            base_url: config.server_url.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, RepoError> {
        let resp = req
            .send()
            .await
            .map_err(|e| RepoError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = match resp.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        debug!(%status, error = %message, "Request refused");
        Err(classify_status(status, message))
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, RepoError> {
        self.send(req)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RepoError::Transient(format!("Malformed response: {e}")))
    }
}

/// Map a non-success status onto what the client should do about it.
fn classify_status(status: StatusCode, message: String) -> RepoError {
    match status {
        StatusCode::UNAUTHORIZED => RepoError::Unauthorized(message),
        StatusCode::FORBIDDEN => RepoError::Forbidden(message),
        StatusCode::NOT_FOUND => RepoError::NotFound(message),
        StatusCode::CONFLICT => RepoError::Conflict(message),
        StatusCode::LOCKED => RepoError::StillLocked,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RepoError::Transient(message)
        }
        s if s.is_server_error() => RepoError::Transient(message),
        _ => RepoError::Rejected(message),
    }
}

#[async_trait]
impl CapsuleRepository for HttpBackend {
    async fn create_capsule(
        &self,
        ctx: &SessionContext,
        capsule: &NewCapsule,
    ) -> Result<Capsule, RepoError> {
        let body = CreateCapsuleRequest {
            title: capsule.title.clone(),
            message: capsule.message.clone(),
            unlock_at: capsule.unlock_at,
            visibility: capsule.visibility,
            attachment: capsule.attachment.as_ref().map(|a| AttachmentUpload {
                file_name: a.file_name.clone(),
                data_base64: STANDARD.encode(&a.data),
            }),
        };
        let req = self
            .client
            .post(self.url("/api/capsules"))
            .bearer_auth(ctx.token())
            .json(&body);
        self.json(req).await
    }

    async fn get_capsule(
        &self,
        ctx: &SessionContext,
        id: CapsuleId,
    ) -> Result<Capsule, RepoError> {
        let req = self
            .client
            .get(self.url(&format!("/api/capsules/{id}")))
            .bearer_auth(ctx.token());
        self.json(req).await
    }

    async fn list_unlocked(&self, ctx: &SessionContext) -> Result<Vec<Capsule>, RepoError> {
        let req = self
            .client
            .get(self.url("/api/capsules/unlocked"))
            .bearer_auth(ctx.token());
        self.json(req).await
    }

    async fn list_locked(&self, ctx: &SessionContext) -> Result<Vec<Capsule>, RepoError> {
        let req = self
            .client
            .get(self.url("/api/capsules/locked"))
            .bearer_auth(ctx.token());
        self.json(req).await
    }

    async fn update_capsule(
        &self,
        ctx: &SessionContext,
        id: CapsuleId,
        edit: &CapsuleEdit,
    ) -> Result<Capsule, RepoError> {
        let body = UpdateCapsuleRequest {
            title: edit.title.clone(),
            message: edit.message.clone(),
            unlock_at: edit.unlock_at,
        };
        let req = self
            .client
            .put(self.url(&format!("/api/capsules/{id}")))
            .bearer_auth(ctx.token())
            .json(&body);
        self.json(req).await
    }

    async fn delete_capsule(&self, ctx: &SessionContext, id: CapsuleId) -> Result<(), RepoError> {
        let req = self
            .client
            .delete(self.url(&format!("/api/capsules/{id}")))
            .bearer_auth(ctx.token());
        self.send(req).await?;
        Ok(())
    }

    async fn fetch_attachment(
        &self,
        ctx: &SessionContext,
        id: CapsuleId,
    ) -> Result<Vec<u8>, RepoError> {
        let req = self
            .client
            .get(self.url(&format!("/api/capsules/{id}/attachment")))
            .bearer_auth(ctx.token());
        let bytes = self
            .send(req)
            .await?
            .bytes()
            .await
            .map_err(|e| RepoError::Transient(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Authenticator for HttpBackend {
    async fn login(&self, username: &str, password: &str) -> Result<String, RepoError> {
        let req = self.client.post(self.url("/api/auth/login")).json(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        });
        let resp: LoginResponse = self.json(req).await?;
        Ok(resp.token)
    }

    async fn resolve_identity(&self, token: &str) -> Result<Identity, RepoError> {
        let req = self.client.get(self.url("/api/auth/me")).bearer_auth(token);
        self.json(req).await
    }

    async fn register(
        &self,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<(), RepoError> {
        let req = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&RegisterRequest {
                username: username.to_string(),
                password: password.to_string(),
                email: email.to_string(),
            });
        self.send(req).await?;
        Ok(())
    }
}
