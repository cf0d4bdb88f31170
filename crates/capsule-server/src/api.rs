use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use capsule_shared::constants::{MAX_USERNAME_LEN, MIN_USERNAME_LEN};
use capsule_shared::lifecycle;
use capsule_shared::protocol::{
    CreateCapsuleRequest, LoginRequest, LoginResponse, RegisterRequest, UpdateCapsuleRequest,
    UserSummary,
};
use capsule_shared::{Capsule, CapsuleId, Clock, Identity, Role, Username};
use capsule_store::{Database, StoreError, UserRecord};

use crate::attachments::AttachmentStore;
use crate::auth::{self, AuthUser, TokenKeys};
use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub attachments: Arc<AttachmentStore>,
    pub token_keys: Arc<TokenKeys>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Run a store operation under the database lock. Never hold the lock
    /// across an `.await`.
    pub fn with_db<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, StoreError>,
    ) -> Result<T, ServerError> {
        let guard = self
            .db
            .lock()
            .map_err(|e| ServerError::Internal(format!("Database lock poisoned: {e}")))?;
        f(&guard).map_err(ServerError::from)
    }

    fn load_capsule(&self, id: CapsuleId) -> Result<Capsule, ServerError> {
        self.with_db(|db| db.get_capsule(id)).map_err(|e| match e {
            ServerError::NotFound(_) => ServerError::NotFound(format!("Capsule {id}")),
            other => other,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    // Attachments travel base64-encoded inside JSON.
    let body_limit = state.attachments.max_size() / 3 * 4 + 64 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/capsules", post(create_capsule))
        .route("/api/capsules/locked", get(list_locked))
        .route("/api/capsules/unlocked", get(list_unlocked))
        .route(
            "/api/capsules/:id",
            get(get_capsule).put(update_capsule).delete(delete_capsule),
        )
        .route("/api/capsules/:id/attachment", get(get_attachment))
        .route("/api/admin/users", get(admin_users))
        .route("/api/admin/capsules", get(admin_capsules))
        .route("/api/admin/capsules/locked", get(admin_locked_capsules))
        .route("/api/admin/capsules/unlocked", get(admin_unlocked_capsules))
        .route("/api/admin/capsules/stats", get(admin_capsule_stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Authentication ───

fn validate_registration(req: &RegisterRequest) -> Result<(), ServerError> {
    let name_len = req.username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&name_len)
        || req.username.chars().any(char::is_whitespace)
    {
        return Err(ServerError::BadRequest(format!(
            "Username must be {MIN_USERNAME_LEN}-{MAX_USERNAME_LEN} characters without spaces"
        )));
    }
    if req.password.is_empty() {
        return Err(ServerError::BadRequest("Password is required".into()));
    }
    let email = req.email.trim();
    if email.len() < 3 || !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(ServerError::BadRequest("A valid email is required".into()));
    }
    Ok(())
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ServerError> {
    if !state.config.registration_open {
        return Err(ServerError::Forbidden("Registration is closed".into()));
    }
    validate_registration(&req)?;

    let (password_hash, password_salt) = auth::hash_password(&req.password);
    let user = UserRecord {
        username: Username(req.username.clone()),
        email: req.email.trim().to_string(),
        password_hash,
        password_salt,
        role: Role::User,
        created_at: state.clock.now(),
    };
    state.with_db(|db| db.insert_user(&user))?;

    info!(user = %user.username, "User registered");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "registered": true })),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    let username = Username(req.username);
    let user = {
        let guard = state
            .db
            .lock()
            .map_err(|e| ServerError::Internal(format!("Database lock poisoned: {e}")))?;
        guard.get_user(&username).map_err(auth::login_failure)?
    };

    if !auth::verify_password(&req.password, &user.password_hash, &user.password_salt) {
        warn!(user = %username, "Login rejected");
        return Err(ServerError::Unauthorized("Invalid credentials".into()));
    }

    let token = state.token_keys.issue(&user.username, state.clock.now());
    info!(user = %user.username, "User logged in");
    Ok(Json(LoginResponse { token }))
}

async fn me(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
) -> Result<Json<Identity>, ServerError> {
    let user = state.with_db(|db| db.get_user(&username))?;
    Ok(Json(Identity {
        username: user.username,
        email: user.email,
        role: user.role,
    }))
}

// ─── Capsules ───

/// The store keeps microseconds; validate the instant that will be stored.
fn stored_instant(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

async fn create_capsule(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Json(req): Json<CreateCapsuleRequest>,
) -> Result<(StatusCode, Json<Capsule>), ServerError> {
    let now = state.clock.now();
    lifecycle::validate_title(&req.title)?;
    lifecycle::validate_message(req.message.as_deref())?;
    let unlock_at = lifecycle::ensure_future(stored_instant(req.unlock_at), now)?;

    let attachment = match &req.attachment {
        Some(upload) => {
            let data = STANDARD
                .decode(upload.data_base64.as_bytes())
                .map_err(|e| ServerError::BadRequest(format!("Invalid attachment encoding: {e}")))?;
            Some(state.attachments.store(&upload.file_name, &data).await?)
        }
        None => None,
    };

    let capsule = Capsule {
        id: CapsuleId::new(),
        owner: owner.clone(),
        title: req.title.trim().to_string(),
        message: req.message,
        attachment,
        unlock_at,
        created_at: now,
        visibility: req.visibility,
    };

    if let Err(e) = state.with_db(|db| db.insert_capsule(&capsule)) {
        if let Some(a) = &capsule.attachment {
            if let Err(cleanup) = state.attachments.delete(a.id).await {
                warn!(attachment = %a.id, error = %cleanup, "Orphaned attachment");
            }
        }
        return Err(e);
    }

    info!(
        capsule = %capsule.id,
        owner = %owner,
        unlock_at = %capsule.unlock_at.to_rfc3339(),
        has_attachment = capsule.attachment.is_some(),
        "Capsule sealed"
    );

    let view = lifecycle::disclose(&capsule, &owner, now)?;
    Ok((StatusCode::CREATED, Json(view)))
}

fn own_capsules(
    state: &AppState,
    owner: &Username,
) -> Result<(Vec<Capsule>, Vec<Capsule>), ServerError> {
    let now = state.clock.now();
    let all = state.with_db(|db| db.list_capsules_by_owner(owner))?;
    let (locked, unlocked) = lifecycle::partition(all, now);
    // Locked content stays sealed even for the owner.
    let locked = locked.iter().map(Capsule::sealed).collect();
    Ok((locked, unlocked))
}

async fn list_locked(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
) -> Result<Json<Vec<Capsule>>, ServerError> {
    let (locked, _) = own_capsules(&state, &owner)?;
    Ok(Json(locked))
}

async fn list_unlocked(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
) -> Result<Json<Vec<Capsule>>, ServerError> {
    let (_, unlocked) = own_capsules(&state, &owner)?;
    Ok(Json(unlocked))
}

async fn get_capsule(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CapsuleId>,
) -> Result<Json<Capsule>, ServerError> {
    let capsule = state.load_capsule(id)?;
    let view = lifecycle::disclose(&capsule, &actor, state.clock.now())?;
    Ok(Json(view))
}

async fn update_capsule(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CapsuleId>,
    Json(req): Json<UpdateCapsuleRequest>,
) -> Result<Json<Capsule>, ServerError> {
    let now = state.clock.now();
    let capsule = state.load_capsule(id)?;

    lifecycle::authorize_edit(&capsule, &actor, now)?;
    lifecycle::validate_title(&req.title)?;
    lifecycle::validate_message(req.message.as_deref())?;
    let unlock_at = lifecycle::ensure_future(stored_instant(req.unlock_at), now)?;

    let title = req.title.trim().to_string();
    let updated =
        state.with_db(|db| db.update_capsule(id, &title, req.message.as_deref(), unlock_at))?;
    if !updated {
        return Err(ServerError::NotFound(format!("Capsule {id}")));
    }

    info!(
        capsule = %id,
        unlock_at = %unlock_at.to_rfc3339(),
        "Capsule updated"
    );

    let capsule = state.load_capsule(id)?;
    Ok(Json(lifecycle::disclose(&capsule, &actor, now)?))
}

async fn delete_capsule(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CapsuleId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let capsule = state.load_capsule(id)?;
    lifecycle::authorize_delete(&capsule, &actor)?;

    state.with_db(|db| db.delete_capsule(id))?;

    if let Some(a) = &capsule.attachment {
        if let Err(e) = state.attachments.delete(a.id).await {
            warn!(capsule = %id, attachment = %a.id, error = %e, "Failed to remove attachment");
        }
    }

    info!(capsule = %id, owner = %actor, "Capsule deleted");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn get_attachment(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<CapsuleId>,
) -> Result<Response, ServerError> {
    let capsule = state.load_capsule(id)?;
    lifecycle::authorize_read(&capsule, &actor)?;
    if !lifecycle::can_see_content(&capsule, &actor, state.clock.now()) {
        return Err(ServerError::StillLocked);
    }

    let attachment = capsule
        .attachment
        .ok_or_else(|| ServerError::NotFound(format!("Capsule {id} has no attachment")))?;
    let data = state.attachments.get(attachment.id).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        attachment.file_name.replace('"', "")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}

// ─── Admin ───

async fn admin_users(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserSummary>>, ServerError> {
    auth::verify_admin_token(&headers, state.config.admin_token.as_deref())?;

    let users = state.with_db(|db| db.list_users())?;
    Ok(Json(
        users
            .into_iter()
            .map(|u| UserSummary {
                username: u.username,
                email: u.email,
                role: u.role,
                created_at: u.created_at,
            })
            .collect(),
    ))
}

/// Every capsule, with content withheld: admins see metadata only.
fn all_capsules_sealed(state: &AppState) -> Result<Vec<Capsule>, ServerError> {
    let all = state.with_db(|db| db.list_all_capsules())?;
    Ok(all.iter().map(Capsule::sealed).collect())
}

async fn admin_capsules(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<Capsule>>, ServerError> {
    auth::verify_admin_token(&headers, state.config.admin_token.as_deref())?;
    Ok(Json(all_capsules_sealed(&state)?))
}

async fn admin_locked_capsules(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<Capsule>>, ServerError> {
    auth::verify_admin_token(&headers, state.config.admin_token.as_deref())?;
    let (locked, _) = lifecycle::partition(all_capsules_sealed(&state)?, state.clock.now());
    Ok(Json(locked))
}

async fn admin_unlocked_capsules(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<Capsule>>, ServerError> {
    auth::verify_admin_token(&headers, state.config.admin_token.as_deref())?;
    let (_, unlocked) = lifecycle::partition(all_capsules_sealed(&state)?, state.clock.now());
    Ok(Json(unlocked))
}

async fn admin_capsule_stats(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<Username, u64>>, ServerError> {
    auth::verify_admin_token(&headers, state.config.admin_token.as_deref())?;
    Ok(Json(state.with_db(|db| db.count_capsules_per_user())?))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use capsule_shared::ManualClock;
    use chrono::{Duration, TimeZone};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    pub(crate) const ADMIN: &str = "admin-secret";

    pub(crate) async fn test_state_with_clock() -> (AppState, Arc<ManualClock>, TempDir) {
        let dir = TempDir::new().unwrap();
        let attachments = AttachmentStore::new(dir.path().join("attachments"), 1024)
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
        ));
        let config = ServerConfig {
            admin_token: Some(ADMIN.into()),
            max_attachment_size: 1024,
            ..ServerConfig::default()
        };

        let state = AppState {
            db: Arc::new(Mutex::new(Database::open_in_memory().unwrap())),
            attachments: Arc::new(attachments),
            token_keys: Arc::new(TokenKeys::generate(7 * 24 * 3600)),
            clock: clock.clone(),
            config: Arc::new(config),
        };
        (state, clock, dir)
    }

    pub(crate) async fn test_state() -> (AppState, TempDir) {
        let (state, _clock, dir) = test_state_with_clock().await;
        (state, dir)
    }

    pub(crate) fn seed_user(state: &AppState, name: &str, password: &str) -> String {
        let (password_hash, password_salt) = auth::hash_password(password);
        state
            .with_db(|db| {
                db.insert_user(&UserRecord {
                    username: name.into(),
                    email: format!("{name}@example.com"),
                    password_hash,
                    password_salt,
                    role: Role::User,
                    created_at: state.clock.now(),
                })
            })
            .unwrap();
        state.token_keys.issue(&name.into(), state.clock.now())
    }

    pub(crate) fn seed_capsule(
        state: &AppState,
        owner: &str,
        title: &str,
        unlock_at: DateTime<Utc>,
    ) -> Capsule {
        let capsule = Capsule {
            id: CapsuleId::new(),
            owner: owner.into(),
            title: title.into(),
            message: Some(format!("inside {title}")),
            attachment: None,
            unlock_at,
            created_at: state.clock.now() - Duration::days(1),
            visibility: capsule_shared::Visibility::Private,
        };
        state.with_db(|db| db.insert_capsule(&capsule)).unwrap();
        capsule
    }

    async fn send(
        state: &AppState,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header("authorization", format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn create_body(title: &str, unlock_at: DateTime<Utc>) -> Value {
        json!({ "title": title, "message": "dear future me", "unlock_at": unlock_at })
    }

    #[tokio::test]
    async fn test_register_login_me() {
        let (state, _dir) = test_state().await;

        let (status, _) = send(
            &state,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "username": "alice", "password": "pw", "email": "alice@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = send(&state, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");
        assert_eq!(body["role"], "user");
    }

    #[tokio::test]
    async fn test_login_rejections() {
        let (state, _dir) = test_state().await;
        seed_user(&state, "alice", "pw");

        for (user, pw) in [("alice", "wrong"), ("nobody", "pw")] {
            let (status, _) = send(
                &state,
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "username": user, "password": pw })),
            )
            .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_register_rejections() {
        let (state, _dir) = test_state().await;
        seed_user(&state, "alice", "pw");

        let dup = json!({ "username": "alice", "password": "pw", "email": "new@example.com" });
        let (status, _) = send(&state, Method::POST, "/api/auth/register", None, Some(dup)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let bad = json!({ "username": "bo", "password": "pw", "email": "bo@example.com" });
        let (status, _) = send(&state, Method::POST, "/api/auth/register", None, Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let bad = json!({ "username": "carol", "password": "pw", "email": "carol" });
        let (status, _) = send(&state, Method::POST, "/api/auth/register", None, Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_or_bad_token_is_unauthorized() {
        let (state, _dir) = test_state().await;

        let (status, _) = send(&state, Method::GET, "/api/capsules/locked", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            send(&state, Method::GET, "/api/capsules/locked", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        // Well-signed token for an account that does not exist.
        let ghost = state.token_keys.issue(&"ghost".into(), state.clock.now());
        let (status, _) =
            send(&state, Method::GET, "/api/capsules/locked", Some(&ghost), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_validates_before_storing() {
        let (state, _dir) = test_state().await;
        let token = seed_user(&state, "alice", "pw");
        let now = state.clock.now();

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/capsules",
            Some(&token),
            Some(create_body("Letter", now)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unlock date and time must be in the future");

        // Below the stored precision this is still "now".
        let (status, _) = send(
            &state,
            Method::POST,
            "/api/capsules",
            Some(&token),
            Some(create_body("Letter", now + Duration::nanoseconds(500))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &state,
            Method::POST,
            "/api/capsules",
            Some(&token),
            Some(create_body("  ", now + Duration::days(1))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let stored = state
            .with_db(|db| db.list_capsules_by_owner(&"alice".into()))
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_capsule_moves_from_locked_to_unlocked() {
        let (state, clock, _dir) = test_state_with_clock().await;
        let token = seed_user(&state, "alice", "pw");
        let unlock_at = clock.now() + Duration::days(3653);

        let (status, created) = send(
            &state,
            Method::POST,
            "/api/capsules",
            Some(&token),
            Some(create_body("Letter to 2030", unlock_at)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(created["message"].is_null());
        let id = created["id"].as_str().unwrap().to_string();

        let (_, locked) = send(&state, Method::GET, "/api/capsules/locked", Some(&token), None).await;
        let (_, unlocked) =
            send(&state, Method::GET, "/api/capsules/unlocked", Some(&token), None).await;
        assert_eq!(locked.as_array().unwrap().len(), 1);
        assert!(locked[0]["message"].is_null());
        assert!(unlocked.as_array().unwrap().is_empty());

        clock.set(unlock_at + Duration::seconds(1));
        // Token issued ten years earlier has expired; log in again.
        let token = state.token_keys.issue(&"alice".into(), clock.now());

        let (_, locked) = send(&state, Method::GET, "/api/capsules/locked", Some(&token), None).await;
        let (_, unlocked) =
            send(&state, Method::GET, "/api/capsules/unlocked", Some(&token), None).await;
        assert!(locked.as_array().unwrap().is_empty());
        assert_eq!(unlocked[0]["message"], "dear future me");

        let (status, detail) = send(
            &state,
            Method::GET,
            &format!("/api/capsules/{id}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["message"], "dear future me");
    }

    #[tokio::test]
    async fn test_read_permissions() {
        let (state, clock, _dir) = test_state_with_clock().await;
        seed_user(&state, "alice", "pw");
        let bob = seed_user(&state, "bob", "pw");
        let unlock_at = clock.now() + Duration::hours(1);
        let private = seed_capsule(&state, "alice", "private", unlock_at);

        let mut public = seed_capsule(&state, "alice", "public", unlock_at);
        public.visibility = capsule_shared::Visibility::Public;
        state
            .with_db(|db| {
                db.delete_capsule(public.id)?;
                db.insert_capsule(&public)
            })
            .unwrap();

        let (status, _) = send(
            &state,
            Method::GET,
            &format!("/api/capsules/{}", private.id),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &state,
            Method::GET,
            &format!("/api/capsules/{}", public.id),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "public");
        assert!(body["message"].is_null());

        clock.advance(Duration::hours(2));
        let (_, body) = send(
            &state,
            Method::GET,
            &format!("/api/capsules/{}", public.id),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(body["message"], "inside public");

        let (status, _) = send(
            &state,
            Method::GET,
            &format!("/api/capsules/{}", CapsuleId::new()),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_rules() {
        let (state, clock, _dir) = test_state_with_clock().await;
        let alice = seed_user(&state, "alice", "pw");
        let bob = seed_user(&state, "bob", "pw");
        let now = clock.now();
        let locked = seed_capsule(&state, "alice", "locked", now + Duration::days(1));
        let opened = seed_capsule(&state, "alice", "opened", now - Duration::days(1));
        let edit = json!({ "title": "edited", "message": null, "unlock_at": now + Duration::days(7) });

        let uri = format!("/api/capsules/{}", locked.id);
        let (status, _) = send(&state, Method::PUT, &uri, Some(&bob), Some(edit.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let past = json!({ "title": "edited", "unlock_at": now - Duration::seconds(1) });
        let (status, _) = send(&state, Method::PUT, &uri, Some(&alice), Some(past)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let sub_micro = json!({ "title": "edited", "unlock_at": now + Duration::nanoseconds(999) });
        let (status, _) = send(&state, Method::PUT, &uri, Some(&alice), Some(sub_micro)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&state, Method::PUT, &uri, Some(&alice), Some(edit.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "edited");

        let stored = state.with_db(|db| db.get_capsule(locked.id)).unwrap();
        assert_eq!(stored.message, None);
        assert_eq!(stored.unlock_at, now + Duration::days(7));

        let uri = format!("/api/capsules/{}", opened.id);
        let (status, _) = send(&state, Method::PUT, &uri, Some(&alice), Some(edit)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let (state, clock, _dir) = test_state_with_clock().await;
        let alice = seed_user(&state, "alice", "pw");
        let bob = seed_user(&state, "bob", "pw");
        let opened = seed_capsule(&state, "alice", "opened", clock.now() - Duration::days(1));
        let uri = format!("/api/capsules/{}", opened.id);

        let (status, _) = send(&state, Method::DELETE, &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&state, Method::DELETE, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], true);

        let (status, _) = send(&state, Method::DELETE, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_attachment_is_time_gated() {
        let (state, clock, _dir) = test_state_with_clock().await;
        let token = seed_user(&state, "alice", "pw");
        let unlock_at = clock.now() + Duration::minutes(5);

        let mut body = create_body("with photo", unlock_at);
        body["attachment"] = json!({
            "file_name": "photo.jpg",
            "data_base64": STANDARD.encode(b"jpeg bytes"),
        });
        let (status, created) =
            send(&state, Method::POST, "/api/capsules", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(created["attachment"].is_null());
        let uri = format!("/api/capsules/{}/attachment", created["id"].as_str().unwrap());

        let (status, _) = send(&state, Method::GET, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::LOCKED);

        clock.advance(Duration::minutes(6));
        let req = Request::builder()
            .uri(&uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_attachment_too_large() {
        let (state, clock, _dir) = test_state_with_clock().await;
        let token = seed_user(&state, "alice", "pw");

        let mut body = create_body("big", clock.now() + Duration::days(1));
        body["attachment"] = json!({
            "file_name": "big.bin",
            "data_base64": STANDARD.encode(vec![0u8; 1025]),
        });
        let (status, _) =
            send(&state, Method::POST, "/api/capsules", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_admin_endpoints() {
        let (state, clock, _dir) = test_state_with_clock().await;
        seed_user(&state, "alice", "pw");
        seed_user(&state, "bob", "pw");
        seed_capsule(&state, "alice", "a1", clock.now() + Duration::days(1));
        seed_capsule(&state, "alice", "a2", clock.now() - Duration::days(1));

        let (status, _) = send(&state, Method::GET, "/api/admin/users", Some("nope"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, users) = send(&state, Method::GET, "/api/admin/users", Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(users.as_array().unwrap().len(), 2);
        assert!(users[0].get("password_hash").is_none());

        let (_, stats) =
            send(&state, Method::GET, "/api/admin/capsules/stats", Some(ADMIN), None).await;
        assert_eq!(stats, json!({ "alice": 2, "bob": 0 }));

        let (_, locked) =
            send(&state, Method::GET, "/api/admin/capsules/locked", Some(ADMIN), None).await;
        assert_eq!(locked.as_array().unwrap().len(), 1);
        assert_eq!(locked[0]["title"], "a1");

        let (_, all) = send(&state, Method::GET, "/api/admin/capsules", Some(ADMIN), None).await;
        assert!(all
            .as_array()
            .unwrap()
            .iter()
            .all(|c| c["message"].is_null()));
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _dir) = test_state().await;
        let (status, body) = send(&state, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
