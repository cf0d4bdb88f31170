//! In-process stand-in for the capsule server, used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use capsule_shared::{lifecycle, Capsule, CapsuleId, Clock, Identity, ManualClock, Role, Username, Visibility};

use crate::repository::{Authenticator, CapsuleEdit, CapsuleRepository, NewCapsule, RepoError};
use crate::session::SessionContext;

pub(crate) struct FakeBackend {
    pub clock: Arc<ManualClock>,
    passwords: Mutex<HashMap<String, String>>,
    tokens: Mutex<HashMap<String, String>>,
    capsules: Mutex<Vec<Capsule>>,
    attachments: Mutex<HashMap<CapsuleId, Vec<u8>>>,
    identity_error: Mutex<Option<RepoError>>,
    locked_error: Mutex<Option<RepoError>>,
    unlocked_error: Mutex<Option<RepoError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    entered: Notify,
    issued: AtomicUsize,
    repo_calls: AtomicUsize,
    identity_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(ManualClock::new(Utc::now())))
    }

    pub fn with_clock(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            passwords: Mutex::default(),
            tokens: Mutex::default(),
            capsules: Mutex::default(),
            attachments: Mutex::default(),
            identity_error: Mutex::default(),
            locked_error: Mutex::default(),
            unlocked_error: Mutex::default(),
            gate: Mutex::default(),
            entered: Notify::new(),
            issued: AtomicUsize::new(0),
            repo_calls: AtomicUsize::new(0),
            identity_calls: AtomicUsize::new(0),
        }
    }

    pub fn add_user(&self, username: &str, password: &str) {
        self.passwords
            .lock()
            .unwrap()
            .insert(username.to_string(), password.to_string());
    }

    pub fn issue(&self, username: &str) -> String {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let token = format!("tok-{n}-{username}");
        self.tokens
            .lock()
            .unwrap()
            .insert(token.clone(), username.to_string());
        token
    }

    pub fn revoke_all(&self) {
        self.tokens.lock().unwrap().clear();
    }

    pub fn fail_identity_with(&self, e: RepoError) {
        *self.identity_error.lock().unwrap() = Some(e);
    }

    pub fn fail_locked_with(&self, e: RepoError) {
        *self.locked_error.lock().unwrap() = Some(e);
    }

    pub fn fail_unlocked_with(&self, e: RepoError) {
        *self.unlocked_error.lock().unwrap() = Some(e);
    }

    /// Hold every `get_capsule` until the returned handle is notified.
    pub fn install_gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Resolves once a gated `get_capsule` has started waiting.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn repo_calls(&self) -> usize {
        self.repo_calls.load(Ordering::SeqCst)
    }

    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }

    pub fn seed(&self, owner: &str, title: &str, unlock_at: DateTime<Utc>) -> Capsule {
        let capsule = Capsule {
            id: CapsuleId::new(),
            owner: owner.into(),
            title: title.into(),
            message: Some(format!("inside {title}")),
            attachment: None,
            unlock_at,
            created_at: self.clock.now(),
            visibility: Visibility::Private,
        };
        self.capsules.lock().unwrap().push(capsule.clone());
        capsule
    }

    pub fn stored(&self, id: CapsuleId) -> Option<Capsule> {
        self.capsules
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    fn caller(&self, ctx: &SessionContext) -> Result<Username, RepoError> {
        self.repo_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .lock()
            .unwrap()
            .get(ctx.token())
            .map(|name| Username::new(name.clone()))
            .ok_or_else(|| RepoError::Unauthorized("Session token has expired".into()))
    }

    fn find(&self, id: CapsuleId) -> Result<Capsule, RepoError> {
        self.stored(id)
            .ok_or_else(|| RepoError::NotFound(format!("Capsule {id}")))
    }

    fn own(&self, owner: &Username) -> Vec<Capsule> {
        self.capsules
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.is_owned_by(owner))
            .cloned()
            .collect()
    }
}

fn authz(e: capsule_shared::AuthzError) -> RepoError {
    match e {
        capsule_shared::AuthzError::AlreadyUnlocked => RepoError::Conflict(e.to_string()),
        _ => RepoError::Forbidden(e.to_string()),
    }
}

#[async_trait]
impl CapsuleRepository for FakeBackend {
    async fn create_capsule(
        &self,
        ctx: &SessionContext,
        capsule: &NewCapsule,
    ) -> Result<Capsule, RepoError> {
        let owner = self.caller(ctx)?;
        let now = self.clock.now();
        lifecycle::ensure_future(capsule.unlock_at, now)
            .map_err(|e| RepoError::Rejected(e.to_string()))?;

        let stored = Capsule {
            id: CapsuleId::new(),
            owner: owner.clone(),
            title: capsule.title.clone(),
            message: capsule.message.clone(),
            attachment: capsule.attachment.as_ref().map(|a| capsule_shared::Attachment {
                id: uuid::Uuid::new_v4(),
                file_name: a.file_name.clone(),
                size: a.data.len() as u64,
                blake3_hash: String::new(),
            }),
            unlock_at: capsule.unlock_at,
            created_at: now,
            visibility: capsule.visibility,
        };
        if let Some(a) = &capsule.attachment {
            self.attachments
                .lock()
                .unwrap()
                .insert(stored.id, a.data.clone());
        }
        self.capsules.lock().unwrap().push(stored.clone());
        lifecycle::disclose(&stored, &owner, now).map_err(authz)
    }

    async fn get_capsule(
        &self,
        ctx: &SessionContext,
        id: CapsuleId,
    ) -> Result<Capsule, RepoError> {
        let actor = self.caller(ctx)?;
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.entered.notify_one();
            gate.notified().await;
        }
        let capsule = self.find(id)?;
        lifecycle::disclose(&capsule, &actor, self.clock.now()).map_err(authz)
    }

    async fn list_unlocked(&self, ctx: &SessionContext) -> Result<Vec<Capsule>, RepoError> {
        let owner = self.caller(ctx)?;
        if let Some(e) = self.unlocked_error.lock().unwrap().clone() {
            return Err(e);
        }
        let (_, unlocked) = lifecycle::partition(self.own(&owner), self.clock.now());
        Ok(unlocked)
    }

    async fn list_locked(&self, ctx: &SessionContext) -> Result<Vec<Capsule>, RepoError> {
        let owner = self.caller(ctx)?;
        if let Some(e) = self.locked_error.lock().unwrap().clone() {
            return Err(e);
        }
        let (locked, _) = lifecycle::partition(self.own(&owner), self.clock.now());
        Ok(locked.iter().map(Capsule::sealed).collect())
    }

    async fn update_capsule(
        &self,
        ctx: &SessionContext,
        id: CapsuleId,
        edit: &CapsuleEdit,
    ) -> Result<Capsule, RepoError> {
        let actor = self.caller(ctx)?;
        let now = self.clock.now();
        let capsule = self.find(id)?;
        lifecycle::authorize_edit(&capsule, &actor, now).map_err(authz)?;
        lifecycle::ensure_future(edit.unlock_at, now)
            .map_err(|e| RepoError::Rejected(e.to_string()))?;

        let mut capsules = self.capsules.lock().unwrap();
        let stored = capsules
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RepoError::NotFound(format!("Capsule {id}")))?;
        stored.title = edit.title.clone();
        stored.message = edit.message.clone();
        stored.unlock_at = edit.unlock_at;
        lifecycle::disclose(stored, &actor, now).map_err(authz)
    }

    async fn delete_capsule(&self, ctx: &SessionContext, id: CapsuleId) -> Result<(), RepoError> {
        let actor = self.caller(ctx)?;
        let capsule = self.find(id)?;
        lifecycle::authorize_delete(&capsule, &actor).map_err(authz)?;
        self.capsules.lock().unwrap().retain(|c| c.id != id);
        self.attachments.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn fetch_attachment(
        &self,
        ctx: &SessionContext,
        id: CapsuleId,
    ) -> Result<Vec<u8>, RepoError> {
        let actor = self.caller(ctx)?;
        let capsule = self.find(id)?;
        lifecycle::authorize_read(&capsule, &actor).map_err(authz)?;
        if !lifecycle::can_see_content(&capsule, &actor, self.clock.now()) {
            return Err(RepoError::StillLocked);
        }
        self.attachments
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(format!("Capsule {id} has no attachment")))
    }
}

#[async_trait]
impl Authenticator for FakeBackend {
    async fn login(&self, username: &str, password: &str) -> Result<String, RepoError> {
        let known = self.passwords.lock().unwrap().get(username).cloned();
        match known {
            Some(expected) if expected == password => Ok(self.issue(username)),
            _ => Err(RepoError::Unauthorized("Invalid credentials".into())),
        }
    }

    async fn resolve_identity(&self, token: &str) -> Result<Identity, RepoError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.identity_error.lock().unwrap().clone() {
            return Err(e);
        }
        let name = self
            .tokens
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| RepoError::Unauthorized("Unknown token".into()))?;
        Ok(Identity {
            email: format!("{name}@example.com"),
            username: Username::new(name),
            role: Role::User,
        })
    }

    async fn register(
        &self,
        username: &str,
        password: &str,
        _email: &str,
    ) -> Result<(), RepoError> {
        let mut passwords = self.passwords.lock().unwrap();
        if passwords.contains_key(username) {
            return Err(RepoError::Conflict(format!("Username {username} is taken")));
        }
        passwords.insert(username.to_string(), password.to_string());
        Ok(())
    }
}
