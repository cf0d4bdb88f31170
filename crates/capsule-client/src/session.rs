//! Session lifecycle: login, startup hydration, logout and forced sign-out.
//!
//! The [`SessionManager`] is the only writer of session state. Each
//! authorized call captures a [`SessionContext`] (token plus generation);
//! every transition out of a session bumps the generation, so completions
//! that started under an older one are discarded instead of applied.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use capsule_shared::Identity;

use crate::error::ClientError;
use crate::repository::{Authenticator, RepoError};
use crate::token_store::{Tier, TokenStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// A token exists but the identity behind it is not confirmed yet.
    Resolving,
    Authenticated,
    /// Transient while tiers are being cleared.
    Invalidating,
}

/// Credential captured at call time for one repository request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    token: String,
    generation: u64,
}

impl SessionContext {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct Inner {
    state: SessionState,
    token: Option<String>,
    identity: Option<Identity>,
    generation: u64,
}

pub struct SessionManager {
    auth: Arc<dyn Authenticator>,
    tokens: TokenStore,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn Authenticator>, tokens: TokenStore) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            auth,
            tokens,
            inner: Mutex::new(Inner {
                state: SessionState::Unauthenticated,
                token: None,
                identity: None,
                generation: 0,
            }),
            state_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn identity(&self) -> Option<Identity> {
        self.lock().identity.clone()
    }

    /// Observe state changes. A forced sign-out shows up as a transition to
    /// `Unauthenticated`; this is the hook for sending the user to login.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Context for a new authorized call. Fails unless authenticated, so no
    /// request goes out after a sign-out until the next login.
    pub fn context(&self) -> Result<SessionContext, ClientError> {
        let inner = self.lock();
        match (inner.state, &inner.token) {
            (SessionState::Authenticated, Some(token)) => Ok(SessionContext {
                token: token.clone(),
                generation: inner.generation,
            }),
            _ => Err(ClientError::NotAuthenticated),
        }
    }

    fn begin_resolving(&self, token: Option<String>) -> u64 {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.token = token;
        inner.identity = None;
        self.set_state(&mut inner, SessionState::Resolving);
        inner.generation
    }

    /// Drop the in-memory session without touching the tiers.
    fn abandon(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.generation += 1;
        inner.token = None;
        inner.identity = None;
        self.set_state(&mut inner, SessionState::Unauthenticated);
    }

    /// Forced sign-out. Returns false when `generation` was already
    /// superseded, so each invalidation is carried out once.
    fn invalidate(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        self.set_state(&mut inner, SessionState::Invalidating);
        inner.generation += 1;
        inner.token = None;
        inner.identity = None;
        if let Err(e) = self.tokens.clear_all() {
            warn!(error = %e, "Token tiers not fully cleared on sign-out");
        }
        self.set_state(&mut inner, SessionState::Unauthenticated);
        true
    }

    /// Restore a session from whichever tier holds a token.
    pub async fn hydrate(&self) -> Result<SessionState, ClientError> {
        let Some((token, tier)) = self.tokens.resolve()? else {
            debug!("No stored session");
            return Ok(SessionState::Unauthenticated);
        };

        let generation = self.begin_resolving(Some(token.clone()));
        debug!(?tier, "Resolving stored session");

        match self.auth.resolve_identity(&token).await {
            Ok(identity) => {
                let mut inner = self.lock();
                if inner.generation != generation {
                    return Err(ClientError::SessionInvalidated);
                }
                info!(user = %identity.username, ?tier, "Session restored");
                inner.identity = Some(identity);
                self.set_state(&mut inner, SessionState::Authenticated);
                Ok(SessionState::Authenticated)
            }
            Err(RepoError::Unauthorized(msg)) | Err(RepoError::Forbidden(msg)) => {
                if self.invalidate(generation) {
                    info!(error = %msg, "Stored session rejected, tokens cleared");
                }
                Err(ClientError::SessionInvalidated)
            }
            Err(e) => {
                warn!(error = %e, "Could not resolve stored session");
                self.abandon(generation);
                Err(ClientError::Transient(e.to_string()))
            }
        }
    }

    /// Exchange credentials for a session kept in `tier`.
    ///
    /// Any session held or stored before the call ends here, whether or not
    /// the new login succeeds.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        tier: Tier,
    ) -> Result<Identity, ClientError> {
        let generation = self.begin_resolving(None);
        if let Err(e) = self.tokens.clear_all() {
            warn!(error = %e, "Previous session not fully cleared before login");
        }

        let token = match self.auth.login(username, password).await {
            Ok(token) => token,
            Err(RepoError::Transient(msg)) => {
                self.abandon(generation);
                return Err(ClientError::Transient(msg));
            }
            Err(e) => {
                self.abandon(generation);
                warn!(user = %username, error = %e, "Login rejected");
                return Err(ClientError::AuthenticationFailure(e.to_string()));
            }
        };

        let identity = match self.auth.resolve_identity(&token).await {
            Ok(identity) => identity,
            Err(RepoError::Transient(msg)) => {
                self.abandon(generation);
                return Err(ClientError::Transient(msg));
            }
            Err(e) => {
                self.abandon(generation);
                return Err(ClientError::AuthenticationFailure(e.to_string()));
            }
        };

        let mut inner = self.lock();
        if inner.generation != generation {
            return Err(ClientError::SessionInvalidated);
        }
        if let Err(e) = self.tokens.store(tier, &token) {
            drop(inner);
            self.abandon(generation);
            return Err(e);
        }
        inner.token = Some(token);
        inner.identity = Some(identity.clone());
        self.set_state(&mut inner, SessionState::Authenticated);

        info!(user = %identity.username, ?tier, "Signed in");
        Ok(identity)
    }

    /// Sign out. Both tiers are cleared before this returns.
    pub fn logout(&self) -> Result<(), ClientError> {
        let mut inner = self.lock();
        self.set_state(&mut inner, SessionState::Invalidating);
        inner.generation += 1;
        inner.token = None;
        inner.identity = None;
        let cleared = self.tokens.clear_all();
        self.set_state(&mut inner, SessionState::Unauthenticated);
        info!("Signed out");
        cleared
    }

    /// Create an account. The current session is not affected.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<(), ClientError> {
        self.auth
            .register(username, password, email)
            .await
            .map_err(|e| match e {
                RepoError::Transient(msg) => ClientError::Transient(msg),
                other => ClientError::AuthenticationFailure(other.to_string()),
            })?;
        info!(user = %username, "Account registered");
        Ok(())
    }

    /// Run one repository call under the current session.
    ///
    /// A credential rejection signs the user out (once, whichever call saw
    /// it first). A result that arrives after the session it was issued
    /// under has ended is discarded.
    pub async fn authorized<T, F, Fut>(&self, op: F) -> Result<T, ClientError>
    where
        F: FnOnce(SessionContext) -> Fut,
        Fut: Future<Output = Result<T, RepoError>>,
    {
        let ctx = self.context()?;
        let generation = ctx.generation;

        let result = op(ctx).await;
        let stale = self.lock().generation != generation;

        match result {
            Err(RepoError::Unauthorized(msg)) => {
                if self.invalidate(generation) {
                    warn!(error = %msg, "Session rejected by server, signing out");
                }
                Err(ClientError::SessionInvalidated)
            }
            _ if stale => {
                debug!(generation, "Discarding response from an ended session");
                Err(ClientError::SessionInvalidated)
            }
            Ok(value) => Ok(value),
            Err(e) => Err(e.into()),
        }
    }
}
