//! Capsule operations as the user drives them: create and edit forms,
//! the dashboard, detail pages, deletion and attachment download.
//!
//! Input is validated here before anything is sent; the server repeats
//! every check and has the final word.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info};

use capsule_shared::{
    lifecycle, Capsule, CapsuleId, Clock, LockState, Username, ValidationError, Visibility,
};

use crate::error::ClientError;
use crate::repository::{CapsuleEdit, CapsuleRepository, NewAttachment, NewCapsule};
use crate::session::SessionManager;

/// What the create form collects. Date and time are local wall-clock values.
#[derive(Debug, Clone, Default)]
pub struct CapsuleDraft {
    pub title: String,
    pub message: Option<String>,
    pub unlock_date: Option<NaiveDate>,
    pub unlock_time: Option<NaiveTime>,
    pub visibility: Visibility,
    pub attachment: Option<NewAttachment>,
}

#[derive(Debug, Clone, Default)]
pub struct EditDraft {
    pub title: String,
    pub message: Option<String>,
    pub unlock_date: Option<NaiveDate>,
    pub unlock_time: Option<NaiveTime>,
}

/// A capsule as the current user may see it right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsuleView {
    pub capsule: Capsule,
    pub state: LockState,
    pub content_visible: bool,
    pub editable: bool,
}

impl CapsuleView {
    pub fn new(capsule: Capsule, actor: &Username, now: DateTime<Utc>) -> Self {
        Self::build(capsule, actor, now, true)
    }

    /// View of a copy the server sent without its content. Nothing is
    /// shown until the server releases the content, whatever `now` says.
    pub fn sealed(capsule: Capsule, actor: &Username, now: DateTime<Utc>) -> Self {
        Self::build(capsule, actor, now, false)
    }

    fn build(capsule: Capsule, actor: &Username, now: DateTime<Utc>, disclosed: bool) -> Self {
        let state = lifecycle::classify(&capsule, now);
        let content_visible = disclosed && lifecycle::can_see_content(&capsule, actor, now);
        let editable = lifecycle::authorize_edit(&capsule, actor, now).is_ok();
        let capsule = if content_visible {
            capsule
        } else {
            capsule.sealed()
        };
        Self {
            capsule,
            state,
            content_visible,
            editable,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dashboard {
    pub locked: Vec<CapsuleView>,
    pub unlocked: Vec<CapsuleView>,
}

pub struct CapsuleClient {
    session: Arc<SessionManager>,
    repo: Arc<dyn CapsuleRepository>,
    clock: Arc<dyn Clock>,
    /// Bumped every time a different detail page is opened.
    detail_seq: AtomicU64,
}

impl CapsuleClient {
    pub fn new(
        session: Arc<SessionManager>,
        repo: Arc<dyn CapsuleRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session,
            repo,
            clock,
            detail_seq: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    fn actor(&self) -> Result<Username, ClientError> {
        self.session
            .identity()
            .map(|identity| identity.username)
            .ok_or(ClientError::NotAuthenticated)
    }

    /// Resolve form date and time against the local clock.
    pub fn schedule(
        &self,
        unlock_date: Option<NaiveDate>,
        unlock_time: Option<NaiveTime>,
    ) -> Result<DateTime<Utc>, ValidationError> {
        let now = self.clock.now().with_timezone(&Local);
        lifecycle::validate_schedule(unlock_date, unlock_time, &now)
    }

    pub async fn create(&self, draft: CapsuleDraft) -> Result<CapsuleView, ClientError> {
        lifecycle::validate_title(&draft.title)?;
        lifecycle::validate_message(draft.message.as_deref())?;
        let unlock_at = self.schedule(draft.unlock_date, draft.unlock_time)?;
        let actor = self.actor()?;

        let new = NewCapsule {
            title: draft.title.trim().to_string(),
            message: draft.message,
            unlock_at,
            visibility: draft.visibility,
            attachment: draft.attachment,
        };
        let repo = &self.repo;
        let created = self
            .session
            .authorized(|ctx| async move { repo.create_capsule(&ctx, &new).await })
            .await?;

        info!(capsule = %created.id, unlock_at = %created.unlock_at.to_rfc3339(), "Capsule sealed");
        Ok(CapsuleView::new(created, &actor, self.clock.now()))
    }

    /// Edit a capsule that is still locked. The unlock instant is validated
    /// again from scratch.
    pub async fn edit(
        &self,
        capsule: &Capsule,
        draft: EditDraft,
    ) -> Result<CapsuleView, ClientError> {
        let actor = self.actor()?;
        lifecycle::authorize_edit(capsule, &actor, self.clock.now())?;
        lifecycle::validate_title(&draft.title)?;
        lifecycle::validate_message(draft.message.as_deref())?;
        let unlock_at = self.schedule(draft.unlock_date, draft.unlock_time)?;

        let edit = CapsuleEdit {
            title: draft.title.trim().to_string(),
            message: draft.message,
            unlock_at,
        };
        let id = capsule.id;
        let repo = &self.repo;
        let updated = self
            .session
            .authorized(|ctx| async move { repo.update_capsule(&ctx, id, &edit).await })
            .await?;

        info!(capsule = %id, "Capsule updated");
        Ok(CapsuleView::new(updated, &actor, self.clock.now()))
    }

    pub async fn delete(&self, capsule: &Capsule) -> Result<(), ClientError> {
        let actor = self.actor()?;
        lifecycle::authorize_delete(capsule, &actor)?;

        let id = capsule.id;
        let repo = &self.repo;
        self.session
            .authorized(|ctx| async move { repo.delete_capsule(&ctx, id).await })
            .await?;

        info!(capsule = %id, "Capsule deleted");
        Ok(())
    }

    /// Load a detail page. Returns `Ok(None)` when another detail page was
    /// opened while this one was loading.
    pub async fn open_detail(&self, id: CapsuleId) -> Result<Option<CapsuleView>, ClientError> {
        let ticket = self.detail_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let actor = self.actor()?;

        let repo = &self.repo;
        let fetched = self
            .session
            .authorized(|ctx| async move { repo.get_capsule(&ctx, id).await })
            .await;

        match fetched {
            Err(ClientError::SessionInvalidated) => Err(ClientError::SessionInvalidated),
            _ if self.detail_seq.load(Ordering::SeqCst) != ticket => {
                debug!(capsule = %id, "Dropping superseded detail load");
                Ok(None)
            }
            Ok(capsule) => Ok(Some(CapsuleView::new(capsule, &actor, self.clock.now()))),
            Err(e) => Err(e),
        }
    }

    /// Leave the detail page; any load still in flight is dropped.
    pub fn close_detail(&self) {
        self.detail_seq.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn fetch_attachment(&self, capsule: &Capsule) -> Result<Vec<u8>, ClientError> {
        let actor = self.actor()?;
        lifecycle::authorize_read(capsule, &actor)?;
        if lifecycle::classify(capsule, self.clock.now()) == LockState::Locked {
            return Err(ClientError::StillLocked);
        }

        let id = capsule.id;
        let repo = &self.repo;
        self.session
            .authorized(|ctx| async move { repo.fetch_attachment(&ctx, id).await })
            .await
    }

    /// Fetch both halves of the dashboard concurrently. Either failing fails
    /// the whole load. Tabs are split again on the local clock; which list
    /// the server put a capsule in only decides whether its content came
    /// along.
    pub async fn load_dashboard(&self) -> Result<Dashboard, ClientError> {
        let actor = self.actor()?;
        let repo = &self.repo;

        let (locked, unlocked) = tokio::try_join!(
            self.session
                .authorized(|ctx| async move { repo.list_locked(&ctx).await }),
            self.session
                .authorized(|ctx| async move { repo.list_unlocked(&ctx).await }),
        )?;

        let now = self.clock.now();
        let sealed: HashSet<CapsuleId> = locked.iter().map(|c| c.id).collect();
        let (still_locked, opened) = lifecycle::partition(locked.into_iter().chain(unlocked), now);
        let view = |c: Capsule| {
            if sealed.contains(&c.id) {
                CapsuleView::sealed(c, &actor, now)
            } else {
                CapsuleView::new(c, &actor, now)
            }
        };
        let dashboard = Dashboard {
            locked: still_locked.into_iter().map(view).collect(),
            unlocked: opened.into_iter().map(view).collect(),
        };
        debug!(
            locked = dashboard.locked.len(),
            unlocked = dashboard.unlocked.len(),
            "Dashboard loaded"
        );
        Ok(dashboard)
    }
}
