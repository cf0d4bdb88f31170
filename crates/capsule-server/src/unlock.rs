//! Periodic sweep that announces capsules whose unlock instant has passed.
//!
//! Lock state itself is never written here; the sweep only records that the
//! owner has been told, so each unlock is announced once.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use capsule_shared::Clock;
use capsule_store::PendingUnlock;

use crate::api::AppState;
use crate::error::ServerError;

/// Delivery channel for unlock announcements (e-mail, push, ...).
pub trait UnlockNotifier: Send + Sync {
    fn notify(&self, unlock: &PendingUnlock) -> Result<(), String>;
}

/// Writes each announcement to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl UnlockNotifier for LogNotifier {
    fn notify(&self, unlock: &PendingUnlock) -> Result<(), String> {
        info!(
            capsule = %unlock.capsule_id,
            owner = %unlock.owner,
            to = %unlock.owner_email,
            title = %unlock.title,
            "Your time capsule is unlocked"
        );
        Ok(())
    }
}

/// Announce every capsule due at `now`. A failed delivery leaves that
/// capsule pending for the next sweep and does not stop the others.
pub fn sweep_once(
    state: &AppState,
    notifier: &dyn UnlockNotifier,
    now: DateTime<Utc>,
) -> Result<usize, ServerError> {
    let pending = state.with_db(|db| db.pending_unlocks(now))?;

    let mut delivered = 0;
    for unlock in &pending {
        if let Err(e) = notifier.notify(unlock) {
            warn!(capsule = %unlock.capsule_id, error = %e, "Unlock notification failed");
            continue;
        }
        state.with_db(|db| db.mark_notified(unlock.capsule_id, now))?;
        delivered += 1;
    }

    if !pending.is_empty() {
        info!(due = pending.len(), delivered, "Unlock sweep finished");
    }
    Ok(delivered)
}

pub fn spawn_unlock_sweeper(
    state: AppState,
    notifier: Arc<dyn UnlockNotifier>,
    every: StdDuration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let now = state.clock.now();
            if let Err(e) = sweep_once(&state, notifier.as_ref(), now) {
                error!(error = %e, "Unlock sweep failed");
            }
        }
    })
}
