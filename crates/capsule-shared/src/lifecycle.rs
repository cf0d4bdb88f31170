//! Capsule lifecycle engine.
//!
//! Pure functions deciding whether a capsule is locked, who may read, edit
//! or delete it, and whether a requested unlock instant is acceptable. Both
//! the client and the server call into this module so the rules cannot drift
//! apart between the two.
//!
//! Read access and time gating are separate checks. Ownership/visibility
//! decides whether the capsule's metadata may be seen at all; lock state
//! decides whether its message and attachment may be seen. Content is only
//! disclosed when both pass (see [`can_see_content`]).

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::constants::MAX_MESSAGE_LEN;
use crate::error::{AuthzError, ScheduleField, ValidationError};
use crate::types::{Capsule, LockState, Username, Visibility};

/// `Locked` iff the unlock instant is strictly after `now`.
pub fn classify(capsule: &Capsule, now: DateTime<Utc>) -> LockState {
    lock_state_at(capsule.unlock_at, now)
}

/// Same rule as [`classify`] for callers that only hold the instant.
pub fn lock_state_at(unlock_at: DateTime<Utc>, now: DateTime<Utc>) -> LockState {
    if unlock_at > now {
        LockState::Locked
    } else {
        LockState::Unlocked
    }
}

/// Combine a calendar date and a time of day into an unlock instant.
///
/// Both parts are interpreted as wall-clock values in the time zone of
/// `now`, so a form filled in local time is validated against local time.
/// The result must be strictly after `now`.
pub fn validate_schedule<Tz: TimeZone>(
    unlock_date: Option<NaiveDate>,
    unlock_time: Option<NaiveTime>,
    now: &DateTime<Tz>,
) -> Result<DateTime<Utc>, ValidationError> {
    let date = unlock_date.ok_or(ValidationError::MissingField(ScheduleField::Date))?;
    let time = unlock_time.ok_or(ValidationError::MissingField(ScheduleField::Time))?;

    // Ambiguous wall-clock times (DST fold) resolve to the earlier instant.
    let unlock_at = now
        .timezone()
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .ok_or(ValidationError::NonexistentLocalTime)?
        .with_timezone(&Utc);

    ensure_future(unlock_at, now.with_timezone(&Utc))
}

/// Reject an unlock instant that is not strictly in the future.
pub fn ensure_future(
    unlock_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ValidationError> {
    if unlock_at > now {
        Ok(unlock_at)
    } else {
        Err(ValidationError::PastInstant)
    }
}

/// Title must contain something other than whitespace.
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    Ok(())
}

pub fn validate_message(message: Option<&str>) -> Result<(), ValidationError> {
    let len = message.map(|m| m.chars().count()).unwrap_or(0);
    if len > MAX_MESSAGE_LEN {
        return Err(ValidationError::MessageTooLong {
            len,
            max: MAX_MESSAGE_LEN,
        });
    }
    Ok(())
}

/// Only the owner may edit, and only while the capsule is still locked.
pub fn authorize_edit(
    capsule: &Capsule,
    actor: &Username,
    now: DateTime<Utc>,
) -> Result<(), AuthzError> {
    if !capsule.is_owned_by(actor) {
        return Err(AuthzError::NotOwner);
    }
    if classify(capsule, now) == LockState::Unlocked {
        return Err(AuthzError::AlreadyUnlocked);
    }
    Ok(())
}

/// Owners may delete in either lock state.
pub fn authorize_delete(capsule: &Capsule, actor: &Username) -> Result<(), AuthzError> {
    if !capsule.is_owned_by(actor) {
        return Err(AuthzError::NotOwner);
    }
    Ok(())
}

/// Public capsules are readable by anyone holding the id; private ones only
/// by their owner. Independent of lock state.
pub fn authorize_read(capsule: &Capsule, actor: &Username) -> Result<(), AuthzError> {
    if capsule.visibility == Visibility::Public || capsule.is_owned_by(actor) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden)
    }
}

pub fn can_see_content(capsule: &Capsule, actor: &Username, now: DateTime<Utc>) -> bool {
    authorize_read(capsule, actor).is_ok() && classify(capsule, now) == LockState::Unlocked
}

/// Apply both read gates and return what `actor` is allowed to see.
///
/// Fails when the actor may not read the capsule at all. Otherwise the
/// returned copy has its message and attachment stripped unless the capsule
/// is unlocked at `now`.
pub fn disclose(
    capsule: &Capsule,
    actor: &Username,
    now: DateTime<Utc>,
) -> Result<Capsule, AuthzError> {
    authorize_read(capsule, actor)?;
    if can_see_content(capsule, actor, now) {
        Ok(capsule.clone())
    } else {
        Ok(capsule.sealed())
    }
}

/// Stable split into `(locked, unlocked)`, preserving input order on both
/// sides.
pub fn partition<I>(capsules: I, now: DateTime<Utc>) -> (Vec<Capsule>, Vec<Capsule>)
where
    I: IntoIterator<Item = Capsule>,
{
    capsules
        .into_iter()
        .partition(|c| classify(c, now) == LockState::Locked)
}
