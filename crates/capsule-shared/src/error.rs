use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which half of a date/time schedule input a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleField {
    Date,
    Time,
}

impl fmt::Display for ScheduleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleField::Date => write!(f, "Unlock date"),
            ScheduleField::Time => write!(f, "Unlock time"),
        }
    }
}

/// Bad or missing user input. Raised locally, never sent to the repository.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(ScheduleField),

    #[error("Unlock date and time must be in the future")]
    PastInstant,

    #[error("Unlock time does not exist in the local time zone")]
    NonexistentLocalTime,

    #[error("Title is required")]
    EmptyTitle,

    #[error("Message too long: {len} characters (max {max})")]
    MessageTooLong { len: usize, max: usize },
}

impl ValidationError {
    /// The form field this error should be shown next to.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField(ScheduleField::Date) => "unlock_date",
            ValidationError::MissingField(ScheduleField::Time)
            | ValidationError::PastInstant
            | ValidationError::NonexistentLocalTime => "unlock_time",
            ValidationError::EmptyTitle => "title",
            ValidationError::MessageTooLong { .. } => "message",
        }
    }
}

/// Ownership, visibility or lock-state violation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzError {
    #[error("You are not the owner of this capsule")]
    NotOwner,

    #[error("Capsule is already unlocked and can no longer be edited")]
    AlreadyUnlocked,

    #[error("You do not have permission to view this capsule")]
    Forbidden,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed session token: {0}")]
    Malformed(String),

    #[error("Session token has expired")]
    Expired,

    #[error("Session token signature is invalid")]
    BadSignature,

    #[error("Invalid verifying key")]
    InvalidKey,
}
