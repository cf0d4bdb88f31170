//! # capsule-store
//!
//! SQLite system of record for the time capsule server.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for users and
//! capsules. Lock state is never stored; callers derive it from
//! `unlock_at` through `capsule_shared::lifecycle`.

pub mod capsules;
pub mod database;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
