//! Schema migrations for the capsule database, applied in order whenever a
//! [`crate::Database`] is opened. `PRAGMA user_version` records the last
//! applied step.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

const CURRENT_VERSION: u32 = 1;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version >= CURRENT_VERSION {
        return Ok(());
    }

    tracing::info!(from = version, to = CURRENT_VERSION, "Migrating capsule schema");

    if version < 1 {
        v001_initial::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}
