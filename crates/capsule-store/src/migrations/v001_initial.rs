//! v001 -- Initial schema creation.
//!
//! Creates the `users` and `capsules` tables.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    username      TEXT PRIMARY KEY NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,              -- hex BLAKE3 derived key
    password_salt TEXT NOT NULL,              -- hex random salt
    role          TEXT NOT NULL DEFAULT 'user',
    created_at    TEXT NOT NULL               -- RFC-3339, UTC, microseconds
);

-- ----------------------------------------------------------------
-- Capsules
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS capsules (
    id              TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    owner           TEXT NOT NULL,                -- FK -> users(username)
    title           TEXT NOT NULL,
    message         TEXT,
    attachment_id   TEXT,                         -- UUID of the stored file
    attachment_name TEXT,
    attachment_size INTEGER,
    attachment_hash TEXT,                         -- hex BLAKE3
    unlock_at       TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    visibility      TEXT NOT NULL DEFAULT 'private',
    notified_at     TEXT,                         -- set by the unlock sweep

    FOREIGN KEY (owner) REFERENCES users(username) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_capsules_owner_created
    ON capsules(owner, created_at);

CREATE INDEX IF NOT EXISTS idx_capsules_pending_notification
    ON capsules(unlock_at) WHERE notified_at IS NULL;
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
