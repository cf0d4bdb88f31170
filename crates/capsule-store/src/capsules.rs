use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use capsule_shared::{Attachment, Capsule, CapsuleId, Username, Visibility};

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::PendingUnlock;

const CAPSULE_COLUMNS: &str = "id, owner, title, message, attachment_id, attachment_name, \
     attachment_size, attachment_hash, unlock_at, created_at, visibility";

impl Database {
    pub fn insert_capsule(&self, capsule: &Capsule) -> Result<()> {
        let attachment = capsule.attachment.as_ref();
        self.conn().execute(
            "INSERT INTO capsules (id, owner, title, message, attachment_id, attachment_name,
                                   attachment_size, attachment_hash, unlock_at, created_at, visibility)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                capsule.id.to_string(),
                capsule.owner.as_str(),
                capsule.title,
                capsule.message,
                attachment.map(|a| a.id.to_string()),
                attachment.map(|a| a.file_name.clone()),
                attachment.map(|a| a.size as i64),
                attachment.map(|a| a.blake3_hash.clone()),
                encode_ts(&capsule.unlock_at),
                encode_ts(&capsule.created_at),
                capsule.visibility.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get_capsule(&self, id: CapsuleId) -> Result<Capsule> {
        self.conn()
            .query_row(
                &format!("SELECT {CAPSULE_COLUMNS} FROM capsules WHERE id = ?1"),
                params![id.to_string()],
                row_to_capsule,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// All capsules of one owner, oldest first.
    pub fn list_capsules_by_owner(&self, owner: &Username) -> Result<Vec<Capsule>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CAPSULE_COLUMNS} FROM capsules
             WHERE owner = ?1
             ORDER BY created_at, id"
        ))?;

        let rows = stmt.query_map(params![owner.as_str()], row_to_capsule)?;
        collect(rows)
    }

    pub fn list_all_capsules(&self) -> Result<Vec<Capsule>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CAPSULE_COLUMNS} FROM capsules ORDER BY created_at, id"
        ))?;

        let rows = stmt.query_map([], row_to_capsule)?;
        collect(rows)
    }

    /// Replace the editable fields of a capsule. Returns `false` when no
    /// such capsule exists.
    pub fn update_capsule(
        &self,
        id: CapsuleId,
        title: &str,
        message: Option<&str>,
        unlock_at: DateTime<Utc>,
    ) -> Result<bool> {
        // A new unlock instant means the owner has not been notified of it.
        let affected = self.conn().execute(
            "UPDATE capsules
             SET title = ?2, message = ?3, unlock_at = ?4, notified_at = NULL
             WHERE id = ?1",
            params![id.to_string(), title, message, encode_ts(&unlock_at)],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_capsule(&self, id: CapsuleId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM capsules WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Number of capsules per registered user, including users with none.
    pub fn count_capsules_per_user(&self) -> Result<BTreeMap<Username, u64>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.username, COUNT(c.id)
             FROM users u LEFT JOIN capsules c ON c.owner = u.username
             GROUP BY u.username",
        )?;

        let rows = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((Username(name), count.max(0) as u64))
        })?;

        let mut stats = BTreeMap::new();
        for row in rows {
            let (name, count) = row?;
            stats.insert(name, count);
        }
        Ok(stats)
    }

    /// Capsules that unlocked at or before `now` and have not been announced.
    pub fn pending_unlocks(&self, now: DateTime<Utc>) -> Result<Vec<PendingUnlock>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.title, c.owner, u.email, c.unlock_at
             FROM capsules c JOIN users u ON u.username = c.owner
             WHERE c.notified_at IS NULL AND c.unlock_at <= ?1
             ORDER BY c.unlock_at",
        )?;

        let rows = stmt.query_map(params![encode_ts(&now)], |row| {
            let id_str: String = row.get(0)?;
            let owner: String = row.get(2)?;
            let unlock_str: String = row.get(4)?;
            Ok(PendingUnlock {
                capsule_id: CapsuleId(parse_uuid(0, &id_str)?),
                title: row.get(1)?,
                owner: Username(owner),
                owner_email: row.get(3)?,
                unlock_at: decode_ts(4, &unlock_str)?,
            })
        })?;

        let mut pending = Vec::new();
        for row in rows {
            pending.push(row?);
        }
        Ok(pending)
    }

    pub fn mark_notified(&self, id: CapsuleId, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE capsules SET notified_at = ?2 WHERE id = ?1",
            params![id.to_string(), encode_ts(&at)],
        )?;
        Ok(affected > 0)
    }
}

fn collect<F>(rows: rusqlite::MappedRows<'_, F>) -> Result<Vec<Capsule>>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<Capsule>,
{
    let mut capsules = Vec::new();
    for row in rows {
        capsules.push(row?);
    }
    Ok(capsules)
}

fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_capsule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Capsule> {
    let id_str: String = row.get(0)?;
    let owner: String = row.get(1)?;
    let attachment_id: Option<String> = row.get(4)?;
    let unlock_str: String = row.get(8)?;
    let created_str: String = row.get(9)?;
    let visibility_str: String = row.get(10)?;

    let attachment = match attachment_id {
        Some(raw) => Some(Attachment {
            id: parse_uuid(4, &raw)?,
            file_name: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            size: row.get::<_, Option<i64>>(6)?.unwrap_or(0).max(0) as u64,
            blake3_hash: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        }),
        None => None,
    };

    Ok(Capsule {
        id: CapsuleId(parse_uuid(0, &id_str)?),
        owner: Username(owner),
        title: row.get(2)?,
        message: row.get(3)?,
        attachment,
        unlock_at: decode_ts(8, &unlock_str)?,
        created_at: decode_ts(9, &created_str)?,
        visibility: Visibility::parse(&visibility_str).unwrap_or_default(),
    })
}
