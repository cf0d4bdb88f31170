use rusqlite::params;

use capsule_shared::{Role, Username};

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::UserRecord;

const USER_COLUMNS: &str = "username, email, password_hash, password_salt, role, created_at";

impl Database {
    /// Insert a new account. Fails with [`StoreError::Conflict`] when the
    /// username or email is already taken.
    pub fn insert_user(&self, user: &UserRecord) -> Result<()> {
        let res = self.conn().execute(
            "INSERT INTO users (username, email, password_hash, password_salt, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.username.as_str(),
                user.email,
                user.password_hash,
                user.password_salt,
                user.role.as_str(),
                encode_ts(&user.created_at),
            ],
        );

        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict(
                    msg.unwrap_or_else(|| "username or email already registered".into()),
                ))
            }
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    pub fn get_user(&self, username: &Username) -> Result<UserRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username.as_str()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at"))?;

        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let username: String = row.get(0)?;
    let role_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(UserRecord {
        username: Username(username),
        email: row.get(1)?,
        password_hash: row.get(2)?,
        password_salt: row.get(3)?,
        role: Role::parse(&role_str).unwrap_or_default(),
        created_at: decode_ts(5, &created_str)?,
    })
}
