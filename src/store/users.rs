// src/store/users.rs
//! User directory: the profile lookups the resolver needs.
//!
//! Each user document carries the ids of their bookmarks and shares root
//! resources, which back the `/bookmarks` and `/shares` virtual prefixes.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Resource id of this user's bookmarks root (e.g. `resources/bk1`).
    pub bookmarks_id: String,
    /// Resource id of this user's shares root.
    pub shares_id: String,
}

pub struct UserDirectory {
    db: Mutex<Connection>,
}

impl UserDirectory {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Connection::open(db_path)?;
        db.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS users (
              id  TEXT PRIMARY KEY,  -- users/<name>
              doc TEXT NOT NULL
            );
            "#,
        )?;

        Ok(Self { db: Mutex::new(db) })
    }

    pub fn find_by_id(&self, user_id: &str) -> Result<Option<User>> {
        let db = self.db.lock().expect("users mutex poisoned");
        let text: Option<String> = db
            .query_row("SELECT doc FROM users WHERE id=?1", [user_id], |r| {
                r.get(0)
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        text.map(|t| serde_json::from_str(&t).context("decoding user doc"))
            .transpose()
    }

    /// Insert or replace a user profile.
    pub fn put_user(&self, user: &User) -> Result<()> {
        let db = self.db.lock().expect("users mutex poisoned");
        db.execute(
            r#"
            INSERT INTO users(id, doc) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET doc = excluded.doc
            "#,
            (&user.id, serde_json::to_string(user)?),
        )?;
        Ok(())
    }
}
