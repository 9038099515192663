// src/store/changes.rs
//! Append-only change feed, one row per committed revision of a resource.
//!
//! - Rows are never updated or deleted; the feed survives resource deletion,
//!   which is what lets the coordinator keep revision numbers monotonic
//!   across a delete + recreate of the same id.
//! - `max_change_rev` answers "what is the largest rev this id has ever
//!   committed", the floor for fresh revision assignment.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

/// Kind of transition a change records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Merge,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Merge => "merge",
            ChangeKind::Delete => "delete",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "delete" => ChangeKind::Delete,
            _ => ChangeKind::Merge,
        }
    }
}

/// Immutable log entry for one revision of one resource.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub resource_id: String,
    pub rev: i64,
    pub kind: ChangeKind,
    /// Full snapshot of the document at this revision.
    pub body: Value,
    /// Causal child change ids (writes this one was assembled from).
    pub children: Vec<String>,
    pub path: Option<String>,
    pub user_id: Option<String>,
    pub authorization_id: Option<String>,
}

pub struct ChangeLog {
    db: Mutex<Connection>,
}

impl ChangeLog {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Connection::open(db_path)?;
        db.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS changes (
              change_id        INTEGER PRIMARY KEY AUTOINCREMENT,
              resource_id      TEXT NOT NULL,
              rev              INTEGER NOT NULL,
              kind             TEXT NOT NULL,      -- merge | delete
              body             TEXT NOT NULL,      -- full snapshot JSON
              children         TEXT NOT NULL,      -- JSON array of change ids
              path             TEXT,
              user_id          TEXT,
              authorization_id TEXT,
              created_at       TEXT NOT NULL       -- RFC3339 UTC
            );

            CREATE INDEX IF NOT EXISTS idx_changes_res_rev ON changes(resource_id, rev);
            "#,
        )?;

        Ok(Self { db: Mutex::new(db) })
    }

    /// Append a change record; returns the new change id (`changes/<n>`).
    pub fn put_change(&self, record: &ChangeRecord) -> Result<String> {
        let db = self.db.lock().expect("change log mutex poisoned");
        db.execute(
            r#"
            INSERT INTO changes
              (resource_id, rev, kind, body, children, path, user_id, authorization_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            (
                &record.resource_id,
                record.rev,
                record.kind.as_str(),
                serde_json::to_string(&record.body)?,
                serde_json::to_string(&record.children)?,
                &record.path,
                &record.user_id,
                &record.authorization_id,
                Utc::now().to_rfc3339(),
            ),
        )
        .context("appending change record")?;
        Ok(format!("changes/{}", db.last_insert_rowid()))
    }

    /// Largest rev ever committed for this resource id, if any.
    pub fn max_change_rev(&self, resource_id: &str) -> Result<Option<i64>> {
        let db = self.db.lock().expect("change log mutex poisoned");
        let max: Option<i64> = db.query_row(
            "SELECT MAX(rev) FROM changes WHERE resource_id=?1",
            [resource_id],
            |r| r.get(0),
        )?;
        Ok(max)
    }

    /// Fetch the change record for `(resource_id, rev)`, if present.
    pub fn get_change(&self, resource_id: &str, rev: i64) -> Result<Option<ChangeRecord>> {
        let db = self.db.lock().expect("change log mutex poisoned");
        let row = db
            .query_row(
                r#"
                SELECT resource_id, rev, kind, body, children, path, user_id, authorization_id
                FROM changes WHERE resource_id=?1 AND rev=?2
                ORDER BY change_id DESC LIMIT 1
                "#,
                (resource_id, rev),
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, Option<String>>(5)?,
                        r.get::<_, Option<String>>(6)?,
                        r.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some((resource_id, rev, kind, body, children, path, user_id, authorization_id)) = row
        else {
            return Ok(None);
        };
        Ok(Some(ChangeRecord {
            resource_id,
            rev,
            kind: ChangeKind::from_str(&kind),
            body: serde_json::from_str(&body).context("decoding change body")?,
            children: serde_json::from_str(&children).context("decoding change children")?,
            path,
            user_id,
            authorization_id,
        }))
    }
}
