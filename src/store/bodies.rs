// src/store/bodies.rs
//! Staging store for PUT bodies too large (or too early) to ride inline on a
//! write request.
//!
//! - Every save gets a fresh unique id, so two requests staging
//!   byte-identical bodies never share a file and one request's cleanup
//!   cannot destroy the other's body.
//! - The coordinator removes a staged body once its write settles,
//!   regardless of outcome.

use anyhow::{Context, Result};
use serde_json::Value;
use std::{fs, path::PathBuf};
use uuid::Uuid;

// Per-object size cap to keep a single runaway PUT from exhausting disk.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024; // 16 MiB

/// Filesystem-backed staging store (no DB).
#[derive(Debug, Clone)]
pub struct BodyStore {
    root: PathBuf,
}

impl BodyStore {
    /// Initialize the staging root (idempotent).
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Stage a body and return its unique id.
    pub fn save(&self, body: &Value) -> Result<String> {
        let bytes = serde_json::to_vec(body)?;
        if bytes.len() > MAX_BODY_BYTES {
            anyhow::bail!(
                "staged body too large: {} bytes (max {})",
                bytes.len(),
                MAX_BODY_BYTES
            );
        }
        let body_id = Uuid::new_v4().to_string();
        fs::write(self.root.join(&body_id), &bytes)
            .with_context(|| format!("staging body {body_id}"))?;
        Ok(body_id)
    }

    /// Fetch a staged body by id.
    pub fn get(&self, body_id: &str) -> Result<Value> {
        let path = self.root.join(body_id);
        let bytes =
            fs::read(&path).with_context(|| format!("staged body not found: {body_id}"))?;
        serde_json::from_slice(&bytes).context("decoding staged body")
    }

    /// Remove a staged body (idempotent).
    pub fn remove(&self, body_id: &str) -> Result<()> {
        let path = self.root.join(body_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing staged body {body_id}")),
        }
    }
}
