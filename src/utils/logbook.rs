// src/utils/logbook.rs
use anyhow::Result;
use serde_json::Value;
use std::{fs, io::Write, path::Path};

/// Append one structured event line to `<base>/logbook.jsonl`.
///
/// Fire-and-forget style: callers typically ignore the Result so a full disk
/// never takes the write path down with it.
pub fn emit_event(base: &Path, event: &str, data: Value) -> Result<()> {
    let log_path = base.join("logbook.jsonl");
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let line = serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "event": event,
        "data": data
    });
    let json = serde_json::to_string(&line)?;
    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    writeln!(f, "{}", json)?;
    Ok(())
}
