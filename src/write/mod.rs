// src/write/mod.rs
//! WriteCoordinator: per-resource serialized, revisioned writes.
//!
//! Each request moves `queued -> merging -> persisting -> {committed |
//! failed}`. Requests are keyed by resource id; an owned registry maps each
//! active id to a FIFO queue drained by its own worker thread, so writes to
//! one id are strictly ordered while unrelated ids proceed concurrently.
//! Queue entries remove themselves once drained.
//!
//! This ordering is a per-process discipline, not a distributed lock:
//! cross-process conflict protection rests on the optimistic checks
//! (If-Match / If-None-Match / expected rev) alone, and a detected race is
//! answered as a conflict, never retried here.

pub mod cache;

pub use cache::RevCache;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, unbounded};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::graph::merge::{merge_at_pointer, parse_pointer, pointer_has, pointer_set};
use crate::graph::{GraphPruner, GraphWriter};
use crate::store::{BodyStore, ChangeKind, ChangeLog, ChangeRecord, GraphDb};
use crate::utils::logbook;

/// One mutating request against a resource.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub request_id: String,
    pub resource_id: String,
    /// JSON pointer inside the resource where the body lands
    /// (the resolver's leftover).
    pub path_leftover: String,
    /// Inline body; exactly one of `body` / `body_id` should be set.
    pub body: Option<Value>,
    /// Staged-body reference; removed once the write settles.
    pub body_id: Option<String>,
    pub user_id: Option<String>,
    pub authorization_id: Option<String>,
    /// `_type` for the fresh shell when the resource does not exist yet.
    pub content_type: Option<String>,
    pub resource_exists: bool,
    /// Fail with `IfMatchFailed` unless the current rev equals this exactly.
    pub if_match: Option<i64>,
    /// Fail with `IfNoneMatchFailed` when the current rev is in this set.
    pub if_none_match: Option<Vec<i64>>,
    /// Expected current rev from the caller; mismatch fails `RevMismatch`.
    pub rev: Option<i64>,
    /// Suppress link scanning / graph materialization for this write.
    pub ignore_links: bool,
    /// Causal change ids this write was assembled from.
    pub from_change_ids: Vec<String>,
}

impl WriteRequest {
    pub fn new(
        resource_id: impl Into<String>,
        path_leftover: impl Into<String>,
        body: Value,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            resource_id: resource_id.into(),
            path_leftover: path_leftover.into(),
            body: Some(body),
            body_id: None,
            user_id: None,
            authorization_id: None,
            content_type: None,
            resource_exists: false,
            if_match: None,
            if_none_match: None,
            rev: None,
            ignore_links: false,
            from_change_ids: Vec::new(),
        }
    }
}

/// Typed outcome of a write. `PermissionDenied` belongs to the shared
/// response surface; it is issued by the caller's permission gate upstream
/// of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCode {
    Success,
    NotFound,
    PermissionDenied,
    IfMatchFailed,
    IfNoneMatchFailed,
    RevMismatch,
    Error(String),
}

/// Exactly one of these answers every accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse {
    pub code: WriteCode,
    pub resource_id: String,
    pub rev: Option<i64>,
    pub prior_rev: Option<i64>,
    pub change_id: Option<String>,
}

impl WriteResponse {
    fn failure(resource_id: &str, code: WriteCode) -> Self {
        Self {
            code,
            resource_id: resource_id.to_string(),
            rev: None,
            prior_rev: None,
            change_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub rev_cache_ttl: Duration,
    /// Requests queued longer than this are dropped unanswered.
    pub stale_after: Duration,
    /// JSONL logbook base directory; None disables the logbook.
    pub logbook: Option<PathBuf>,
}

impl CoordinatorOptions {
    pub fn from_config(cfg: &StoreConfig) -> Self {
        Self {
            rev_cache_ttl: Duration::from_secs(cfg.writes.rev_cache_ttl_secs),
            stale_after: Duration::from_secs(cfg.writes.stale_after_secs),
            logbook: cfg.logbook.enabled.then(|| cfg.logbook.path.clone()),
        }
    }
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            rev_cache_ttl: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
            logbook: None,
        }
    }
}

#[derive(Debug)]
struct Job {
    request: WriteRequest,
    reply: Sender<WriteResponse>,
    queued_at: Instant,
}

struct Shared {
    store: Arc<GraphDb>,
    writer: GraphWriter,
    pruner: GraphPruner,
    changes: Arc<ChangeLog>,
    bodies: Arc<BodyStore>,
    cache: RevCache,
    stale_after: Duration,
    logbook: Option<PathBuf>,
}

type QueueMap = Mutex<HashMap<String, Sender<Job>>>;
type CancelMap = Mutex<HashMap<String, Instant>>;

pub struct WriteCoordinator {
    shared: Arc<Shared>,
    queues: Arc<QueueMap>,
    cancelled: Arc<CancelMap>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WriteCoordinator {
    pub fn start(
        store: Arc<GraphDb>,
        changes: Arc<ChangeLog>,
        bodies: Arc<BodyStore>,
        options: CoordinatorOptions,
    ) -> Self {
        let writer = GraphWriter::new(Arc::clone(&store));
        let pruner = GraphPruner::new(Arc::clone(&store));
        Self {
            shared: Arc::new(Shared {
                store,
                writer,
                pruner,
                changes,
                bodies,
                cache: RevCache::new(options.rev_cache_ttl),
                stale_after: options.stale_after,
                logbook: options.logbook,
            }),
            queues: Arc::new(Mutex::new(HashMap::new())),
            cancelled: Arc::new(Mutex::new(HashMap::new())),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a write. The returned receiver yields exactly one response,
    /// unless the request is cancelled or goes stale, in which case the
    /// channel closes without one.
    pub fn submit(&self, request: WriteRequest) -> Receiver<WriteResponse> {
        let key = request.resource_id.clone();
        let (reply_tx, reply_rx) = bounded(1);
        let job = Job {
            request,
            reply: reply_tx,
            queued_at: Instant::now(),
        };

        // Workers only retire their queue entry while holding this lock, so
        // a sender found in the map always reaches a live worker.
        let mut queues = self.queues.lock().expect("queue registry poisoned");
        let job = match queues.get(&key) {
            Some(tx) => match tx.send(job) {
                Ok(()) => return reply_rx,
                Err(crossbeam_channel::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, rx) = unbounded();
        tx.send(job).expect("fresh queue rejected job");
        queues.insert(key.clone(), tx);
        drop(queues);

        let shared = Arc::clone(&self.shared);
        let registry = Arc::clone(&self.queues);
        let cancelled = Arc::clone(&self.cancelled);
        let handle = thread::spawn(move || worker_loop(key, rx, shared, registry, cancelled));
        let mut workers = self.workers.lock().expect("worker list poisoned");
        workers.retain(|h| !h.is_finished());
        workers.push(handle);

        reply_rx
    }

    /// Drop a queued request before it starts merging. A request already
    /// merging or persisting is unaffected. Cancelled requests are never
    /// answered; their reply channel simply closes. An entry whose request
    /// already completed (or never arrives) ages out with the staleness
    /// window.
    pub fn cancel(&self, request_id: &str) {
        self.cancelled
            .lock()
            .expect("cancel set poisoned")
            .insert(request_id.to_string(), Instant::now());
    }

    /// Disconnect all queues and wait for in-flight work to finish.
    pub fn shutdown(self) {
        self.queues.lock().expect("queue registry poisoned").clear();
        let workers = std::mem::take(&mut *self.workers.lock().expect("worker list poisoned"));
        for handle in workers {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    key: String,
    rx: Receiver<Job>,
    shared: Arc<Shared>,
    registry: Arc<QueueMap>,
    cancelled: Arc<CancelMap>,
) {
    loop {
        let job = match rx.try_recv() {
            Ok(job) => job,
            Err(TryRecvError::Empty) => {
                // Re-check under the registry lock so a concurrent submit
                // cannot enqueue into a queue we are about to retire.
                let mut queues = registry.lock().expect("queue registry poisoned");
                match rx.try_recv() {
                    Ok(job) => {
                        drop(queues);
                        job
                    }
                    Err(_) => {
                        queues.remove(&key);
                        return;
                    }
                }
            }
            Err(TryRecvError::Disconnected) => {
                registry
                    .lock()
                    .expect("queue registry poisoned")
                    .remove(&key);
                return;
            }
        };

        let request_id = job.request.request_id.clone();
        let was_cancelled = {
            let mut cancelled = cancelled.lock().expect("cancel set poisoned");
            cancelled.retain(|_, at| at.elapsed() <= shared.stale_after);
            cancelled.remove(&request_id).is_some()
        };
        if was_cancelled {
            tracing::debug!(%request_id, "request cancelled before merging");
            continue; // reply channel drops unanswered
        }
        if job.queued_at.elapsed() > shared.stale_after {
            tracing::warn!(%request_id, "request stale, dropped unanswered");
            continue;
        }

        let response = process(&shared, &job.request);

        // Staged-body cleanup always runs, and the caller is only answered
        // once both the write and the cleanup have settled.
        if let Some(body_id) = &job.request.body_id {
            if let Err(e) = shared.bodies.remove(body_id) {
                tracing::warn!(%request_id, %body_id, error = %e, "staged body cleanup failed");
            }
        }
        let _ = job.reply.send(response);
    }
}

fn process(shared: &Shared, request: &WriteRequest) -> WriteResponse {
    match try_write(shared, request) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                request_id = %request.request_id,
                resource_id = %request.resource_id,
                error = %e,
                "write failed"
            );
            WriteResponse::failure(&request.resource_id, WriteCode::Error(format!("{e:#}")))
        }
    }
}

fn try_write(shared: &Shared, request: &WriteRequest) -> Result<WriteResponse> {
    let id = &request.resource_id;
    tracing::debug!(request_id = %request.request_id, id = %id, "merging");

    // 1. Resolve the body: inline, or fetched from the staging store.
    let body = match (&request.body, &request.body_id) {
        (Some(body), _) => body.clone(),
        (None, Some(body_id)) => match shared.bodies.get(body_id) {
            Ok(body) => body,
            Err(_) => {
                return Ok(WriteResponse::failure(id, WriteCode::NotFound));
            }
        },
        (None, None) => anyhow::bail!("write request carries neither body nor body_id"),
    };

    // 2-3. Current revision (cache first, storage fallback), then the
    // optimistic checks against it.
    let current = match shared.cache.get(id) {
        Some(rev) => rev,
        None => shared.store.get_rev(id)?,
    };
    if let Some(expected) = request.if_match {
        if expected != current {
            return Ok(WriteResponse::failure(id, WriteCode::IfMatchFailed));
        }
    }
    if let Some(excluded) = &request.if_none_match {
        if excluded.contains(&current) {
            return Ok(WriteResponse::failure(id, WriteCode::IfNoneMatchFailed));
        }
    }
    if let Some(expected) = request.rev {
        if expected != current {
            return Ok(WriteResponse::failure(id, WriteCode::RevMismatch));
        }
    }

    // A null body is a partial delete, not a merge.
    if body.is_null() {
        return prune_write(shared, request, current);
    }

    // 4. Merge base: the existing document, or a fresh shell.
    let existing = shared.store.get_resource(id)?;
    let is_fresh = existing.is_none();
    let mut base = match existing {
        Some(doc) => doc,
        None => fresh_shell(id, request),
    };

    // 5. Merge the body at the leftover pointer. A brand-new resource's
    // leftover may still carry its own id as the first two segments.
    let mut parts = parse_pointer(&request.path_leftover);
    if is_fresh && parts.len() >= 2 && format!("{}/{}", parts[0], parts[1]) == *id {
        parts.drain(..2);
    }
    merge_at_pointer(&mut base, &parts, &body);
    let now = chrono::Utc::now();
    pointer_set(
        &mut base,
        &["_meta".into(), "modifiedBy".into()],
        json!(request.user_id),
    );
    pointer_set(
        &mut base,
        &["_meta".into(), "modified".into()],
        json!(now.timestamp_millis() as f64 / 1000.0),
    );

    // 6. Next revision, floored by the change feed so a delete + recreate
    // of the same id never reuses a rev.
    let mut next_rev = current + 1;
    if next_rev == 1 {
        if let Some(max_prior) = shared.changes.max_change_rev(id)? {
            next_rev = max_prior + 1;
        }
    }
    pointer_set(&mut base, &["_rev".into()], Value::from(next_rev));
    pointer_set(
        &mut base,
        &["_meta".into(), "_rev".into()],
        Value::from(next_rev),
    );
    // 7. Change record first, so the audit trail covers every committed rev;
    // the snapshot never embeds its own `_changes` link, which is set on the
    // persisted document only afterwards.
    let change_id = shared
        .changes
        .put_change(&ChangeRecord {
            resource_id: id.clone(),
            rev: next_rev,
            kind: ChangeKind::Merge,
            body: base.clone(),
            children: request.from_change_ids.clone(),
            path: Some(request.path_leftover.clone()),
            user_id: request.user_id.clone(),
            authorization_id: request.authorization_id.clone(),
        })
        .context("appending change record")?;
    pointer_set(
        &mut base,
        &["_meta".into(), "_changes".into()],
        json!({ "_id": format!("{id}/_meta/_changes"), "_rev": next_rev }),
    );

    // 8. Persist + materialize links.
    tracing::debug!(request_id = %request.request_id, id = %id, rev = next_rev, "persisting");
    let prior_rev = shared
        .writer
        .put_resource(id, &base, !request.ignore_links)?;

    // 9. Cache only after the write committed.
    shared.cache.put(id, next_rev);

    if let Some(logbook_base) = &shared.logbook {
        let _ = logbook::emit_event(
            logbook_base,
            "write_committed",
            json!({
                "resource_id": id,
                "rev": next_rev,
                "change_id": change_id,
                "user_id": request.user_id,
            }),
        );
    }

    Ok(WriteResponse {
        code: WriteCode::Success,
        resource_id: id.clone(),
        rev: Some(next_rev),
        prior_rev,
        change_id: Some(change_id),
    })
}

/// Null-body path: prune the sub-path named by the leftover pointer and
/// record a delete change. Deleting an absent path is a no-op answered with
/// the current revision and no change record.
fn prune_write(shared: &Shared, request: &WriteRequest, current: i64) -> Result<WriteResponse> {
    let id = &request.resource_id;
    let Some(doc) = shared.store.get_resource(id)? else {
        return Ok(WriteResponse::failure(id, WriteCode::NotFound));
    };
    let parts = parse_pointer(&request.path_leftover);
    if parts.is_empty() {
        anyhow::bail!("null body requires a path inside the resource");
    }
    if !pointer_has(&doc, &parts) {
        return Ok(WriteResponse {
            code: WriteCode::Success,
            resource_id: id.clone(),
            rev: Some(current),
            prior_rev: Some(current),
            change_id: None,
        });
    }

    let mut next_rev = current + 1;
    if next_rev == 1 {
        if let Some(max_prior) = shared.changes.max_change_rev(id)? {
            next_rev = max_prior + 1;
        }
    }
    let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
    let patch = json!({
        "_rev": next_rev,
        "_meta": {
            "_rev": next_rev,
            "modifiedBy": request.user_id,
            "modified": now,
        },
    });
    tracing::debug!(request_id = %request.request_id, id = %id, rev = next_rev, "pruning");
    shared
        .pruner
        .delete_partial_resource(id, &request.path_leftover, &patch)?;

    // Change record from the pruned document, then the `_changes` link onto
    // the persisted copy only.
    let snapshot = shared.store.get_resource(id)?.unwrap_or(Value::Null);
    let change_id = shared
        .changes
        .put_change(&ChangeRecord {
            resource_id: id.clone(),
            rev: next_rev,
            kind: ChangeKind::Delete,
            body: snapshot.clone(),
            children: request.from_change_ids.clone(),
            path: Some(request.path_leftover.clone()),
            user_id: request.user_id.clone(),
            authorization_id: request.authorization_id.clone(),
        })
        .context("appending delete change record")?;
    let mut doc = snapshot;
    pointer_set(
        &mut doc,
        &["_meta".into(), "_changes".into()],
        json!({ "_id": format!("{id}/_meta/_changes"), "_rev": next_rev }),
    );
    shared.store.upsert_resource(id, &doc)?;

    shared.cache.put(id, next_rev);
    if let Some(logbook_base) = &shared.logbook {
        let _ = logbook::emit_event(
            logbook_base,
            "delete_committed",
            json!({
                "resource_id": id,
                "rev": next_rev,
                "path": request.path_leftover,
                "change_id": change_id,
                "user_id": request.user_id,
            }),
        );
    }

    Ok(WriteResponse {
        code: WriteCode::Success,
        resource_id: id.clone(),
        rev: Some(next_rev),
        prior_rev: Some(current),
        change_id: Some(change_id),
    })
}

/// Shell document for the first write to an id.
fn fresh_shell(id: &str, request: &WriteRequest) -> Value {
    let created = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
    json!({
        "_type": request.content_type,
        "_meta": {
            "_id": format!("{id}/_meta"),
            "_type": request.content_type,
            "_owner": request.user_id,
            "stats": {
                "createdBy": request.user_id,
                "created": created,
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(dir: &std::path::Path, options: CoordinatorOptions) -> WriteCoordinator {
        let store = Arc::new(GraphDb::open(&dir.join("graph.db")).expect("graph db"));
        let changes = Arc::new(ChangeLog::open(&dir.join("changes.db")).expect("change log"));
        let bodies = Arc::new(BodyStore::open(dir.join("bodies")).expect("body store"));
        WriteCoordinator::start(store, changes, bodies, options)
    }

    #[test]
    fn stale_cancel_entries_age_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = coordinator(
            dir.path(),
            CoordinatorOptions {
                stale_after: Duration::ZERO,
                ..CoordinatorOptions::default()
            },
        );

        // Cancelling a request that never reaches a queue must not pin its
        // entry forever.
        coordinator.cancel("request-that-never-arrives");
        assert_eq!(coordinator.cancelled.lock().unwrap().len(), 1);

        // Any worker pass purges entries older than the staleness window.
        let rx = coordinator.submit(WriteRequest::new("resources/doc1", "", json!({ "v": 1 })));
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
        assert!(coordinator.cancelled.lock().unwrap().is_empty());
    }
}
