// src/store/graph_store.rs
//! Graph-capable document store over a single SQLite connection (WAL).
//!
//! - `resources` holds full JSON documents keyed by id (`resources/<key>`).
//! - `graph_nodes` + `edges` hold the structural path graph materialized by
//!   the writer; node ids are derived deterministically so upserts are
//!   idempotent.
//! - `traverse` is an explicit bounded-depth BFS with a per-step edge filter,
//!   shared by the resolver and the pruner.
//! - Transient busy/locked errors are retried here with bounded attempts and
//!   a short delay; callers above this boundary never see them unless the
//!   retries are exhausted.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Bound on graph traversal depth (path segments / prune fan-out).
pub const MAX_DEPTH: usize = 100;

const BUSY_RETRIES: usize = 5;
const BUSY_DELAY: Duration = Duration::from_millis(50);

/// One point in the path-structure graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: String,
    pub resource_id: String,
    /// Structural sub-path inside the owning resource (`/a/b`), null at
    /// resource roots.
    pub path: Option<String>,
    pub is_resource: bool,
}

/// A named structural step between two graph nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRecord {
    pub from: String,
    pub to: String,
    pub name: String,
    pub versioned: bool,
}

/// Cheap `{_id, _rev, _meta._owner}` projection of a resource.
#[derive(Debug, Clone)]
pub struct OwnerIdRev {
    pub id: String,
    pub rev: i64,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// One enumerated traversal path. `vertices[0]` is the start node; a final
/// `None` vertex marks a dangling edge (target node never created).
#[derive(Debug, Clone)]
pub struct TraversalPath {
    pub vertices: Vec<Option<GraphNode>>,
    pub edges: Vec<EdgeRecord>,
}

/// Outcome of an atomic insert-or-update.
#[derive(Debug, Clone)]
pub struct Upsert {
    pub new: Value,
    pub old: Option<Value>,
}

/// GraphDb is the single authority for writing to the graph SQLite file.
pub struct GraphDb {
    db: Mutex<Connection>,
}

impl GraphDb {
    /// Open/create the SQLite DB and ensure schema.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Connection::open(db_path)?;

        // WAL reduces writer/reader blocking; safe for our single-writer design.
        db.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS resources (
              id   TEXT PRIMARY KEY,  -- resources/<key>
              doc  TEXT NOT NULL      -- full JSON incl. _rev, _meta, _type
            );

            CREATE TABLE IF NOT EXISTS graph_nodes (
              id          TEXT PRIMARY KEY,  -- resources:<key>[:<seg>...]
              resource_id TEXT NOT NULL,
              path        TEXT,              -- structural sub-path, NULL at roots
              is_resource INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS edges (
              from_node TEXT NOT NULL,
              name      TEXT NOT NULL,
              to_node   TEXT NOT NULL,
              versioned INTEGER NOT NULL,
              PRIMARY KEY (from_node, name)
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_resource ON graph_nodes(resource_id);
            CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_node);
            "#,
        )?;

        Ok(Self { db: Mutex::new(db) })
    }

    /// Run `op` against the connection, retrying transient busy/locked
    /// failures. This is the boundary where storage deadlocks disappear.
    fn run<T>(&self, op: impl Fn(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let db = self.db.lock().expect("graph db mutex poisoned");
        let mut tries = 0;
        loop {
            match op(&db) {
                Ok(v) => return Ok(v),
                Err(e) if is_busy(&e) && tries < BUSY_RETRIES => {
                    tries += 1;
                    tracing::warn!(tries, "graph store busy, retrying");
                    thread::sleep(BUSY_DELAY);
                }
                Err(e) => return Err(e).context("graph store query"),
            }
        }
    }

    // ---------- resources ----------

    /// Point read of a full resource document.
    pub fn get_resource(&self, id: &str) -> Result<Option<Value>> {
        let text: Option<String> = self.run(|db| {
            db.query_row("SELECT doc FROM resources WHERE id=?1", [id], |r| r.get(0))
                .map(Some)
                .or_else(none_on_missing)
        })?;
        text.map(|t| serde_json::from_str(&t).context("decoding resource doc"))
            .transpose()
    }

    /// Read a subdocument by JSON pointer. Absence anywhere along the
    /// pointer (including the resource itself) is `None`, never a fault.
    pub fn get_partial(&self, id: &str, pointer: &str) -> Result<Option<Value>> {
        let Some(doc) = self.get_resource(id)? else {
            return Ok(None);
        };
        let parts = crate::graph::merge::parse_pointer(pointer);
        Ok(crate::graph::merge::pointer_get(&doc, &parts).cloned())
    }

    /// Current revision of a resource, 0 when the resource does not exist.
    pub fn get_rev(&self, id: &str) -> Result<i64> {
        Ok(self
            .get_partial(id, "/_rev")?
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }

    /// `{_id, _rev, _meta._owner}` projection used by permission checks.
    pub fn get_owner_id_rev(&self, id: &str) -> Result<Option<OwnerIdRev>> {
        let Some(doc) = self.get_resource(id)? else {
            return Ok(None);
        };
        Ok(Some(OwnerIdRev {
            id: id.to_string(),
            rev: doc.get("_rev").and_then(Value::as_i64).unwrap_or(0),
            owner: doc
                .pointer("/_meta/_owner")
                .and_then(Value::as_str)
                .map(str::to_string),
        }))
    }

    /// Atomic insert-or-update of a resource document; returns the previous
    /// document if any.
    pub fn upsert_resource(&self, id: &str, doc: &Value) -> Result<Upsert> {
        let text = serde_json::to_string(doc)?;
        let old: Option<String> = self.run(|db| {
            let old = db
                .query_row("SELECT doc FROM resources WHERE id=?1", [id], |r| {
                    r.get::<_, String>(0)
                })
                .map(Some)
                .or_else(none_on_missing)?;
            db.execute(
                r#"
                INSERT INTO resources(id, doc) VALUES (?1, ?2)
                ON CONFLICT(id) DO UPDATE SET doc = excluded.doc
                "#,
                (id, &text),
            )?;
            Ok(old)
        })?;
        Ok(Upsert {
            new: doc.clone(),
            old: old
                .map(|t| serde_json::from_str(&t).context("decoding old resource doc"))
                .transpose()?,
        })
    }

    /// Idempotent delete; returns the removed document if it existed.
    pub fn delete_resource_doc(&self, id: &str) -> Result<Option<Value>> {
        let old: Option<String> = self.run(|db| {
            let old = db
                .query_row("SELECT doc FROM resources WHERE id=?1", [id], |r| {
                    r.get::<_, String>(0)
                })
                .map(Some)
                .or_else(none_on_missing)?;
            db.execute("DELETE FROM resources WHERE id=?1", [id])?;
            Ok(old)
        })?;
        old.map(|t| serde_json::from_str(&t).context("decoding deleted doc"))
            .transpose()
    }

    // ---------- graph nodes ----------

    pub fn get_node(&self, node_id: &str) -> Result<Option<GraphNode>> {
        self.run(|db| {
            db.query_row(
                "SELECT id, resource_id, path, is_resource FROM graph_nodes WHERE id=?1",
                [node_id],
                row_to_node,
            )
            .map(Some)
            .or_else(none_on_missing)
        })
    }

    /// Insert a node if absent; an existing node is left untouched
    /// (re-running a write with identical structure is a no-op).
    pub fn upsert_node_keep(&self, node: &GraphNode) -> Result<()> {
        self.run(|db| {
            db.execute(
                r#"
                INSERT INTO graph_nodes(id, resource_id, path, is_resource)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO NOTHING
                "#,
                (
                    &node.id,
                    &node.resource_id,
                    &node.path,
                    node.is_resource as i64,
                ),
            )
            .map(|_| ())
        })
    }

    pub fn nodes_by_resource(&self, resource_id: &str) -> Result<Vec<GraphNode>> {
        self.run(|db| {
            let mut stmt = db.prepare(
                "SELECT id, resource_id, path, is_resource FROM graph_nodes
                 WHERE resource_id=?1 ORDER BY id",
            )?;
            let iter = stmt.query_map([resource_id], row_to_node)?;
            iter.collect()
        })
    }

    /// Find a resource's node by its stored structural path (NULL = root).
    pub fn node_by_resource_and_path(
        &self,
        resource_id: &str,
        path: Option<&str>,
    ) -> Result<Option<GraphNode>> {
        self.run(|db| {
            db.query_row(
                "SELECT id, resource_id, path, is_resource FROM graph_nodes
                 WHERE resource_id=?1 AND path IS ?2",
                (resource_id, path),
                row_to_node,
            )
            .map(Some)
            .or_else(none_on_missing)
        })
    }

    pub fn delete_node(&self, node_id: &str) -> Result<()> {
        self.run(|db| {
            db.execute("DELETE FROM graph_nodes WHERE id=?1", [node_id])
                .map(|_| ())
        })
    }

    // ---------- edges ----------

    /// Upsert keyed by `(from, name)`: insert, or refresh `to`/`versioned`.
    pub fn upsert_edge(&self, edge: &EdgeRecord) -> Result<()> {
        self.run(|db| {
            db.execute(
                r#"
                INSERT INTO edges(from_node, name, to_node, versioned)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(from_node, name) DO UPDATE SET
                  to_node   = excluded.to_node,
                  versioned = excluded.versioned
                "#,
                (&edge.from, &edge.name, &edge.to, edge.versioned as i64),
            )
            .map(|_| ())
        })
    }

    pub fn edges_from(&self, node_id: &str) -> Result<Vec<EdgeRecord>> {
        self.run(|db| {
            let mut stmt = db.prepare(
                "SELECT from_node, to_node, name, versioned FROM edges
                 WHERE from_node=?1 ORDER BY name",
            )?;
            let iter = stmt.query_map([node_id], row_to_edge)?;
            iter.collect()
        })
    }

    pub fn edges_to(&self, node_id: &str) -> Result<Vec<EdgeRecord>> {
        self.run(|db| {
            let mut stmt = db.prepare(
                "SELECT from_node, to_node, name, versioned FROM edges
                 WHERE to_node=?1 ORDER BY from_node, name",
            )?;
            let iter = stmt.query_map([node_id], row_to_edge)?;
            iter.collect()
        })
    }

    pub fn delete_edge(&self, from: &str, name: &str) -> Result<()> {
        self.run(|db| {
            db.execute(
                "DELETE FROM edges WHERE from_node=?1 AND name=?2",
                (from, name),
            )
            .map(|_| ())
        })
    }

    /// Remove every edge leaving `node_id`.
    pub fn delete_edges_from(&self, node_id: &str) -> Result<()> {
        self.run(|db| {
            db.execute("DELETE FROM edges WHERE from_node=?1", [node_id])
                .map(|_| ())
        })
    }

    /// Remove every edge touching `node_id`, either direction.
    pub fn delete_edges_touching(&self, node_id: &str) -> Result<()> {
        self.run(|db| {
            db.execute(
                "DELETE FROM edges WHERE from_node=?1 OR to_node=?1",
                [node_id],
            )
            .map(|_| ())
        })
    }

    // ---------- traversal ----------

    /// Bounded-depth directed traversal from `start`, enumerating every path
    /// whose steps all satisfy `filter(edge, destination_vertex, depth)`.
    ///
    /// Paths are returned in BFS order, shortest first; the trivial
    /// zero-edge path is included when the start node exists. A step whose
    /// destination node was never created still produces a path ending in a
    /// `None` vertex (a dangling link), but is not extended further. With
    /// `unique_vertices` each vertex is entered at most once across the whole
    /// traversal, which keeps cyclic link graphs from exploding.
    pub fn traverse(
        &self,
        start: &str,
        direction: Direction,
        max_depth: usize,
        unique_vertices: bool,
        filter: &dyn Fn(&EdgeRecord, Option<&GraphNode>, usize) -> bool,
    ) -> Result<Vec<TraversalPath>> {
        let Some(start_node) = self.get_node(start)? else {
            return Ok(Vec::new());
        };

        let mut visited: std::collections::HashSet<String> =
            std::collections::HashSet::new();
        visited.insert(start_node.id.clone());
        let mut out = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(TraversalPath {
            vertices: vec![Some(start_node)],
            edges: Vec::new(),
        });

        while let Some(path) = queue.pop_front() {
            let depth = path.edges.len();
            let tail = match path.vertices.last() {
                Some(Some(node)) => node.id.clone(),
                // Dangling tail: record the path but do not extend it.
                _ => {
                    out.push(path);
                    continue;
                }
            };
            out.push(path.clone());
            if depth >= max_depth {
                continue;
            }
            let steps = match direction {
                Direction::Outbound => self.edges_from(&tail)?,
                Direction::Inbound => self.edges_to(&tail)?,
            };
            for edge in steps {
                let next_id = match direction {
                    Direction::Outbound => edge.to.clone(),
                    Direction::Inbound => edge.from.clone(),
                };
                let next = self.get_node(&next_id)?;
                if !filter(&edge, next.as_ref(), depth) {
                    continue;
                }
                if unique_vertices && !visited.insert(next_id) {
                    continue;
                }
                let mut extended = path.clone();
                extended.edges.push(edge);
                extended.vertices.push(next);
                queue.push_back(extended);
            }
        }

        Ok(out)
    }
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphNode> {
    Ok(GraphNode {
        id: row.get(0)?,
        resource_id: row.get(1)?,
        path: row.get(2)?,
        is_resource: row.get::<_, i64>(3)? != 0,
    })
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<EdgeRecord> {
    Ok(EdgeRecord {
        from: row.get(0)?,
        to: row.get(1)?,
        name: row.get(2)?,
        versioned: row.get::<_, i64>(3)? != 0,
    })
}

fn none_on_missing<T>(e: rusqlite::Error) -> rusqlite::Result<Option<T>> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}
