// src/graph/resolver.rs
//! Path resolution over the resource graph.
//!
//! - Translates a slash path into the deepest resource it reaches,
//!   the leftover pointer inside it, and the caller's effective
//!   permissions along the chain.
//! - `/bookmarks` and `/shares` are rewritten to the caller's own
//!   entry-point resources before the walk starts.

use std::sync::Arc;

use crate::graph::merge::{compile_pointer, parse_pointer};
use crate::graph::resource_id_from_node_key;
use crate::store::{Direction, GraphDb, UserDirectory};

/// Resolution failure surfaced to callers.
#[derive(Debug)]
pub enum LookupError {
    /// The requesting user is not present in the user directory.
    UnknownUser(String),
    /// The path has fewer than two segments and names no resource.
    MalformedPath(String),
    /// Storage-level failure.
    Internal(anyhow::Error),
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupError::UnknownUser(u) => write!(f, "unknown user: {u}"),
            LookupError::MalformedPath(p) => write!(f, "malformed path: {p}"),
            LookupError::Internal(e) => write!(f, "lookup failed: {e}"),
        }
    }
}
impl std::error::Error for LookupError {}

impl From<anyhow::Error> for LookupError {
    fn from(e: anyhow::Error) -> Self {
        LookupError::Internal(e)
    }
}

/// Per-user effective permissions at the resolved resource.
///
/// `None` means no resource along the chain said anything about the
/// field; each field is aggregated independently, nearest resource to
/// the target wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    pub read: Option<bool>,
    pub write: Option<bool>,
    pub owner: Option<bool>,
}

/// The immediate parent hop of the resolved target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromRef {
    pub resource_id: String,
    pub path_leftover: String,
}

/// Result of resolving a path against the graph.
#[derive(Debug, Clone)]
pub struct GraphLookup {
    /// Deepest resource the walk reached (or the would-be id when the
    /// starting resource does not exist).
    pub resource_id: String,
    /// JSON pointer into that resource for the unwalked remainder.
    pub path_leftover: String,
    /// Current `_rev` of the resource, 0 when it does not exist.
    pub rev: i64,
    /// `_type` of the nearest resource along the chain that carries one.
    pub content_type: Option<String>,
    pub permissions: Permissions,
    pub resource_exists: bool,
    /// Parent hop, when the walk traversed at least one edge.
    pub from: Option<FromRef>,
}

/// Resolves slash paths to graph locations.
pub struct PathResolver {
    store: Arc<GraphDb>,
    users: Arc<UserDirectory>,
}

impl PathResolver {
    pub fn new(store: Arc<GraphDb>, users: Arc<UserDirectory>) -> Self {
        Self { store, users }
    }

    /// Resolve `path` on behalf of `user_id`.
    pub fn lookup(&self, path: &str, user_id: &str) -> Result<GraphLookup, LookupError> {
        let user = self
            .users
            .find_by_id(user_id)
            .map_err(LookupError::Internal)?
            .ok_or_else(|| LookupError::UnknownUser(user_id.to_string()))?;

        // Entry-point rewrite: the public names are per-user aliases.
        let path = rewrite_entry_points(path, &user.bookmarks_id, &user.shares_id);

        let pieces = parse_pointer(&path);
        if pieces.len() < 2 {
            return Err(LookupError::MalformedPath(path));
        }
        let start_resource_id = format!("{}/{}", pieces[0], pieces[1]);
        let start_node_id = format!("{}:{}", pieces[0], pieces[1]);
        let segments = &pieces[2..];

        let Some(_start) = self.store.get_node(&start_node_id)? else {
            // Starting resource absent: everything past the id is leftover.
            return Ok(GraphLookup {
                resource_id: start_resource_id,
                path_leftover: compile_pointer(segments),
                rev: 0,
                content_type: None,
                permissions: Permissions::default(),
                resource_exists: false,
                from: None,
            });
        };

        // Walk edges whose name matches the path segment at their depth.
        // Edge keys are unique per (node, name), so at most one chain of
        // each length exists; the longest one is the resolution.
        let filter = |edge: &crate::store::EdgeRecord,
                      _v: Option<&crate::store::GraphNode>,
                      depth: usize| {
            segments.get(depth).map(String::as_str) == Some(edge.name.as_str())
        };
        let depth = segments.len().min(crate::store::MAX_DEPTH);
        let paths = self
            .store
            .traverse(&start_node_id, Direction::Outbound, depth, false, &filter)?;
        let best = paths
            .into_iter()
            .max_by_key(|p| p.edges.len())
            .ok_or_else(|| LookupError::Internal(anyhow::anyhow!("traversal lost start node")))?;

        let (permissions, content_type) =
            self.aggregate_permissions(&best.vertices, user_id)?;
        let from = best.edges.last().map(|edge| {
            let parent = best.vertices[best.vertices.len() - 2].as_ref();
            FromRef {
                resource_id: parent
                    .map(|v| v.resource_id.clone())
                    .unwrap_or_default(),
                path_leftover: format!(
                    "{}/{}",
                    parent.and_then(|v| v.path.clone()).unwrap_or_default(),
                    edge.name
                ),
            }
        });

        match best.vertices.last().and_then(Option::as_ref) {
            Some(last) => {
                let resource_id = last.resource_id.clone();
                let rev = self.store.get_rev(&resource_id)?;
                let matched = best.edges.len();
                let path_leftover = if matched < segments.len() {
                    // Partial walk: leftover restarts at the nearest
                    // resource boundary on the chain, not at the break.
                    let back = best
                        .vertices
                        .iter()
                        .rev()
                        .position(|v| v.as_ref().is_some_and(|n| n.is_resource))
                        .unwrap_or(best.vertices.len() - 1);
                    let boundary = best.vertices.len() - 1 - back;
                    compile_pointer(&segments[boundary.min(segments.len())..])
                } else {
                    last.path.clone().unwrap_or_default()
                };
                Ok(GraphLookup {
                    resource_id,
                    path_leftover,
                    rev,
                    content_type,
                    permissions,
                    resource_exists: true,
                    from,
                })
            }
            None => {
                // Dangling link: the edge names a resource that was never
                // written. Targets of links are always resource roots, so
                // the missing node key identifies the missing resource.
                let to = &best
                    .edges
                    .last()
                    .ok_or_else(|| {
                        LookupError::Internal(anyhow::anyhow!("dangling path without edges"))
                    })?
                    .to;
                Ok(GraphLookup {
                    resource_id: resource_id_from_node_key(to),
                    path_leftover: String::new(),
                    rev: 0,
                    content_type,
                    permissions,
                    resource_exists: false,
                    from,
                })
            }
        }
    }

    /// Walk the chain nearest-to-target first; for each of read/write/
    /// owner (and `_type`), the first resource that states a value wins.
    fn aggregate_permissions(
        &self,
        vertices: &[Option<crate::store::GraphNode>],
        user_id: &str,
    ) -> Result<(Permissions, Option<String>), anyhow::Error> {
        let mut permissions = Permissions::default();
        let mut content_type = None;

        let mut seen = std::collections::HashSet::new();
        for vertex in vertices.iter().rev() {
            let Some(node) = vertex else { continue };
            if !seen.insert(node.resource_id.clone()) {
                continue;
            }
            let Some(doc) = self.store.get_resource(&node.resource_id)? else {
                continue;
            };
            let meta = &doc["_meta"];
            let is_owner = meta["_owner"].as_str() == Some(user_id);
            let grant = &meta["_permissions"][user_id];

            if content_type.is_none() {
                content_type = doc["_type"].as_str().map(String::from);
            }
            if permissions.owner.is_none() {
                permissions.owner = if is_owner {
                    Some(true)
                } else {
                    grant["owner"].as_bool()
                };
            }
            if permissions.read.is_none() {
                permissions.read = if is_owner {
                    Some(true)
                } else {
                    grant["read"].as_bool()
                };
            }
            if permissions.write.is_none() {
                permissions.write = if is_owner {
                    Some(true)
                } else {
                    grant["write"].as_bool()
                };
            }
        }
        Ok((permissions, content_type))
    }
}

fn rewrite_entry_points(path: &str, bookmarks_id: &str, shares_id: &str) -> String {
    for (alias, target) in [("/bookmarks", bookmarks_id), ("/shares", shares_id)] {
        if path == alias {
            return format!("/{target}");
        }
        if let Some(rest) = path.strip_prefix(alias) {
            if rest.starts_with('/') {
                return format!("/{target}{rest}");
            }
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::rewrite_entry_points;

    #[test]
    fn entry_point_rewrite() {
        assert_eq!(
            rewrite_entry_points("/bookmarks", "resources/bk1", "resources/sh1"),
            "/resources/bk1"
        );
        assert_eq!(
            rewrite_entry_points("/bookmarks/a/b", "resources/bk1", "resources/sh1"),
            "/resources/bk1/a/b"
        );
        assert_eq!(
            rewrite_entry_points("/shares/x", "resources/bk1", "resources/sh1"),
            "/resources/sh1/x"
        );
        // No rewrite for look-alike prefixes.
        assert_eq!(
            rewrite_entry_points("/bookmarksy/a", "resources/bk1", "resources/sh1"),
            "/bookmarksy/a"
        );
    }
}
