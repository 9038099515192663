// src/graph/mod.rs

pub mod links;    // pure link discovery + pinned-rev resolution
pub mod merge;    // JSON pointer + deep merge helpers
pub mod pruner;   // whole/partial resource deletion
pub mod resolver; // path -> (resource, leftover, permissions)
pub mod writer;   // resource upsert + graph materialization

// Public API
pub use links::{Link, scan_links};
pub use pruner::GraphPruner;
pub use resolver::{FromRef, GraphLookup, LookupError, PathResolver, Permissions};
pub use writer::{GraphWriter, ParentRef};

/// Strip the collection prefix from a resource id:
/// `resources/abc` (or `/resources/abc`) -> `abc`.
pub fn resource_key(id: &str) -> &str {
    let id = id.trim_start_matches('/');
    id.strip_prefix("resources/").unwrap_or(id)
}

/// Deterministic graph-node id for a resource key and a path prefix:
/// `("bk1", ["a","b"])` -> `resources:bk1:a:b`. Joining (rather than random
/// ids) is what makes repeated writes of the same structure idempotent.
pub fn node_key(resource_key: &str, prefix: &[String]) -> String {
    let mut id = format!("resources:{resource_key}");
    for seg in prefix {
        id.push(':');
        id.push_str(seg);
    }
    id
}

/// Recover a resource id from a root node key:
/// `resources:abc` -> `resources/abc`.
pub fn resource_id_from_node_key(node_key: &str) -> String {
    format!(
        "resources/{}",
        node_key.strip_prefix("resources:").unwrap_or_default()
    )
}
