// src/graph/writer.rs
//! GraphWriter: upsert a resource document and materialize the structural
//! graph implied by its links.
//!
//! - Node ids are derived by joining the owning resource key with the path
//!   prefix, so re-running a write with identical structure upserts in place
//!   (idempotent materialization).
//! - The link target's root node is NOT created here; it appears when the
//!   target resource is itself written. Until then the final edge dangles
//!   and the resolver reports it as not-found.
//! - Links that disappear from a later revision are not pruned on this path;
//!   only an explicit partial delete prunes (append-only graph).

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

use crate::graph::links::{resolve_link_revs, scan_links};
use crate::graph::merge::pointer_set;
use crate::graph::{node_key, resource_key};
use crate::store::{Direction, EdgeRecord, GraphDb, GraphNode};

/// Inbound versioned-edge parent of a resource root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub resource_id: String,
    pub path: String,
    pub content_type: Option<String>,
}

pub struct GraphWriter {
    store: Arc<GraphDb>,
}

impl GraphWriter {
    pub fn new(store: Arc<GraphDb>) -> Self {
        Self { store }
    }

    /// Upsert `doc` under `id` and materialize its link graph.
    ///
    /// Returns the document's previous revision (None on first write).
    /// With `check_links` off only the document and its root node are
    /// touched.
    pub fn put_resource(&self, id: &str, doc: &Value, check_links: bool) -> Result<Option<i64>> {
        let key = resource_key(id);
        let mut doc = doc.clone();

        let links = if check_links {
            let mut links = scan_links(&doc);
            resolve_link_revs(&self.store, &mut links)?;
            // Pinned revs were resolved against current targets; write them
            // back into the persisted body so the document and the graph
            // agree.
            for link in &links {
                if let Some(rev) = link.rev {
                    let mut path = link.path.clone();
                    path.push("_rev".to_string());
                    pointer_set(&mut doc, &path, Value::from(rev));
                }
            }
            links
        } else {
            Vec::new()
        };

        tracing::debug!(id, links = links.len(), "upserting resource");
        let upsert = self.store.upsert_resource(id, &doc)?;
        let orev = upsert
            .old
            .as_ref()
            .and_then(|old| old.get("_rev"))
            .and_then(Value::as_i64);

        // Exactly one root node per resource.
        self.store.upsert_node_keep(&GraphNode {
            id: node_key(key, &[]),
            resource_id: id.to_string(),
            path: None,
            is_resource: true,
        })?;

        for link in &links {
            self.materialize_link(id, key, &link.path, &link.id, link.rev.is_some())?;
        }

        Ok(orev)
    }

    /// Upsert the node chain and edges from this resource's root through
    /// every prefix of `path` to the link target's root.
    fn materialize_link(
        &self,
        id: &str,
        key: &str,
        path: &[String],
        target_id: &str,
        pinned: bool,
    ) -> Result<()> {
        let target_key = resource_key(target_id);
        let len = path.len();

        // ids[0..len] are this resource's nodes; ids[len] is the target root.
        let mut node_ids: Vec<String> = (0..len).map(|i| node_key(key, &path[..i])).collect();
        node_ids.push(node_key(target_key, &[]));

        for (i, node_id) in node_ids[..len].iter().enumerate() {
            let structural_path = if i == 0 {
                None
            } else {
                Some(format!("/{}", path[..i].join("/")))
            };
            self.store.upsert_node_keep(&GraphNode {
                id: node_id.clone(),
                resource_id: id.to_string(),
                path: structural_path,
                is_resource: i == 0,
            })?;
        }

        for i in 0..len {
            // Only the final hop lands on a resource root, so only it can be
            // versioned.
            let versioned = i + 1 == len && pinned;
            self.store.upsert_edge(&EdgeRecord {
                from: node_ids[i].clone(),
                to: node_ids[i + 1].clone(),
                name: path[i].clone(),
                versioned,
            })?;
        }

        Ok(())
    }

    /// Resources holding a versioned link directly to the root of `id`, with the
    /// path of that link inside each parent.
    pub fn get_parents(&self, id: &str) -> Result<Vec<ParentRef>> {
        let root = node_key(resource_key(id), &[]);
        let paths = self.store.traverse(
            &root,
            Direction::Inbound,
            1,
            false,
            &|edge, _vertex, _depth| edge.versioned,
        )?;

        let mut out = Vec::new();
        for p in paths {
            let (Some(edge), Some(Some(vertex))) = (p.edges.last(), p.vertices.last()) else {
                continue;
            };
            let content_type = self
                .store
                .get_partial(&vertex.resource_id, "/_type")?
                .and_then(|v| v.as_str().map(str::to_string));
            out.push(ParentRef {
                resource_id: vertex.resource_id.clone(),
                path: format!("{}/{}", vertex.path.as_deref().unwrap_or(""), edge.name),
                content_type,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node_key;

    #[test]
    fn node_key_derivation_is_deterministic() {
        assert_eq!(node_key("bk1", &[]), "resources:bk1");
        let segs = vec!["rocks-index".to_string(), "90j2klfdjss".to_string()];
        assert_eq!(node_key("bk1", &segs[..1]), "resources:bk1:rocks-index");
        assert_eq!(
            node_key("bk1", &segs),
            "resources:bk1:rocks-index:90j2klfdjss"
        );
    }
}
