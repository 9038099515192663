// src/graph/pruner.rs
//! GraphPruner: whole and partial resource deletion.
//!
//! - `delete_resource` removes the document plus the resource's own nodes and
//!   their outbound edges. Inbound edges from other resources are left in
//!   place; the resolver reports them as not-found on the next traversal.
//! - `delete_partial_resource` prunes one sub-path's structural subgraph and
//!   nulls the corresponding content, never crossing into a different
//!   resource reached via a nested link.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::graph::merge::{
    compile_pointer, merge_keep_null_deletes, parse_pointer, pointer_has, pointer_set,
};
use crate::store::{Direction, GraphDb, MAX_DEPTH};

pub struct GraphPruner {
    store: Arc<GraphDb>,
}

impl GraphPruner {
    pub fn new(store: Arc<GraphDb>) -> Self {
        Self { store }
    }

    /// Remove a resource wholesale. Returns the deleted document's revision,
    /// or None when the resource did not exist (idempotent).
    pub fn delete_resource(&self, id: &str) -> Result<Option<i64>> {
        let old = self.store.delete_resource_doc(id)?;
        let old_rev = old
            .as_ref()
            .and_then(|doc| doc.get("_rev"))
            .and_then(Value::as_i64);

        let nodes = self.store.nodes_by_resource(id)?;
        for node in &nodes {
            self.store.delete_edges_from(&node.id)?;
            self.store.delete_node(&node.id)?;
        }
        tracing::debug!(id, nodes = nodes.len(), "deleted resource");
        Ok(old_rev)
    }

    /// Prune the subtree at `path` (a JSON pointer) out of the resource's
    /// content and structural graph. `patch` rides along with the prune:
    /// it carries the new `_rev` plus any `_meta` updates (modifiedBy,
    /// modified) and is merged with null-deletes-key semantics.
    ///
    /// No-op returning the current revision when `path` is absent from the
    /// document. The graph walk is bounded and stays inside nodes owned by
    /// `id`; an edge crossing into another resource is detached, never
    /// followed.
    pub fn delete_partial_resource(&self, id: &str, path: &str, patch: &Value) -> Result<i64> {
        let Some(mut doc) = self.store.get_resource(id)? else {
            return Ok(0);
        };
        let current = doc.get("_rev").and_then(Value::as_i64).unwrap_or(0);

        let parts = parse_pointer(path);
        if parts.is_empty() || !pointer_has(&doc, &parts) {
            return Ok(current);
        }

        let name = &parts[parts.len() - 1];
        let parent_parts = &parts[..parts.len() - 1];
        let parent_path = if parent_parts.is_empty() {
            None
        } else {
            Some(compile_pointer(parent_parts))
        };

        if let Some(parent) = self
            .store
            .node_by_resource_and_path(id, parent_path.as_deref())?
        {
            // Every node reachable from the parent through the named edge and
            // still owned by this resource is doomed.
            let paths = self.store.traverse(
                &parent.id,
                Direction::Outbound,
                MAX_DEPTH,
                true,
                &|edge, vertex, depth| {
                    if depth == 0 && edge.name != *name {
                        return false;
                    }
                    vertex.is_some_and(|v| v.resource_id == id)
                },
            )?;
            let doomed: HashSet<String> = paths
                .iter()
                .flat_map(|p| p.vertices.iter().skip(1))
                .filter_map(|v| v.as_ref().map(|n| n.id.clone()))
                .collect();
            for node_id in &doomed {
                self.store.delete_edges_touching(node_id)?;
                self.store.delete_node(node_id)?;
            }
            // The parent's own edge goes too; when the segment was a link
            // this is what detaches the external target.
            self.store.delete_edge(&parent.id, name)?;
            tracing::debug!(id, path, pruned = doomed.len(), "pruned subgraph");
        }

        let mut patch = patch.clone();
        pointer_set(&mut patch, &parts, Value::Null);
        merge_keep_null_deletes(&mut doc, &patch);
        let rev = doc.get("_rev").and_then(Value::as_i64).unwrap_or(current);
        pointer_set(
            &mut doc,
            &["_meta".to_string(), "_rev".to_string()],
            Value::from(rev),
        );
        self.store.upsert_resource(id, &doc)?;

        Ok(rev)
    }
}
