// src/graph/links.rs
//! Link discovery: find every embedded reference in a resource body.
//!
//! Detection rule: a JSON object value carrying an `_id` key is a link leaf,
//! unless it sits anywhere under the reserved `_meta` subtree. Links are
//! leaves — discovery never descends into a link's own body. The walk is a
//! pure function over the document; no visitor state leaks out.

use anyhow::Result;
use serde_json::Value;

use crate::store::GraphDb;

/// An embedded reference found inside a resource body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Key sequence from the document root to the link object.
    pub path: Vec<String>,
    /// Target resource id (`resources/<key>`).
    pub id: String,
    /// Pinned revision, if the link carried `_rev`.
    pub rev: Option<i64>,
}

/// Walk `doc` depth-first and return every link, in discovery order.
/// Deterministic for a given document.
pub fn scan_links(doc: &Value) -> Vec<Link> {
    let mut out = Vec::new();
    // Explicit stack; children pushed in reverse so pop order matches
    // document order.
    let mut stack: Vec<(Vec<String>, &Value)> = Vec::new();
    push_children(&mut stack, &[], doc);

    while let Some((path, value)) = stack.pop() {
        if let Value::Object(map) = value {
            if let Some(id) = map.get("_id").and_then(Value::as_str) {
                out.push(Link {
                    path,
                    id: id.to_string(),
                    rev: map.get("_rev").and_then(Value::as_i64),
                });
                continue; // links are leaves
            }
        }
        push_children(&mut stack, &path, value);
    }

    out
}

fn push_children<'a>(stack: &mut Vec<(Vec<String>, &'a Value)>, path: &[String], value: &'a Value) {
    match value {
        Value::Object(map) => {
            for (k, v) in map.iter().rev() {
                if k == "_meta" {
                    continue; // reserved subtree, never scanned
                }
                let mut p = path.to_vec();
                p.push(k.clone());
                stack.push((p, v));
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate().rev() {
                let mut p = path.to_vec();
                p.push(i.to_string());
                stack.push((p, v));
            }
        }
        _ => {}
    }
}

/// Pin every versioned link to its target's *current* revision (0 when the
/// target does not exist yet). This is what fixes an edge's `versioned`
/// value at write time.
pub fn resolve_link_revs(store: &GraphDb, links: &mut [Link]) -> Result<()> {
    for link in links.iter_mut() {
        if link.rev.is_some() {
            link.rev = Some(store.get_rev(&link.id)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_links_and_skips_meta() {
        let doc = json!({
            "_id": "resources/abc",
            "_meta": {
                "_id": "resources/abc/_meta",
                "_changes": { "_id": "resources/abc/_meta/_changes", "_rev": 3 }
            },
            "plain": { "nested": { "_id": "resources/deep", "_rev": 7 } },
            "direct": { "_id": "resources/top" }
        });
        let links = scan_links(&doc);
        assert_eq!(links.len(), 2);
        assert!(links.contains(&Link {
            path: vec!["plain".into(), "nested".into()],
            id: "resources/deep".into(),
            rev: Some(7),
        }));
        assert!(links.contains(&Link {
            path: vec!["direct".into()],
            id: "resources/top".into(),
            rev: None,
        }));
    }

    #[test]
    fn does_not_descend_into_link_bodies() {
        let doc = json!({
            "a": { "_id": "resources/x", "inner": { "_id": "resources/hidden" } }
        });
        let links = scan_links(&doc);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].id, "resources/x");
    }

    #[test]
    fn walks_arrays_with_index_segments() {
        let doc = json!({ "list": [ { "_id": "resources/a" }, 5, { "_id": "resources/b" } ] });
        let links = scan_links(&doc);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].path, vec!["list".to_string(), "0".to_string()]);
        assert_eq!(links[1].path, vec!["list".to_string(), "2".to_string()]);
    }

    #[test]
    fn discovery_is_deterministic() {
        let doc = json!({ "b": { "_id": "resources/b" }, "a": { "_id": "resources/a" } });
        assert_eq!(scan_links(&doc), scan_links(&doc));
    }
}
