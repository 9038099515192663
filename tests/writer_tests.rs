use std::sync::Arc;

use serde_json::json;
use trellis_core::graph::GraphWriter;
use trellis_core::store::GraphDb;

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<GraphDb>,
    writer: GraphWriter,
}

fn setup() -> anyhow::Result<Fixture> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(GraphDb::open(&dir.path().join("graph.db"))?);
    let writer = GraphWriter::new(Arc::clone(&store));
    Ok(Fixture {
        _dir: dir,
        store,
        writer,
    })
}

#[test]
fn put_resource_returns_previous_revision() -> anyhow::Result<()> {
    let fx = setup()?;
    let first = fx
        .writer
        .put_resource("resources/A", &json!({ "_rev": 1, "v": 1 }), true)?;
    assert_eq!(first, None);
    let second = fx
        .writer
        .put_resource("resources/A", &json!({ "_rev": 2, "v": 2 }), true)?;
    assert_eq!(second, Some(1));
    Ok(())
}

#[test]
fn repeated_writes_materialize_no_duplicates() -> anyhow::Result<()> {
    let fx = setup()?;
    let doc = json!({
        "_rev": 1,
        "x": { "y": { "_id": "resources/B" } },
        "direct": { "_id": "resources/C" },
    });
    fx.writer.put_resource("resources/A", &doc, true)?;
    let nodes_once = fx.store.nodes_by_resource("resources/A")?;
    let root_edges_once = fx.store.edges_from("resources:A")?;

    fx.writer.put_resource("resources/A", &doc, true)?;
    let nodes_twice = fx.store.nodes_by_resource("resources/A")?;
    let root_edges_twice = fx.store.edges_from("resources:A")?;

    assert_eq!(nodes_once, nodes_twice);
    assert_eq!(root_edges_once, root_edges_twice);
    // Root + one structural node for /x; link-target roots belong to B/C.
    assert_eq!(nodes_once.len(), 2);
    Ok(())
}

#[test]
fn node_chain_shape_and_is_resource_positions() -> anyhow::Result<()> {
    let fx = setup()?;
    fx.writer.put_resource(
        "resources/A",
        &json!({ "_rev": 1, "x": { "y": { "_id": "resources/B" } } }),
        true,
    )?;

    let root = fx.store.get_node("resources:A")?.expect("root node");
    assert!(root.is_resource);
    assert_eq!(root.path, None);

    let mid = fx.store.get_node("resources:A:x")?.expect("structural node");
    assert!(!mid.is_resource);
    assert_eq!(mid.path.as_deref(), Some("/x"));
    assert_eq!(mid.resource_id, "resources/A");

    let hops = fx.store.edges_from("resources:A")?;
    assert_eq!(hops.len(), 1);
    assert_eq!(hops[0].name, "x");
    assert_eq!(hops[0].to, "resources:A:x");
    let tail = fx.store.edges_from("resources:A:x")?;
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].name, "y");
    assert_eq!(tail[0].to, "resources:B");

    // The target root is created by B's own write, not by A's link.
    assert!(fx.store.get_node("resources:B")?.is_none());
    fx.writer
        .put_resource("resources/B", &json!({ "_rev": 1 }), true)?;
    assert!(fx.store.get_node("resources:B")?.is_some());
    Ok(())
}

#[test]
fn pinned_link_revs_resolve_to_current_target_rev() -> anyhow::Result<()> {
    let fx = setup()?;
    fx.writer
        .put_resource("resources/B", &json!({ "_rev": 4 }), true)?;

    // Whatever rev the link carried, the write pins it to B's current rev.
    fx.writer.put_resource(
        "resources/A",
        &json!({
            "_rev": 1,
            "b": { "_id": "resources/B", "_rev": 1 },
            "ghost": { "_id": "resources/missing", "_rev": 9 },
        }),
        true,
    )?;

    let stored = fx.store.get_resource("resources/A")?.expect("doc");
    assert_eq!(stored.pointer("/b/_rev").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(
        stored.pointer("/ghost/_rev").and_then(|v| v.as_i64()),
        Some(0)
    );

    let edges = fx.store.edges_from("resources:A")?;
    assert!(edges.iter().all(|e| e.versioned));

    // An unpinned link stays unversioned.
    fx.writer.put_resource(
        "resources/C",
        &json!({ "_rev": 1, "b": { "_id": "resources/B" } }),
        true,
    )?;
    let edges = fx.store.edges_from("resources:C")?;
    assert_eq!(edges.len(), 1);
    assert!(!edges[0].versioned);
    Ok(())
}

#[test]
fn check_links_off_touches_only_doc_and_root() -> anyhow::Result<()> {
    let fx = setup()?;
    fx.writer.put_resource(
        "resources/A",
        &json!({ "_rev": 1, "b": { "_id": "resources/B" } }),
        false,
    )?;
    let nodes = fx.store.nodes_by_resource("resources/A")?;
    assert_eq!(nodes.len(), 1);
    assert!(fx.store.edges_from("resources:A")?.is_empty());
    Ok(())
}

#[test]
fn owner_rev_projection_and_partial_reads() -> anyhow::Result<()> {
    let fx = setup()?;
    fx.writer.put_resource(
        "resources/A",
        &json!({ "_rev": 2, "_meta": { "_owner": "users/u1" }, "a": { "b": 5 } }),
        true,
    )?;

    let proj = fx
        .store
        .get_owner_id_rev("resources/A")?
        .expect("projection");
    assert_eq!(proj.id, "resources/A");
    assert_eq!(proj.rev, 2);
    assert_eq!(proj.owner.as_deref(), Some("users/u1"));
    assert!(fx.store.get_owner_id_rev("resources/ghost")?.is_none());

    assert_eq!(fx.store.get_partial("resources/A", "/a/b")?, Some(json!(5)));
    // Absence anywhere along the pointer is None, never a fault.
    assert_eq!(fx.store.get_partial("resources/A", "/a/missing/deeper")?, None);
    assert_eq!(fx.store.get_partial("resources/ghost", "/a")?, None);
    Ok(())
}

#[test]
fn get_parents_lists_versioned_inbound_links() -> anyhow::Result<()> {
    let fx = setup()?;
    fx.writer
        .put_resource("resources/B", &json!({ "_rev": 2 }), true)?;
    fx.writer.put_resource(
        "resources/A",
        &json!({
            "_rev": 1,
            "_type": "application/vnd.trellis.index+json",
            "pinned": { "_id": "resources/B", "_rev": 1 },
        }),
        true,
    )?;
    fx.writer.put_resource(
        "resources/C",
        &json!({ "_rev": 1, "loose": { "_id": "resources/B" } }),
        true,
    )?;

    let parents = fx.writer.get_parents("resources/B")?;
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].resource_id, "resources/A");
    assert_eq!(parents[0].path, "/pinned");
    assert_eq!(
        parents[0].content_type.as_deref(),
        Some("application/vnd.trellis.index+json")
    );
    Ok(())
}
