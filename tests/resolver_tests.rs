use std::sync::Arc;

use serde_json::json;
use trellis_core::graph::{GraphWriter, LookupError, PathResolver};
use trellis_core::store::{GraphDb, User, UserDirectory};

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<GraphDb>,
    users: Arc<UserDirectory>,
    writer: GraphWriter,
}

fn setup() -> anyhow::Result<Fixture> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(GraphDb::open(&dir.path().join("graph.db"))?);
    let users = Arc::new(UserDirectory::open(&dir.path().join("users.db"))?);
    users.put_user(&User {
        id: "users/u1".into(),
        bookmarks_id: "resources/bk1".into(),
        shares_id: "resources/sh1".into(),
    })?;
    users.put_user(&User {
        id: "users/u2".into(),
        bookmarks_id: "resources/bk2".into(),
        shares_id: "resources/sh2".into(),
    })?;
    let writer = GraphWriter::new(Arc::clone(&store));
    Ok(Fixture {
        _dir: dir,
        store,
        users,
        writer,
    })
}

fn resolver(fx: &Fixture) -> PathResolver {
    PathResolver::new(Arc::clone(&fx.store), Arc::clone(&fx.users))
}

#[test]
fn unknown_user_is_a_hard_failure() -> anyhow::Result<()> {
    let fx = setup()?;
    let result = resolver(&fx).lookup("/bookmarks/a", "users/nobody");
    assert!(matches!(result, Err(LookupError::UnknownUser(_))));
    Ok(())
}

#[test]
fn missing_start_resource_keeps_full_leftover() -> anyhow::Result<()> {
    let fx = setup()?;
    let found = resolver(&fx).lookup("/bookmarks/a/b", "users/u1")?;
    assert!(!found.resource_exists);
    assert_eq!(found.resource_id, "resources/bk1");
    assert_eq!(found.path_leftover, "/a/b");
    assert_eq!(found.rev, 0);
    assert_eq!(found.permissions.read, None);
    assert_eq!(found.permissions.write, None);
    Ok(())
}

#[test]
fn end_to_end_bookmarks_resolution() -> anyhow::Result<()> {
    let fx = setup()?;
    fx.writer.put_resource(
        "resources/bk1",
        &json!({
            "_rev": 1,
            "_meta": { "_owner": "users/u1" },
            "rocks-index": { "90j2klfdjss": { "_id": "resources/rock123" } },
        }),
        true,
    )?;
    fx.writer.put_resource(
        "resources/rock123",
        &json!({ "_rev": 3, "_meta": { "_owner": "users/u1" }, "name": "basalt" }),
        true,
    )?;

    let found = resolver(&fx).lookup("/bookmarks/rocks-index/90j2klfdjss", "users/u1")?;
    assert!(found.resource_exists);
    assert_eq!(found.resource_id, "resources/rock123");
    assert_eq!(found.path_leftover, "");
    assert_eq!(found.rev, 3);
    assert_eq!(found.permissions.owner, Some(true));

    // Parent hop points back at the edge inside bk1.
    let from = found.from.expect("walked at least one edge");
    assert_eq!(from.resource_id, "resources/bk1");
    assert_eq!(from.path_leftover, "/rocks-index/90j2klfdjss");
    Ok(())
}

#[test]
fn dangling_link_resolves_not_found() -> anyhow::Result<()> {
    let fx = setup()?;
    fx.writer.put_resource(
        "resources/bk1",
        &json!({
            "_rev": 1,
            "_meta": { "_owner": "users/u1" },
            "x": { "_id": "resources/doesnotexist" },
        }),
        true,
    )?;

    let found = resolver(&fx).lookup("/bookmarks/x/y", "users/u1")?;
    assert!(!found.resource_exists);
    assert_eq!(found.resource_id, "resources/doesnotexist");
    assert_eq!(found.path_leftover, "");
    assert_eq!(found.rev, 0);
    Ok(())
}

#[test]
fn leftover_restarts_at_nearest_resource_boundary() -> anyhow::Result<()> {
    let fx = setup()?;
    // A holds a link two structural levels down; B exists.
    fx.writer.put_resource(
        "resources/A",
        &json!({
            "_rev": 1,
            "_meta": { "_owner": "users/u1" },
            "x": { "y": { "_id": "resources/B" } },
        }),
        true,
    )?;
    fx.writer.put_resource(
        "resources/B",
        &json!({ "_rev": 1, "_meta": { "_owner": "users/u1" } }),
        true,
    )?;

    // Segments beyond the deepest edge slice from the last resource root (B).
    let found = resolver(&fx).lookup("/resources/A/x/y/deep/er", "users/u1")?;
    assert!(found.resource_exists);
    assert_eq!(found.resource_id, "resources/B");
    assert_eq!(found.path_leftover, "/deep/er");

    // Stopping on a structural node yields its stored sub-path.
    let partial = resolver(&fx).lookup("/resources/A/x", "users/u1")?;
    assert_eq!(partial.resource_id, "resources/A");
    assert_eq!(partial.path_leftover, "/x");
    Ok(())
}

#[test]
fn permissions_inherit_nearest_ancestor_wins() -> anyhow::Result<()> {
    let fx = setup()?;
    // A (owned by u1, no grant) -> B (grants u2 read) -> C (nothing).
    fx.writer.put_resource(
        "resources/A",
        &json!({
            "_rev": 1,
            "_meta": { "_owner": "users/u1" },
            "b": { "_id": "resources/B" },
        }),
        true,
    )?;
    fx.writer.put_resource(
        "resources/B",
        &json!({
            "_rev": 1,
            "_meta": {
                "_owner": "users/u1",
                "_permissions": { "users/u2": { "read": true } },
            },
            "c": { "_id": "resources/C" },
        }),
        true,
    )?;
    fx.writer.put_resource(
        "resources/C",
        &json!({ "_rev": 1, "_meta": { "_owner": "users/u1" } }),
        true,
    )?;

    let found = resolver(&fx).lookup("/resources/A/b/c", "users/u2")?;
    assert!(found.resource_exists);
    assert_eq!(found.resource_id, "resources/C");
    assert_eq!(found.permissions.read, Some(true));
    assert_eq!(found.permissions.write, None);
    assert_eq!(found.permissions.owner, None);

    // The owner sees full permissions from the root grant.
    let as_owner = resolver(&fx).lookup("/resources/A/b/c", "users/u1")?;
    assert_eq!(as_owner.permissions.owner, Some(true));
    assert_eq!(as_owner.permissions.read, Some(true));
    assert_eq!(as_owner.permissions.write, Some(true));
    Ok(())
}

#[test]
fn resolution_is_deterministic() -> anyhow::Result<()> {
    let fx = setup()?;
    fx.writer.put_resource(
        "resources/bk1",
        &json!({
            "_rev": 1,
            "_meta": { "_owner": "users/u1" },
            "a": { "_id": "resources/T" },
        }),
        true,
    )?;
    fx.writer.put_resource(
        "resources/T",
        &json!({ "_rev": 2, "_meta": { "_owner": "users/u1" } }),
        true,
    )?;

    let r = resolver(&fx);
    let first = r.lookup("/bookmarks/a", "users/u1")?;
    let second = r.lookup("/bookmarks/a", "users/u1")?;
    assert_eq!(first.resource_id, second.resource_id);
    assert_eq!(first.path_leftover, second.path_leftover);
    assert_eq!(first.permissions, second.permissions);
    Ok(())
}
