// src/lib.rs
//! trellis-core: a shared resource graph engine.
//!
//! Every stored document ("resource") can embed typed links to other
//! resources; the collection forms one per-user tree/graph addressable by
//! slash paths. This crate is the engine behind that: path resolution with
//! inherited permissions (`graph::PathResolver`), link discovery and
//! idempotent graph materialization on every write (`graph::GraphWriter`),
//! graph pruning on delete (`graph::GraphPruner`), and a per-resource
//! serialized, revisioned write coordinator (`write::WriteCoordinator`)
//! backed by an append-only change feed.

pub mod config;
pub mod graph;
pub mod store;
pub mod utils;
pub mod write;

// Public API
pub use config::StoreConfig;
pub use graph::{GraphLookup, GraphPruner, GraphWriter, PathResolver, Permissions};
pub use store::{BodyStore, ChangeLog, GraphDb, UserDirectory};
pub use write::{
    CoordinatorOptions, WriteCode, WriteCoordinator, WriteRequest, WriteResponse,
};
