// src/store/mod.rs

pub mod bodies;      // staged PUT bodies (CID <-> JSON body)
pub mod changes;     // append-only change feed
pub mod graph_store; // documents + structural graph, the ONLY graph writer
pub mod users;       // user profiles (bookmarks/shares roots)

// Public API
pub use bodies::BodyStore;
pub use changes::{ChangeKind, ChangeLog, ChangeRecord};
pub use graph_store::{Direction, EdgeRecord, GraphDb, GraphNode, MAX_DEPTH};
pub use users::{User, UserDirectory};
