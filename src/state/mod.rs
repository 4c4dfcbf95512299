//! Persistence of project state.
//!
//! Snapshots hold everything needed to rebuild a project: the project
//! itself, its requirements, tasks with their statuses, the level plan and
//! validation records.

mod store;

pub use store::{JsonFileStore, MemoryStore, ProjectSnapshot, ProjectStore, SNAPSHOT_VERSION};
