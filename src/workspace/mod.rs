//! Workspace persistence: object storage plus the archival service that
//! snapshots and restores sandbox workspaces.

mod archive;
mod object_store;

pub use archive::{ArchiveConfig, WorkspaceArchive};
pub use object_store::{LocalObjectStore, ObjectStore};
