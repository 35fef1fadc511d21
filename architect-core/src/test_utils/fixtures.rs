//! Test fixtures for creating common test objects
//!
//! Factory functions for the identifiers, snapshots, and sessions used
//! across the sync tests.

use std::sync::Arc;

use crate::core_mesh::verification::{MemoryDirectory, WorkspaceDirectory};
use crate::core_proto::types::{ObjectId, ObjectSnapshot, PeerId, UserId, WorkspaceId};
use crate::core_sync::session::{SessionContext, SessionOrigin};

/// The workspace id shared by most tests
pub fn test_workspace() -> WorkspaceId {
    WorkspaceId::new("ws-test")
}

/// A peer id in the test workspace
pub fn test_peer(user: &str) -> PeerId {
    PeerId::compose(&test_workspace(), &UserId::new(user))
}

/// A snapshot with a fixed object id, for deterministic assertions
pub fn test_snapshot(object: &str) -> ObjectSnapshot {
    let mut snapshot = ObjectSnapshot::new("Box", "BoxBufferGeometry").at([0.0, 100.0, 0.0]);
    snapshot.object_id = ObjectId::new(object);
    snapshot
}

/// A snapshot at a specific version
pub fn test_snapshot_at(object: &str, version: u64) -> ObjectSnapshot {
    let mut snapshot = test_snapshot(object);
    snapshot.version = version;
    snapshot
}

/// A session context for a user in the test workspace
pub fn test_session(user: &str, origin: SessionOrigin) -> SessionContext {
    SessionContext::new(
        test_workspace(),
        UserId::new(user),
        test_peer(user),
        origin,
    )
}

/// A directory with the test workspace pre-created and the given users
/// registered as members
pub async fn test_directory(users: &[&str]) -> Arc<MemoryDirectory> {
    let directory = Arc::new(MemoryDirectory::new());
    directory.create_workspace(test_workspace()).await;
    for user in users {
        directory
            .issue_peer_id(&test_workspace(), &UserId::new(*user))
            .await
            .expect("test workspace exists");
    }
    directory
}
