//! Per-session identity and lifecycle
//!
//! The current workspace, user, and peer identity travel together in an
//! explicit `SessionContext` handed to the router at construction and
//! dropped on leave. There is deliberately no ambient per-process state.

use serde::{Deserialize, Serialize};

use crate::core_mesh::errors::MeshResult;
use crate::core_mesh::verification::DirectoryService;
use crate::core_proto::types::{PeerId, UserId, WorkspaceId};

/// How this peer entered the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOrigin {
    /// This peer created the workspace; the scene starts empty
    Created,
    /// This peer joined an existing workspace and must bootstrap its
    /// replica from an arbiter
    Joined,
}

/// Identity of one peer's participation in a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// The workspace being edited
    pub workspace_id: WorkspaceId,

    /// The user behind this peer
    pub user_id: UserId,

    /// This peer's mesh identity, issued by the workspace directory
    pub peer_id: PeerId,

    /// Whether this peer created or joined the workspace
    pub origin: SessionOrigin,
}

impl SessionContext {
    pub fn new(
        workspace_id: WorkspaceId,
        user_id: UserId,
        peer_id: PeerId,
        origin: SessionOrigin,
    ) -> Self {
        SessionContext {
            workspace_id,
            user_id,
            peer_id,
            origin,
        }
    }

    /// Establish a session by asking the directory for a peer id
    pub async fn establish(
        directory: &DirectoryService,
        workspace_id: WorkspaceId,
        user_id: UserId,
        origin: SessionOrigin,
    ) -> MeshResult<Self> {
        let peer_id = directory.issue_peer_id(&workspace_id, &user_id).await?;
        Ok(SessionContext::new(workspace_id, user_id, peer_id, origin))
    }

    /// Whether this peer must bootstrap its replica after connecting
    pub fn needs_workspace_copy(&self) -> bool {
        self.origin == SessionOrigin::Joined
    }
}
