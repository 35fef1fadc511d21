/*
  VerificationGate / WorkspaceDirectory

  On an inbound connection, the gate asks the workspace collaborator
  whether the remote peer id is a legitimate member of the current
  workspace before the channel may exchange substantive messages.

  A malicious or stale peer id must not be able to inject edits into a
  workspace it does not belong to; the transport layer has no notion of
  workspace membership, so this check sits above it.

  Verification is asymmetric: the accepting side screens the dialer
  through the gate, while the dialing side obtained the remote id from
  the directory listing and waits for the remote's ConnectionVerified
  message before trusting the channel.
*/

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::errors::{MeshError, MeshResult};
use crate::core_proto::types::{PeerId, UserId, WorkspaceId};

/// Trait for the workspace-lifecycle collaborator
///
/// The authoritative workspace session records live outside the sync core;
/// this is the seam through which the core consults them.
#[async_trait]
pub trait WorkspaceDirectory: Send + Sync {
    /// Issue the peer id for a user joining or creating a workspace
    async fn issue_peer_id(&self, workspace: &WorkspaceId, user: &UserId) -> MeshResult<PeerId>;

    /// Check whether a peer id legitimately belongs to a workspace
    async fn verify_peer_membership(
        &self,
        peer_id: &PeerId,
        workspace: &WorkspaceId,
    ) -> MeshResult<bool>;

    /// List the peer ids currently in a workspace (used once, at join time)
    async fn list_current_peer_ids(&self, workspace: &WorkspaceId) -> MeshResult<Vec<PeerId>>;
}

/// Type alias for a shared directory collaborator
pub type DirectoryService = Arc<dyn WorkspaceDirectory>;

/// Outcome of screening an inbound peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Peer belongs to the workspace; the channel may carry edits
    Admitted,
    /// Peer is not a member; close the channel and purge its state
    Rejected,
}

/// Membership screen applied to every inbound connection
pub struct VerificationGate {
    directory: DirectoryService,
    workspace: WorkspaceId,
    timeout: Duration,
}

impl VerificationGate {
    pub fn new(directory: DirectoryService, workspace: WorkspaceId, timeout: Duration) -> Self {
        VerificationGate {
            directory,
            workspace,
            timeout,
        }
    }

    /// Screen a remote peer id against the workspace membership record
    ///
    /// A directory that cannot answer in time fails closed: the peer is
    /// not admitted.
    pub async fn screen(&self, remote: &PeerId) -> MeshResult<Verdict> {
        let check = self
            .directory
            .verify_peer_membership(remote, &self.workspace);

        let verdict = match tokio::time::timeout(self.timeout, check).await {
            Ok(Ok(true)) => Verdict::Admitted,
            Ok(Ok(false)) => Verdict::Rejected,
            Ok(Err(e)) => {
                warn!(peer_id = %remote, error = %e, "membership check failed");
                return Err(e);
            }
            Err(_) => {
                warn!(peer_id = %remote, "membership check timed out");
                return Err(MeshError::VerificationTimeout(remote.clone()));
            }
        };

        match verdict {
            Verdict::Admitted => info!(peer_id = %remote, "peer admitted to workspace"),
            Verdict::Rejected => warn!(peer_id = %remote, "peer rejected: not a workspace member"),
        }
        Ok(verdict)
    }
}

/// In-memory directory for tests and in-process demo meshes
#[derive(Default)]
pub struct MemoryDirectory {
    members: RwLock<HashMap<WorkspaceId, Vec<PeerId>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a workspace with no members yet
    pub async fn create_workspace(&self, workspace: WorkspaceId) {
        self.members.write().await.entry(workspace).or_default();
    }

    /// Drop a peer from its workspace record
    pub async fn remove_peer(&self, workspace: &WorkspaceId, peer_id: &PeerId) {
        if let Some(peers) = self.members.write().await.get_mut(workspace) {
            peers.retain(|p| p != peer_id);
        }
    }
}

#[async_trait]
impl WorkspaceDirectory for MemoryDirectory {
    async fn issue_peer_id(&self, workspace: &WorkspaceId, user: &UserId) -> MeshResult<PeerId> {
        let mut members = self.members.write().await;
        let peers = members
            .get_mut(workspace)
            .ok_or_else(|| MeshError::UnknownWorkspace(workspace.clone()))?;

        let peer_id = PeerId::compose(workspace, user);
        if !peers.contains(&peer_id) {
            peers.push(peer_id.clone());
        }
        Ok(peer_id)
    }

    async fn verify_peer_membership(
        &self,
        peer_id: &PeerId,
        workspace: &WorkspaceId,
    ) -> MeshResult<bool> {
        let members = self.members.read().await;
        Ok(members
            .get(workspace)
            .map(|peers| peers.contains(peer_id))
            .unwrap_or(false))
    }

    async fn list_current_peer_ids(&self, workspace: &WorkspaceId) -> MeshResult<Vec<PeerId>> {
        let members = self.members.read().await;
        members
            .get(workspace)
            .cloned()
            .ok_or_else(|| MeshError::UnknownWorkspace(workspace.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn directory_with_member() -> (Arc<MemoryDirectory>, WorkspaceId, PeerId) {
        let directory = Arc::new(MemoryDirectory::new());
        let workspace = WorkspaceId::new("ws1");
        directory.create_workspace(workspace.clone()).await;
        let peer = directory
            .issue_peer_id(&workspace, &UserId::new("alice"))
            .await
            .unwrap();
        (directory, workspace, peer)
    }

    #[tokio::test]
    async fn test_issue_peer_id_composes_and_records() {
        let (directory, workspace, peer) = directory_with_member().await;

        assert_eq!(peer.0, "ws1-alice");
        let listed = directory.list_current_peer_ids(&workspace).await.unwrap();
        assert_eq!(listed, vec![peer]);
    }

    #[tokio::test]
    async fn test_gate_admits_member() {
        let (directory, workspace, peer) = directory_with_member().await;
        let gate = VerificationGate::new(directory, workspace, Duration::from_secs(1));

        assert_eq!(gate.screen(&peer).await.unwrap(), Verdict::Admitted);
    }

    #[tokio::test]
    async fn test_gate_rejects_stranger() {
        let (directory, workspace, _peer) = directory_with_member().await;
        let gate = VerificationGate::new(directory, workspace, Duration::from_secs(1));

        let stranger = PeerId::new("ws1-mallory");
        assert_eq!(gate.screen(&stranger).await.unwrap(), Verdict::Rejected);
    }

    #[tokio::test]
    async fn test_gate_rejects_member_of_other_workspace() {
        let directory = Arc::new(MemoryDirectory::new());
        let ws1 = WorkspaceId::new("ws1");
        let ws2 = WorkspaceId::new("ws2");
        directory.create_workspace(ws1.clone()).await;
        directory.create_workspace(ws2.clone()).await;
        let outsider = directory
            .issue_peer_id(&ws2, &UserId::new("bob"))
            .await
            .unwrap();

        let gate = VerificationGate::new(directory, ws1, Duration::from_secs(1));
        assert_eq!(gate.screen(&outsider).await.unwrap(), Verdict::Rejected);
    }

    #[tokio::test]
    async fn test_issue_for_unknown_workspace_errors() {
        let directory = MemoryDirectory::new();
        let err = directory
            .issue_peer_id(&WorkspaceId::new("nope"), &UserId::new("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::UnknownWorkspace(_)));
    }

    #[tokio::test]
    async fn test_remove_peer_revokes_membership() {
        let (directory, workspace, peer) = directory_with_member().await;
        directory.remove_peer(&workspace, &peer).await;

        assert!(!directory
            .verify_peer_membership(&peer, &workspace)
            .await
            .unwrap());
    }
}
