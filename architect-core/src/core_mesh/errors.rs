//! Error types for the mesh connection layer

use thiserror::Error;

use crate::core_proto::types::{PeerId, WorkspaceId};

/// Result type for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors that can occur in the mesh connection layer
#[derive(Debug, Error)]
pub enum MeshError {
    /// No registry entry for the peer
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// The data channel to a peer is gone
    #[error("channel to peer {0} is closed")]
    ChannelClosed(PeerId),

    /// The workspace directory could not be reached
    #[error("workspace directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// The directory has no record of the workspace
    #[error("unknown workspace: {0}")]
    UnknownWorkspace(WorkspaceId),

    /// Membership verification did not finish in time
    #[error("verification of peer {0} timed out")]
    VerificationTimeout(PeerId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeshError::UnknownPeer(PeerId::new("ws1-bob"));
        assert_eq!(err.to_string(), "unknown peer: ws1-bob");

        let err = MeshError::ChannelClosed(PeerId::new("ws1-alice"));
        assert!(err.to_string().contains("closed"));
    }
}
