//! Error types for the sync core

use thiserror::Error;

use crate::core_mesh::errors::MeshError;
use crate::core_proto::message::DecodeError;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync core
///
/// Nothing here is fatal to the process: transport errors resolve through
/// session teardown, protocol errors are logged and dropped, and policy
/// refusals surface to the rendering collaborator as UI-level events.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Mesh/transport failure
    #[error("mesh error: {0}")]
    Mesh(#[from] MeshError),

    /// Malformed or unrecognized wire message
    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),

    /// The router actor is gone
    #[error("sync router closed")]
    RouterClosed,

    /// The scene event stream is gone
    #[error("scene event receiver dropped")]
    SceneClosed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_proto::types::PeerId;

    #[test]
    fn test_mesh_error_converts() {
        let err: SyncError = MeshError::UnknownPeer(PeerId::new("ws1-bob")).into();
        assert!(matches!(err, SyncError::Mesh(_)));
        assert!(err.to_string().contains("ws1-bob"));
    }

    #[test]
    fn test_protocol_error_converts() {
        let err: SyncError = DecodeError::UnknownTag("warp".to_string()).into();
        assert!(err.to_string().contains("warp"));
    }
}
