//! Architect core - peer-mesh synchronization for collaborative 3-D editing
//!
//! Each client holds a local replica of the shared scene; this crate
//! propagates edits across the mesh with enough ordering and
//! mutual-exclusion guarantees that two users cannot corrupt the same
//! object, and bootstraps late joiners to the current shared state.
//!
//! The rendering surface and the workspace-lifecycle service are external
//! collaborators: the first talks to the core through [`SyncHandle`]
//! intents and the [`SceneEvent`] stream, the second through the
//! [`WorkspaceDirectory`] trait.

pub mod config;
pub mod core_mesh;
pub mod core_proto;
pub mod core_sync;
pub mod logging;
pub mod test_utils;

pub use config::{Config, SyncConfig};
pub use core_mesh::{ChannelHandle, MemoryDirectory, TransportEvent, WorkspaceDirectory};
pub use core_proto::{ObjectId, ObjectSnapshot, PeerId, SyncMessage, UserId, WorkspaceId};
pub use core_sync::{
    SceneEvent, SessionContext, SessionOrigin, SyncError, SyncHandle, SyncRouter,
};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
