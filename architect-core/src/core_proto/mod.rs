//! Wire protocol layer - message types and codec
//!
//! Defines the identifiers and object snapshots shared by every peer in a
//! workspace, plus the tagged message union exchanged over data channels.

pub mod message;
pub mod types;

// Re-exports
pub use message::{decode, encode, DecodeError, SyncMessage};
pub use types::{ObjectId, ObjectSnapshot, PeerId, PinRecord, UserId, WorkspaceId};
