/*
    types.rs - Common identifiers and object state for the sync core

    Defines:
    - IDs for workspaces, users, peers, scene objects
    - ObjectSnapshot, the full replicated state of one scene object
    - PinRecord, the edit-lock claim on one object
*/

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a workspace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        WorkspaceId(id.into())
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user within a workspace
///
/// This is not the same as the peer id; a user id is chosen at join time,
/// the peer id is issued by the workspace directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for one mesh participant
///
/// Issued externally by the workspace directory as
/// `"{workspaceId}-{userId}"`. Immutable once assigned to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    /// Compose the canonical peer id for a workspace member
    pub fn compose(workspace: &WorkspaceId, user: &UserId) -> Self {
        PeerId(format!("{}-{}", workspace.0, user.0))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for one editable scene object
///
/// Generated locally by whichever peer creates the object; stable for the
/// object's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        ObjectId(id.into())
    }

    pub fn generate() -> Self {
        use uuid::Uuid;
        ObjectId(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The full replicated state of one scene object
///
/// Every peer keeps its own copy of every object it knows about; replicas
/// converge through version-stamped modify messages rather than shared
/// memory. Owned by whichever peer most recently applied a modification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSnapshot {
    /// Stable object identifier
    pub object_id: ObjectId,

    /// Monotonically increasing modification counter
    pub version: u64,

    /// Human-readable object name
    pub name: String,

    /// Geometry kind, e.g. "BoxBufferGeometry"
    pub geometry_type: String,

    /// World position (x, y, z)
    pub position: [f32; 3],

    /// Euler rotation in radians (x, y, z)
    pub rotation: [f32; 3],

    /// Per-axis scale factors (x, y, z)
    pub scale: [f32; 3],

    /// Material color as a hex string without leading '#', e.g. "888888"
    pub material_color_hex: String,
}

impl ObjectSnapshot {
    /// Create a fresh snapshot at version 0 with a generated object id
    pub fn new(name: impl Into<String>, geometry_type: impl Into<String>) -> Self {
        Self {
            object_id: ObjectId::generate(),
            version: 0,
            name: name.into(),
            geometry_type: geometry_type.into(),
            position: [0.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0],
            scale: [1.0, 1.0, 1.0],
            material_color_hex: "888888".to_string(),
        }
    }

    /// Set the world position
    pub fn at(mut self, position: [f32; 3]) -> Self {
        self.position = position;
        self
    }

    /// Set the material color hex string
    pub fn colored(mut self, hex: impl Into<String>) -> Self {
        self.material_color_hex = hex.into();
        self
    }
}

/// An edit-lock claim on one scene object
///
/// At most one record exists per object id at any time; see the pin table
/// for the enforcement policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinRecord {
    /// The pinned object
    pub object_id: ObjectId,

    /// The peer holding the edit lock
    pub holder: PeerId,
}

impl PinRecord {
    pub fn new(object_id: ObjectId, holder: PeerId) -> Self {
        PinRecord { object_id, holder }
    }
}
