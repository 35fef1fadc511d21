/*
    message.rs - defines the peer-to-peer sync message types.

    Responsibilities:
    `message.rs` defines the tagged message union exchanged between peers
    and the codec that puts it on the wire. It is aware of the following
    message types:

    Connection lifecycle:
    - CONNECTION_VERIFIED

    Edit-lock discipline:
    - PIN_OBJECT(object_id)
    - UNPIN_OBJECT(object_id)

    Scene mutations:
    - CREATE_OBJECT(snapshot)
    - MODIFY_OBJECT(snapshot)
    - DELETE_OBJECT(object_id)

    Newcomer bootstrap:
    - COPY_WORKSPACE_REQ
    - COPY_WORKSPACE_RES(pins, objects)

    Serialization is tagged JSON ({"type": ..., ...fields}). Unknown fields
    are ignored on decode; an unknown tag is surfaced as a distinct error
    so the channel stays up.
*/

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{ObjectId, ObjectSnapshot, PinRecord};

/// Errors produced by the message codec
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Message carried a tag this peer does not recognize
    #[error("unknown message tag: {0}")]
    UnknownTag(String),

    /// Payload was not a valid message of the tagged type
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Sync messages exchanged between mesh peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncMessage {
    /// Remote peer confirmed this connection belongs to the workspace
    ConnectionVerified,

    /// Sender claims the edit lock on an object
    #[serde(rename_all = "camelCase")]
    PinObject { object_id: ObjectId },

    /// Sender releases its edit lock on an object
    #[serde(rename_all = "camelCase")]
    UnpinObject { object_id: ObjectId },

    /// Sender created a new scene object
    CreateObject { snapshot: ObjectSnapshot },

    /// Sender modified an existing scene object
    ModifyObject { snapshot: ObjectSnapshot },

    /// Sender deleted a scene object
    #[serde(rename_all = "camelCase")]
    DeleteObject { object_id: ObjectId },

    /// Newcomer requests a full copy of the workspace state
    CopyWorkspaceReq,

    /// Arbiter's full-state reply: every known object and held pin
    CopyWorkspaceRes {
        pins: Vec<PinRecord>,
        objects: Vec<ObjectSnapshot>,
    },
}

/// Tags this peer understands; anything else decodes to UnknownTag
const KNOWN_TAGS: [&str; 8] = [
    "connectionVerified",
    "pinObject",
    "unpinObject",
    "createObject",
    "modifyObject",
    "deleteObject",
    "copyWorkspaceReq",
    "copyWorkspaceRes",
];

impl SyncMessage {
    /// Get the wire tag of this message
    pub fn tag(&self) -> &'static str {
        match self {
            SyncMessage::ConnectionVerified => "connectionVerified",
            SyncMessage::PinObject { .. } => "pinObject",
            SyncMessage::UnpinObject { .. } => "unpinObject",
            SyncMessage::CreateObject { .. } => "createObject",
            SyncMessage::ModifyObject { .. } => "modifyObject",
            SyncMessage::DeleteObject { .. } => "deleteObject",
            SyncMessage::CopyWorkspaceReq => "copyWorkspaceReq",
            SyncMessage::CopyWorkspaceRes { .. } => "copyWorkspaceRes",
        }
    }

    /// Check whether this message carries a scene mutation
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            SyncMessage::CreateObject { .. }
                | SyncMessage::ModifyObject { .. }
                | SyncMessage::DeleteObject { .. }
        )
    }
}

/// Encode a message into a wire payload
pub fn encode(message: &SyncMessage) -> Result<Vec<u8>, DecodeError> {
    serde_json::to_vec(message).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Decode a wire payload into a message
///
/// The tag is inspected before full deserialization so that an unknown tag
/// is reported as `UnknownTag` rather than as a generic parse failure.
pub fn decode(payload: &[u8]) -> Result<SyncMessage, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let tag = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| DecodeError::Malformed("missing message tag".to_string()))?;

    if !KNOWN_TAGS.contains(&tag) {
        return Err(DecodeError::UnknownTag(tag.to_string()));
    }

    serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}
