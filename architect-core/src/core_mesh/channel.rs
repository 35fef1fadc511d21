/*
  ChannelHandle / TransportEvent

  The platform is assumed to supply reliable ordered data channels between
  any two peers that have exchanged connection offers; this module is the
  seam where those channels enter the core.

  Inputs:
    - TransportEvent::Inbound(peer_id, channel)  (remote peer dialed us)
    - TransportEvent::Opened(peer_id)            (channel finished opening)
    - TransportEvent::Data(peer_id, bytes)       (one wire payload)
    - TransportEvent::Closed(peer_id)
    - TransportEvent::Errored(peer_id, reason)

  Outputs:
    - ChannelHandle::send, the outbound half the registry writes to.

  Per-pair FIFO delivery is the transport's responsibility; the core only
  relies on it for per-sender ordering.
*/

use tokio::sync::mpsc;

use super::errors::{MeshError, MeshResult};
use crate::core_proto::types::PeerId;

/// Outbound half of a data channel to one remote peer
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    peer_id: PeerId,
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelHandle {
    /// Wrap the sender half of a platform data channel
    pub fn new(peer_id: PeerId, tx: mpsc::Sender<Vec<u8>>) -> Self {
        ChannelHandle { peer_id, tx }
    }

    /// Create a handle plus the receiver end, for in-process meshes and tests
    pub fn pair(peer_id: PeerId, capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ChannelHandle { peer_id, tx }, rx)
    }

    /// The remote peer this channel leads to
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Deliver one payload to the remote peer
    pub async fn send(&self, payload: Vec<u8>) -> MeshResult<()> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| MeshError::ChannelClosed(self.peer_id.clone()))
    }

    /// Whether the remote end has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Notifications the transport collaborator feeds into the sync core
#[derive(Debug)]
pub enum TransportEvent {
    /// A remote peer opened a connection to us
    Inbound(PeerId, ChannelHandle),
    /// An outbound channel finished opening
    Opened(PeerId),
    /// One payload arrived from a peer
    Data(PeerId, Vec<u8>),
    /// The channel closed cleanly
    Closed(PeerId),
    /// The channel failed
    Errored(PeerId, String),
}
