/*
  ConnectionRegistry

  Tracks, per remote peer id, the data channel handle, whether the channel
  has completed application-level verification, and whether it is open.

  Workflow:
  1. register(peer, channel, open): insert an unverified entry; replacing
     an existing entry hands the displaced one back so the caller can
     tear it down.
  2. mark_open / mark_verified as transport and verification progress.
  3. send_or_queue: payloads for a channel that is not yet open && verified
     are buffered on the entry and flushed once it becomes ready; the
     buffer dies with the entry.
  4. remove(peer): idempotent delete, returns the entry if it existed.

  Owned exclusively by the SyncRouter actor, so no internal locking:
  single-writer discipline per the concurrency model.
*/

use std::collections::HashMap;
use tracing::{debug, warn};

use super::channel::ChannelHandle;
use super::errors::MeshResult;
use crate::core_proto::types::PeerId;

/// Connection state for one remote peer
#[derive(Debug)]
pub struct ConnectionEntry {
    /// The remote peer
    pub peer_id: PeerId,
    /// Outbound half of the data channel
    pub channel: ChannelHandle,
    /// Whether the channel has finished opening
    pub open: bool,
    /// Whether the remote peer passed workspace verification
    pub verified: bool,
    /// Payloads waiting for the channel to become open && verified
    queued: Vec<Vec<u8>>,
}

impl ConnectionEntry {
    fn new(peer_id: PeerId, channel: ChannelHandle, open: bool) -> Self {
        ConnectionEntry {
            peer_id,
            channel,
            open,
            verified: false,
            queued: Vec::new(),
        }
    }

    /// Whether substantive messages may flow on this channel
    pub fn is_ready(&self) -> bool {
        self.open && self.verified
    }

    /// Number of payloads waiting on readiness
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }
}

/// Table of data channels to every known remote peer
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<PeerId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry for a peer, unverified
    ///
    /// Idempotent per peer id: re-registering replaces the old entry and
    /// returns it so the caller can run teardown for the displaced
    /// connection. Queued payloads on the displaced entry are dropped with
    /// it.
    pub fn register(
        &mut self,
        peer_id: PeerId,
        channel: ChannelHandle,
        open: bool,
    ) -> Option<ConnectionEntry> {
        debug!(peer_id = %peer_id, open, "registering connection");
        self.entries.insert(
            peer_id.clone(),
            ConnectionEntry::new(peer_id.clone(), channel, open),
        )
    }

    /// Mark a peer's channel as open; no-op if the peer is unknown
    ///
    /// Returns the payloads to flush if the entry just became ready.
    pub fn mark_open(&mut self, peer_id: &PeerId) -> Vec<Vec<u8>> {
        match self.entries.get_mut(peer_id) {
            Some(entry) => {
                entry.open = true;
                if entry.is_ready() {
                    std::mem::take(&mut entry.queued)
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        }
    }

    /// Mark a peer as verified; no-op if the peer is unknown (lost a race
    /// with disconnect)
    ///
    /// Returns the payloads to flush if the entry just became ready.
    pub fn mark_verified(&mut self, peer_id: &PeerId) -> Vec<Vec<u8>> {
        match self.entries.get_mut(peer_id) {
            Some(entry) => {
                entry.verified = true;
                if entry.is_ready() {
                    std::mem::take(&mut entry.queued)
                } else {
                    Vec::new()
                }
            }
            None => {
                warn!(peer_id = %peer_id, "mark_verified for unknown peer");
                Vec::new()
            }
        }
    }

    /// Read accessor for one peer
    pub fn get(&self, peer_id: &PeerId) -> Option<&ConnectionEntry> {
        self.entries.get(peer_id)
    }

    /// All known peers, in no particular order
    pub fn all(&self) -> impl Iterator<Item = &ConnectionEntry> {
        self.entries.values()
    }

    /// Peer ids of every entry, ready or not
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.entries.keys().cloned().collect()
    }

    /// Peer ids of entries that are open && verified
    pub fn ready_peer_ids(&self) -> Vec<PeerId> {
        self.entries
            .values()
            .filter(|e| e.is_ready())
            .map(|e| e.peer_id.clone())
            .collect()
    }

    /// Delete the entry for a peer; idempotent
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<ConnectionEntry> {
        self.entries.remove(peer_id)
    }

    /// Number of known peers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Send a payload to one peer, buffering until the channel is ready
    ///
    /// A send on a ready channel that fails means the remote end is gone;
    /// the error is returned so the caller can run teardown for the peer.
    pub async fn send_or_queue(&mut self, peer_id: &PeerId, payload: Vec<u8>) -> MeshResult<()> {
        let entry = match self.entries.get_mut(peer_id) {
            Some(entry) => entry,
            None => {
                return Err(super::errors::MeshError::UnknownPeer(peer_id.clone()));
            }
        };

        if entry.is_ready() {
            entry.channel.send(payload).await
        } else {
            debug!(peer_id = %peer_id, queued = entry.queued.len() + 1, "queueing payload for unready channel");
            entry.queued.push(payload);
            Ok(())
        }
    }

    /// Flush previously queued payloads over a now-ready channel
    pub async fn flush(&mut self, peer_id: &PeerId, payloads: Vec<Vec<u8>>) -> MeshResult<()> {
        if payloads.is_empty() {
            return Ok(());
        }
        debug!(peer_id = %peer_id, count = payloads.len(), "flushing queued payloads");
        for payload in payloads {
            self.send_or_queue(peer_id, payload).await?;
        }
        Ok(())
    }
}
