/*
  SessionTeardown

  Cleanup when a peer's channel closes or errors: release every lock the
  peer held, drop its registry entry and queued payloads, and report what
  was released so the router can notify the mesh and the rendering
  collaborator.

  Runs exactly once per disconnect even if both close and error fire for
  the same channel: the registry removal is the gate, and a second call
  for an already-removed peer returns None.
*/

use tracing::info;

use super::pin_table::PinLockTable;
use crate::core_mesh::registry::ConnectionRegistry;
use crate::core_proto::types::{ObjectId, PeerId};

/// What a teardown released, for follow-up notifications
#[derive(Debug)]
pub struct TeardownSummary {
    /// Objects whose lock the departed peer held
    pub released: Vec<ObjectId>,
    /// Whether the departed channel had completed verification
    pub was_verified: bool,
}

/// Tear down all connection and lock state for a departed peer
///
/// Returns None if the peer was already torn down (or never known), which
/// makes double-firing close/error events harmless.
pub fn teardown_peer(
    registry: &mut ConnectionRegistry,
    pins: &mut PinLockTable,
    peer_id: &PeerId,
) -> Option<TeardownSummary> {
    let entry = registry.remove(peer_id)?;

    let released = pins.release_all(peer_id);
    info!(
        peer_id = %peer_id,
        released = released.len(),
        dropped_queue = entry.queued_len(),
        "session teardown complete"
    );

    Some(TeardownSummary {
        released,
        was_verified: entry.verified,
    })
}

/// Release lock state for a connection displaced by re-registration
///
/// The registry entry is already gone (replaced); only the lock table
/// needs sweeping.
pub fn teardown_displaced(pins: &mut PinLockTable, peer_id: &PeerId) -> Vec<ObjectId> {
    pins.release_all(peer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_mesh::channel::ChannelHandle;
    use crate::core_proto::types::ObjectId;

    #[tokio::test]
    async fn test_teardown_releases_locks_and_entry() {
        let mut registry = ConnectionRegistry::new();
        let mut pins = PinLockTable::new();
        let peer = PeerId::new("ws1-alice");
        let obj = ObjectId::new("obj2");

        let (channel, _rx) = ChannelHandle::pair(peer.clone(), 4);
        registry.register(peer.clone(), channel, true);
        registry.mark_verified(&peer);
        pins.try_pin(obj.clone(), peer.clone());

        let summary = teardown_peer(&mut registry, &mut pins, &peer).unwrap();

        assert_eq!(summary.released, vec![obj]);
        assert!(summary.was_verified);
        assert!(registry.get(&peer).is_none());
        assert!(pins.is_empty());
    }

    #[tokio::test]
    async fn test_teardown_runs_exactly_once() {
        let mut registry = ConnectionRegistry::new();
        let mut pins = PinLockTable::new();
        let peer = PeerId::new("ws1-bob");

        let (channel, _rx) = ChannelHandle::pair(peer.clone(), 4);
        registry.register(peer.clone(), channel, true);

        // close fires, then error fires for the same channel
        assert!(teardown_peer(&mut registry, &mut pins, &peer).is_some());
        assert!(teardown_peer(&mut registry, &mut pins, &peer).is_none());
    }

    #[tokio::test]
    async fn test_teardown_unknown_peer_is_noop() {
        let mut registry = ConnectionRegistry::new();
        let mut pins = PinLockTable::new();

        assert!(teardown_peer(&mut registry, &mut pins, &PeerId::new("ws1-ghost")).is_none());
    }

    #[test]
    fn test_teardown_displaced_sweeps_locks() {
        let mut pins = PinLockTable::new();
        let peer = PeerId::new("ws1-carol");
        let obj = ObjectId::new("obj1");
        pins.try_pin(obj.clone(), peer.clone());

        assert_eq!(teardown_displaced(&mut pins, &peer), vec![obj]);
        assert!(pins.is_empty());
    }
}
