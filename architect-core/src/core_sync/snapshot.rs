/*
  ArbiterSnapshot

  Bootstrap for a newly joined peer: the newcomer asks one designated
  "arbiter" peer to copy the workspace, and the arbiter answers with every
  object it knows about and every pin currently held. The joining peer
  applies the objects as create-equivalent inserts and the pins as lock
  state, then begins normal operation.

  This is best-effort, not a consistent snapshot: messages created
  concurrently with the transfer may be missed. Arbiter choice is any
  deterministic tie-break; here, the first peer in the join-time listing.
*/

use tracing::info;

use super::pin_table::PinLockTable;
use super::version::VersionTracker;
use crate::core_proto::message::SyncMessage;
use crate::core_proto::types::{ObjectId, ObjectSnapshot, PeerId, PinRecord};
use std::collections::HashMap;

/// What a received workspace copy contained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopySummary {
    pub objects: usize,
    pub pins: usize,
}

/// Pick the arbiter for a workspace copy request
///
/// Deterministic: the first listed peer other than ourselves. Only one
/// response is needed, so any stable choice works. There is no fallback
/// if the chosen peer is unreachable.
pub fn choose_arbiter(peers: &[PeerId], local: &PeerId) -> Option<PeerId> {
    peers.iter().find(|p| *p != local).cloned()
}

/// Build the arbiter's full-state reply from local sync state
pub fn build_response(
    pins: &PinLockTable,
    replica: &HashMap<ObjectId, ObjectSnapshot>,
) -> SyncMessage {
    SyncMessage::CopyWorkspaceRes {
        pins: pins.records(),
        objects: replica.values().cloned().collect(),
    }
}

/// Apply a received workspace copy to local sync state
///
/// Objects land in the replica with their carried versions recorded, so
/// later modifies compare correctly; pins land as remote lock claims.
/// The caller forwards the resulting create/pin notifications to the
/// rendering collaborator.
pub fn apply_response(
    pins: Vec<PinRecord>,
    objects: Vec<ObjectSnapshot>,
    pin_table: &mut PinLockTable,
    versions: &mut VersionTracker,
    replica: &mut HashMap<ObjectId, ObjectSnapshot>,
) -> CopySummary {
    let summary = CopySummary {
        objects: objects.len(),
        pins: pins.len(),
    };

    for snapshot in objects {
        versions.record(snapshot.object_id.clone(), snapshot.version);
        replica.insert(snapshot.object_id.clone(), snapshot);
    }

    for pin in pins {
        pin_table.force_pin(pin.object_id, pin.holder);
    }

    info!(
        objects = summary.objects,
        pins = summary.pins,
        "applied workspace copy"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_arbiter_skips_self() {
        let me = PeerId::new("ws1-zoe");
        let peers = vec![
            PeerId::new("ws1-zoe"),
            PeerId::new("ws1-alice"),
            PeerId::new("ws1-bob"),
        ];

        assert_eq!(choose_arbiter(&peers, &me), Some(PeerId::new("ws1-alice")));
    }

    #[test]
    fn test_choose_arbiter_alone_in_workspace() {
        let me = PeerId::new("ws1-zoe");
        assert_eq!(choose_arbiter(&[me.clone()], &me), None);
        assert_eq!(choose_arbiter(&[], &me), None);
    }

    #[test]
    fn test_build_and_apply_round_trip() {
        let alice = PeerId::new("ws1-alice");
        let snapshot = {
            let mut s = ObjectSnapshot::new("Box", "BoxBufferGeometry");
            s.version = 5;
            s
        };
        let object_id = snapshot.object_id.clone();

        // Arbiter state
        let mut arbiter_pins = PinLockTable::new();
        arbiter_pins.try_pin(object_id.clone(), alice.clone());
        let mut arbiter_replica = HashMap::new();
        arbiter_replica.insert(object_id.clone(), snapshot.clone());

        let response = build_response(&arbiter_pins, &arbiter_replica);

        // Joiner applies it
        let (pins, objects) = match response {
            SyncMessage::CopyWorkspaceRes { pins, objects } => (pins, objects),
            other => panic!("expected CopyWorkspaceRes, got {:?}", other),
        };

        let mut joiner_pins = PinLockTable::new();
        let mut joiner_versions = VersionTracker::new();
        let mut joiner_replica = HashMap::new();

        let summary = apply_response(
            pins,
            objects,
            &mut joiner_pins,
            &mut joiner_versions,
            &mut joiner_replica,
        );

        assert_eq!(summary, CopySummary { objects: 1, pins: 1 });
        assert_eq!(joiner_replica.get(&object_id), Some(&snapshot));
        assert_eq!(joiner_versions.get(&object_id), Some(5));
        assert_eq!(joiner_pins.holder(&object_id), Some(&alice));

        // A stale modify from before the snapshot is now rejected
        assert!(!joiner_versions.should_apply(&object_id, 4));
        assert!(joiner_versions.should_apply(&object_id, 6));
    }
}
