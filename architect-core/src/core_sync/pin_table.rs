/*
  PinLockTable

  Per-object mutual-exclusion state: which peer, if any, currently holds
  the edit lock on an object. States per object:

      Unpinned -> PinnedBy(peer) -> Unpinned

  Pinning substitutes for a CRDT merge: rather than reconciling divergent
  concurrent edits to one object, concurrent edits to the same object are
  made impossible by convention. The discipline is cooperative - there is
  no central lock authority - so the single-holder invariant is
  best-effort under message loss or near-simultaneous claims.
*/

use std::collections::HashMap;
use tracing::debug;

use crate::core_proto::types::{ObjectId, PeerId, PinRecord};

/// Result of a local pin attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    /// The lock is now (or already was) held by the caller
    Granted,
    /// Another peer holds the lock; the caller must not edit the object
    AlreadyHeld(PeerId),
}

/// Which peer holds the edit lock on each pinned object
#[derive(Debug, Default)]
pub struct PinLockTable {
    holders: HashMap<ObjectId, PeerId>,
}

impl PinLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to claim the lock on an object
    ///
    /// Re-pinning an object the caller already holds is an idempotent
    /// success.
    pub fn try_pin(&mut self, object_id: ObjectId, peer_id: PeerId) -> PinOutcome {
        match self.holders.get(&object_id) {
            Some(holder) if *holder == peer_id => PinOutcome::Granted,
            Some(holder) => PinOutcome::AlreadyHeld(holder.clone()),
            None => {
                debug!(object_id = %object_id, peer_id = %peer_id, "pin granted");
                self.holders.insert(object_id, peer_id);
                PinOutcome::Granted
            }
        }
    }

    /// Record a remote peer's pin claim without local arbitration
    ///
    /// Inbound PinObject messages are accepted as-is; first-seen-wins is
    /// not enforced across the network, only locally. Returns the holder
    /// that was displaced, if any.
    pub fn force_pin(&mut self, object_id: ObjectId, peer_id: PeerId) -> Option<PeerId> {
        let displaced = self
            .holders
            .insert(object_id.clone(), peer_id.clone())
            .filter(|previous| *previous != peer_id);
        if let Some(previous) = &displaced {
            debug!(object_id = %object_id, previous = %previous, peer_id = %peer_id, "pin overwritten by remote claim");
        }
        displaced
    }

    /// Release the lock on an object, but only if held by the caller
    ///
    /// A peer cannot release someone else's lock. Returns whether a
    /// release happened.
    pub fn release(&mut self, object_id: &ObjectId, peer_id: &PeerId) -> bool {
        match self.holders.get(object_id) {
            Some(holder) if holder == peer_id => {
                self.holders.remove(object_id);
                true
            }
            _ => false,
        }
    }

    /// Release every lock held by a peer; used on disconnect
    ///
    /// Returns the objects that became editable again.
    pub fn release_all(&mut self, peer_id: &PeerId) -> Vec<ObjectId> {
        let released: Vec<ObjectId> = self
            .holders
            .iter()
            .filter(|(_, holder)| *holder == peer_id)
            .map(|(object_id, _)| object_id.clone())
            .collect();

        for object_id in &released {
            self.holders.remove(object_id);
        }
        released
    }

    /// Drop any lock record for an object, regardless of holder
    ///
    /// Used when the object itself is deleted.
    pub fn forget(&mut self, object_id: &ObjectId) -> Option<PeerId> {
        self.holders.remove(object_id)
    }

    /// The current holder of an object's lock, if pinned
    pub fn holder(&self, object_id: &ObjectId) -> Option<&PeerId> {
        self.holders.get(object_id)
    }

    /// Every current pin as a record, for snapshot transfer
    pub fn records(&self) -> Vec<PinRecord> {
        self.holders
            .iter()
            .map(|(object_id, holder)| PinRecord::new(object_id.clone(), holder.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}
