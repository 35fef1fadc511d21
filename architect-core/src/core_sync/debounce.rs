/*
  DebounceQueue

  Coalesces rapid local modifications so ModifyObject broadcasts go out at
  most once per interval per object, while still capturing the final state
  before a deselect, object switch, or disconnect.

  The first edit to an object arms a deadline; edits arriving before the
  deadline replace the pending snapshot without rearming it. The router's
  event loop sleeps until the earliest deadline and flushes whatever is
  due. Explicit take_* calls implement cancel-on-switch.
*/

use std::collections::HashMap;
use tokio::time::{Duration, Instant};

use crate::core_proto::types::{ObjectId, ObjectSnapshot};

#[derive(Debug)]
struct Pending {
    snapshot: ObjectSnapshot,
    due: Instant,
}

/// Per-object pending-broadcast buffer with deadlines
#[derive(Debug)]
pub struct DebounceQueue {
    interval: Duration,
    pending: HashMap<ObjectId, Pending>,
}

impl DebounceQueue {
    pub fn new(interval: Duration) -> Self {
        DebounceQueue {
            interval,
            pending: HashMap::new(),
        }
    }

    /// Buffer a modification, keeping only the newest snapshot per object
    pub fn push(&mut self, snapshot: ObjectSnapshot) {
        let object_id = snapshot.object_id.clone();
        match self.pending.get_mut(&object_id) {
            Some(pending) => {
                // Coalesce: newest state wins, original deadline stands
                pending.snapshot = snapshot;
            }
            None => {
                self.pending.insert(
                    object_id,
                    Pending {
                        snapshot,
                        due: Instant::now() + self.interval,
                    },
                );
            }
        }
    }

    /// Object ids with a pending broadcast other than the given one
    pub fn other_pending(&self, object_id: &ObjectId) -> Vec<ObjectId> {
        self.pending
            .keys()
            .filter(|id| *id != object_id)
            .cloned()
            .collect()
    }

    /// Immediately take the pending snapshot for one object, cancelling
    /// its timer
    pub fn take_object(&mut self, object_id: &ObjectId) -> Option<ObjectSnapshot> {
        self.pending.remove(object_id).map(|p| p.snapshot)
    }

    /// Take every snapshot whose deadline has passed
    pub fn take_due(&mut self, now: Instant) -> Vec<ObjectSnapshot> {
        let due: Vec<ObjectId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(id, _)| id.clone())
            .collect();

        due.into_iter()
            .filter_map(|id| self.take_object(&id))
            .collect()
    }

    /// Take everything, due or not; used on leave and disconnect
    pub fn drain(&mut self) -> Vec<ObjectSnapshot> {
        self.pending.drain().map(|(_, p)| p.snapshot).collect()
    }

    /// Earliest pending deadline, if anything is buffered
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.due).min()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_proto::types::ObjectId;

    fn snapshot(id: &str, x: f32) -> ObjectSnapshot {
        let mut s = ObjectSnapshot::new("Box", "BoxBufferGeometry").at([x, 0.0, 0.0]);
        s.object_id = ObjectId::new(id);
        s
    }

    #[tokio::test]
    async fn test_coalesces_to_newest_snapshot() {
        let mut queue = DebounceQueue::new(Duration::from_millis(100));

        queue.push(snapshot("obj1", 1.0));
        queue.push(snapshot("obj1", 2.0));
        queue.push(snapshot("obj1", 3.0));

        assert_eq!(queue.len(), 1);
        let taken = queue.take_object(&ObjectId::new("obj1")).unwrap();
        assert_eq!(taken.position[0], 3.0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_coalescing_keeps_original_deadline() {
        tokio::time::pause();
        let mut queue = DebounceQueue::new(Duration::from_millis(100));

        queue.push(snapshot("obj1", 1.0));
        let first_deadline = queue.next_deadline().unwrap();

        tokio::time::advance(Duration::from_millis(50)).await;
        queue.push(snapshot("obj1", 2.0));

        // Later edits must not push the flush out indefinitely
        assert_eq!(queue.next_deadline().unwrap(), first_deadline);
    }

    #[tokio::test]
    async fn test_take_due_respects_deadlines() {
        tokio::time::pause();
        let mut queue = DebounceQueue::new(Duration::from_millis(100));

        queue.push(snapshot("obj1", 1.0));
        tokio::time::advance(Duration::from_millis(60)).await;
        queue.push(snapshot("obj2", 2.0));

        tokio::time::advance(Duration::from_millis(50)).await;
        let due = queue.take_due(Instant::now());

        // obj1 (armed 110ms ago) is due; obj2 (armed 50ms ago) is not
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].object_id, ObjectId::new("obj1"));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_other_pending_for_switch_flush() {
        let mut queue = DebounceQueue::new(Duration::from_millis(100));

        queue.push(snapshot("obj1", 1.0));
        queue.push(snapshot("obj2", 2.0));

        let others = queue.other_pending(&ObjectId::new("obj2"));
        assert_eq!(others, vec![ObjectId::new("obj1")]);
    }

    #[tokio::test]
    async fn test_drain_takes_everything() {
        let mut queue = DebounceQueue::new(Duration::from_millis(100));

        queue.push(snapshot("obj1", 1.0));
        queue.push(snapshot("obj2", 2.0));

        assert_eq!(queue.drain().len(), 2);
        assert!(queue.is_empty());
        assert!(queue.next_deadline().is_none());
    }
}
