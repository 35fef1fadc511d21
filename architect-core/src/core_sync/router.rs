/*
   SyncRouter

   Single entry point for everything that changes shared scene state. It
   receives local edit intents from the UI side and inbound messages from
   the mesh, applies the pin/version policy, and fans messages out to the
   right peers and the rendering collaborator.

   Architecture:

   ┌────────────────────────────────────────────────────┐
   │        Rendering / UI collaborator                 │
   │   (edit intents in, SceneEvents out)               │
   └─────────────────┬──────────────────────────────────┘
                     │
                     │ SyncHandle API
                     │ • select_object / deselect_object
                     │ • create / modify / delete object
                     │ • connect_peer, transport_event
                     │ • request_workspace_copy, leave
                     │
   ┌─────────────────▼────────────────────────────────┐
   │              SyncRouter actor                    │
   │  (one task per peer instance; owns all state)    │
   │                                                  │
   │  ┌────────────┐ ┌──────────────┐ ┌────────────┐  │
   │  │ PinLock    │ │ Version      │ │ Debounce   │  │
   │  │ Table      │ │ Tracker      │ │ Queue      │  │
   │  └────────────┘ └──────────────┘ └────────────┘  │
   │  ┌────────────────────┐ ┌─────────────────────┐  │
   │  │ ConnectionRegistry │ │ VerificationGate    │  │
   │  └────────────────────┘ └─────────────────────┘  │
   └──────────────────────────────────────────────────┘

   All inbound channel events and local intents are serialized through the
   one actor loop, so none of the tables need locks. Nothing here blocks:
   waiting for channel open or verification is modeled as queued sends.
*/

use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::debounce::DebounceQueue;
use super::errors::{SyncError, SyncResult};
use super::pin_table::{PinLockTable, PinOutcome};
use super::session::SessionContext;
use super::snapshot;
use super::teardown;
use super::version::VersionTracker;
use crate::config::SyncConfig;
use crate::core_mesh::channel::{ChannelHandle, TransportEvent};
use crate::core_mesh::registry::ConnectionRegistry;
use crate::core_mesh::verification::{DirectoryService, Verdict, VerificationGate};
use crate::core_proto::message::{self, DecodeError, SyncMessage};
use crate::core_proto::types::{ObjectId, ObjectSnapshot, PeerId};

/// Commands sent to the sync router
#[derive(Debug)]
pub enum SyncCommand {
    /// User wants to select (and thereby pin) an object
    Select(ObjectId),
    /// User deselected an object
    Deselect(ObjectId),
    /// User created an object
    Create(ObjectSnapshot),
    /// User moved/scaled/recolored an object (debounced)
    Modify(ObjectSnapshot),
    /// User deleted an object
    Delete(ObjectId),
    /// Outbound connection to a workspace peer
    ConnectPeer(PeerId, ChannelHandle),
    /// Notification from the transport collaborator
    Transport(TransportEvent),
    /// Ask the arbiter for a full workspace copy
    RequestWorkspaceCopy,
    /// Leave the workspace and stop the router
    Leave,
}

/// Events emitted to the rendering collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    /// A remote peer created an object; insert it into the scene
    RemoteCreate(ObjectSnapshot),
    /// A remote peer modified an object; replace it in the scene
    RemoteModify(ObjectSnapshot),
    /// A remote peer deleted an object; remove it from the scene
    RemoteDelete(ObjectId),
    /// An object's remote lock state changed
    PinChanged { object_id: ObjectId, locked: bool },
    /// A local selection succeeded; the object is editable
    SelectionGranted(ObjectId),
    /// A local selection was refused; someone else holds the lock
    SelectionRefused(ObjectId),
    /// An inbound peer failed workspace verification and was dropped
    VerificationFailed(PeerId),
    /// A peer's connection was torn down
    PeerLeft(PeerId),
    /// The arbiter's workspace copy was applied
    WorkspaceCopied { objects: usize, pins: usize },
}

/// Handle to interact with a running sync router
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    async fn send(&self, command: SyncCommand) -> SyncResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SyncError::RouterClosed)
    }

    /// Attempt to select (pin) an object for editing
    pub async fn select_object(&self, object_id: ObjectId) -> SyncResult<()> {
        self.send(SyncCommand::Select(object_id)).await
    }

    /// Deselect an object, flushing any pending modification
    pub async fn deselect_object(&self, object_id: ObjectId) -> SyncResult<()> {
        self.send(SyncCommand::Deselect(object_id)).await
    }

    /// Create a new object and announce it to the mesh
    pub async fn create_object(&self, snapshot: ObjectSnapshot) -> SyncResult<()> {
        self.send(SyncCommand::Create(snapshot)).await
    }

    /// Record a local modification; broadcast is debounced per object
    pub async fn modify_object(&self, snapshot: ObjectSnapshot) -> SyncResult<()> {
        self.send(SyncCommand::Modify(snapshot)).await
    }

    /// Delete an object and announce the deletion
    pub async fn delete_object(&self, object_id: ObjectId) -> SyncResult<()> {
        self.send(SyncCommand::Delete(object_id)).await
    }

    /// Attach an outbound channel to a peer from the workspace listing
    pub async fn connect_peer(&self, peer_id: PeerId, channel: ChannelHandle) -> SyncResult<()> {
        self.send(SyncCommand::ConnectPeer(peer_id, channel)).await
    }

    /// Feed one transport notification into the router
    pub async fn transport_event(&self, event: TransportEvent) -> SyncResult<()> {
        self.send(SyncCommand::Transport(event)).await
    }

    /// Ask the designated arbiter for the current workspace state
    pub async fn request_workspace_copy(&self) -> SyncResult<()> {
        self.send(SyncCommand::RequestWorkspaceCopy).await
    }

    /// Leave the workspace; the router stops after final cleanup
    pub async fn leave(&self) -> SyncResult<()> {
        self.send(SyncCommand::Leave).await
    }
}

/// The sync dispatcher actor
pub struct SyncRouter {
    ctx: SessionContext,
    directory: DirectoryService,
    gate: VerificationGate,

    command_rx: mpsc::Receiver<SyncCommand>,
    scene_tx: mpsc::Sender<SceneEvent>,

    registry: ConnectionRegistry,
    pins: PinLockTable,
    versions: VersionTracker,
    debounce: DebounceQueue,

    /// This peer's full copy of every object it knows about
    replica: HashMap<ObjectId, ObjectSnapshot>,

    /// Whether a workspace copy request is outstanding
    copy_pending: bool,
}

impl SyncRouter {
    /// Create a router for a session and spawn its event loop
    ///
    /// Returns the command handle, the scene event stream for the
    /// rendering collaborator, and the actor's join handle.
    pub fn spawn(
        ctx: SessionContext,
        config: SyncConfig,
        directory: DirectoryService,
    ) -> (SyncHandle, mpsc::Receiver<SceneEvent>, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
        let (scene_tx, scene_rx) = mpsc::channel(config.scene_capacity);

        let gate = VerificationGate::new(
            directory.clone(),
            ctx.workspace_id.clone(),
            config.verify_timeout,
        );

        let router = SyncRouter {
            ctx,
            directory,
            gate,
            command_rx,
            scene_tx,
            registry: ConnectionRegistry::new(),
            pins: PinLockTable::new(),
            versions: VersionTracker::new(),
            debounce: DebounceQueue::new(config.debounce_interval),
            replica: HashMap::new(),
            copy_pending: false,
        };

        let handle = tokio::spawn(router.run());
        (SyncHandle { command_tx }, scene_rx, handle)
    }

    async fn run(mut self) {
        info!(
            peer_id = %self.ctx.peer_id,
            workspace_id = %self.ctx.workspace_id,
            "sync router started"
        );

        loop {
            let deadline = self.debounce.next_deadline();
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_due().await;
                }
            }
        }

        info!(peer_id = %self.ctx.peer_id, "sync router stopped");
    }

    /// Process one command; returns false when the router should stop
    async fn handle_command(&mut self, command: SyncCommand) -> bool {
        match command {
            SyncCommand::Select(object_id) => self.local_select(object_id).await,
            SyncCommand::Deselect(object_id) => self.local_deselect(object_id).await,
            SyncCommand::Create(snapshot) => self.local_create(snapshot).await,
            SyncCommand::Modify(snapshot) => self.local_modify(snapshot).await,
            SyncCommand::Delete(object_id) => self.local_delete(object_id).await,
            SyncCommand::ConnectPeer(peer_id, channel) => {
                self.attach_outbound(peer_id, channel).await
            }
            SyncCommand::Transport(event) => self.handle_transport(event).await,
            SyncCommand::RequestWorkspaceCopy => self.request_copy().await,
            SyncCommand::Leave => {
                self.leave().await;
                return false;
            }
        }
        true
    }

    // ---- local intents ------------------------------------------------

    async fn local_select(&mut self, object_id: ObjectId) {
        let me = self.ctx.peer_id.clone();
        match self.pins.try_pin(object_id.clone(), me) {
            PinOutcome::Granted => {
                self.broadcast(&SyncMessage::PinObject {
                    object_id: object_id.clone(),
                })
                .await;
                self.notify(SceneEvent::SelectionGranted(object_id)).await;
            }
            PinOutcome::AlreadyHeld(holder) => {
                debug!(object_id = %object_id, holder = %holder, "selection refused, object locked");
                self.notify(SceneEvent::SelectionRefused(object_id)).await;
            }
        }
    }

    async fn local_deselect(&mut self, object_id: ObjectId) {
        // The final edit state must reach the mesh before the lock drops
        self.flush_modify(&object_id).await;

        let me = self.ctx.peer_id.clone();
        if self.pins.release(&object_id, &me) {
            self.broadcast(&SyncMessage::UnpinObject { object_id }).await;
        }
    }

    async fn local_create(&mut self, mut snapshot: ObjectSnapshot) {
        snapshot.version = 0;
        self.versions.record(snapshot.object_id.clone(), 0);
        self.replica
            .insert(snapshot.object_id.clone(), snapshot.clone());

        info!(object_id = %snapshot.object_id, name = %snapshot.name, "object created");
        self.broadcast(&SyncMessage::CreateObject { snapshot }).await;
    }

    async fn local_modify(&mut self, snapshot: ObjectSnapshot) {
        // Switching to a different object flushes the previous one
        for other in self.debounce.other_pending(&snapshot.object_id) {
            self.flush_modify(&other).await;
        }
        self.debounce.push(snapshot);
    }

    async fn local_delete(&mut self, object_id: ObjectId) {
        // Pending edits for a deleted object are moot
        self.debounce.take_object(&object_id);

        let me = self.ctx.peer_id.clone();
        self.pins.release(&object_id, &me);
        self.versions.forget(&object_id);
        self.replica.remove(&object_id);

        info!(object_id = %object_id, "object deleted");
        self.broadcast(&SyncMessage::DeleteObject { object_id }).await;
    }

    async fn request_copy(&mut self) {
        let peers = match self
            .directory
            .list_current_peer_ids(&self.ctx.workspace_id)
            .await
        {
            Ok(peers) => peers,
            Err(e) => {
                warn!(error = %e, "cannot list workspace peers for copy request");
                return;
            }
        };

        match snapshot::choose_arbiter(&peers, &self.ctx.peer_id) {
            Some(arbiter) => {
                info!(arbiter = %arbiter, "requesting workspace copy");
                self.copy_pending = true;
                self.send_to(&arbiter, &SyncMessage::CopyWorkspaceReq).await;
            }
            None => {
                debug!("no arbiter available, starting from an empty scene");
            }
        }
    }

    async fn leave(&mut self) {
        // Final flush so the mesh keeps our last edits
        let pending = self.debounce.drain();
        for snapshot in pending {
            self.broadcast_modify(snapshot).await;
        }

        let me = self.ctx.peer_id.clone();
        for object_id in self.pins.release_all(&me) {
            self.broadcast(&SyncMessage::UnpinObject { object_id }).await;
        }

        info!(workspace_id = %self.ctx.workspace_id, "leaving workspace");
    }

    // ---- connection lifecycle -----------------------------------------

    async fn attach_outbound(&mut self, peer_id: PeerId, channel: ChannelHandle) {
        // The dialed id came from the workspace listing; trust is completed
        // by the remote's ConnectionVerified once the channel opens.
        if self
            .registry
            .register(peer_id.clone(), channel, false)
            .is_some()
        {
            self.displaced_cleanup(&peer_id).await;
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Inbound(peer_id, channel) => {
                if self
                    .registry
                    .register(peer_id.clone(), channel, true)
                    .is_some()
                {
                    self.displaced_cleanup(&peer_id).await;
                }
                self.screen_inbound(peer_id).await;
            }
            TransportEvent::Opened(peer_id) => {
                let queued = self.registry.mark_open(&peer_id);
                self.flush_payloads(&peer_id, queued).await;
            }
            TransportEvent::Data(peer_id, payload) => {
                self.handle_data(peer_id, payload).await;
            }
            TransportEvent::Closed(peer_id) => {
                self.disconnect(&peer_id, "channel closed").await;
            }
            TransportEvent::Errored(peer_id, reason) => {
                warn!(peer_id = %peer_id, reason = %reason, "channel errored");
                self.disconnect(&peer_id, "channel error").await;
            }
        }
    }

    async fn screen_inbound(&mut self, peer_id: PeerId) {
        match self.gate.screen(&peer_id).await {
            Ok(Verdict::Admitted) => {
                let queued = self.registry.mark_verified(&peer_id);
                // The handshake must reach the remote before anything
                // substantive, so it can mark its own view verified first.
                self.send_to(&peer_id, &SyncMessage::ConnectionVerified)
                    .await;
                self.flush_payloads(&peer_id, queued).await;
            }
            Ok(Verdict::Rejected) | Err(_) => {
                // Dropping the entry drops the channel handle, which closes
                // the channel; all lock state for the peer goes with it.
                teardown::teardown_peer(&mut self.registry, &mut self.pins, &peer_id);
                self.notify(SceneEvent::VerificationFailed(peer_id)).await;
            }
        }
    }

    async fn handle_data(&mut self, peer_id: PeerId, payload: Vec<u8>) {
        let message = match message::decode(&payload) {
            Ok(message) => message,
            Err(DecodeError::UnknownTag(tag)) => {
                warn!(peer_id = %peer_id, tag = %tag, "dropping message with unknown tag");
                return;
            }
            Err(e) => {
                warn!(peer_id = %peer_id, error = %e, "dropping malformed message");
                return;
            }
        };

        let verified = self
            .registry
            .get(&peer_id)
            .map(|entry| entry.verified)
            .unwrap_or(false);

        // Nothing but the verification handshake flows before verification
        if !verified && !matches!(message, SyncMessage::ConnectionVerified) {
            warn!(peer_id = %peer_id, tag = message.tag(), "dropping message on unverified channel");
            return;
        }

        self.dispatch(peer_id, message).await;
    }

    /// The single inbound dispatch: one match over the message union
    async fn dispatch(&mut self, sender: PeerId, message: SyncMessage) {
        match message {
            SyncMessage::ConnectionVerified => {
                debug!(peer_id = %sender, "connection verified by remote");
                let queued = self.registry.mark_verified(&sender);
                self.flush_payloads(&sender, queued).await;
            }

            SyncMessage::PinObject { object_id } => {
                // Accepted without arbitration; first-seen-wins is only local
                self.pins.force_pin(object_id.clone(), sender);
                self.notify(SceneEvent::PinChanged {
                    object_id,
                    locked: true,
                })
                .await;
            }

            SyncMessage::UnpinObject { object_id } => {
                if self.pins.release(&object_id, &sender) {
                    self.notify(SceneEvent::PinChanged {
                        object_id,
                        locked: false,
                    })
                    .await;
                }
            }

            SyncMessage::CreateObject { snapshot } => {
                if self
                    .versions
                    .should_apply(&snapshot.object_id, snapshot.version)
                {
                    self.versions
                        .record(snapshot.object_id.clone(), snapshot.version);
                    self.replica
                        .insert(snapshot.object_id.clone(), snapshot.clone());
                    self.notify(SceneEvent::RemoteCreate(snapshot)).await;
                } else {
                    debug!(object_id = %snapshot.object_id, version = snapshot.version, "stale create dropped");
                }
            }

            SyncMessage::ModifyObject { snapshot } => {
                if self
                    .versions
                    .should_apply(&snapshot.object_id, snapshot.version)
                {
                    self.versions
                        .record(snapshot.object_id.clone(), snapshot.version);
                    self.replica
                        .insert(snapshot.object_id.clone(), snapshot.clone());
                    self.notify(SceneEvent::RemoteModify(snapshot)).await;
                } else {
                    debug!(object_id = %snapshot.object_id, version = snapshot.version, "stale modify dropped");
                }
            }

            SyncMessage::DeleteObject { object_id } => {
                self.replica.remove(&object_id);
                self.versions.forget(&object_id);
                self.pins.forget(&object_id);
                self.notify(SceneEvent::RemoteDelete(object_id)).await;
            }

            SyncMessage::CopyWorkspaceReq => {
                info!(peer_id = %sender, objects = self.replica.len(), "answering workspace copy request");
                let response = snapshot::build_response(&self.pins, &self.replica);
                self.send_to(&sender, &response).await;
            }

            SyncMessage::CopyWorkspaceRes { pins, objects } => {
                if !self.copy_pending {
                    debug!(peer_id = %sender, "unsolicited workspace copy dropped");
                    return;
                }
                self.copy_pending = false;

                let pinned_ids: Vec<ObjectId> =
                    pins.iter().map(|p| p.object_id.clone()).collect();
                let incoming_objects = objects.clone();

                let summary = snapshot::apply_response(
                    pins,
                    objects,
                    &mut self.pins,
                    &mut self.versions,
                    &mut self.replica,
                );

                for snapshot in incoming_objects {
                    self.notify(SceneEvent::RemoteCreate(snapshot)).await;
                }
                for object_id in pinned_ids {
                    self.notify(SceneEvent::PinChanged {
                        object_id,
                        locked: true,
                    })
                    .await;
                }
                self.notify(SceneEvent::WorkspaceCopied {
                    objects: summary.objects,
                    pins: summary.pins,
                })
                .await;
            }
        }
    }

    // ---- teardown -----------------------------------------------------

    async fn disconnect(&mut self, peer_id: &PeerId, reason: &str) {
        debug!(peer_id = %peer_id, reason, "tearing down connection");
        self.reap(vec![peer_id.clone()]).await;
    }

    /// Tear down every peer in the worklist, including peers whose
    /// channels fail while notifying the mesh about the teardown itself.
    ///
    /// Iterative on purpose: teardown sends UnpinObject broadcasts, and a
    /// broadcast can reveal more dead channels.
    async fn reap(&mut self, mut dead: Vec<PeerId>) {
        while let Some(peer_id) = dead.pop() {
            let summary =
                match teardown::teardown_peer(&mut self.registry, &mut self.pins, &peer_id) {
                    Some(summary) => summary,
                    // Already torn down; close and error may both fire
                    None => continue,
                };

            info!(peer_id = %peer_id, released = summary.released.len(), "peer disconnected");

            for object_id in &summary.released {
                self.notify(SceneEvent::PinChanged {
                    object_id: object_id.clone(),
                    locked: false,
                })
                .await;
            }
            // Tell the mesh too; peers that saw the close themselves
            // release the same locks and ignore this.
            for object_id in summary.released {
                let failed = self
                    .broadcast_raw(&SyncMessage::UnpinObject { object_id })
                    .await;
                dead.extend(failed);
            }

            self.notify(SceneEvent::PeerLeft(peer_id)).await;
        }
    }

    async fn displaced_cleanup(&mut self, peer_id: &PeerId) {
        debug!(peer_id = %peer_id, "connection replaced, sweeping old state");
        for object_id in teardown::teardown_displaced(&mut self.pins, peer_id) {
            self.notify(SceneEvent::PinChanged {
                object_id,
                locked: false,
            })
            .await;
        }
    }

    // ---- sending ------------------------------------------------------

    /// Fan a message out to every registry entry; not-yet-ready channels
    /// queue it. Returns the peers whose channels turned out dead.
    async fn broadcast_raw(&mut self, message: &SyncMessage) -> Vec<PeerId> {
        let payload = match message::encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode broadcast");
                return Vec::new();
            }
        };

        let mut failed = Vec::new();
        for peer_id in self.registry.peer_ids() {
            if let Err(e) = self.registry.send_or_queue(&peer_id, payload.clone()).await {
                warn!(peer_id = %peer_id, error = %e, "broadcast send failed");
                failed.push(peer_id);
            }
        }
        failed
    }

    async fn broadcast(&mut self, message: &SyncMessage) {
        let failed = self.broadcast_raw(message).await;
        self.reap(failed).await;
    }

    async fn send_to(&mut self, peer_id: &PeerId, message: &SyncMessage) {
        let payload = match message::encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode message");
                return;
            }
        };

        if let Err(e) = self.registry.send_or_queue(peer_id, payload).await {
            warn!(peer_id = %peer_id, error = %e, "send failed");
            self.reap(vec![peer_id.clone()]).await;
        }
    }

    async fn flush_payloads(&mut self, peer_id: &PeerId, payloads: Vec<Vec<u8>>) {
        if let Err(e) = self.registry.flush(peer_id, payloads).await {
            warn!(peer_id = %peer_id, error = %e, "flush failed");
            self.reap(vec![peer_id.clone()]).await;
        }
    }

    // ---- debounced modifies -------------------------------------------

    async fn flush_modify(&mut self, object_id: &ObjectId) {
        if let Some(snapshot) = self.debounce.take_object(object_id) {
            self.broadcast_modify(snapshot).await;
        }
    }

    async fn flush_due(&mut self) {
        for snapshot in self.debounce.take_due(Instant::now()) {
            self.broadcast_modify(snapshot).await;
        }
    }

    async fn broadcast_modify(&mut self, mut snapshot: ObjectSnapshot) {
        // Stamp a version strictly newer than anything seen for the object
        snapshot.version = self.versions.bump_local(snapshot.object_id.clone());
        self.replica
            .insert(snapshot.object_id.clone(), snapshot.clone());
        self.broadcast(&SyncMessage::ModifyObject { snapshot }).await;
    }

    // ---- events out ---------------------------------------------------

    async fn notify(&self, event: SceneEvent) {
        if self.scene_tx.send(event).await.is_err() {
            debug!("scene event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_mesh::verification::{MemoryDirectory, WorkspaceDirectory};
    use crate::core_proto::types::{UserId, WorkspaceId};
    use crate::core_sync::session::SessionOrigin;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_event(rx: &mut mpsc::Receiver<SceneEvent>) -> SceneEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for scene event")
            .expect("scene stream ended")
    }

    async fn next_payload(rx: &mut mpsc::Receiver<Vec<u8>>) -> SyncMessage {
        let payload = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for payload")
            .expect("channel ended");
        message::decode(&payload).unwrap()
    }

    struct TestPeer {
        handle: SyncHandle,
        scene_rx: mpsc::Receiver<SceneEvent>,
        peer_id: PeerId,
        directory: Arc<MemoryDirectory>,
        workspace: WorkspaceId,
    }

    async fn spawn_peer(user: &str, origin: SessionOrigin) -> TestPeer {
        let directory = Arc::new(MemoryDirectory::new());
        let workspace = WorkspaceId::new("ws1");
        directory.create_workspace(workspace.clone()).await;
        let peer_id = directory
            .issue_peer_id(&workspace, &UserId::new(user))
            .await
            .unwrap();

        let ctx = SessionContext::new(
            workspace.clone(),
            UserId::new(user),
            peer_id.clone(),
            origin,
        );
        let (handle, scene_rx, _task) =
            SyncRouter::spawn(ctx, SyncConfig::default(), directory.clone());

        TestPeer {
            handle,
            scene_rx,
            peer_id,
            directory,
            workspace,
        }
    }

    /// Register a verified fake remote peer and return the receiver for
    /// payloads the router sends to it.
    async fn attach_verified_remote(peer: &TestPeer, user: &str) -> (PeerId, mpsc::Receiver<Vec<u8>>) {
        let remote_id = peer
            .directory
            .issue_peer_id(&peer.workspace, &UserId::new(user))
            .await
            .unwrap();
        let (channel, mut rx) = ChannelHandle::pair(remote_id.clone(), 32);

        peer.handle
            .transport_event(TransportEvent::Inbound(remote_id.clone(), channel))
            .await
            .unwrap();

        // The router verifies the inbound peer and acks the handshake
        let first = next_payload(&mut rx).await;
        assert_eq!(first, SyncMessage::ConnectionVerified);

        (remote_id, rx)
    }

    #[tokio::test]
    async fn test_select_broadcasts_pin() {
        let mut peer = spawn_peer("alice", SessionOrigin::Created).await;
        assert_eq!(peer.peer_id.0, "ws1-alice");
        let (_remote, mut rx) = attach_verified_remote(&peer, "bob").await;

        let obj = ObjectId::new("obj1");
        peer.handle.select_object(obj.clone()).await.unwrap();

        assert_eq!(
            next_event(&mut peer.scene_rx).await,
            SceneEvent::SelectionGranted(obj.clone())
        );
        assert_eq!(
            next_payload(&mut rx).await,
            SyncMessage::PinObject { object_id: obj }
        );
    }

    #[tokio::test]
    async fn test_remote_pin_refuses_local_select() {
        let mut peer = spawn_peer("alice", SessionOrigin::Created).await;
        let (remote_id, _rx) = attach_verified_remote(&peer, "bob").await;

        let obj = ObjectId::new("obj1");
        let pin = message::encode(&SyncMessage::PinObject {
            object_id: obj.clone(),
        })
        .unwrap();
        peer.handle
            .transport_event(TransportEvent::Data(remote_id, pin))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut peer.scene_rx).await,
            SceneEvent::PinChanged {
                object_id: obj.clone(),
                locked: true
            }
        );

        peer.handle.select_object(obj.clone()).await.unwrap();
        assert_eq!(
            next_event(&mut peer.scene_rx).await,
            SceneEvent::SelectionRefused(obj)
        );
    }

    #[tokio::test]
    async fn test_unverified_channel_drops_mutations() {
        let mut peer = spawn_peer("alice", SessionOrigin::Created).await;

        // Attach a channel for a peer the directory does not know
        let stranger = PeerId::new("ws1-mallory");
        let (channel, _rx) = ChannelHandle::pair(stranger.clone(), 8);
        peer.handle
            .transport_event(TransportEvent::Inbound(stranger.clone(), channel))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut peer.scene_rx).await,
            SceneEvent::VerificationFailed(stranger.clone())
        );

        // Even a well-formed create from the rejected peer goes nowhere
        let create = message::encode(&SyncMessage::CreateObject {
            snapshot: ObjectSnapshot::new("Box", "BoxBufferGeometry"),
        })
        .unwrap();
        peer.handle
            .transport_event(TransportEvent::Data(stranger, create))
            .await
            .unwrap();

        peer.handle
            .select_object(ObjectId::new("probe"))
            .await
            .unwrap();
        // Only the probe's own event arrives; no RemoteCreate before it
        assert_eq!(
            next_event(&mut peer.scene_rx).await,
            SceneEvent::SelectionGranted(ObjectId::new("probe"))
        );
    }

    #[tokio::test]
    async fn test_stale_modify_is_dropped() {
        let mut peer = spawn_peer("alice", SessionOrigin::Created).await;
        let (remote_id, _rx) = attach_verified_remote(&peer, "bob").await;

        let mut snapshot = ObjectSnapshot::new("Box", "BoxBufferGeometry");
        snapshot.version = 5;
        let obj = snapshot.object_id.clone();

        let v5 = message::encode(&SyncMessage::ModifyObject {
            snapshot: snapshot.clone(),
        })
        .unwrap();
        peer.handle
            .transport_event(TransportEvent::Data(remote_id.clone(), v5))
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut peer.scene_rx).await,
            SceneEvent::RemoteModify(snapshot.clone())
        );

        // Reordered older version arrives afterwards
        snapshot.version = 4;
        let v4 = message::encode(&SyncMessage::ModifyObject { snapshot }).unwrap();
        peer.handle
            .transport_event(TransportEvent::Data(remote_id, v4))
            .await
            .unwrap();

        peer.handle.select_object(obj.clone()).await.unwrap();
        assert_eq!(
            next_event(&mut peer.scene_rx).await,
            SceneEvent::SelectionGranted(obj)
        );
    }

    #[tokio::test]
    async fn test_disconnect_releases_remote_pins() {
        let mut peer = spawn_peer("alice", SessionOrigin::Created).await;
        let (remote_id, _rx) = attach_verified_remote(&peer, "bob").await;

        let obj = ObjectId::new("obj2");
        let pin = message::encode(&SyncMessage::PinObject {
            object_id: obj.clone(),
        })
        .unwrap();
        peer.handle
            .transport_event(TransportEvent::Data(remote_id.clone(), pin))
            .await
            .unwrap();
        next_event(&mut peer.scene_rx).await; // PinChanged locked

        peer.handle
            .transport_event(TransportEvent::Closed(remote_id.clone()))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut peer.scene_rx).await,
            SceneEvent::PinChanged {
                object_id: obj.clone(),
                locked: false
            }
        );
        assert_eq!(
            next_event(&mut peer.scene_rx).await,
            SceneEvent::PeerLeft(remote_id.clone())
        );

        // Object selectable again
        peer.handle.select_object(obj.clone()).await.unwrap();
        assert_eq!(
            next_event(&mut peer.scene_rx).await,
            SceneEvent::SelectionGranted(obj)
        );

        // Error firing after close is harmless
        peer.handle
            .transport_event(TransportEvent::Errored(remote_id, "late".into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_copy_request_answered_from_replica() {
        let peer = spawn_peer("alice", SessionOrigin::Created).await;
        let (remote_id, mut rx) = attach_verified_remote(&peer, "zoe").await;

        let snapshot = ObjectSnapshot::new("Box", "BoxBufferGeometry");
        peer.handle.create_object(snapshot.clone()).await.unwrap();
        assert_eq!(
            next_payload(&mut rx).await,
            SyncMessage::CreateObject {
                snapshot: snapshot.clone()
            }
        );

        let req = message::encode(&SyncMessage::CopyWorkspaceReq).unwrap();
        peer.handle
            .transport_event(TransportEvent::Data(remote_id, req))
            .await
            .unwrap();

        match next_payload(&mut rx).await {
            SyncMessage::CopyWorkspaceRes { pins, objects } => {
                assert!(pins.is_empty());
                assert_eq!(objects, vec![snapshot]);
            }
            other => panic!("expected CopyWorkspaceRes, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsolicited_copy_response_dropped() {
        let mut peer = spawn_peer("alice", SessionOrigin::Created).await;
        let (remote_id, _rx) = attach_verified_remote(&peer, "bob").await;

        let res = message::encode(&SyncMessage::CopyWorkspaceRes {
            pins: vec![],
            objects: vec![ObjectSnapshot::new("Box", "BoxBufferGeometry")],
        })
        .unwrap();
        peer.handle
            .transport_event(TransportEvent::Data(remote_id, res))
            .await
            .unwrap();

        peer.handle
            .select_object(ObjectId::new("probe"))
            .await
            .unwrap();
        // No RemoteCreate/WorkspaceCopied precedes the probe event
        assert_eq!(
            next_event(&mut peer.scene_rx).await,
            SceneEvent::SelectionGranted(ObjectId::new("probe"))
        );
    }
}
