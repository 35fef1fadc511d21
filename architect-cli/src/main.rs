//! Architect demo driver
//!
//! Spawns a few in-process peers wired over piped data channels and runs
//! a scripted collaborative editing session: create, pin, modify, late
//! join with workspace copy, and a disconnect with lock cleanup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::info;

use architect_core::core_mesh::verification::WorkspaceDirectory;
use architect_core::{
    ChannelHandle, LogConfig, LogLevel, MemoryDirectory, ObjectSnapshot, PeerId, SceneEvent,
    SessionContext, SessionOrigin, SyncConfig, SyncHandle, SyncRouter, TransportEvent, UserId,
    WorkspaceId,
};

#[derive(Parser, Debug)]
#[command(name = "architect")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run a scripted three-peer collaborative session
    Demo {
        /// Workspace name
        #[arg(default_value = "atelier")]
        workspace: String,
    },
}

struct Peer {
    name: String,
    peer_id: PeerId,
    handle: SyncHandle,
    scene: mpsc::Receiver<SceneEvent>,
}

async fn spawn_peer(
    directory: &Arc<MemoryDirectory>,
    workspace: &WorkspaceId,
    name: &str,
    origin: SessionOrigin,
) -> Result<Peer> {
    let peer_id = directory
        .issue_peer_id(workspace, &UserId::new(name))
        .await?;
    let ctx = SessionContext::new(
        workspace.clone(),
        UserId::new(name),
        peer_id.clone(),
        origin,
    );
    let directory: Arc<dyn WorkspaceDirectory> = directory.clone();
    let (handle, scene, _task) = SyncRouter::spawn(ctx, SyncConfig::default(), directory);

    Ok(Peer {
        name: name.to_string(),
        peer_id,
        handle,
        scene,
    })
}

fn pump(mut inbox: mpsc::Receiver<Vec<u8>>, receiver: SyncHandle, from: PeerId) {
    tokio::spawn(async move {
        while let Some(payload) = inbox.recv().await {
            if receiver
                .transport_event(TransportEvent::Data(from.clone(), payload))
                .await
                .is_err()
            {
                return;
            }
        }
        let _ = receiver.transport_event(TransportEvent::Closed(from)).await;
    });
}

async fn link(dialer: &Peer, acceptor: &Peer) -> Result<()> {
    let (to_acceptor, acceptor_inbox) = ChannelHandle::pair(acceptor.peer_id.clone(), 64);
    let (to_dialer, dialer_inbox) = ChannelHandle::pair(dialer.peer_id.clone(), 64);

    dialer
        .handle
        .connect_peer(acceptor.peer_id.clone(), to_acceptor)
        .await?;
    dialer
        .handle
        .transport_event(TransportEvent::Opened(acceptor.peer_id.clone()))
        .await?;
    acceptor
        .handle
        .transport_event(TransportEvent::Inbound(dialer.peer_id.clone(), to_dialer))
        .await?;

    pump(acceptor_inbox, acceptor.handle.clone(), dialer.peer_id.clone());
    pump(dialer_inbox, dialer.handle.clone(), acceptor.peer_id.clone());
    Ok(())
}

async fn await_event<F>(peer: &mut Peer, what: &str, pred: F) -> Result<SceneEvent>
where
    F: Fn(&SceneEvent) -> bool,
{
    loop {
        let event = timeout(Duration::from_secs(5), peer.scene.recv())
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out waiting for {}", peer.name, what))?
            .ok_or_else(|| anyhow::anyhow!("{} scene stream ended", peer.name))?;
        info!(peer = %peer.name, event = ?event, "scene event");
        if pred(&event) {
            return Ok(event);
        }
    }
}

async fn run_demo(workspace_name: &str) -> Result<()> {
    let directory = Arc::new(MemoryDirectory::new());
    let workspace = WorkspaceId::new(workspace_name);
    directory.create_workspace(workspace.clone()).await;

    info!(workspace = %workspace, "starting demo session");

    // Alice creates the workspace, Bob joins
    let alice = spawn_peer(&directory, &workspace, "alice", SessionOrigin::Created).await?;
    let mut bob = spawn_peer(&directory, &workspace, "bob", SessionOrigin::Joined).await?;
    link(&bob, &alice).await?;

    // Alice adds a box and edits it under a pin
    let snapshot = ObjectSnapshot::new("Box", "BoxBufferGeometry").at([0.0, 100.0, 0.0]);
    let box_id = snapshot.object_id.clone();
    alice.handle.create_object(snapshot.clone()).await?;
    alice.handle.select_object(box_id.clone()).await?;
    alice
        .handle
        .modify_object(snapshot.clone().at([300.0, 100.0, 0.0]).colored("ff9100"))
        .await?;
    alice.handle.deselect_object(box_id.clone()).await?;

    let modified = await_event(&mut bob, "alice's edit", |e| {
        matches!(e, SceneEvent::RemoteModify(_))
    })
    .await?;
    if let SceneEvent::RemoteModify(s) = &modified {
        println!("bob sees: {}", serde_json::to_string_pretty(s)?);
    }

    // Carol joins late and copies the workspace from the arbiter
    let mut carol = spawn_peer(&directory, &workspace, "carol", SessionOrigin::Joined).await?;
    link(&carol, &alice).await?;
    link(&carol, &bob).await?;
    carol.handle.request_workspace_copy().await?;

    let copied = await_event(&mut carol, "the workspace copy", |e| {
        matches!(e, SceneEvent::WorkspaceCopied { .. })
    })
    .await?;
    if let SceneEvent::WorkspaceCopied { objects, pins } = copied {
        println!("carol bootstrapped: {} objects, {} pins", objects, pins);
    }

    // Bob pins the box; Carol's selection attempt is refused
    bob.handle.select_object(box_id.clone()).await?;
    await_event(&mut carol, "bob's pin", |e| {
        matches!(e, SceneEvent::PinChanged { locked: true, .. })
    })
    .await?;
    carol.handle.select_object(box_id.clone()).await?;
    await_event(&mut carol, "the refusal", |e| {
        matches!(e, SceneEvent::SelectionRefused(_))
    })
    .await?;
    println!("carol's selection refused while bob holds the pin");

    // Bob drops out holding the pin; the survivors get it released
    for peer in [&alice, &carol] {
        peer.handle
            .transport_event(TransportEvent::Closed(bob.peer_id.clone()))
            .await?;
    }
    await_event(&mut carol, "the lock release", |e| {
        matches!(e, SceneEvent::PinChanged { locked: false, .. })
    })
    .await?;
    carol.handle.select_object(box_id.clone()).await?;
    await_event(&mut carol, "her own pin", |e| {
        matches!(e, SceneEvent::SelectionGranted(_))
    })
    .await?;
    println!("bob disconnected; carol now holds the pin");

    carol.handle.leave().await?;
    alice.handle.leave().await?;
    info!("demo session finished");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = LogLevel::parse(&args.log_level).unwrap_or_else(|| {
        eprintln!("Invalid log level '{}', using 'info'", args.log_level);
        LogLevel::Info
    });

    let config = LogConfig::new(log_level).json_format(args.json_logs);
    architect_core::init_logging_with_config(config)?;

    match args.command {
        Some(Command::Demo { workspace }) => run_demo(&workspace).await?,
        None => {
            info!("No command specified. Use --help for usage information.");
        }
    }

    Ok(())
}
