//! End-to-end tests over a real localhost WebSocket

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tungstenite::Message;

use cuberse::client::{self, ClientStatus, SyncClient, SyncState};
use cuberse::config::ServerConfig;
use cuberse::net::accept_connections;
use cuberse::protocol::events::{ClientEvent, Login, ServerEvent};
use cuberse::state::AppState;
use cuberse::zone::{GridCoord, ZoneCoord, ZoneManager};

const WAIT: Duration = Duration::from_secs(10);

/// Start a relay on an ephemeral port; returns its URL
async fn start_relay() -> (String, Arc<AppState>, broadcast::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (shutdown_tx, _) = broadcast::channel(1);
    let state = Arc::new(AppState::new(ServerConfig::default(), shutdown_tx.clone()));

    let mut shutdown_rx = shutdown_tx.subscribe();
    let accept_state = state.clone();
    tokio::spawn(async move {
        accept_connections(listener, accept_state, &mut shutdown_rx).await;
    });

    (url, state, shutdown_tx)
}

fn sync_client(user: &str, space: &str, owned: &[&str]) -> SyncClient {
    SyncClient::new(
        user,
        space,
        owned.iter().map(|s| s.to_string()).collect(),
        ZoneManager::default(),
    )
}

async fn wait_until<F>(handle: &mut client::ClientHandle, predicate: F) -> ClientStatus
where
    F: FnMut(&ClientStatus) -> bool,
{
    tokio::time::timeout(WAIT, handle.wait_for(predicate))
        .await
        .expect("timed out")
        .unwrap()
}

#[tokio::test]
async fn test_late_joiner_syncs_over_websocket() {
    let (url, state, shutdown_tx) = start_relay().await;

    let (mut owner, owner_task) = client::connect_with(sync_client("alice", "room1", &["room1"]), &url)
        .await
        .unwrap();
    let status = wait_until(&mut owner, |s| s.state == SyncState::Synced).await;
    assert!(status.is_owner);

    owner
        .add_cube(ZoneCoord::ORIGIN, GridCoord::new(1, 0, 2), "#ff0000")
        .await
        .unwrap();
    owner
        .add_cube(ZoneCoord::new(1, -1), GridCoord::new(0, 3, 19), "#00ff00")
        .await
        .unwrap();

    let (mut guest, guest_task) = client::connect_with(sync_client("bob", "room1", &[]), &url)
        .await
        .unwrap();
    let status = wait_until(&mut guest, |s| s.state == SyncState::Synced && s.voxels == 2).await;
    assert!(!status.is_owner);
    assert_eq!(status.members, 2);

    // Live edits flow in both directions after the sync
    guest
        .remove_cube(ZoneCoord::ORIGIN, GridCoord::new(1, 0, 2))
        .await
        .unwrap();
    wait_until(&mut owner, |s| s.voxels == 1).await;

    assert_eq!(owner.snapshot().await.unwrap(), guest.snapshot().await.unwrap());
    assert_eq!(state.registry.owner_of("room1").as_deref(), Some("alice"));

    guest.shutdown().await;
    let guest_client = guest_task.await.unwrap().unwrap();
    assert_eq!(guest_client.state(), SyncState::Disconnected);

    wait_until(&mut owner, |s| s.members == 1).await;

    owner.shutdown().await;
    owner_task.await.unwrap().unwrap();
    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_owner_leaving_hands_over_ownership() {
    let (url, _state, shutdown_tx) = start_relay().await;

    let (mut owner, owner_task) = client::connect_with(sync_client("alice", "room2", &["room2"]), &url)
        .await
        .unwrap();
    wait_until(&mut owner, |s| s.state == SyncState::Synced).await;

    let (mut guest, _guest_task) = client::connect_with(sync_client("bob", "room2", &[]), &url)
        .await
        .unwrap();
    wait_until(&mut guest, |s| s.state == SyncState::Synced).await;

    owner.shutdown().await;
    owner_task.await.unwrap().unwrap();

    let status = wait_until(&mut guest, |s| s.is_owner).await;
    assert_eq!(status.members, 1);

    guest.shutdown().await;
    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_malformed_frames_are_skipped() {
    let (url, _state, shutdown_tx) = start_relay().await;

    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    ws.send(Message::Text("not json".to_string())).await.unwrap();
    ws.send(Message::Text(r#"{"event":"login","data":{}}"#.to_string()))
        .await
        .unwrap();

    let login = ClientEvent::Login(Login::new("alice", "room3"));
    ws.send(Message::Text(login.to_text().unwrap())).await.unwrap();

    // The first reply proves the connection survived the bad frames
    let reply = tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return ServerEvent::from_text(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected: {:?}", other),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(reply.name(), "user-joined");

    ws.close(None).await.unwrap();
    let _ = shutdown_tx.send(());
}
