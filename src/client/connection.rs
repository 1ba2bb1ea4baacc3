//! Client connection driver
//!
//! Runs a `SyncClient` against a relay over WebSocket on a single task. Socket
//! events, local edit commands and snapshot retries are all handled by that
//! one task, so the zone state is never mutated concurrently. Callers talk to
//! it through a `ClientHandle`.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, info, warn};

use super::sync::{SyncClient, SyncState};
use crate::config::ClientConfig;
use crate::error::{ClientError, CuberseError, NetworkError, Result};
use crate::net::transport::{self, FrameWriter};
use crate::protocol::events::{ClientEvent, ModelCube, ServerEvent};
use crate::protocol::scene::SceneSnapshot;
use crate::zone::{GridCoord, ZoneCoord};

/// Largest accepted inbound frame
pub const CLIENT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Pending commands before callers wait
const COMMAND_BUFFER: usize = 64;

/// Observable summary of a running client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub state: SyncState,
    pub is_owner: bool,
    pub members: usize,
    pub voxels: usize,
    pub current_zone: ZoneCoord,
}

impl ClientStatus {
    fn of(client: &SyncClient) -> Self {
        Self {
            state: client.state(),
            is_owner: client.is_owner(),
            members: client.members().len(),
            voxels: client.zones().voxel_count(),
            current_zone: client.zones().current_zone(),
        }
    }
}

/// A local edit applied by the driver task
#[derive(Debug)]
enum Edit {
    AddCube {
        zone: ZoneCoord,
        grid: GridCoord,
        color: String,
    },
    RemoveCube {
        zone: ZoneCoord,
        grid: GridCoord,
    },
    PlaceModel(Vec<ModelCube>),
    ResetScene(SceneSnapshot),
    SwitchZone(ZoneCoord),
}

enum Command {
    Edit(Edit, oneshot::Sender<Result<()>>),
    Snapshot(oneshot::Sender<SceneSnapshot>),
    Shutdown,
}

/// Handle to a running client task
pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ClientStatus>,
}

impl ClientHandle {
    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    /// Wait until the status satisfies `predicate`
    pub async fn wait_for<F>(&mut self, predicate: F) -> Result<ClientStatus>
    where
        F: FnMut(&ClientStatus) -> bool,
    {
        self.status
            .wait_for(predicate)
            .await
            .map(|status| status.clone())
            .map_err(|_| ClientError::NotConnected.into())
    }

    pub async fn add_cube(&self, zone: ZoneCoord, grid: GridCoord, color: &str) -> Result<()> {
        self.edit(Edit::AddCube {
            zone,
            grid,
            color: color.to_string(),
        })
        .await
    }

    pub async fn remove_cube(&self, zone: ZoneCoord, grid: GridCoord) -> Result<()> {
        self.edit(Edit::RemoveCube { zone, grid }).await
    }

    pub async fn place_model(&self, cubes: Vec<ModelCube>) -> Result<()> {
        self.edit(Edit::PlaceModel(cubes)).await
    }

    /// Replace the scene for the whole space (owner only)
    pub async fn reset_scene(&self, snapshot: SceneSnapshot) -> Result<()> {
        self.edit(Edit::ResetScene(snapshot)).await
    }

    pub async fn switch_zone(&self, zone: ZoneCoord) -> Result<()> {
        self.edit(Edit::SwitchZone(zone)).await
    }

    /// Export the client's current scene
    pub async fn snapshot(&self) -> Result<SceneSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| ClientError::NotConnected.into())
    }

    /// Close the connection; the task then returns the final `SyncClient`
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    async fn edit(&self, edit: Edit) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Edit(edit, tx)).await?;
        rx.await.map_err(|_| CuberseError::from(ClientError::NotConnected))?
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::NotConnected.into())
    }
}

/// Connect to the relay named in `config` and start syncing
pub async fn connect(config: &ClientConfig) -> Result<(ClientHandle, JoinHandle<Result<SyncClient>>)> {
    connect_with(SyncClient::from_config(config), &config.server_url).await
}

/// Connect an existing `SyncClient` to `url`
pub async fn connect_with(
    client: SyncClient,
    url: &str,
) -> Result<(ClientHandle, JoinHandle<Result<SyncClient>>)> {
    let (ws_stream, _response) = connect_async(url)
        .await
        .map_err(|e| CuberseError::Network(NetworkError::WebSocket(e.to_string())))?;

    info!(
        url = %url,
        user_id = %client.user_id(),
        space_id = %client.space_id(),
        "Connected to relay"
    );

    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (status_tx, status_rx) = watch::channel(ClientStatus::of(&client));
    let task = tokio::spawn(drive(client, ws_stream, command_rx, status_tx));

    Ok((
        ClientHandle {
            commands: command_tx,
            status: status_rx,
        },
        task,
    ))
}

async fn drive<S>(
    mut client: SyncClient,
    ws_stream: WebSocketStream<S>,
    mut commands: mpsc::Receiver<Command>,
    status: watch::Sender<ClientStatus>,
) -> Result<SyncClient>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut writer, mut reader) = transport::split(ws_stream, CLIENT_MAX_MESSAGE_BYTES);

    let login = client.on_connected();
    send_event(&mut writer, &login).await?;
    status.send_replace(ClientStatus::of(&client));

    let result = loop {
        let retry_at = client
            .next_retry_at()
            .map(Instant::from_std)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
        let retry_armed = client.next_retry_at().is_some();

        tokio::select! {
            frame = reader.next_text() => {
                match frame {
                    Ok(Some(text)) => match ServerEvent::from_text(&text) {
                        Ok(event) => {
                            let replies = client.handle(event);
                            if let Err(e) = send_all(&mut writer, &replies).await {
                                break Err(e);
                            }
                        }
                        Err(e) => warn!(error = %e, "Malformed server event"),
                    },
                    Ok(None) => {
                        info!("Relay closed the connection");
                        break Ok(());
                    }
                    Err(CuberseError::Protocol(e)) => warn!(error = %e, "Skipping frame"),
                    Err(e) => break Err(e),
                }
            }
            command = commands.recv() => {
                match command {
                    Some(Command::Edit(edit, reply)) => {
                        let outcome = apply_edit(&mut client, edit);
                        let outcome = match outcome {
                            Ok(events) => send_all(&mut writer, &events).await,
                            Err(e) => Err(e),
                        };
                        let _ = reply.send(outcome);
                    }
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(client.zones().export_snapshot());
                    }
                    Some(Command::Shutdown) | None => {
                        debug!("Client shutting down");
                        if let Err(e) = writer.close().await {
                            debug!(error = %e, "Error during close");
                        }
                        break Ok(());
                    }
                }
            }
            _ = tokio::time::sleep_until(retry_at), if retry_armed => {
                if let Some(request) = client.poll_snapshot_retry(std::time::Instant::now()) {
                    if let Err(e) = send_event(&mut writer, &request).await {
                        break Err(e);
                    }
                }
            }
        }

        status.send_replace(ClientStatus::of(&client));
    };

    client.on_disconnected();
    status.send_replace(ClientStatus::of(&client));
    result.map(|()| client)
}

fn apply_edit(client: &mut SyncClient, edit: Edit) -> Result<Vec<ClientEvent>> {
    let events: Vec<ClientEvent> = match edit {
        Edit::AddCube { zone, grid, color } => client.add_cube(zone, grid, &color)?.into_iter().collect(),
        Edit::RemoveCube { zone, grid } => client.remove_cube(zone, grid)?.into_iter().collect(),
        Edit::PlaceModel(cubes) => client.place_model(cubes)?.into_iter().collect(),
        Edit::ResetScene(snapshot) => client.reset_scene(&snapshot)?,
        Edit::SwitchZone(zone) => {
            client.zones_mut().switch_zone(zone);
            Vec::new()
        }
    };
    Ok(events)
}

async fn send_all<S>(writer: &mut FrameWriter<S>, events: &[ClientEvent]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    for event in events {
        send_event(writer, event).await?;
    }
    Ok(())
}

async fn send_event<S>(writer: &mut FrameWriter<S>, event: &ClientEvent) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = event.to_text()?;
    debug!(event = event.name(), "Sending event");
    writer.send_text(&text).await
}
