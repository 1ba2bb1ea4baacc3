//! Connection handler module
//!
//! Handles the lifecycle of relay connections:
//! - WebSocket upgrade and session registration
//! - A writer task draining the session's outbound queue into the socket
//! - Event dispatch to the space registry and relay engine
//! - Leave, ownership transfer and membership notices on disconnect

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use crate::error::{CuberseError, NetworkError, Result, SpaceError};
use crate::net::session::ConnectionSession;
use crate::net::transport::{self, FrameWriter};
use crate::protocol::events::{
    ClientEvent, Login, MembershipNotice, OwnerRequest, RoomInfo, RoomInfoReply, ServerEvent,
    SpaceRef, UserList,
};
use crate::space::Departure;
use crate::AppState;

/// Accept WebSocket connections until shutdown
pub async fn accept_connections(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            let handler = ConnectionHandler::new(state);
                            if let Err(e) = handler.handle_websocket(stream, addr).await {
                                debug!(address = %addr, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept WebSocket connection");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("WebSocket listener shutting down");
                break;
            }
        }
    }
}

/// Connection handler for relay clients
pub struct ConnectionHandler {
    /// Shared application state
    state: Arc<AppState>,
}

impl ConnectionHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Upgrade a TCP stream and serve it
    pub async fn handle_websocket(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling WebSocket connection");

        stream.set_nodelay(true)?;

        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| CuberseError::Network(NetworkError::WebSocket(e.to_string())))?;

        info!(address = %addr, "WebSocket connection established");

        self.handle_connection(ws_stream, addr).await
    }

    /// Serve an established WebSocket until either side closes it
    pub async fn handle_connection<S>(&self, ws_stream: WebSocketStream<S>, addr: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session = self.state.session_manager.create_session(addr)?;
        let (writer, mut reader) = transport::split(ws_stream, self.state.config.max_message_bytes);

        let writer_task = tokio::spawn(write_loop(session.clone(), writer));

        debug!(conn_id = %session.id, address = %addr, "Starting connection handler");

        let result = loop {
            let frame = tokio::select! {
                frame = reader.next_text() => frame,
                _ = session.closed() => {
                    debug!(conn_id = %session.id, "Session closed by relay");
                    break Ok(());
                }
            };

            match frame {
                Ok(Some(text)) => {
                    session.touch();
                    self.dispatch_text(&session, &text);
                }
                Ok(None) => {
                    debug!(conn_id = %session.id, "Connection closed");
                    break Ok(());
                }
                Err(CuberseError::Protocol(e)) => {
                    warn!(conn_id = %session.id, error = %e, "Skipping frame");
                }
                Err(CuberseError::Network(NetworkError::ConnectionClosed)) => {
                    debug!(conn_id = %session.id, "Connection closed");
                    break Ok(());
                }
                Err(e) => {
                    warn!(conn_id = %session.id, error = %e, "Connection error");
                    break Err(e);
                }
            }

            if !session.is_active() {
                debug!(conn_id = %session.id, "Session no longer active");
                break Ok(());
            }
        };

        // Closed by the relay: the writer may be stuck on a peer that stopped reading
        let evicted = !session.is_active();
        self.disconnect(&session);

        if evicted {
            writer_task.abort();
        }
        if let Err(e) = writer_task.await {
            trace!(conn_id = %session.id, error = %e, "Writer task failed");
        }

        result
    }

    /// Decode and dispatch one text frame; malformed frames are logged and dropped
    pub fn dispatch_text(&self, session: &ConnectionSession, text: &str) {
        match ClientEvent::from_text(text) {
            Ok(event) => self.dispatch(session, event),
            Err(e) => warn!(conn_id = %session.id, error = %e, "Malformed event"),
        }
    }

    /// Apply one client event
    pub fn dispatch(&self, session: &ConnectionSession, event: ClientEvent) {
        trace!(conn_id = %session.id, event = event.name(), "Dispatching event");

        match event {
            ClientEvent::Login(login) => self.handle_login(session, &login),
            ClientEvent::RequestRoomInfo(request) => self.handle_room_info_request(session, request),
            ClientEvent::SendRoomInfo(reply) => self.handle_room_info_reply(session, reply),
            mutation => self.handle_mutation(session, mutation),
        }
    }

    fn handle_login(&self, session: &ConnectionSession, login: &Login) {
        let (user_id, space_id) = match login.identity() {
            Ok(identity) => identity,
            Err(e) => {
                warn!(conn_id = %session.id, error = %e, "Ignoring login");
                return;
            }
        };

        let outcome = self
            .state
            .registry
            .join(session.id, user_id, space_id, &login.owned_space_ids);
        session.set_joined(user_id, space_id);

        info!(
            conn_id = %session.id,
            user_id = %user_id,
            space_id = %space_id,
            is_owner = outcome.is_owner,
            members = outcome.members.len(),
            "User joined space"
        );

        if let Some(previous) = outcome.previous.as_ref().filter(|p| p.space_id != space_id) {
            self.announce_departure(previous);
        }

        let relay = &self.state.relay;
        relay.broadcast(
            space_id,
            &ServerEvent::UserJoined(MembershipNotice {
                user_id: user_id.to_string(),
                user_list: outcome.members.clone(),
            }),
        );
        relay.broadcast(
            space_id,
            &ServerEvent::UserList(UserList {
                space_id: space_id.to_string(),
                user_list: outcome.members,
            }),
        );
    }

    fn handle_room_info_request(&self, session: &ConnectionSession, request: SpaceRef) {
        if let Err(e) = self.check_space(session, &request.space_id) {
            debug!(conn_id = %session.id, error = %e, "Ignoring room info request");
            return;
        }

        let event = ServerEvent::RequestRoomInfo(OwnerRequest {
            requester_socket_id: session.id,
            space_id: request.space_id.clone(),
        });
        if self.state.relay.relay_to_owner(&request.space_id, &event) {
            debug!(
                conn_id = %session.id,
                space_id = %request.space_id,
                "Room info request relayed to owner"
            );
        }
    }

    fn handle_room_info_reply(&self, session: &ConnectionSession, reply: RoomInfoReply) {
        let (Some(to), Some(scene_data)) = (reply.to, reply.scene_data) else {
            debug!(conn_id = %session.id, "Ignoring room info reply without target or scene");
            return;
        };

        let sender_space = session.space_id();
        if sender_space.is_none() || self.state.registry.space_of(to) != sender_space {
            debug!(conn_id = %session.id, to = %to, "Ignoring room info reply outside the space");
            return;
        }

        if self.state.relay.send_to(to, &ServerEvent::RoomInfo(RoomInfo { scene_data })) {
            debug!(from = %session.id, to = %to, "Room info delivered");
        }
    }

    fn handle_mutation(&self, session: &ConnectionSession, event: ClientEvent) {
        let name = event.name();
        let space_id = match event.scoped_space() {
            Some(space_id) => space_id.to_string(),
            None => return,
        };

        if let Err(e) = self.check_space(session, &space_id) {
            debug!(conn_id = %session.id, event = name, error = %e, "Dropping event");
            return;
        }

        if let Some(outbound) = event.into_broadcast() {
            self.state.relay.broadcast(&space_id, &outbound);
        }
    }

    /// The session must currently be joined to `space_id`
    fn check_space(&self, session: &ConnectionSession, space_id: &str) -> std::result::Result<(), SpaceError> {
        match session.space_id() {
            Some(current) if current == space_id => Ok(()),
            Some(current) => Err(SpaceError::SpaceMismatch {
                space_id: space_id.to_string(),
                current,
            }),
            None => Err(SpaceError::NotInSpace(session.id)),
        }
    }

    /// Leave the space, notify the remaining members and drop the session
    ///
    /// `user-left` goes out only when this was the user's last connection in
    /// the space; `user-list` goes out on every departure.
    pub fn disconnect(&self, session: &ConnectionSession) {
        if let Some(departure) = self.state.registry.leave(session.id) {
            session.clear_space();
            info!(
                conn_id = %session.id,
                user_id = %departure.user_id,
                space_id = %departure.space_id,
                "Connection left space"
            );
            self.announce_departure(&departure);
        }
        self.state.session_manager.remove(session.id);
    }

    fn announce_departure(&self, departure: &Departure) {
        if departure.space_closed() {
            return;
        }

        let relay = &self.state.relay;
        if departure.user_left {
            relay.broadcast(
                &departure.space_id,
                &ServerEvent::UserLeft(MembershipNotice {
                    user_id: departure.user_id.clone(),
                    user_list: departure.members.clone(),
                }),
            );
        }
        relay.broadcast(
            &departure.space_id,
            &ServerEvent::UserList(UserList {
                space_id: departure.space_id.clone(),
                user_list: departure.members.clone(),
            }),
        );
    }
}

/// Drain a session's outbound queue into the socket
async fn write_loop<S>(session: Arc<ConnectionSession>, mut writer: FrameWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = session.next_outbound().await {
        if let Err(e) = writer.send_text(&frame).await {
            debug!(conn_id = %session.id, error = %e, "Write failed");
            session.close();
            return;
        }
    }

    if let Err(e) = writer.close().await {
        trace!(conn_id = %session.id, error = %e, "Error during close");
    }
}
