//! Relay engine
//!
//! Fans events out to the connections of a space, or to a single connection.
//! Delivery is best effort: frames are encoded once and pushed onto each
//! session's bounded outbound queue without waiting, so a stalled client
//! never holds up the others.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::registry::SpaceRegistry;
use crate::net::session::{ConnectionId, SessionManager};
use crate::protocol::events::ServerEvent;

pub struct RelayEngine {
    sessions: Arc<SessionManager>,
    registry: Arc<SpaceRegistry>,
}

impl RelayEngine {
    pub fn new(sessions: Arc<SessionManager>, registry: Arc<SpaceRegistry>) -> Self {
        Self { sessions, registry }
    }

    /// Deliver `event` to every connection joined to `space_id`
    ///
    /// Returns the number of connections the frame was queued for.
    pub fn broadcast(&self, space_id: &str, event: &ServerEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };

        let delivered = self
            .registry
            .connections_of(space_id)
            .into_iter()
            .filter(|conn_id| self.deliver(*conn_id, &frame))
            .count();

        trace!(
            space_id = %space_id,
            event = event.name(),
            delivered = delivered,
            "Broadcast"
        );
        delivered
    }

    /// Deliver `event` to a single connection
    pub fn send_to(&self, conn_id: ConnectionId, event: &ServerEvent) -> bool {
        match encode(event) {
            Some(frame) => self.deliver(conn_id, &frame),
            None => false,
        }
    }

    /// Deliver `event` to the first connection of the space owner
    ///
    /// Returns `false` (and logs) when the space has no reachable owner.
    pub fn relay_to_owner(&self, space_id: &str, event: &ServerEvent) -> bool {
        let Some(conn_id) = self.registry.owner_connection(space_id) else {
            warn!(
                space_id = %space_id,
                event = event.name(),
                "No owner socket found, dropping event"
            );
            return false;
        };
        self.send_to(conn_id, event)
    }

    fn deliver(&self, conn_id: ConnectionId, frame: &Arc<str>) -> bool {
        let Some(session) = self.sessions.get(conn_id) else {
            debug!(conn_id = %conn_id, "Dropping frame for unknown session");
            return false;
        };

        match session.enqueue(frame.clone()) {
            Ok(()) => true,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "Frame not delivered");
                false
            }
        }
    }
}

fn encode(event: &ServerEvent) -> Option<Arc<str>> {
    match event.to_text() {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            warn!(event = event.name(), error = %e, "Failed to encode event");
            None
        }
    }
}
