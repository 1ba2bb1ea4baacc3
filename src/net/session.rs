//! Session management module
//!
//! Manages client connections including:
//! - Session lifecycle (creation, tracking, cleanup)
//! - Per-session identity (user id after `login`, current space after join)
//! - Bounded outbound queues so a stalled socket never blocks the relay
//! - Thread-safe session registry with per-IP limits

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{CuberseError, NetworkError, Result};

/// Transport-level connection identifier
///
/// Sent on the wire as `requesterSocketId` / `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session state in the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Socket open, no successful `login` yet
    Connected,
    /// Logged in and joined to a space
    Joined,
    /// Closing: no more frames are accepted for delivery
    Closing,
    /// Socket gone
    Closed,
}

impl SessionState {
    /// Check if the session is still active (not closing/closed)
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Closing | SessionState::Closed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connected => "Connected",
            SessionState::Joined => "Joined",
            SessionState::Closing => "Closing",
            SessionState::Closed => "Closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What to do when a session's outbound queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Discard the oldest queued frame to make room
    #[default]
    DropOldest,
    /// Close the connection
    Disconnect,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop-oldest" | "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "disconnect" => Ok(OverflowPolicy::Disconnect),
            other => Err(format!("unknown overflow policy: {}", other)),
        }
    }
}

/// Result of pushing onto an outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after discarding the oldest frame
    DroppedOldest,
    /// Queue full; nothing queued
    Full,
    /// Queue already closed
    Closed,
}

/// Bounded single-consumer frame queue
///
/// Producers never wait. The consumer (the socket writer task) awaits
/// `pop`, which returns `None` once the queue is closed and drained.
pub struct OutboundQueue {
    frames: Mutex<VecDeque<Arc<str>>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, frame: Arc<str>, policy: OverflowPolicy) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }

        let outcome = {
            let mut frames = self.frames.lock();
            if frames.len() < self.capacity {
                frames.push_back(frame);
                PushOutcome::Queued
            } else {
                match policy {
                    OverflowPolicy::DropOldest => {
                        frames.pop_front();
                        frames.push_back(frame);
                        PushOutcome::DroppedOldest
                    }
                    OverflowPolicy::Disconnect => PushOutcome::Full,
                }
            }
        };

        if outcome != PushOutcome::Full {
            self.notify.notify_one();
        }
        outcome
    }

    /// Wait for the next frame
    pub async fn pop(&self) -> Option<Arc<str>> {
        loop {
            if let Some(frame) = self.frames.lock().pop_front() {
                return Some(frame);
            }
            if self.is_closed() {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One physical socket
pub struct ConnectionSession {
    /// Unique connection identifier
    pub id: ConnectionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Time of session creation
    pub created_at: Instant,
    state: RwLock<SessionState>,
    /// Set by `login`
    user_id: RwLock<Option<String>>,
    /// Set on join, cleared on leave
    space_id: RwLock<Option<String>>,
    last_activity: RwLock<Instant>,
    outbound: OutboundQueue,
    overflow_policy: OverflowPolicy,
    closed_signal: Notify,
}

impl ConnectionSession {
    pub fn new(
        id: ConnectionId,
        address: SocketAddr,
        queue_capacity: usize,
        overflow_policy: OverflowPolicy,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            address,
            created_at: now,
            state: RwLock::new(SessionState::Connected),
            user_id: RwLock::new(None),
            space_id: RwLock::new(None),
            last_activity: RwLock::new(now),
            outbound: OutboundQueue::new(queue_capacity),
            overflow_policy,
            closed_signal: Notify::new(),
        }
    }

    /// Get the IP address as a string (without port)
    pub fn ip(&self) -> String {
        self.address.ip().to_string()
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn set_state(&self, new_state: SessionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        if old_state != new_state {
            debug!(
                conn_id = %self.id,
                old_state = %old_state,
                new_state = %new_state,
                "Session state changed"
            );
        }
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    pub fn space_id(&self) -> Option<String> {
        self.space_id.read().clone()
    }

    /// Record the identity and space of a successful join
    pub fn set_joined(&self, user_id: &str, space_id: &str) {
        *self.user_id.write() = Some(user_id.to_string());
        *self.space_id.write() = Some(space_id.to_string());
        self.set_state(SessionState::Joined);
    }

    /// Forget the current space
    pub fn clear_space(&self) {
        *self.space_id.write() = None;
        if self.is_active() {
            self.set_state(SessionState::Connected);
        }
    }

    /// Whether `space_id` is the space this session is joined to
    pub fn in_space(&self, space_id: &str) -> bool {
        self.space_id.read().as_deref() == Some(space_id)
    }

    /// Update the last activity timestamp
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read()
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// Queue an encoded frame for delivery without waiting
    ///
    /// Under `Disconnect` a full queue closes the session and the frame is
    /// lost; under `DropOldest` the oldest pending frame is discarded.
    pub fn enqueue(&self, frame: Arc<str>) -> std::result::Result<(), NetworkError> {
        match self.outbound.push(frame, self.overflow_policy) {
            PushOutcome::Queued => Ok(()),
            PushOutcome::DroppedOldest => {
                warn!(conn_id = %self.id, "Outbound queue full, dropped oldest frame");
                Ok(())
            }
            PushOutcome::Full => {
                warn!(conn_id = %self.id, "Outbound queue full, disconnecting");
                self.close();
                Err(NetworkError::OutboundQueueFull(self.id))
            }
            PushOutcome::Closed => Err(NetworkError::ConnectionClosed),
        }
    }

    /// Next frame for the socket writer; `None` once closed and drained
    pub async fn next_outbound(&self) -> Option<Arc<str>> {
        self.outbound.pop().await
    }

    pub fn pending_frames(&self) -> usize {
        self.outbound.len()
    }

    /// Stop accepting frames and wake the writer and any `closed()` waiter
    pub fn close(&self) {
        if self.is_active() {
            self.set_state(SessionState::Closing);
        }
        self.outbound.close();
        self.closed_signal.notify_waiters();
    }

    /// Resolve once the session has been closed from any side
    pub async fn closed(&self) {
        loop {
            let notified = self.closed_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_active() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("user_id", &self.user_id())
            .field("space_id", &self.space_id())
            .field("pending_frames", &self.pending_frames())
            .field("idle_duration", &self.idle_duration())
            .finish()
    }
}

/// Thread-safe session manager
pub struct SessionManager {
    sessions: DashMap<ConnectionId, Arc<ConnectionSession>>,
    /// IP address to session ids, for connection limiting
    ip_to_sessions: DashMap<String, Vec<ConnectionId>>,
    next_id: AtomicU64,
    max_per_ip: usize,
    queue_capacity: usize,
    overflow_policy: OverflowPolicy,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_limits(32, 256, OverflowPolicy::DropOldest)
    }

    /// Create a session manager with custom limits
    pub fn with_limits(
        max_per_ip: usize,
        queue_capacity: usize,
        overflow_policy: OverflowPolicy,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            ip_to_sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            max_per_ip,
            queue_capacity,
            overflow_policy,
        }
    }

    /// Create a new session and register it
    pub fn create_session(&self, address: SocketAddr) -> Result<Arc<ConnectionSession>> {
        let ip = address.ip().to_string();

        let current_count = self.ip_to_sessions.get(&ip).map(|v| v.len()).unwrap_or(0);
        if current_count >= self.max_per_ip {
            warn!(
                ip = %ip,
                count = current_count,
                max = self.max_per_ip,
                "Connection limit exceeded for IP"
            );
            return Err(CuberseError::Network(NetworkError::TooManyConnections(ip)));
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let session = Arc::new(ConnectionSession::new(
            id,
            address,
            self.queue_capacity,
            self.overflow_policy,
        ));

        self.sessions.insert(id, session.clone());
        self.ip_to_sessions.entry(ip).or_default().push(id);

        info!(conn_id = %id, address = %address, "Session created");

        Ok(session)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionSession>> {
        self.sessions.get(&id).map(|r| r.clone())
    }

    /// Remove a session, closing its queue
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionSession>> {
        let (_, session) = self.sessions.remove(&id)?;

        session.close();
        session.set_state(SessionState::Closed);

        let ip = session.ip();
        if let Some(mut ids) = self.ip_to_sessions.get_mut(&ip) {
            ids.retain(|&sid| sid != id);
        }
        self.ip_to_sessions.remove_if(&ip, |_, ids| ids.is_empty());

        info!(
            conn_id = %id,
            user_id = ?session.user_id(),
            "Session removed"
        );
        Some(session)
    }

    /// Close every session's queue so writer tasks finish
    pub fn disconnect_all(&self) {
        for session in self.sessions.iter() {
            session.close();
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions_from_ip(&self, ip: &str) -> Vec<Arc<ConnectionSession>> {
        self.ip_to_sessions
            .get(ip)
            .map(|ids| ids.iter().filter_map(|&id| self.get(id)).collect())
            .unwrap_or_default()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
