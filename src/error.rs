//! Error handling module
//!
//! Defines custom error types for the Cuberse relay and sync client.

use std::io;

use thiserror::Error;

use crate::net::session::ConnectionId;

/// Main error type for Cuberse
#[derive(Error, Debug)]
pub enum CuberseError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Space membership errors
    #[error("Space error: {0}")]
    Space(#[from] SpaceError),

    /// Voxel/zone errors
    #[error("Zone error: {0}")]
    Zone(#[from] ZoneError),

    /// Sync client errors
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Too many connections from {0}")]
    TooManyConnections(String),

    #[error("Outbound queue full for session {0}")]
    OutboundQueueFull(ConnectionId),
}

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Missing field `{field}` in `{event}`")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid scene data: {0}")]
    InvalidSceneData(String),

    #[error("Invalid zone key: {0}")]
    InvalidZoneKey(String),
}

/// Space membership errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpaceError {
    #[error("Connection {0} is not in a space")]
    NotInSpace(ConnectionId),

    #[error("Space {space_id} does not match the sender's space {current}")]
    SpaceMismatch { space_id: String, current: String },
}

/// Voxel/zone errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZoneError {
    #[error("Grid coordinate ({x}, {y}, {z}) out of bounds for {divisions} divisions")]
    GridOutOfBounds {
        x: i32,
        y: i32,
        z: i32,
        divisions: i32,
    },

    #[error("World position is not finite")]
    NonFinitePosition,
}

/// Sync client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Only the space owner can {0}")]
    NotOwner(&'static str),

    #[error("Client is not connected")]
    NotConnected,

    #[error("Invalid cube spec: {0}")]
    InvalidCubeSpec(String),
}

/// Result type alias for Cuberse operations
pub type Result<T> = std::result::Result<T, CuberseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetworkError::ConnectionClosed;
        assert_eq!(err.to_string(), "Connection closed");

        let err = ProtocolError::MissingField {
            event: "login",
            field: "userId",
        };
        assert_eq!(err.to_string(), "Missing field `userId` in `login`");

        let err = ZoneError::GridOutOfBounds {
            x: 20,
            y: 0,
            z: 3,
            divisions: 20,
        };
        assert_eq!(
            err.to_string(),
            "Grid coordinate (20, 0, 3) out of bounds for 20 divisions"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: CuberseError = ClientError::NotOwner("reset the scene").into();
        assert!(matches!(err, CuberseError::Client(ClientError::NotOwner(_))));
        assert_eq!(
            err.to_string(),
            "Client error: Only the space owner can reset the scene"
        );

        let err: CuberseError = NetworkError::OutboundQueueFull(ConnectionId(7)).into();
        assert_eq!(
            err.to_string(),
            "Network error: Outbound queue full for session 7"
        );
    }
}
