//! Transport module
//!
//! JSON-over-WebSocket framing shared by the relay and the sync client. A
//! WebSocket is split into a `FrameWriter` and a `FrameReader` so reading and
//! writing can run on separate tasks. Only text frames carry events; binary
//! frames are ignored and ping/pong is left to the WebSocket layer.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tracing::trace;
use tungstenite::{Error as WsError, Message};

use crate::error::{CuberseError, NetworkError, ProtocolError, Result};

/// Split a WebSocket into its writing and reading halves
pub fn split<S>(
    stream: WebSocketStream<S>,
    max_message_bytes: usize,
) -> (FrameWriter<S>, FrameReader<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = stream.split();
    (
        FrameWriter { sink },
        FrameReader {
            stream,
            max_message_bytes,
        },
    )
}

/// Reading half: yields the text of each event frame
pub struct FrameReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    max_message_bytes: usize,
}

impl<S> FrameReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Next text frame, or `None` once the peer closed the connection
    ///
    /// An oversized frame yields `ProtocolError::FrameTooLarge`; the
    /// connection stays usable.
    pub async fn next_text(&mut self) -> Result<Option<String>> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Ok(None)
                }
                Some(Err(WsError::Io(e))) => return Err(CuberseError::Io(e)),
                Some(Err(e)) => {
                    return Err(NetworkError::WebSocket(e.to_string()).into());
                }
            };

            match message {
                Message::Text(text) => {
                    if text.len() > self.max_message_bytes {
                        return Err(ProtocolError::FrameTooLarge {
                            size: text.len(),
                            max: self.max_message_bytes,
                        }
                        .into());
                    }
                    return Ok(Some(text));
                }
                Message::Close(frame) => {
                    trace!(frame = ?frame, "Received close frame");
                    return Ok(None);
                }
                Message::Binary(data) => {
                    trace!(len = data.len(), "Ignoring binary frame");
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

/// Writing half
pub struct FrameWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> FrameWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(Message::Text(text.to_string()))
            .await
            .map_err(map_ws_error)
    }

    /// Send a close frame and flush
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.map_err(map_ws_error)
    }
}

fn map_ws_error(e: WsError) -> CuberseError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => NetworkError::ConnectionClosed.into(),
        other => NetworkError::WebSocket(other.to_string()).into(),
    }
}
