//! A single raw WebSocket connection, split into a locked writer and a
//! frame reader. It never reconnects on its own.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainbridge_core::error::TransportError;
use chainbridge_core::policy::ReconnectBackoff;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 15 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 15 * 1024 * 1024;

/// Configuration for WebSocket transports.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Largest accepted inbound message, in bytes.
    pub max_message_size: usize,
    /// Upper bound for a single write (including keep-alive pongs).
    pub write_timeout: Duration,
    /// Upper bound for dial plus handshake.
    pub connect_timeout: Duration,
    pub backoff: ReconnectBackoff,
    /// Capacity of the inbound stream handed to the subscriber.
    pub channel_capacity: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            write_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            backoff: ReconnectBackoff::default(),
            channel_capacity: 256,
        }
    }
}

/// One inbound frame the caller has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text or binary payload.
    Data(Bytes),
    /// Keep-alive ping; answer with [`WsWriter::pong`].
    Ping(Vec<u8>),
}

pub struct WsConnection {
    stream: WsStream,
    max_message_size: usize,
    write_timeout: Duration,
}

impl WsConnection {
    /// Dial `url` and complete the WebSocket handshake.
    pub async fn dial(url: &str, config: &WsConfig) -> Result<Self, TransportError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_size);
        ws_config.max_frame_size = Some(config.max_message_size);

        let connect = tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false);
        let (stream, _response) = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::Timeout {
                ms: config.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            stream,
            max_message_size: config.max_message_size,
            write_timeout: config.write_timeout,
        })
    }

    pub fn split(self) -> (WsWriter, WsReader) {
        let (sink, stream) = self.stream.split();
        (
            WsWriter {
                sink: Mutex::new(sink),
                write_timeout: self.write_timeout,
            },
            WsReader {
                stream,
                max_message_size: self.max_message_size,
            },
        )
    }
}

/// Write half. Every write takes the same lock, so subscribe payloads and
/// keep-alive replies never interleave.
pub struct WsWriter {
    sink: Mutex<SplitSink<WsStream, Message>>,
    write_timeout: Duration,
}

impl WsWriter {
    /// Send a payload as a text frame (binary if it is not UTF-8).
    pub async fn send_payload(&self, payload: Bytes) -> Result<(), TransportError> {
        let msg = match String::from_utf8(payload.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.send(msg).await
    }

    pub async fn pong(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.send(Message::Pong(data)).await
    }

    async fn send(&self, msg: Message) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_timeout, sink.send(msg)).await {
            Err(_) => Err(TransportError::Timeout {
                ms: self.write_timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(TransportError::WebSocket(e.to_string())),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Send a close frame. Errors are ignored, the peer may already be gone.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = tokio::time::timeout(self.write_timeout, sink.close()).await;
    }
}

/// Read half.
pub struct WsReader {
    stream: SplitStream<WsStream>,
    max_message_size: usize,
}

impl WsReader {
    /// Next data or ping frame. `Ok(None)` means the peer closed the
    /// connection. Cancel-safe.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            let Some(msg) = self.stream.next().await else {
                return Ok(None);
            };
            let data = match msg.map_err(map_read_error)? {
                Message::Text(text) => Bytes::from(text),
                Message::Binary(bin) => Bytes::from(bin),
                Message::Ping(payload) => return Ok(Some(Frame::Ping(payload))),
                Message::Close(_) => return Ok(None),
                Message::Pong(_) | Message::Frame(_) => continue,
            };
            if data.len() > self.max_message_size {
                return Err(TransportError::MessageTooLarge {
                    size: data.len(),
                    max: self.max_message_size,
                });
            }
            return Ok(Some(Frame::Data(data)));
        }
    }
}

fn map_read_error(e: WsError) -> TransportError {
    match e {
        WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
            TransportError::MessageTooLarge { size, max: max_size }
        }
        other => TransportError::WebSocket(other.to_string()),
    }
}
