//! The `Transport` trait: how a subscription obtains raw messages.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{BridgeError, TransportError};
use crate::filter::Filter;
use crate::types::Endpoint;

/// Concrete transport variant, for logs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Persistent socket that reconnects with backoff.
    ManagedWebSocket,
    /// Ticker-driven request/response polling.
    RpcPolling,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ManagedWebSocket => write!(f, "managed-ws"),
            Self::RpcPolling => write!(f, "rpc-polling"),
        }
    }
}

/// One item of a transport's inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The filter payload was (re)sent on a fresh connection. The next
    /// message is that connection's subscription confirmation.
    /// `generation` numbers connections from 1.
    Subscribed { generation: u64 },
    /// A raw inbound message.
    Message(Bytes),
}

/// Receiving half of a transport's inbound stream. It ends when the
/// transport is unsubscribed.
pub type InboundStream = mpsc::Receiver<Inbound>;

/// The async contract shared by every transport variant.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    /// The endpoint URL.
    fn url(&self) -> &str;

    /// Start the subscription described by `filter` and return the stream
    /// of inbound messages. Fails on the first dial / request, and with
    /// [`TransportError::AlreadySubscribed`] on a second call.
    async fn subscribe(&self, filter: Arc<dyn Filter>) -> Result<InboundStream, TransportError>;

    /// Write a payload to the endpoint.
    async fn send(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Drop connection `generation` and establish a new one. A request
    /// for a connection that is already gone is ignored. Transports
    /// without a connection concept ignore every request.
    async fn reconnect(&self, _generation: u64) {}

    /// Stop reading and release the endpoint. Idempotent.
    async fn unsubscribe(&self);
}

/// Builds a transport for an endpoint, choosing the variant from
/// `endpoint.protocol`.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>, BridgeError>;
}
