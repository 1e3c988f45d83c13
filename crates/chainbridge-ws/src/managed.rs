//! Reconnecting WebSocket transport.
//!
//! The transport dials once in [`ManagedWsTransport::connect`]. After
//! `subscribe`, a background read loop forwards every inbound frame. On a
//! read failure (EOF, protocol error, oversized message) or an explicit
//! [`Transport::reconnect`] it redials with [`ReconnectBackoff`], re-sends
//! the filter payload on the new connection and pushes
//! [`Inbound::Subscribed`] so the next frame is treated as its
//! confirmation. Connections are numbered from 1; a reconnect request
//! naming a connection that is already gone does nothing. Only
//! `unsubscribe` ends the loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use chainbridge_core::error::TransportError;
use chainbridge_core::filter::Filter;
use chainbridge_core::transport::{Inbound, InboundStream, Transport, TransportKind};

use crate::connection::{Frame, WsConfig, WsConnection, WsReader, WsWriter};

pub struct ManagedWsTransport {
    inner: Arc<Shared>,
}

struct Shared {
    url: String,
    config: WsConfig,
    /// Write half of the live connection, swapped on reconnect. Writers
    /// clone the `Arc` and release this lock before writing, so a write
    /// racing a reconnect lands on one connection or fails cleanly.
    writer: RwLock<Option<Arc<WsWriter>>>,
    /// Read half of the initial connection until `subscribe` takes it.
    reader: Mutex<Option<WsReader>>,
    closed: CancellationToken,
    reset: Notify,
    /// Generation of the live connection.
    generation: AtomicU64,
    /// Generation the pending reset was requested for.
    reset_for: AtomicU64,
    subscribed: AtomicBool,
}

enum Interrupted {
    Closed,
    Reset,
    Failed(TransportError),
}

impl ManagedWsTransport {
    /// Dial `url` once. A failed dial is returned, not retried.
    pub async fn connect(url: impl Into<String>, config: WsConfig) -> Result<Self, TransportError> {
        let url = url.into();
        let (writer, reader) = WsConnection::dial(&url, &config).await?.split();
        tracing::info!(url = %url, "WebSocket connected");

        Ok(Self {
            inner: Arc::new(Shared {
                url,
                config,
                writer: RwLock::new(Some(Arc::new(writer))),
                reader: Mutex::new(Some(reader)),
                closed: CancellationToken::new(),
                reset: Notify::new(),
                generation: AtomicU64::new(1),
                reset_for: AtomicU64::new(0),
                subscribed: AtomicBool::new(false),
            }),
        })
    }
}

#[async_trait]
impl Transport for ManagedWsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ManagedWebSocket
    }

    fn url(&self) -> &str {
        &self.inner.url
    }

    async fn subscribe(&self, filter: Arc<dyn Filter>) -> Result<InboundStream, TransportError> {
        if self.inner.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if self.inner.subscribed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadySubscribed);
        }
        let reader = self
            .inner
            .reader
            .lock()
            .await
            .take()
            .ok_or(TransportError::NotConnected)?;

        let payload = filter
            .serialize()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        self.send(payload).await?;

        let (tx, rx) = mpsc::channel(self.inner.config.channel_capacity.max(1));
        let generation = self.inner.generation.load(Ordering::SeqCst);
        tx.send(Inbound::Subscribed { generation })
            .await
            .map_err(|_| TransportError::Closed)?;

        tokio::spawn(read_loop(self.inner.clone(), reader, generation, filter, tx));
        Ok(rx)
    }

    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        let writer = self
            .inner
            .writer
            .read()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)?;
        writer.send_payload(payload).await
    }

    async fn reconnect(&self, generation: u64) {
        let current = self.inner.generation.load(Ordering::SeqCst);
        if generation != current {
            tracing::debug!(
                url = %self.inner.url,
                generation,
                current,
                "ignoring reconnect for a replaced connection"
            );
            return;
        }
        self.inner.reset_for.store(generation, Ordering::SeqCst);
        self.inner.reset.notify_one();
    }

    async fn unsubscribe(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        self.inner.closed.cancel();
        self.inner.reader.lock().await.take();
        let writer = self.inner.writer.write().await.take();
        if let Some(writer) = writer {
            writer.close().await;
        }
        tracing::debug!(url = %self.inner.url, "WebSocket transport closed");
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut reader: WsReader,
    mut generation: u64,
    filter: Arc<dyn Filter>,
    tx: mpsc::Sender<Inbound>,
) {
    loop {
        match drain(&shared, &mut reader, generation, &tx).await {
            Interrupted::Closed => break,
            Interrupted::Reset => {
                tracing::info!(url = %shared.url, generation, "reconnect requested");
            }
            Interrupted::Failed(e) => {
                tracing::warn!(url = %shared.url, error = %e, "WebSocket read failed");
            }
        }
        match reestablish(&shared, &filter, &tx).await {
            Some((next, next_generation)) => {
                reader = next;
                generation = next_generation;
            }
            None => break,
        }
    }

    let writer = shared.writer.write().await.take();
    if let Some(writer) = writer {
        writer.close().await;
    }
    tracing::debug!(url = %shared.url, "read loop exited");
}

/// Forward frames of connection `generation` until it fails, a reset is
/// requested for it or the transport is closed.
async fn drain(
    shared: &Shared,
    reader: &mut WsReader,
    generation: u64,
    tx: &mpsc::Sender<Inbound>,
) -> Interrupted {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shared.closed.cancelled() => return Interrupted::Closed,
            _ = shared.reset.notified() => {
                // A permit left over from an earlier connection is spent here.
                if shared.reset_for.load(Ordering::SeqCst) == generation {
                    return Interrupted::Reset;
                }
                continue;
            }
            frame = reader.next_frame() => frame,
        };

        match frame {
            Ok(Some(Frame::Data(data))) => {
                tokio::select! {
                    biased;
                    _ = shared.closed.cancelled() => return Interrupted::Closed,
                    sent = tx.send(Inbound::Message(data)) => {
                        if sent.is_err() {
                            return Interrupted::Closed;
                        }
                    }
                }
            }
            Ok(Some(Frame::Ping(payload))) => {
                let writer = shared.writer.read().await.clone();
                if let Some(writer) = writer {
                    if let Err(e) = writer.pong(payload).await {
                        return Interrupted::Failed(e);
                    }
                }
            }
            Ok(None) => {
                return Interrupted::Failed(TransportError::WebSocket(
                    "connection closed by peer".into(),
                ))
            }
            Err(e) => return Interrupted::Failed(e),
        }
    }
}

/// Redial until a connection carries the subscription again, returning
/// its reader and generation. Returns `None` once the transport is closed;
/// the close flag is checked before every dial and interrupts both the
/// dial and the backoff sleep.
async fn reestablish(
    shared: &Shared,
    filter: &Arc<dyn Filter>,
    tx: &mpsc::Sender<Inbound>,
) -> Option<(WsReader, u64)> {
    shared.writer.write().await.take();

    let mut attempt: u32 = 0;
    loop {
        if shared.closed.is_cancelled() {
            return None;
        }
        attempt += 1;

        let dialed = tokio::select! {
            biased;
            _ = shared.closed.cancelled() => return None,
            dialed = resubscribe(shared, filter) => dialed,
        };

        match dialed {
            Ok((writer, reader)) => {
                *shared.writer.write().await = Some(writer);
                let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
                if tx.send(Inbound::Subscribed { generation }).await.is_err() {
                    return None;
                }
                tracing::info!(url = %shared.url, attempt, generation, "WebSocket reconnected");
                return Some((reader, generation));
            }
            Err(e) => {
                let delay = shared.config.backoff.delay(attempt);
                tracing::warn!(
                    url = %shared.url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "reconnect failed"
                );
                tokio::select! {
                    biased;
                    _ = shared.closed.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

async fn resubscribe(
    shared: &Shared,
    filter: &Arc<dyn Filter>,
) -> Result<(Arc<WsWriter>, WsReader), TransportError> {
    let (writer, reader) = WsConnection::dial(&shared.url, &shared.config).await?.split();
    let payload = filter
        .serialize()
        .map_err(|e| TransportError::Other(e.to_string()))?;
    writer.send_payload(payload).await?;
    Ok((Arc::new(writer), reader))
}
