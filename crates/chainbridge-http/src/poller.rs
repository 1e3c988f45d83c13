//! Polling RPC transport backed by `reqwest`.
//!
//! `subscribe` issues the filter request once and returns its error, the
//! pull-side analogue of a failed dial. After that a ticker re-issues the
//! request every interval; a failed poll is logged and skipped. There is
//! no reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use chainbridge_core::error::TransportError;
use chainbridge_core::filter::Filter;
use chainbridge_core::transport::{Inbound, InboundStream, Transport, TransportKind};

/// Configuration for `RpcPollTransport`.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub request_timeout: Duration,
    /// Capacity of the inbound stream handed to the subscriber.
    pub channel_capacity: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            channel_capacity: 64,
        }
    }
}

pub struct RpcPollTransport {
    inner: Arc<Shared>,
}

struct Shared {
    url: String,
    interval: Duration,
    http: reqwest::Client,
    closed: CancellationToken,
    subscribed: AtomicBool,
    /// Inbound sender, kept so `send` responses reach the subscriber.
    inbound: Mutex<Option<mpsc::Sender<Inbound>>>,
    channel_capacity: usize,
}

impl RpcPollTransport {
    pub fn new(
        url: impl Into<String>,
        interval: Duration,
        config: RpcConfig,
    ) -> Result<Self, TransportError> {
        if interval.is_zero() {
            return Err(TransportError::Other("poll interval must be non-zero".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Shared {
                url: url.into(),
                interval,
                http,
                closed: CancellationToken::new(),
                subscribed: AtomicBool::new(false),
                inbound: Mutex::new(None),
                channel_capacity: config.channel_capacity.max(1),
            }),
        })
    }

    /// POST `body` to the endpoint and return the response body.
    pub async fn request(&self, body: Bytes) -> Result<Bytes, TransportError> {
        self.inner.request(body).await
    }
}

impl Shared {
    async fn request(&self, body: Bytes) -> Result<Bytes, TransportError> {
        let resp = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        resp.bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))
    }
}

#[async_trait]
impl Transport for RpcPollTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::RpcPolling
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

        let payload = filter
            .serialize()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let first = self.inner.request(payload).await?;

        let (tx, rx) = mpsc::channel(self.inner.channel_capacity);
        tx.send(Inbound::Message(first))
            .await
            .map_err(|_| TransportError::Closed)?;
        *self.inner.inbound.lock().await = Some(tx.clone());

        tracing::info!(url = %self.inner.url, interval_ms = self.inner.interval.as_millis() as u64, "polling started");
        tokio::spawn(poll_loop(self.inner.clone(), filter, tx));
        Ok(rx)
    }

    /// Issue a one-off request. The response joins the inbound stream when
    /// a subscription is live and is dropped otherwise.
    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        if self.inner.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let response = self.inner.request(payload).await?;
        let tx = self.inner.inbound.lock().await.clone();
        if let Some(tx) = tx {
            tx.send(Inbound::Message(response))
                .await
                .map_err(|_| TransportError::Closed)?;
        }
        Ok(())
    }

    async fn unsubscribe(&self) {
        self.inner.closed.cancel();
        self.inner.inbound.lock().await.take();
    }
}

async fn poll_loop(shared: Arc<Shared>, filter: Arc<dyn Filter>, tx: mpsc::Sender<Inbound>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + shared.interval, shared.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shared.closed.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let payload = match filter.serialize() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(url = %shared.url, error = %e, "failed to build poll request");
                continue;
            }
        };

        // Stop abandons an in-flight request; its response is never forwarded.
        let response = tokio::select! {
            biased;
            _ = shared.closed.cancelled() => break,
            response = shared.request(payload) => response,
        };

        match response {
            Ok(body) => {
                tokio::select! {
                    biased;
                    _ = shared.closed.cancelled() => break,
                    sent = tx.send(Inbound::Message(body)) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %shared.url, error = %e, "poll failed, skipping tick");
            }
        }
    }

    tracing::debug!(url = %shared.url, "poll loop exited");
}
