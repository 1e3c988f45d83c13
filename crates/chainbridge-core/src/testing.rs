//! Test doubles shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{FilterError, TransportError};
use crate::filter::{Filter, Parser};
use crate::transport::{Inbound, InboundStream, Transport, TransportKind};
use crate::types::Event;

/// `noise` is unmatched, `multi:a,b` yields two events, `nack` is a bad
/// confirmation; everything else echoes back as one event.
pub struct EchoParser;

impl Parser for EchoParser {
    fn parse_response(&self, raw: &[u8]) -> Option<Vec<Event>> {
        let text = std::str::from_utf8(raw).ok()?;
        if text == "noise" {
            return None;
        }
        if let Some(list) = text.strip_prefix("multi:") {
            return Some(list.split(',').map(|s| Event::new(s.to_string())).collect());
        }
        Some(vec![Event::new(Bytes::copy_from_slice(raw))])
    }

    fn confirm(&self, raw: &[u8]) -> Result<(), TransportError> {
        if raw == b"nack" {
            return Err(TransportError::Protocol("nack".into()));
        }
        Ok(())
    }
}

pub struct StaticFilter;

impl Filter for StaticFilter {
    fn serialize(&self) -> Result<Bytes, FilterError> {
        Ok(Bytes::from_static(b"{\"subscribe\":true}"))
    }
}

#[derive(Default)]
pub struct FakeTransport {
    tx: Mutex<Option<mpsc::Sender<Inbound>>>,
    subscribed: AtomicBool,
    pub fail_subscribe: AtomicBool,
    reconnects: AtomicUsize,
    last_reconnect: Mutex<Option<u64>>,
    unsubscribes: AtomicUsize,
}

impl FakeTransport {
    pub async fn push(&self, item: Inbound) {
        let tx = self.tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(item).await;
        }
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Generation named by the most recent reconnect request.
    pub fn last_reconnect(&self) -> Option<u64> {
        *self.last_reconnect.lock().unwrap()
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ManagedWebSocket
    }

    fn url(&self) -> &str {
        "fake://endpoint"
    }

    async fn subscribe(&self, _filter: Arc<dyn Filter>) -> Result<InboundStream, TransportError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                url: "fake://endpoint".into(),
                reason: "refused".into(),
            });
        }
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadySubscribed);
        }
        let (tx, rx) = mpsc::channel(16);
        *self.tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn send(&self, _payload: Bytes) -> Result<(), TransportError> {
        Ok(())
    }

    async fn reconnect(&self, generation: u64) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        *self.last_reconnect.lock().unwrap() = Some(generation);
    }

    async fn unsubscribe(&self) {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.tx.lock().unwrap().take();
    }
}
