//! Data model: endpoints, persisted subscription records and events.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::ConfigError;

/// Prefix of every subscription document key in the store.
pub const STORE_KEY_PREFIX: &str = "subscription-";

/// How a subscription obtains raw messages from its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Persistent push socket.
    #[serde(rename = "ws", alias = "websocket")]
    WebSocket,
    /// Ticker-driven request/response polling.
    #[serde(rename = "rpc", alias = "http")]
    Rpc,
}

impl Protocol {
    /// The protocol implied by a URL scheme, if any.
    pub fn for_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "ws" | "wss" => Some(Self::WebSocket),
            "http" | "https" => Some(Self::Rpc),
            _ => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebSocket => write!(f, "ws"),
            Self::Rpc => write!(f, "rpc"),
        }
    }
}

/// Where and how to connect. Immutable once a subscription is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub protocol: Protocol,
    pub chain: String,
    /// Poll period in seconds (RPC only).
    #[serde(rename = "refreshInterval", default)]
    pub refresh_interval_secs: u64,
}

impl Endpoint {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Parse the URL and check that its scheme matches `protocol`.
    pub fn parsed_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if Protocol::for_scheme(url.scheme()) != Some(self.protocol) {
            return Err(ConfigError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
                protocol: self.protocol.to_string(),
            });
        }
        if self.protocol == Protocol::Rpc && self.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(format!(
                "RPC endpoint {} needs a non-zero refreshInterval",
                self.url
            )));
        }
        Ok(url)
    }
}

/// The durable unit of work: one standing subscription feeding one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub id: String,
    pub job_reference: String,
    pub endpoint: Endpoint,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl SubscriptionRecord {
    /// Key under which the record is persisted.
    pub fn store_key(&self) -> String {
        store_key(&self.id)
    }
}

pub fn store_key(id: &str) -> String {
    format!("{STORE_KEY_PREFIX}{id}")
}

/// An opaque decoded event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub payload: Bytes,
}

impl Event {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into() }
    }
}

/// An event tagged with its provenance, as carried to the dispatcher.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub subscription_id: String,
    pub job_reference: String,
    pub event: Event,
    /// Cancellation token of the producing subscription.
    pub origin: CancellationToken,
}

impl JobEvent {
    /// `true` once the producing subscription has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.origin.is_cancelled()
    }
}

/// Shared inbound channel of the dispatcher.
pub type EventSink = mpsc::Sender<JobEvent>;
