//! Error taxonomy shared by every ChainBridge crate.

use thiserror::Error;

/// Errors raised by a transport while dialing, reading or writing.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint could not be reached.
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// WebSocket send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// HTTP request failed (connection refused, bad status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Inbound frame exceeded the configured size limit.
    #[error("inbound message of {size} bytes exceeds limit of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// The peer spoke something we did not expect (bad confirmation, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No live connection is currently attached (e.g. mid-reconnect).
    #[error("transport is not connected")]
    NotConnected,

    /// `subscribe` was called twice on the same transport.
    #[error("transport already carries a subscription")]
    AlreadySubscribed,

    /// The transport has been closed by its owner.
    #[error("transport closed")]
    Closed,

    /// Operation timed out.
    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Payload could not be (de)serialized.
    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` for connection- and protocol-class failures, which the
    /// managed transport answers with a reconnect.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::WebSocket(_)
                | Self::Http(_)
                | Self::MessageTooLarge { .. }
                | Self::Protocol(_)
                | Self::NotConnected
                | Self::Timeout { .. }
        )
    }
}

/// Malformed subscription filter input.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("invalid topic {0:?}")]
    InvalidTopic(String),

    #[error("failed to serialize filter: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Configuration problems detected before a subscription can start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown chain {0:?}")]
    UnknownChain(String),

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("URL scheme {scheme:?} is not usable with the {protocol} protocol")]
    UnsupportedScheme { scheme: String, protocol: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failures of a single job-trigger call.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid job runner URL: {0}")]
    InvalidUrl(String),

    /// The request never produced a status (connect, timeout, body read).
    #[error("job trigger request failed: {0}")]
    Http(String),

    /// The job runner answered with a status >= 400.
    #[error("job runner returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl TriggerError {
    /// Transport failures and 5xx answers may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => (500..600).contains(status),
            Self::InvalidUrl(_) => false,
        }
    }
}

/// Subscription store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored document is not valid: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Umbrella error surfaced by the supervisor and chain managers.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A subscription with this id is already starting, running or stopping.
    #[error("subscription {id} is already active")]
    AlreadyActive { id: String },

    #[error("subscription {id} not found")]
    NotFound { id: String },
}

impl BridgeError {
    /// Returns `true` if this error stems from bad input rather than a
    /// runtime failure (unknown chain, bad URL, malformed filter).
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Filter(_))
    }
}
