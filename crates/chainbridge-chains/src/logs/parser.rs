//! Log notification / getLogs response parsing.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chainbridge_core::error::TransportError;
use chainbridge_core::filter::Parser;
use chainbridge_core::request::JsonRpcMessage;
use chainbridge_core::types::{Event, Protocol};

use super::cursor::LogCursor;
use super::dialect::LogDialect;

/// A log as forwarded to the job runner. Missing string fields serialize
/// as `""`; `epochNumber` only appears when the node sent it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub block_number: String,
    #[serde(default)]
    pub block_hash: String,
    #[serde(default)]
    pub transaction_hash: String,
    #[serde(default)]
    pub transaction_index: String,
    #[serde(default)]
    pub log_index: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_number: Option<String>,
    /// Set by the node when a reorg retracted the log.
    #[serde(default, skip_serializing)]
    pub removed: bool,
}

impl LogEntry {
    fn position(&self, field: &str) -> Option<u64> {
        let raw = match field {
            "epochNumber" => self.epoch_number.as_deref()?,
            _ => self.block_number.as_str(),
        };
        hex_str_to_u64(raw)
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn hex_str_to_u64(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

#[derive(Debug)]
pub struct LogParser {
    dialect: LogDialect,
    protocol: Protocol,
    cursor: Arc<LogCursor>,
}

impl LogParser {
    pub fn new(dialect: LogDialect, protocol: Protocol, cursor: Arc<LogCursor>) -> Self {
        Self { dialect, protocol, cursor }
    }

    fn encode(log: &LogEntry) -> Option<Event> {
        match serde_json::to_vec(log) {
            Ok(body) => Some(Event::new(Bytes::from(body))),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode log event");
                None
            }
        }
    }

    fn parse_notification(&self, msg: &JsonRpcMessage) -> Option<Vec<Event>> {
        let result = msg.notification_result()?;
        let log: LogEntry = serde_json::from_value(result.clone()).ok()?;
        if log.removed {
            tracing::debug!(chain = self.dialect.chain, tx = %log.transaction_hash, "skipping removed log");
            return Some(Vec::new());
        }
        Some(Self::encode(&log).into_iter().collect())
    }

    fn parse_poll(&self, msg: JsonRpcMessage) -> Option<Vec<Event>> {
        let result = match msg.into_result() {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(chain = self.dialect.chain, error = %e, "getLogs returned an error");
                return None;
            }
        };
        let logs: Vec<LogEntry> = match result {
            Value::Null => Vec::new(),
            other => serde_json::from_value(other).ok()?,
        };

        let mut newest: Option<u64> = None;
        let mut events = Vec::with_capacity(logs.len());
        for log in logs.iter().filter(|l| !l.removed) {
            if let Some(event) = Self::encode(log) {
                events.push(event);
            }
            if let Some(pos) = log.position(self.dialect.position_field) {
                newest = Some(newest.map_or(pos, |n| n.max(pos)));
            }
        }
        if let Some(pos) = newest {
            self.cursor.advance(pos);
        }
        Some(events)
    }
}

impl Parser for LogParser {
    fn parse_response(&self, raw: &[u8]) -> Option<Vec<Event>> {
        let msg: JsonRpcMessage = serde_json::from_slice(raw).ok()?;
        match self.protocol {
            Protocol::WebSocket => self.parse_notification(&msg),
            Protocol::Rpc => self.parse_poll(msg),
        }
    }

    /// The first frame after a subscribe must be a successful response
    /// carrying the subscription id.
    fn confirm(&self, raw: &[u8]) -> Result<(), TransportError> {
        let msg: JsonRpcMessage = serde_json::from_slice(raw)
            .map_err(|e| TransportError::Protocol(format!("confirmation is not JSON-RPC: {e}")))?;
        if msg.id.is_none() {
            return Err(TransportError::Protocol(
                "expected a subscription confirmation".into(),
            ));
        }
        match msg.into_result() {
            Ok(Value::Null) => Err(TransportError::Protocol(
                "subscription confirmation carries no id".into(),
            )),
            Ok(id) => {
                tracing::debug!(chain = self.dialect.chain, subscription = %id, "log subscription confirmed");
                Ok(())
            }
            Err(e) => Err(TransportError::Protocol(format!("subscription rejected: {e}"))),
        }
    }
}
