//! Address/topic log filter and its subscribe / getLogs payloads.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Map, Value};

use chainbridge_core::error::FilterError;
use chainbridge_core::filter::Filter;
use chainbridge_core::request::JsonRpcRequest;
use chainbridge_core::types::Protocol;

use super::cursor::LogCursor;
use super::dialect::{AddressFormat, LogDialect};

/// Oldest position requested by push subscriptions.
const GENESIS: &str = "0x0";

#[derive(Debug)]
pub struct LogFilter {
    dialect: LogDialect,
    protocol: Protocol,
    addresses: Vec<String>,
    topics: Vec<String>,
    cursor: Arc<LogCursor>,
}

impl LogFilter {
    /// Normalise `addresses` and `topics`. Empty strings are skipped;
    /// anything else that is not valid hex of the right width is rejected.
    pub fn new(
        dialect: LogDialect,
        protocol: Protocol,
        addresses: &[String],
        topics: &[String],
        cursor: Arc<LogCursor>,
    ) -> Result<Self, FilterError> {
        let addresses = addresses
            .iter()
            .filter(|a| !a.trim().is_empty())
            .map(|a| normalize_address(a, dialect.address_format))
            .collect::<Result<Vec<_>, _>>()?;
        let topics = topics
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| normalize_topic(t))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            dialect,
            protocol,
            addresses,
            topics,
            cursor,
        })
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// The filter object placed in the request params.
    pub fn query(&self) -> Value {
        let mut query = Map::new();
        query.insert("address".into(), json!(self.addresses));
        // One OR-set in the first topic position.
        query.insert("topics".into(), json!([self.topics]));
        let from = match self.protocol {
            Protocol::WebSocket => GENESIS.to_string(),
            Protocol::Rpc => self.cursor.from_value(self.dialect.latest_tag),
        };
        query.insert(self.dialect.from_key.into(), Value::String(from));
        query.insert(
            self.dialect.to_key.into(),
            Value::String(self.dialect.latest_tag.into()),
        );
        Value::Object(query)
    }
}

impl Filter for LogFilter {
    fn serialize(&self) -> Result<Bytes, FilterError> {
        let request = match self.protocol {
            Protocol::WebSocket => JsonRpcRequest::new(
                1,
                self.dialect.subscribe_method,
                vec![Value::from("logs"), self.query()],
            ),
            Protocol::Rpc => JsonRpcRequest::new(1, self.dialect.get_logs_method, vec![self.query()]),
        };
        Ok(Bytes::from(serde_json::to_vec(&request)?))
    }
}

fn normalize_address(raw: &str, format: AddressFormat) -> Result<String, FilterError> {
    match format {
        AddressFormat::Opaque => Ok(raw.trim().to_string()),
        AddressFormat::Hex20 => left_pad_hex(raw, 40).ok_or_else(|| FilterError::InvalidAddress(raw.into())),
    }
}

fn normalize_topic(raw: &str) -> Result<String, FilterError> {
    left_pad_hex(raw, 64).ok_or_else(|| FilterError::InvalidTopic(raw.into()))
}

/// `0x`-prefixed, lowercase, left-padded to `width` digits.
fn left_pad_hex(raw: &str, width: usize) -> Option<String> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > width || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{:0>width$}", digits.to_ascii_lowercase()))
}
