//! chainbridge-ws — WebSocket subscription transport.
//!
//! # Features
//! - Single dial at construction, failure returned to the caller
//! - Auto-reconnect on read failure with capped linear backoff
//! - Subscription payload re-sent after every reconnect
//! - Serialized writes (subscribe, keep-alive pongs) behind one lock
//! - Inbound message size limit

pub mod connection;
pub mod managed;

pub use connection::{Frame, WsConfig, WsConnection, WsReader, WsWriter};
pub use managed::ManagedWsTransport;
