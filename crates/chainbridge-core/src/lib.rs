//! chainbridge-core — foundation traits and types for ChainBridge.
//!
//! # Overview
//!
//! ChainBridge keeps long-lived subscriptions to blockchain endpoints and
//! turns every matching on-chain event into a job run on a remote job
//! runner. The core crate defines:
//!
//! - [`Transport`] / [`TransportFactory`] — the push/pull transport contract
//! - [`Filter`] / [`Parser`] — per-subscription wire encoding and decoding
//! - [`SubscriptionRecord`] / [`Endpoint`] / [`JobEvent`] — the data model
//! - [`EventPump`] and [`ActiveSubscription`] — confirmation handling and
//!   in-order forwarding of decoded events
//! - [`JobTrigger`] / [`SubscriptionStore`] — downstream and persistence seams
//! - [`policy`] module — reconnect backoff, dispatch retry
//! - [`error`] module — structured error types

pub mod error;
pub mod filter;
pub mod policy;
pub mod pump;
pub mod request;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod trigger;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{BridgeError, ConfigError, FilterError, StoreError, TransportError, TriggerError};
pub use filter::{Filter, Parser};
pub use policy::{ReconnectBackoff, RetryConfig, RetryPolicy};
pub use pump::{Confirmation, EventPump};
pub use request::{JsonRpcError, JsonRpcMessage, JsonRpcRequest, RpcId};
pub use store::SubscriptionStore;
pub use subscription::{ActiveSubscription, StartContext, SubscriptionHandle};
pub use transport::{Inbound, InboundStream, Transport, TransportFactory, TransportKind};
pub use trigger::JobTrigger;
pub use types::{Endpoint, Event, EventSink, JobEvent, Protocol, SubscriptionRecord};
