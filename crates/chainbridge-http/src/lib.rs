//! chainbridge-http — HTTP side of ChainBridge.
//!
//! - [`RpcPollTransport`] — ticker-driven polling transport
//! - [`JobTriggerClient`] — POSTs one job run per event to the job runner

pub mod poller;
pub mod trigger;

pub use poller::{RpcConfig, RpcPollTransport};
pub use trigger::{JobTriggerClient, TriggerConfig};
