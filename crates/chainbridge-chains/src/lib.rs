//! chainbridge-chains — chain managers for ChainBridge.
//!
//! A [`ChainRegistry`] maps `Endpoint::chain` names to [`ChainManager`]s.
//! The built-in managers cover the EVM log APIs of ethereum,
//! binance-smart-chain, xinfin, harmony, klaytn and conflux, all driven by
//! one [`logs::LogsManager`] configured with a [`logs::LogDialect`].

pub mod logs;
pub mod registry;
pub mod transports;

pub use registry::{ChainManager, ChainRegistry};
pub use transports::DefaultTransports;
