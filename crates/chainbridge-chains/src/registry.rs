//! Name-keyed chain manager registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use chainbridge_core::error::{BridgeError, ConfigError};
use chainbridge_core::subscription::{StartContext, SubscriptionHandle};
use chainbridge_core::transport::TransportFactory;
use chainbridge_core::types::SubscriptionRecord;

use crate::logs::{dialect, LogsManager};

/// Turns a persisted record into a live subscription for one chain.
#[async_trait]
pub trait ChainManager: Send + Sync + 'static {
    /// Registry key, matched against `Endpoint::chain`.
    fn name(&self) -> &str;

    /// Build the transport, filter and parser for `record` and start
    /// forwarding its events into `ctx.sink`. Errors are fatal for this
    /// record only.
    async fn start(
        &self,
        record: &SubscriptionRecord,
        ctx: StartContext,
    ) -> Result<Arc<dyn SubscriptionHandle>, BridgeError>;
}

/// The set of supported chains, built once at startup and shared with the
/// supervisor.
#[derive(Clone, Default)]
pub struct ChainRegistry {
    managers: HashMap<String, Arc<dyn ChainManager>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding a [`LogsManager`] for every built-in dialect.
    pub fn with_log_chains(transports: Arc<dyn TransportFactory>) -> Self {
        let mut registry = Self::new();
        for d in dialect::ALL {
            registry.register(Arc::new(LogsManager::new(d, transports.clone())));
        }
        registry
    }

    /// Add a manager, replacing (and returning) any previous one with the
    /// same name.
    pub fn register(&mut self, manager: Arc<dyn ChainManager>) -> Option<Arc<dyn ChainManager>> {
        self.managers.insert(manager.name().to_string(), manager)
    }

    pub fn get(&self, chain: &str) -> Option<Arc<dyn ChainManager>> {
        self.managers.get(chain).cloned()
    }

    /// Registered chain names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.managers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start `record` with the manager named by its endpoint's chain.
    pub async fn start(
        &self,
        record: &SubscriptionRecord,
        ctx: StartContext,
    ) -> Result<Arc<dyn SubscriptionHandle>, BridgeError> {
        let manager = self
            .get(&record.endpoint.chain)
            .ok_or_else(|| ConfigError::UnknownChain(record.endpoint.chain.clone()))?;
        manager.start(record, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::transports::DefaultTransports;
    use chainbridge_core::types::{Endpoint, Protocol};

    fn record(chain: &str, url: &str, protocol: Protocol) -> SubscriptionRecord {
        SubscriptionRecord {
            id: "sub".into(),
            job_reference: "job".into(),
            endpoint: Endpoint {
                url: url.into(),
                protocol,
                chain: chain.into(),
                refresh_interval_secs: 1,
            },
            addresses: vec![],
            topics: vec![],
        }
    }

    fn ctx() -> StartContext {
        let (sink, _rx) = mpsc::channel(1);
        StartContext { sink, cancel: CancellationToken::new() }
    }

    fn registry() -> ChainRegistry {
        ChainRegistry::with_log_chains(Arc::new(DefaultTransports::default()))
    }

    #[test]
    fn builtin_chains_registered() {
        assert_eq!(
            registry().names(),
            vec!["binance-smart-chain", "conflux", "ethereum", "harmony", "klaytn", "xinfin"]
        );
    }

    #[tokio::test]
    async fn unknown_chain_is_config_error() {
        let err = registry()
            .start(&record("dogecoin", "wss://x.example", Protocol::WebSocket), ctx())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::Config(ConfigError::UnknownChain(_))));
    }

    #[tokio::test]
    async fn scheme_mismatch_is_config_error() {
        let err = registry()
            .start(&record("ethereum", "https://x.example", Protocol::WebSocket), ctx())
            .await
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn malformed_address_is_filter_error() {
        let mut rec = record("ethereum", "wss://x.example", Protocol::WebSocket);
        rec.addresses = vec!["0xnothex".into()];
        let err = registry().start(&rec, ctx()).await.err().unwrap();
        assert!(matches!(err, BridgeError::Filter(_)));
    }
}
