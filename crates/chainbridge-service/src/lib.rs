//! chainbridge-service — runs ChainBridge.
//!
//! A [`Bridge`] owns one [`Supervisor`] (subscription lifecycle), one
//! [`Dispatcher`] (event → job run) and, optionally, a store
//! [`Reconciler`]. Every subscription writes into a single bounded event
//! channel that the dispatcher drains.
//!
//! # Quick start
//! ```rust,no_run
//! use chainbridge_service::{Bridge, BridgeConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BridgeConfig::load("bridge.yaml")?;
//! let bridge = Bridge::from_config(&config).await?;
//! let report = bridge.boot().await?;
//! println!("{} running, {} failed", report.started.len(), report.failed.len());
//! bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod reconciler;
pub mod supervisor;

pub use config::{BridgeConfig, DispatchConfig, LogConfig, StorageBackend, StorageConfig};
pub use dispatcher::{DispatchMetrics, Dispatcher, DispatcherHandle, MetricsSnapshot};
pub use reconciler::{ReconcileReport, Reconciler};
pub use supervisor::{BootReport, SubscriptionState, SubscriptionStatus, Supervisor};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chainbridge_chains::{ChainRegistry, DefaultTransports};
use chainbridge_core::error::{BridgeError, ConfigError};
use chainbridge_core::store::SubscriptionStore;
use chainbridge_core::trigger::JobTrigger;
use chainbridge_http::JobTriggerClient;
use chainbridge_storage::{InMemoryStore, SqliteStore};

/// Build the store selected by `config`.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn SubscriptionStore>, BridgeError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StorageBackend::Sqlite => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| ConfigError::Invalid("storage.path is required for sqlite".into()))?;
            Ok(Arc::new(SqliteStore::open(path).await?))
        }
    }
}

pub struct Bridge {
    supervisor: Arc<Supervisor>,
    dispatcher: DispatcherHandle,
    reconciler: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Bridge {
    /// Wire a bridge from explicit parts and start its dispatcher.
    pub fn new(
        registry: Arc<ChainRegistry>,
        store: Arc<dyn SubscriptionStore>,
        trigger: Arc<dyn JobTrigger>,
        dispatch: &DispatchConfig,
    ) -> Self {
        let (sink, events) = mpsc::channel(dispatch.channel_capacity.max(1));
        let dispatcher = Dispatcher::new(trigger, dispatch).spawn(events);
        let supervisor = Arc::new(Supervisor::new(registry, store, sink));
        Self { supervisor, dispatcher, reconciler: None }
    }

    /// Build the store, job trigger client and chain registry described by
    /// `config`, and seed the store with the configured subscriptions.
    pub async fn from_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        let store = open_store(&config.storage).await?;
        for record in &config.subscriptions {
            store.save(record).await?;
        }

        let trigger = Arc::new(JobTriggerClient::new(&config.trigger_config())?);
        let transports = Arc::new(DefaultTransports::new(config.ws_config(), config.rpc_config()));
        let registry = Arc::new(ChainRegistry::with_log_chains(transports));

        let mut bridge = Self::new(registry, store, trigger, &config.dispatch);
        if let Some(secs) = config.reconcile_interval_secs {
            bridge = bridge.with_reconciler(Duration::from_secs(secs));
        }
        Ok(bridge)
    }

    /// Run a store reconciler every `interval`.
    pub fn with_reconciler(mut self, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task = Reconciler::new(self.supervisor.clone(), interval).spawn(cancel.clone());
        self.reconciler = Some((cancel, task));
        self
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.dispatcher.metrics()
    }

    /// Start every persisted subscription.
    pub async fn boot(&self) -> Result<BootReport, BridgeError> {
        self.supervisor.start_all().await
    }

    /// Stop the reconciler, then every subscription, then the dispatcher.
    /// Returns the final dispatch counters.
    pub async fn shutdown(self) -> MetricsSnapshot {
        if let Some((cancel, task)) = self.reconciler {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!(error = %e, "reconciler task ended abnormally");
            }
        }
        self.supervisor.shutdown().await;
        let metrics = self.dispatcher.shutdown().await;
        info!("bridge stopped");
        metrics
    }
}
