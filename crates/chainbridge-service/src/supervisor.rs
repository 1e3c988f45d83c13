//! Subscription supervisor.
//!
//! Tracks one slot per record id through
//! `Pending -> Starting -> Running -> Stopping -> Stopped`, with
//! `Starting -> Failed` when the chain manager rejects the record. A slot in
//! `Starting`, `Running` or `Stopping` blocks a second start of the same id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chainbridge_chains::ChainRegistry;
use chainbridge_core::error::BridgeError;
use chainbridge_core::store::SubscriptionStore;
use chainbridge_core::subscription::{StartContext, SubscriptionHandle};
use chainbridge_core::types::{EventSink, SubscriptionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl SubscriptionState {
    /// States that own (or are about to own) a live transport.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

/// Point-in-time view of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    pub id: String,
    pub chain: String,
    pub job_reference: String,
    pub state: SubscriptionState,
    /// Start error of a `Failed` subscription.
    pub error: Option<String>,
}

/// Outcome of [`Supervisor::start_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    pub started: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Records stopped, or started elsewhere, before their turn came.
    pub skipped: Vec<String>,
}

struct Slot {
    record: SubscriptionRecord,
    state: SubscriptionState,
    generation: u64,
    cancel: CancellationToken,
    handle: Option<Arc<dyn SubscriptionHandle>>,
    error: Option<String>,
}

pub struct Supervisor {
    registry: Arc<ChainRegistry>,
    store: Arc<dyn SubscriptionStore>,
    sink: EventSink,
    slots: Mutex<HashMap<String, Slot>>,
    generations: AtomicU64,
}

impl Supervisor {
    pub fn new(registry: Arc<ChainRegistry>, store: Arc<dyn SubscriptionStore>, sink: EventSink) -> Self {
        Self {
            registry,
            store,
            sink,
            slots: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    /// Start `record` through its chain manager.
    ///
    /// Fails with [`BridgeError::AlreadyActive`] while another start, run or
    /// stop of the same id is in progress. A manager error moves the slot to
    /// `Failed` and is returned; it is not retried.
    pub async fn start(&self, record: SubscriptionRecord) -> Result<(), BridgeError> {
        self.launch(record, false).await.map(|_| ())
    }

    /// With `pending_only`, a record whose slot is no longer `Pending` is
    /// left alone and `Ok(false)` is returned.
    async fn launch(&self, record: SubscriptionRecord, pending_only: bool) -> Result<bool, BridgeError> {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        {
            let mut slots = self.slots.lock().await;
            let state = slots.get(&record.id).map(|slot| slot.state);
            if pending_only && state != Some(SubscriptionState::Pending) {
                return Ok(false);
            }
            if state.is_some_and(SubscriptionState::is_active) {
                return Err(BridgeError::AlreadyActive { id: record.id });
            }
            slots.insert(
                record.id.clone(),
                Slot {
                    record: record.clone(),
                    state: SubscriptionState::Starting,
                    generation,
                    cancel: cancel.clone(),
                    handle: None,
                    error: None,
                },
            );
        }

        let ctx = StartContext { sink: self.sink.clone(), cancel: cancel.clone() };
        let result = self.registry.start(&record, ctx).await;

        let mut slots = self.slots.lock().await;
        let current = slots
            .get_mut(&record.id)
            .filter(|s| s.generation == generation && s.state == SubscriptionState::Starting);

        match result {
            Ok(handle) => match current {
                Some(slot) => {
                    slot.state = SubscriptionState::Running;
                    slot.handle = Some(handle);
                    info!(
                        subscription = %record.id,
                        chain = %record.endpoint.chain,
                        protocol = %record.endpoint.protocol,
                        job = %record.job_reference,
                        "subscription running"
                    );
                    Ok(true)
                }
                None => {
                    // Stopped or forgotten while the manager was starting it.
                    drop(slots);
                    handle.stop().await;
                    debug!(subscription = %record.id, "subscription stopped during start");
                    Ok(true)
                }
            },
            Err(e) => {
                cancel.cancel();
                if let Some(slot) = current {
                    slot.state = SubscriptionState::Failed;
                    slot.error = Some(e.to_string());
                }
                error!(
                    subscription = %record.id,
                    chain = %record.endpoint.chain,
                    error = %e,
                    "subscription failed to start"
                );
                Err(e)
            }
        }
    }

    /// Stop a subscription. Stopping a stopped, stopping or failed
    /// subscription is a no-op.
    pub async fn stop(&self, id: &str) -> Result<(), BridgeError> {
        let (handle, generation) = {
            let mut slots = self.slots.lock().await;
            let slot = slots
                .get_mut(id)
                .ok_or_else(|| BridgeError::NotFound { id: id.to_string() })?;
            match slot.state {
                SubscriptionState::Stopping
                | SubscriptionState::Stopped
                | SubscriptionState::Failed => return Ok(()),
                SubscriptionState::Pending | SubscriptionState::Starting => {
                    // `start` sees the state change and stops the handle.
                    slot.cancel.cancel();
                    slot.state = SubscriptionState::Stopped;
                    return Ok(());
                }
                SubscriptionState::Running => {
                    slot.state = SubscriptionState::Stopping;
                    slot.cancel.cancel();
                    (slot.handle.take(), slot.generation)
                }
            }
        };

        if let Some(handle) = handle {
            handle.stop().await;
        }

        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(id).filter(|s| s.generation == generation) {
            slot.state = SubscriptionState::Stopped;
        }
        info!(subscription = %id, "subscription stopped");
        Ok(())
    }

    /// Stop a subscription (if running) and drop its slot.
    pub async fn forget(&self, id: &str) {
        match self.stop(id).await {
            Ok(()) | Err(BridgeError::NotFound { .. }) => {}
            Err(e) => warn!(subscription = %id, error = %e, "stop before forget failed"),
        }
        let mut slots = self.slots.lock().await;
        if slots.get(id).is_some_and(|s| !s.state.is_active()) {
            slots.remove(id);
        }
    }

    /// Load every persisted record and start them concurrently. A failing
    /// record never delays the others.
    pub async fn start_all(&self) -> Result<BootReport, BridgeError> {
        let records = self.mark_pending().await?;
        Ok(self.start_pending(records).await)
    }

    /// Load the store and give every record that is not already active a
    /// `Pending` slot. Returns the records that got one.
    async fn mark_pending(&self) -> Result<Vec<SubscriptionRecord>, BridgeError> {
        let mut records = self.store.load_all().await?;
        let mut slots = self.slots.lock().await;
        records.retain(|record| !slots.get(&record.id).is_some_and(|s| s.state.is_active()));
        for record in &records {
            slots.insert(
                record.id.clone(),
                Slot {
                    record: record.clone(),
                    state: SubscriptionState::Pending,
                    generation: 0,
                    cancel: CancellationToken::new(),
                    handle: None,
                    error: None,
                },
            );
        }
        Ok(records)
    }

    /// Start the records whose slot is still `Pending`.
    async fn start_pending(&self, records: Vec<SubscriptionRecord>) -> BootReport {
        info!(count = records.len(), "starting persisted subscriptions");
        let results = join_all(records.into_iter().map(|record| async move {
            let id = record.id.clone();
            (id, self.launch(record, true).await)
        }))
        .await;

        let mut report = BootReport::default();
        for (id, result) in results {
            match result {
                Ok(true) => report.started.push(id),
                Ok(false) => report.skipped.push(id),
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }
        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "boot complete"
        );
        report
    }

    /// Persist `record` and start it. The record is deleted again if the
    /// start fails.
    pub async fn register(&self, record: SubscriptionRecord) -> Result<(), BridgeError> {
        if self.state(&record.id).await.is_some_and(SubscriptionState::is_active) {
            return Err(BridgeError::AlreadyActive { id: record.id });
        }
        self.store.save(&record).await?;

        match self.start(record.clone()).await {
            // Picked up from the store by a concurrent reconcile.
            Ok(()) | Err(BridgeError::AlreadyActive { .. }) => Ok(()),
            Err(e) => {
                if let Err(delete) = self.store.delete(&record.id).await {
                    warn!(subscription = %record.id, error = %delete, "could not delete unstartable record");
                }
                Err(e)
            }
        }
    }

    /// Stop, forget and delete a subscription.
    pub async fn unregister(&self, id: &str) -> Result<(), BridgeError> {
        self.forget(id).await;
        self.store.delete(id).await?;
        info!(subscription = %id, "subscription unregistered");
        Ok(())
    }

    /// Stop a subscription and start it again from its stored record.
    pub async fn restart(&self, id: &str) -> Result<(), BridgeError> {
        match self.stop(id).await {
            Ok(()) | Err(BridgeError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        let record = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| BridgeError::NotFound { id: id.to_string() })?;
        self.start(record).await
    }

    pub async fn state(&self, id: &str) -> Option<SubscriptionState> {
        self.slots.lock().await.get(id).map(|s| s.state)
    }

    /// Status of every known subscription, sorted by id.
    pub async fn snapshot(&self) -> Vec<SubscriptionStatus> {
        let slots = self.slots.lock().await;
        let mut statuses: Vec<SubscriptionStatus> = slots
            .values()
            .map(|slot| SubscriptionStatus {
                id: slot.record.id.clone(),
                chain: slot.record.endpoint.chain.clone(),
                job_reference: slot.record.job_reference.clone(),
                state: slot.state,
                error: slot.error.clone(),
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Stop every subscription concurrently.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        join_all(ids.iter().map(|id| async move {
            if let Err(e) = self.stop(id).await {
                debug!(subscription = %id, error = %e, "stop during shutdown");
            }
        }))
        .await;
        info!(count = ids.len(), "all subscriptions stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use chainbridge_chains::ChainManager;
    use chainbridge_core::error::ConfigError;
    use chainbridge_core::types::{Endpoint, Protocol};
    use chainbridge_storage::InMemoryStore;
    use tokio::sync::mpsc;

    use super::*;

    #[derive(Default)]
    struct Counters {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    struct FakeHandle {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl SubscriptionHandle for FakeHandle {
        async fn stop(&self) {
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Job reference selects the behaviour: "fail" errors, "slow" takes
    /// 200ms, anything else starts at once.
    struct FakeManager {
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl ChainManager for FakeManager {
        fn name(&self) -> &str {
            "fake"
        }

        async fn start(
            &self,
            record: &SubscriptionRecord,
            _ctx: StartContext,
        ) -> Result<Arc<dyn SubscriptionHandle>, BridgeError> {
            match record.job_reference.as_str() {
                "fail" => return Err(ConfigError::Invalid("bad filter".into()).into()),
                "slow" => tokio::time::sleep(Duration::from_millis(200)).await,
                _ => {}
            }
            self.counters.started.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeHandle { counters: self.counters.clone() }))
        }
    }

    fn record(id: &str, job: &str) -> SubscriptionRecord {
        SubscriptionRecord {
            id: id.into(),
            job_reference: job.into(),
            endpoint: Endpoint {
                url: "ws://node".into(),
                protocol: Protocol::WebSocket,
                chain: "fake".into(),
                refresh_interval_secs: 0,
            },
            addresses: vec![],
            topics: vec![],
        }
    }

    fn supervisor() -> (Supervisor, Arc<Counters>, Arc<InMemoryStore>) {
        let counters = Arc::new(Counters::default());
        let mut registry = ChainRegistry::new();
        registry.register(Arc::new(FakeManager { counters: counters.clone() }));
        let store = Arc::new(InMemoryStore::new());
        let (sink, _rx) = mpsc::channel(8);
        (Supervisor::new(Arc::new(registry), store.clone(), sink), counters, store)
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected() {
        let (sup, counters, _) = supervisor();
        sup.start(record("a", "job")).await.unwrap();
        let err = sup.start(record("a", "job")).await.unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyActive { .. }));
        assert_eq!(counters.started.load(Ordering::SeqCst), 1);
        assert_eq!(sup.state("a").await, Some(SubscriptionState::Running));
    }

    #[tokio::test]
    async fn concurrent_starts_create_one_subscription() {
        let (sup, counters, _) = supervisor();
        let (a, b) = tokio::join!(sup.start(record("a", "slow")), sup.start(record("a", "slow")));
        assert!(a.is_ok() ^ b.is_ok());
        assert_eq!(counters.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (sup, counters, _) = supervisor();
        sup.start(record("a", "job")).await.unwrap();
        sup.stop("a").await.unwrap();
        sup.stop("a").await.unwrap();
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(sup.state("a").await, Some(SubscriptionState::Stopped));

        assert!(matches!(sup.stop("missing").await, Err(BridgeError::NotFound { .. })));
    }

    #[tokio::test]
    async fn stopped_subscription_can_start_again() {
        let (sup, counters, _) = supervisor();
        sup.start(record("a", "job")).await.unwrap();
        sup.stop("a").await.unwrap();
        sup.start(record("a", "job")).await.unwrap();
        assert_eq!(counters.started.load(Ordering::SeqCst), 2);
        assert_eq!(sup.state("a").await, Some(SubscriptionState::Running));
    }

    #[tokio::test]
    async fn manager_error_marks_failed() {
        let (sup, _, _) = supervisor();
        let err = sup.start(record("a", "fail")).await.unwrap_err();
        assert!(err.is_configuration());

        let status = sup.snapshot().await.remove(0);
        assert_eq!(status.state, SubscriptionState::Failed);
        assert!(status.error.unwrap().contains("bad filter"));
        sup.stop("a").await.unwrap();
        assert_eq!(sup.state("a").await, Some(SubscriptionState::Failed));
    }

    #[tokio::test]
    async fn unknown_chain_is_a_failed_start() {
        let (sup, _, _) = supervisor();
        let mut rec = record("a", "job");
        rec.endpoint.chain = "dogecoin".into();
        let err = sup.start(rec).await.unwrap_err();
        assert!(matches!(err, BridgeError::Config(ConfigError::UnknownChain(_))));
    }

    #[tokio::test]
    async fn boot_fans_out_and_isolates_failures() {
        let (sup, counters, store) = supervisor();
        store.save(&record("bad", "fail")).await.unwrap();
        for i in 0..5 {
            store.save(&record(&format!("slow-{i}"), "slow")).await.unwrap();
        }

        let begun = Instant::now();
        let report = sup.start_all().await.unwrap();
        // Five 200ms starts in parallel, not in sequence.
        assert!(begun.elapsed() < Duration::from_millis(800));

        assert_eq!(report.started.len(), 5);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad");
        assert_eq!(counters.started.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn stop_during_start_releases_handle() {
        let (sup, counters, _) = supervisor();
        let sup = Arc::new(sup);
        let starting = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.start(record("a", "slow")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        sup.stop("a").await.unwrap();
        starting.await.unwrap().unwrap();

        assert_eq!(sup.state("a").await, Some(SubscriptionState::Stopped));
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn register_persists_only_started_records() {
        let (sup, _, store) = supervisor();
        sup.register(record("good", "job")).await.unwrap();
        assert!(sup.register(record("bad", "fail")).await.is_err());

        let stored: Vec<String> = store.load_all().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(stored, vec!["good".to_string()]);

        sup.unregister("good").await.unwrap();
        assert!(store.is_empty().await);
        assert_eq!(sup.state("good").await, None);
    }

    #[tokio::test]
    async fn boot_skips_records_stopped_while_pending() {
        let (sup, counters, store) = supervisor();
        store.save(&record("a", "job")).await.unwrap();
        store.save(&record("b", "job")).await.unwrap();

        let records = sup.mark_pending().await.unwrap();
        assert_eq!(sup.state("a").await, Some(SubscriptionState::Pending));
        sup.stop("a").await.unwrap();
        let report = sup.start_pending(records).await;

        assert_eq!(report.started, vec!["b".to_string()]);
        assert_eq!(report.skipped, vec!["a".to_string()]);
        assert!(report.failed.is_empty());
        assert_eq!(sup.state("a").await, Some(SubscriptionState::Stopped));
        assert_eq!(counters.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn register_of_an_active_id_leaves_the_store_alone() {
        let (sup, _, store) = supervisor();
        let sup = Arc::new(sup);
        let starting = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.start(record("a", "slow")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = sup.register(record("a", "job")).await.unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyActive { .. }));
        assert!(store.is_empty().await);
        starting.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn register_saves_before_starting() {
        let (sup, _, store) = supervisor();
        let sup = Arc::new(sup);
        let registering = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.register(record("a", "slow")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sup.state("a").await, Some(SubscriptionState::Starting));
        assert!(store.load("a").await.unwrap().is_some());

        registering.await.unwrap().unwrap();
        assert_eq!(sup.state("a").await, Some(SubscriptionState::Running));
    }

    #[tokio::test]
    async fn restart_uses_stored_record() {
        let (sup, counters, store) = supervisor();
        sup.register(record("a", "job")).await.unwrap();
        let mut changed = record("a", "job-2");
        changed.addresses.push("0xabc".into());
        store.save(&changed).await.unwrap();

        sup.restart("a").await.unwrap();
        assert_eq!(counters.started.load(Ordering::SeqCst), 2);
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(sup.snapshot().await[0].job_reference, "job-2");

        assert!(matches!(sup.restart("nope").await, Err(BridgeError::NotFound { .. })));
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let (sup, counters, _) = supervisor();
        for id in ["a", "b", "c"] {
            sup.start(record(id, "job")).await.unwrap();
        }
        sup.shutdown().await;
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 3);
        assert!(sup
            .snapshot()
            .await
            .iter()
            .all(|s| s.state == SubscriptionState::Stopped));
    }
}
