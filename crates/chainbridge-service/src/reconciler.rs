//! Periodic store reconciliation.
//!
//! Starts records that appeared in the store since the last pass and
//! stops (and forgets) subscriptions whose record was deleted. Records the
//! supervisor already knows, including `Failed` ones, are left alone, and
//! so are subscriptions still `Starting`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chainbridge_core::error::BridgeError;

use crate::supervisor::{SubscriptionState, Supervisor};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub failed: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.failed.is_empty() && self.removed.is_empty()
    }
}

pub struct Reconciler {
    supervisor: Arc<Supervisor>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(supervisor: Arc<Supervisor>, interval: Duration) -> Self {
        Self { supervisor, interval }
    }

    pub async fn reconcile_once(&self) -> Result<ReconcileReport, BridgeError> {
        let records = self.supervisor.store().load_all().await?;
        let wanted: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let mut report = ReconcileReport::default();

        for status in self.supervisor.snapshot().await {
            if status.state == SubscriptionState::Starting {
                continue;
            }
            if !wanted.contains(status.id.as_str()) {
                self.supervisor.forget(&status.id).await;
                report.removed.push(status.id);
            }
        }

        let mut fresh = Vec::new();
        for record in &records {
            if self.supervisor.state(&record.id).await.is_none() {
                fresh.push(record.clone());
            }
        }
        let results = join_all(fresh.into_iter().map(|record| async move {
            let id = record.id.clone();
            (id, self.supervisor.start(record).await)
        }))
        .await;
        for (id, result) in results {
            match result {
                Ok(()) => report.started.push(id),
                // Already logged by the supervisor.
                Err(_) => report.failed.push(id),
            }
        }
        Ok(report)
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "store reconciler started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match self.reconcile_once().await {
                    Ok(report) if report.is_empty() => debug!("store reconciled, no changes"),
                    Ok(report) => info!(
                        started = report.started.len(),
                        failed = report.failed.len(),
                        removed = report.removed.len(),
                        "store reconciled"
                    ),
                    Err(e) => warn!(error = %e, "store reconciliation failed"),
                }
            }
            debug!("store reconciler stopped");
        })
    }
}
