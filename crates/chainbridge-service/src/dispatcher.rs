//! Event dispatcher: drains the shared event channel and triggers one job
//! run per event.
//!
//! The read side never waits on a trigger call. Each event is delivered by
//! its own task, and at most `max_in_flight` of those run at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chainbridge_core::policy::RetryPolicy;
use chainbridge_core::trigger::JobTrigger;
use chainbridge_core::types::JobEvent;

use crate::config::DispatchConfig;

/// Bytes of payload included in a failed-dispatch log line.
pub const LOG_PAYLOAD_LIMIT: usize = 256;

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct DispatchMetrics {
    received: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Events dropped because their subscription had been stopped.
    pub skipped: u64,
}

impl DispatchMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Dispatcher {
    trigger: Arc<dyn JobTrigger>,
    retry: RetryPolicy,
    max_in_flight: usize,
    shutdown_grace: Duration,
    metrics: Arc<DispatchMetrics>,
}

/// A running dispatcher task.
pub struct DispatcherHandle {
    task: JoinHandle<()>,
    shutdown: CancellationToken,
    metrics: Arc<DispatchMetrics>,
}

impl DispatcherHandle {
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop reading new events and wait (up to the shutdown grace) for the
    /// in-flight trigger calls. Returns the final counters.
    pub async fn shutdown(self) -> MetricsSnapshot {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "dispatcher task ended abnormally");
        }
        self.metrics.snapshot()
    }

    /// Wait for the dispatcher to finish on its own, which happens once
    /// every sender of the event channel is dropped.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "dispatcher task ended abnormally");
        }
    }
}

impl Dispatcher {
    pub fn new(trigger: Arc<dyn JobTrigger>, config: &DispatchConfig) -> Self {
        Self {
            trigger,
            retry: RetryPolicy::new(config.retry()),
            max_in_flight: config.max_in_flight.max(1),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            metrics: Arc::new(DispatchMetrics::default()),
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn spawn(self, events: mpsc::Receiver<JobEvent>) -> DispatcherHandle {
        let shutdown = CancellationToken::new();
        let metrics = self.metrics.clone();
        let task = tokio::spawn(self.run(events, shutdown.clone()));
        DispatcherHandle { task, shutdown, metrics }
    }

    async fn run(self, mut events: mpsc::Receiver<JobEvent>, shutdown: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        info!(max_in_flight = self.max_in_flight, "dispatcher started");

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = events.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };
            DispatchMetrics::incr(&self.metrics.received);

            if event.is_stopped() {
                DispatchMetrics::incr(&self.metrics.skipped);
                debug!(subscription = %event.subscription_id, "dropping event of stopped subscription");
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = Delivery {
                trigger: self.trigger.clone(),
                retry: self.retry.clone(),
                metrics: self.metrics.clone(),
            };
            tokio::spawn(async move {
                let _permit = permit;
                delivery.deliver(event).await;
            });
        }

        // Wait for in-flight deliveries by reclaiming every permit.
        let all = self.max_in_flight as u32;
        if tokio::time::timeout(self.shutdown_grace, permits.acquire_many(all))
            .await
            .is_err()
        {
            warn!(grace_ms = self.shutdown_grace.as_millis() as u64, "in-flight deliveries abandoned");
        }
        info!("dispatcher stopped");
    }
}

struct Delivery {
    trigger: Arc<dyn JobTrigger>,
    retry: RetryPolicy,
    metrics: Arc<DispatchMetrics>,
}

impl Delivery {
    async fn deliver(&self, event: JobEvent) {
        let mut attempt = 0u32;
        loop {
            let result = self
                .trigger
                .trigger_job(&event.job_reference, event.event.payload.clone())
                .await;
            let err = match result {
                Ok(()) => {
                    DispatchMetrics::incr(&self.metrics.delivered);
                    debug!(subscription = %event.subscription_id, job = %event.job_reference, "job triggered");
                    return;
                }
                Err(e) => e,
            };

            attempt += 1;
            if err.is_retryable() {
                if let Some(delay) = self.retry.next_delay(attempt) {
                    warn!(
                        job = %event.job_reference,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "job trigger failed, retrying"
                    );
                    tokio::select! {
                        _ = event.origin.cancelled() => {
                            DispatchMetrics::incr(&self.metrics.skipped);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            }

            DispatchMetrics::incr(&self.metrics.failed);
            warn!(
                subscription = %event.subscription_id,
                job = %event.job_reference,
                error = %err,
                payload = %truncated(&event.event.payload, LOG_PAYLOAD_LIMIT),
                "job trigger failed"
            );
            return;
        }
    }
}

/// Lossy UTF-8 rendering of at most `limit` bytes of `payload`.
pub fn truncated(payload: &Bytes, limit: usize) -> String {
    if payload.len() <= limit {
        return String::from_utf8_lossy(payload).into_owned();
    }
    let mut text = String::from_utf8_lossy(&payload[..limit]).into_owned();
    text.push_str("...");
    text
}
