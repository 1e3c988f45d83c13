//! Running subscriptions and the handle the supervisor stops them through.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::filter::{Filter, Parser};
use crate::pump::{Confirmation, EventPump};
use crate::transport::Transport;
use crate::types::{EventSink, SubscriptionRecord};

/// What a chain manager receives from the supervisor when starting a
/// record: where to deliver events and the subscription's stop signal.
#[derive(Clone)]
pub struct StartContext {
    pub sink: EventSink,
    pub cancel: CancellationToken,
}

/// Stop capability of a live subscription.
#[async_trait]
pub trait SubscriptionHandle: Send + Sync {
    /// Stop reading and release the transport. Idempotent; once it
    /// returns no further events are emitted.
    async fn stop(&self);
}

/// One transport, one pump task and the token that stops both.
pub struct ActiveSubscription {
    id: String,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveSubscription {
    /// Subscribe `filter` on `transport` and spawn the pump that forwards
    /// parsed events into `ctx.sink`.
    ///
    /// On a failed subscribe the transport is released before returning.
    pub async fn spawn(
        record: &SubscriptionRecord,
        transport: Arc<dyn Transport>,
        filter: Arc<dyn Filter>,
        parser: Arc<dyn Parser>,
        confirmation: Confirmation,
        ctx: StartContext,
    ) -> Result<Self, TransportError> {
        let inbound = match transport.subscribe(filter).await {
            Ok(inbound) => inbound,
            Err(e) => {
                transport.unsubscribe().await;
                return Err(e);
            }
        };

        let pump = EventPump {
            subscription_id: record.id.clone(),
            job_reference: record.job_reference.clone(),
            transport: transport.clone(),
            parser,
            confirmation,
            sink: ctx.sink,
            cancel: ctx.cancel.clone(),
        };
        let handle = tokio::spawn(pump.run(inbound));

        tracing::info!(
            subscription = %record.id,
            url = %transport.url(),
            transport = %transport.kind(),
            "subscription started"
        );

        Ok(Self {
            id: record.id.clone(),
            transport,
            cancel: ctx.cancel,
            pump: Mutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl SubscriptionHandle for ActiveSubscription {
    async fn stop(&self) {
        self.cancel.cancel();
        // Held across the join so a concurrent stop returns only after the
        // pump has exited.
        let mut pump = self.pump.lock().await;
        let Some(handle) = pump.take() else {
            return;
        };
        self.transport.unsubscribe().await;
        if let Err(e) = handle.await {
            tracing::warn!(subscription = %self.id, error = %e, "event pump ended abnormally");
        }
        tracing::info!(subscription = %self.id, "subscription stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::testing::{EchoParser, FakeTransport, StaticFilter};
    use crate::transport::Inbound;
    use crate::types::{Endpoint, Protocol};

    fn record() -> SubscriptionRecord {
        SubscriptionRecord {
            id: "sub-1".into(),
            job_reference: "job-1".into(),
            endpoint: Endpoint {
                url: "wss://node.example".into(),
                protocol: Protocol::WebSocket,
                chain: "ethereum".into(),
                refresh_interval_secs: 0,
            },
            addresses: vec![],
            topics: vec![],
        }
    }

    async fn start(
        transport: Arc<FakeTransport>,
    ) -> Result<(ActiveSubscription, mpsc::Receiver<crate::types::JobEvent>), TransportError> {
        let (sink, rx) = mpsc::channel(16);
        let ctx = StartContext { sink, cancel: CancellationToken::new() };
        let sub = ActiveSubscription::spawn(
            &record(),
            transport,
            Arc::new(StaticFilter),
            Arc::new(EchoParser),
            Confirmation::PreConfirmed,
            ctx,
        )
        .await?;
        Ok((sub, rx))
    }

    #[tokio::test]
    async fn events_are_tagged_with_job_reference() {
        let transport = Arc::new(FakeTransport::default());
        let (_sub, mut rx) = start(transport.clone()).await.unwrap();

        transport.push(Inbound::Message(Bytes::from("evt"))).await;
        let ev = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.subscription_id, "sub-1");
        assert_eq!(ev.job_reference, "job-1");
        assert_eq!(ev.event.payload, Bytes::from("evt"));
    }

    #[tokio::test]
    async fn stop_twice_is_a_noop() {
        let transport = Arc::new(FakeTransport::default());
        let (sub, mut rx) = start(transport.clone()).await.unwrap();

        sub.stop().await;
        sub.stop().await;
        assert_eq!(transport.unsubscribes(), 1);

        transport.push(Inbound::Message(Bytes::from("late"))).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_stops_both_complete() {
        let transport = Arc::new(FakeTransport::default());
        let (sub, _rx) = start(transport.clone()).await.unwrap();
        let sub = Arc::new(sub);

        let a = tokio::spawn({
            let sub = sub.clone();
            async move { sub.stop().await }
        });
        let b = tokio::spawn({
            let sub = sub.clone();
            async move { sub.stop().await }
        });
        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(transport.unsubscribes(), 1);
    }

    #[tokio::test]
    async fn failed_subscribe_releases_transport() {
        let transport = Arc::new(FakeTransport::default());
        transport.fail_subscribe.store(true, Ordering::SeqCst);
        let err = start(transport.clone()).await.err().unwrap();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert_eq!(transport.unsubscribes(), 1);
    }
}
