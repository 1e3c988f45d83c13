//! The event pump: one task per subscription that turns a transport's
//! inbound stream into tagged events on the dispatcher's channel.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::filter::Parser;
use crate::transport::{Inbound, InboundStream, Transport};
use crate::types::{EventSink, JobEvent};

/// Whether the first message after each subscribe is a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Consume and validate the first message after every `Subscribed`.
    Expect,
    /// Every message is event traffic.
    PreConfirmed,
}

pub struct EventPump {
    pub subscription_id: String,
    pub job_reference: String,
    pub transport: Arc<dyn Transport>,
    pub parser: Arc<dyn Parser>,
    pub confirmation: Confirmation,
    pub sink: EventSink,
    pub cancel: CancellationToken,
}

impl EventPump {
    /// Run until cancelled, the inbound stream ends, or the sink closes.
    pub async fn run(self, mut inbound: InboundStream) {
        let mut awaiting_confirmation = false;
        let mut generation = 0;

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                item = inbound.recv() => item,
            };
            let Some(item) = item else {
                tracing::debug!(subscription = %self.subscription_id, "inbound stream ended");
                break;
            };

            let raw = match item {
                Inbound::Subscribed { generation: current } => {
                    generation = current;
                    awaiting_confirmation = self.confirmation == Confirmation::Expect;
                    continue;
                }
                Inbound::Message(raw) => raw,
            };

            if awaiting_confirmation {
                awaiting_confirmation = false;
                match self.parser.confirm(&raw) {
                    Ok(()) => tracing::debug!(
                        subscription = %self.subscription_id,
                        "subscription confirmed"
                    ),
                    Err(e) => {
                        tracing::warn!(
                            subscription = %self.subscription_id,
                            url = %self.transport.url(),
                            generation,
                            error = %e,
                            "bad subscription confirmation, reconnecting"
                        );
                        self.transport.reconnect(generation).await;
                    }
                }
                continue;
            }

            let Some(events) = self.parser.parse_response(&raw) else {
                tracing::trace!(subscription = %self.subscription_id, "unmatched message dropped");
                continue;
            };

            for event in events {
                let tagged = JobEvent {
                    subscription_id: self.subscription_id.clone(),
                    job_reference: self.job_reference.clone(),
                    event,
                    origin: self.cancel.clone(),
                };
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return,
                    sent = self.sink.send(tagged) => {
                        if sent.is_err() {
                            tracing::warn!(subscription = %self.subscription_id, "event sink closed");
                            return;
                        }
                    }
                }
            }
        }
    }
}
