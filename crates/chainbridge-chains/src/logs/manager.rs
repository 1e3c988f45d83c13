use std::sync::Arc;

use async_trait::async_trait;

use chainbridge_core::error::BridgeError;
use chainbridge_core::filter::Filter;
use chainbridge_core::pump::Confirmation;
use chainbridge_core::subscription::{ActiveSubscription, StartContext, SubscriptionHandle};
use chainbridge_core::transport::TransportFactory;
use chainbridge_core::types::{Protocol, SubscriptionRecord};

use super::cursor::LogCursor;
use super::dialect::LogDialect;
use super::filter::LogFilter;
use super::parser::LogParser;
use crate::registry::ChainManager;

/// Chain manager for address/topic log subscriptions, parameterised by a
/// [`LogDialect`].
pub struct LogsManager {
    dialect: LogDialect,
    transports: Arc<dyn TransportFactory>,
}

impl LogsManager {
    pub fn new(dialect: LogDialect, transports: Arc<dyn TransportFactory>) -> Self {
        Self { dialect, transports }
    }
}

#[async_trait]
impl ChainManager for LogsManager {
    fn name(&self) -> &str {
        self.dialect.chain
    }

    async fn start(
        &self,
        record: &SubscriptionRecord,
        ctx: StartContext,
    ) -> Result<Arc<dyn SubscriptionHandle>, BridgeError> {
        let protocol = record.endpoint.protocol;
        record.endpoint.parsed_url()?;

        // Filter and parser share the cursor so polls resume after the
        // newest delivered block.
        let cursor = Arc::new(LogCursor::new());
        let filter = LogFilter::new(
            self.dialect,
            protocol,
            &record.addresses,
            &record.topics,
            cursor.clone(),
        )?;
        filter.serialize()?;
        let parser = LogParser::new(self.dialect, protocol, cursor);

        let transport = self.transports.connect(&record.endpoint).await?;
        let confirmation = match protocol {
            Protocol::WebSocket => Confirmation::Expect,
            Protocol::Rpc => Confirmation::PreConfirmed,
        };

        let subscription = ActiveSubscription::spawn(
            record,
            transport,
            Arc::new(filter),
            Arc::new(parser),
            confirmation,
            ctx,
        )
        .await?;
        Ok(Arc::new(subscription))
    }
}
