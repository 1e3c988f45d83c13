use std::sync::Arc;

use async_trait::async_trait;

use chainbridge_core::error::BridgeError;
use chainbridge_core::transport::{Transport, TransportFactory};
use chainbridge_core::types::{Endpoint, Protocol};
use chainbridge_http::{RpcConfig, RpcPollTransport};
use chainbridge_ws::{ManagedWsTransport, WsConfig};

/// Managed WebSocket for `ws`, polling transport for `rpc` endpoints.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransports {
    pub ws: WsConfig,
    pub rpc: RpcConfig,
}

impl DefaultTransports {
    pub fn new(ws: WsConfig, rpc: RpcConfig) -> Self {
        Self { ws, rpc }
    }
}

#[async_trait]
impl TransportFactory for DefaultTransports {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>, BridgeError> {
        endpoint.parsed_url()?;
        let transport: Arc<dyn Transport> = match endpoint.protocol {
            Protocol::WebSocket => {
                Arc::new(ManagedWsTransport::connect(endpoint.url.clone(), self.ws.clone()).await?)
            }
            Protocol::Rpc => Arc::new(RpcPollTransport::new(
                endpoint.url.clone(),
                endpoint.refresh_interval(),
                self.rpc.clone(),
            )?),
        };
        Ok(transport)
    }
}
