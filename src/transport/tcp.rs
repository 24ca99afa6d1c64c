//! TCP transport for the simulated hub
//!
//! Lets the whole stack run against a local simulator process during
//! development, without Bluetooth hardware.

use crate::transport::session::StreamSession;
use crate::transport::traits::{HubAddress, HubConnector, HubSession, HubTarget, TransportError};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::info;

/// Connector for hubs reachable over TCP
pub struct TcpHubConnector;

impl TcpHubConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TcpHubConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HubConnector for TcpHubConnector {
    async fn connect(&self, target: &HubTarget) -> Result<Box<dyn HubSession>, TransportError> {
        let addr = match &target.address {
            HubAddress::Tcp(addr) => addr,
            other => return Err(TransportError::UnsupportedTarget(other.to_string())),
        };

        let stream = TcpStream::connect(addr).await?;
        info!(hub = %target.name, %addr, "connected to simulated hub");

        Ok(Box::new(StreamSession::new(stream, addr.clone())))
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}
