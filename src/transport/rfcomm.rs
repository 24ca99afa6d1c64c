//! RFCOMM transport for real hubs over Bluetooth

use crate::transport::session::StreamSession;
use crate::transport::traits::{HubAddress, HubConnector, HubSession, HubTarget, TransportError};
use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr as RfcommAddr, Stream as RfcommStream};
use tracing::info;

/// Default RFCOMM channel the hub firmware listens on
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// Configuration for the RFCOMM connector
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// RFCOMM channel number
    pub channel: u8,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_RFCOMM_CHANNEL,
        }
    }
}

/// Connector for hubs reachable over Bluetooth RFCOMM
pub struct RfcommHubConnector {
    config: RfcommConfig,
}

impl RfcommHubConnector {
    pub fn new(config: RfcommConfig) -> Self {
        Self { config }
    }
}

impl Default for RfcommHubConnector {
    fn default() -> Self {
        Self::new(RfcommConfig::default())
    }
}

#[async_trait]
impl HubConnector for RfcommHubConnector {
    async fn connect(&self, target: &HubTarget) -> Result<Box<dyn HubSession>, TransportError> {
        let addr = match target.address {
            HubAddress::Bluetooth(addr) => addr,
            ref other => return Err(TransportError::UnsupportedTarget(other.to_string())),
        };

        let socket_addr = RfcommAddr::new(addr, self.config.channel);
        let stream = RfcommStream::connect(socket_addr).await?;

        info!(hub = %target.name, %addr, channel = self.config.channel, "connected to hub");

        Ok(Box::new(StreamSession::new(stream, addr.to_string())))
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}
