//! Transport trait abstraction for pluggable hub links

use crate::transport::framing::FrameError;
use async_trait::async_trait;
use thiserror::Error;

/// How a discovered hub can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubAddress {
    /// Bluetooth device address
    Bluetooth(bluer::Address),
    /// TCP socket address of a simulated hub
    Tcp(String),
}

impl std::fmt::Display for HubAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubAddress::Bluetooth(addr) => write!(f, "{addr}"),
            HubAddress::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

/// A discovered hub, produced by the scanner and consumed on connect
#[derive(Debug, Clone)]
pub struct HubTarget {
    /// Human-readable device name
    pub name: String,
    /// Where to reach it
    pub address: HubAddress,
    /// Signal strength at discovery time (if available)
    pub rssi: Option<i16>,
}

/// Errors raised by the hub link
#[derive(Error, Debug)]
pub enum TransportError {
    /// The link is dead; the session cannot be used again
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("transport I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("bluetooth: {0}")]
    Bluetooth(#[from] bluer::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("target {0} is not reachable by this transport")]
    UnsupportedTarget(String),
}

impl TransportError {
    /// Fatal errors tear the session down; anything else leaves it usable
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::ConnectionLost(_))
    }
}

/// A live link to one hub, owned exclusively by the dispatch worker
#[async_trait]
pub trait HubSession: Send {
    /// Upload a program, execute it, and capture everything it printed.
    ///
    /// Blocks until the hub finishes; there is no cancellation once a
    /// program has been handed over.
    async fn run(&mut self, program: &str) -> Result<String, TransportError>;

    /// Close the link gracefully
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Factory for opening hub sessions
#[async_trait]
pub trait HubConnector: Send + Sync {
    /// Attempt to connect to the given hub
    async fn connect(&self, target: &HubTarget) -> Result<Box<dyn HubSession>, TransportError>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
