pub mod discovery;
pub mod framing;
pub mod rfcomm;
pub mod session;
pub mod tcp;
pub mod traits;

pub use discovery::{HubScanner, ScanConfig};
pub use rfcomm::{RfcommConfig, RfcommHubConnector, DEFAULT_RFCOMM_CHANNEL};
pub use tcp::TcpHubConnector;
pub use traits::{HubAddress, HubConnector, HubSession, HubTarget, TransportError};
