//! Bluetooth discovery for finding hubs to connect to

use crate::transport::traits::{HubAddress, HubTarget};
use anyhow::Result;
use bluer::{Adapter, AdapterEvent, Device};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

/// Configuration for hub discovery
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// How long to scan for devices
    pub scan_duration: Duration,
    /// Only surface devices whose name starts with this prefix
    pub name_prefix: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(3),
            name_prefix: None,
        }
    }
}

/// Bluetooth hub scanner
pub struct HubScanner {
    config: ScanConfig,
}

impl HubScanner {
    /// Create a new scanner
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Get the default Bluetooth adapter
    pub async fn get_adapter() -> Result<Adapter> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        Ok(adapter)
    }

    /// Scan for hubs, surfacing only devices that advertise a name
    pub async fn discover(&self, adapter: &Adapter) -> Result<Vec<HubTarget>> {
        let mut targets = Vec::new();
        let mut seen: HashSet<bluer::Address> = HashSet::new();

        let discover = adapter.discover_devices().await?;
        tokio::pin!(discover);

        let scan_result = timeout(self.config.scan_duration, async {
            use futures::StreamExt;
            while let Some(evt) = discover.next().await {
                if let AdapterEvent::DeviceAdded(addr) = evt {
                    if !seen.insert(addr) {
                        continue;
                    }

                    if let Ok(device) = adapter.device(addr) {
                        if let Some(target) = self.target_from_device(addr, &device).await {
                            targets.push(target);
                        }
                    }
                }
            }
        })
        .await;

        // Timeout is the normal end of a scan window
        if scan_result.is_err() {
            info!(found = targets.len(), "discovery scan completed");
        }

        // Strongest signal first
        targets.sort_by(|a, b| {
            let rssi_a = a.rssi.unwrap_or(i16::MIN);
            let rssi_b = b.rssi.unwrap_or(i16::MIN);
            rssi_b.cmp(&rssi_a)
        });

        Ok(targets)
    }

    /// Build a target from a discovered device, if it qualifies
    async fn target_from_device(&self, addr: bluer::Address, device: &Device) -> Option<HubTarget> {
        // Nameless devices are noise, not hubs
        let name = match device.name().await {
            Ok(Some(name)) => name,
            _ => return None,
        };

        if let Some(ref prefix) = self.config.name_prefix {
            if !name.starts_with(prefix.as_str()) {
                return None;
            }
        }

        Some(HubTarget {
            name,
            address: HubAddress::Bluetooth(addr),
            rssi: device.rssi().await.ok().flatten(),
        })
    }
}
