//! btleplug-based attribute channel.

use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::traits::{Attribute, AttributeChannel, TransportError};
use crate::protocol::constants::{FIRMWARE_SERVICE_UUID, MAINTENANCE_SERVICE_UUID};

/// First Bluetooth adapter on the host.
pub async fn default_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(TransportError::NoAdapter)
}

/// Whether an advertising peripheral is the one to connect to.
///
/// With a filter, the name or address must contain it (addresses compare
/// case-insensitively). Without one, any peripheral advertising the firmware
/// or maintenance service matches.
pub fn matches_device(name: &str, address: &str, services: &[Uuid], filter: Option<&str>) -> bool {
    match filter {
        Some(f) => name.contains(f) || address.to_lowercase().contains(&f.to_lowercase()),
        None => services
            .iter()
            .any(|s| *s == FIRMWARE_SERVICE_UUID || *s == MAINTENANCE_SERVICE_UUID),
    }
}

/// Scan for `scan_time` and return the first matching peripheral.
#[instrument(level = "info", skip(adapter))]
pub async fn find_peripheral(
    adapter: &Adapter,
    filter: Option<&str>,
    scan_time: Duration,
) -> Result<Peripheral, TransportError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(scan_time).await;

    let mut found = None;
    for peripheral in adapter.peripherals().await? {
        let Some(props) = peripheral.properties().await? else {
            continue;
        };
        let name = props.local_name.unwrap_or_default();
        let address = peripheral.address().to_string();
        if matches_device(&name, &address, &props.services, filter) {
            info!(name = %name, address = %address, "Found device");
            found = Some(peripheral);
            break;
        }
    }

    adapter.stop_scan().await?;
    found.ok_or(TransportError::DeviceNotFound)
}

/// Attribute channel over an already connected (and authenticated) peripheral.
pub struct BtleChannel {
    peripheral: Peripheral,
    characteristics: HashMap<Attribute, Characteristic>,
}

impl BtleChannel {
    /// Discover services on a connected peripheral and resolve the
    /// maintenance protocol characteristics.
    ///
    /// Attributes missing from the device are reported when first used, so a
    /// unit exposing only the firmware service still supports updates.
    #[instrument(level = "info", skip(peripheral))]
    pub async fn new(peripheral: Peripheral) -> Result<Self, TransportError> {
        if !peripheral.is_connected().await? {
            return Err(TransportError::Disconnected);
        }
        peripheral.discover_services().await?;

        let discovered = peripheral.characteristics();
        let mut characteristics = HashMap::new();
        for attribute in Attribute::ALL {
            match discovered
                .iter()
                .find(|c| c.uuid == attribute.uuid() && c.service_uuid == attribute.service_uuid())
            {
                Some(c) => {
                    debug!(attribute = %attribute, uuid = %c.uuid, "Resolved characteristic");
                    characteristics.insert(attribute, c.clone());
                }
                None => warn!(attribute = %attribute, "Characteristic not exposed by device"),
            }
        }

        info!(count = characteristics.len(), "Attribute channel ready");
        Ok(Self {
            peripheral,
            characteristics,
        })
    }

    /// Scan, connect and resolve characteristics in one step.
    pub async fn connect(
        adapter: &Adapter,
        filter: Option<&str>,
        scan_time: Duration,
    ) -> Result<Self, TransportError> {
        let peripheral = find_peripheral(adapter, filter, scan_time).await?;
        peripheral.connect().await?;
        Self::new(peripheral).await
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    fn characteristic(&self, attribute: Attribute) -> Result<Characteristic, TransportError> {
        self.characteristics
            .get(&attribute)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound(attribute))
    }
}

fn map_error(attribute: Attribute, err: btleplug::Error, write: bool) -> TransportError {
    match err {
        btleplug::Error::NotConnected => TransportError::Disconnected,
        e if write => TransportError::WriteFailed {
            attribute,
            message: e.to_string(),
        },
        e => TransportError::ReadFailed {
            attribute,
            message: e.to_string(),
        },
    }
}

impl AttributeChannel for BtleChannel {
    async fn write(&mut self, attribute: Attribute, data: &[u8]) -> Result<(), TransportError> {
        let characteristic = self.characteristic(attribute)?;
        self.peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await
            .map_err(|e| map_error(attribute, e, true))
    }

    async fn read(&mut self, attribute: Attribute) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.characteristic(attribute)?;
        self.peripheral
            .read(&characteristic)
            .await
            .map_err(|e| map_error(attribute, e, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_device_filter() {
        let none: &[Uuid] = &[];
        assert!(matches_device("ES3-1234", "AA:BB:CC:00:11:22", none, Some("ES3")));
        assert!(matches_device("", "AA:BB:CC:00:11:22", none, Some("cc:00")));
        assert!(!matches_device("other", "AA:BB:CC:00:11:22", none, Some("ES3")));
    }

    #[test]
    fn test_matches_device_by_service() {
        assert!(matches_device("", "", &[MAINTENANCE_SERVICE_UUID], None));
        assert!(matches_device("", "", &[Uuid::nil(), FIRMWARE_SERVICE_UUID], None));
        assert!(!matches_device("ES3", "", &[Uuid::nil()], None));
    }
}
