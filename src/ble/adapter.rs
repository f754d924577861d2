//! btleplug-backed transport.
//!
//! Wraps the first local adapter. Peripherals are matched by their
//! reported address, compared case-insensitively.

use async_trait::async_trait;
use btleplug::api::{
    CharPropFlags, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::transport::{
    AttributeDescriptor, AttributeProperty, BleTransport, DiscoveredDevice, ServiceDescriptor,
};
use crate::error::{Error, Result};
use crate::protocol::DeviceAddress;

/// Interval between peripheral list polls while waiting for a device.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

const PROPERTY_FLAGS: [(CharPropFlags, AttributeProperty); 8] = [
    (CharPropFlags::BROADCAST, AttributeProperty::Broadcast),
    (CharPropFlags::READ, AttributeProperty::Read),
    (
        CharPropFlags::WRITE_WITHOUT_RESPONSE,
        AttributeProperty::WriteWithoutResponse,
    ),
    (CharPropFlags::WRITE, AttributeProperty::Write),
    (CharPropFlags::NOTIFY, AttributeProperty::Notify),
    (CharPropFlags::INDICATE, AttributeProperty::Indicate),
    (
        CharPropFlags::AUTHENTICATED_SIGNED_WRITES,
        AttributeProperty::AuthenticatedSignedWrites,
    ),
    (
        CharPropFlags::EXTENDED_PROPERTIES,
        AttributeProperty::ExtendedProperties,
    ),
];

fn properties_of(flags: CharPropFlags) -> Vec<AttributeProperty> {
    PROPERTY_FLAGS
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, property)| *property)
        .collect()
}

/// [`BleTransport`] over the platform Bluetooth stack.
pub struct BtleplugTransport {
    adapter: Adapter,
}

impl BtleplugTransport {
    /// Open the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if there is no adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn known_peripheral(&self, address: &DeviceAddress) -> Result<Option<Peripheral>> {
        Ok(self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| {
                p.address()
                    .to_string()
                    .eq_ignore_ascii_case(address.as_str())
            }))
    }

    /// Poll the adapter until `address` shows up or `wait` passes.
    ///
    /// Assumes a scan is already running.
    async fn wait_for_peripheral(
        &self,
        address: &DeviceAddress,
        wait: Duration,
    ) -> Result<Option<Peripheral>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(peripheral) = self.known_peripheral(address).await? {
                return Ok(Some(peripheral));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn scanning<F, R>(&self, body: F) -> Result<R>
    where
        F: std::future::Future<Output = Result<R>>,
    {
        self.adapter.start_scan(ScanFilter::default()).await?;
        let result = body.await;
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }
        result
    }

    fn characteristic(link: &Peripheral, uuid: Uuid) -> Result<Characteristic> {
        link.characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::AttributeNotFound {
                uuid: uuid.to_string(),
            })
    }

    async fn describe(peripheral: &Peripheral) -> DiscoveredDevice {
        let name = match peripheral.properties().await {
            Ok(Some(props)) => props.local_name,
            _ => None,
        };
        DiscoveredDevice {
            address: peripheral.address().to_string(),
            name,
        }
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    type Link = Peripheral;

    async fn connect(&self, address: &DeviceAddress, wait: Duration) -> Result<Peripheral> {
        let operation = || Error::Timeout {
            operation: format!("connect {}", address),
        };

        let peripheral = match self.known_peripheral(address).await? {
            Some(p) => p,
            None => self
                .scanning(self.wait_for_peripheral(address, wait))
                .await?
                .ok_or_else(operation)?,
        };

        timeout(wait, peripheral.connect())
            .await
            .map_err(|_| operation())??;
        timeout(wait, peripheral.discover_services())
            .await
            .map_err(|_| operation())??;

        debug!(%address, "Connected, {} services", peripheral.services().len());
        Ok(peripheral)
    }

    async fn is_connected(&self, link: &Peripheral) -> bool {
        link.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self, link: &Peripheral) -> Result<()> {
        link.disconnect().await?;
        Ok(())
    }

    async fn list_attributes(&self, link: &Peripheral) -> Result<Vec<ServiceDescriptor>> {
        if link.services().is_empty() {
            link.discover_services().await?;
        }

        Ok(link
            .services()
            .into_iter()
            .map(|service| ServiceDescriptor {
                uuid: service.uuid,
                attributes: service
                    .characteristics
                    .into_iter()
                    .map(|c| AttributeDescriptor {
                        uuid: c.uuid,
                        properties: properties_of(c.properties),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn read_attribute(&self, link: &Peripheral, uuid: Uuid) -> Result<Vec<u8>> {
        let characteristic = Self::characteristic(link, uuid)?;
        let data = link.read(&characteristic).await?;
        trace!("Read {} bytes from characteristic {}", data.len(), uuid);
        Ok(data)
    }

    async fn write_attribute(
        &self,
        link: &Peripheral,
        uuid: Uuid,
        data: &[u8],
        ack: bool,
    ) -> Result<()> {
        let characteristic = Self::characteristic(link, uuid)?;

        let write_type = if ack {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        link.write(&characteristic, data, write_type).await?;
        trace!("Wrote {} bytes to characteristic {}", data.len(), uuid);
        Ok(())
    }

    async fn scan(&self, wait: Duration) -> Result<Vec<DiscoveredDevice>> {
        info!("Scanning for {:?}", wait);

        let peripherals = self
            .scanning(async {
                tokio::time::sleep(wait).await;
                self.adapter.peripherals().await.map_err(Error::from)
            })
            .await?;

        let mut devices = Vec::with_capacity(peripherals.len());
        for peripheral in &peripherals {
            devices.push(Self::describe(peripheral).await);
        }
        Ok(devices)
    }

    async fn find_by_address(
        &self,
        address: &DeviceAddress,
        wait: Duration,
    ) -> Result<Option<DiscoveredDevice>> {
        let found = self
            .scanning(self.wait_for_peripheral(address, wait))
            .await?;

        Ok(match found {
            Some(peripheral) => Some(Self::describe(&peripheral).await),
            None => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_flags_mapping() {
        let props = properties_of(CharPropFlags::READ | CharPropFlags::WRITE);
        assert_eq!(props, vec![AttributeProperty::Read, AttributeProperty::Write]);
    }

    #[test]
    fn test_empty_flags() {
        assert!(properties_of(CharPropFlags::empty()).is_empty());
    }

    #[test]
    fn test_every_flag_maps() {
        assert_eq!(properties_of(CharPropFlags::all()).len(), PROPERTY_FLAGS.len());
    }
}
