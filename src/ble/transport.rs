//! The BLE transport seam.
//!
//! Everything above this module talks to elements through
//! [`BleTransport`]. The production implementation is
//! [`BtleplugTransport`](crate::ble::adapter::BtleplugTransport); tests
//! use a scripted in-memory transport.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::DeviceAddress;

/// A capability advertised by a GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(rename_all = "kebab-case"))]
pub enum AttributeProperty {
    /// Broadcast.
    Broadcast,
    /// Read.
    Read,
    /// Write without response.
    WriteWithoutResponse,
    /// Write with response.
    Write,
    /// Notify.
    Notify,
    /// Indicate.
    Indicate,
    /// Authenticated signed writes.
    AuthenticatedSignedWrites,
    /// Extended properties.
    ExtendedProperties,
}

impl fmt::Display for AttributeProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Broadcast => "broadcast",
            Self::Read => "read",
            Self::WriteWithoutResponse => "write-without-response",
            Self::Write => "write",
            Self::Notify => "notify",
            Self::Indicate => "indicate",
            Self::AuthenticatedSignedWrites => "authenticated-signed-writes",
            Self::ExtendedProperties => "extended-properties",
        };
        f.write_str(name)
    }
}

/// A characteristic exposed by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Advertised capabilities.
    pub properties: Vec<AttributeProperty>,
}

impl AttributeDescriptor {
    /// Check whether the characteristic can be read.
    pub fn is_readable(&self) -> bool {
        self.properties.contains(&AttributeProperty::Read)
    }
}

/// A service and the characteristics grouped under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics of the service.
    pub attributes: Vec<AttributeDescriptor>,
}

/// A device seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DiscoveredDevice {
    /// Device address as reported by the platform.
    pub address: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
}

/// Low-level BLE operations the control protocol relies on.
///
/// `Link` is the transport's handle to one established connection.
#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// Handle to an established connection.
    type Link: Clone + Send + Sync + 'static;

    /// Connect to the device at `address`.
    async fn connect(&self, address: &DeviceAddress, timeout: Duration) -> Result<Self::Link>;

    /// Check whether the link is still up.
    async fn is_connected(&self, link: &Self::Link) -> bool;

    /// Release the connection.
    async fn disconnect(&self, link: &Self::Link) -> Result<()>;

    /// Enumerate services and characteristics.
    async fn list_attributes(&self, link: &Self::Link) -> Result<Vec<ServiceDescriptor>>;

    /// Read the current value of a characteristic.
    async fn read_attribute(&self, link: &Self::Link, uuid: Uuid) -> Result<Vec<u8>>;

    /// Write a characteristic, with or without acknowledgement.
    async fn write_attribute(
        &self,
        link: &Self::Link,
        uuid: Uuid,
        data: &[u8],
        ack: bool,
    ) -> Result<()>;

    /// Scan for every visible device.
    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>>;

    /// Scan until a specific device is seen or the timeout passes.
    async fn find_by_address(
        &self,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> Result<Option<DiscoveredDevice>>;
}
