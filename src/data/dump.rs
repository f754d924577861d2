//! Raw attribute dump of an element.

use std::collections::BTreeMap;
use uuid::Uuid;

use crate::ble::transport::AttributeProperty;
use crate::protocol::DeviceAddress;

/// Outcome of reading one attribute during inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// The attribute was read successfully.
    Bytes(Vec<u8>),
    /// The read failed; the inspection carried on.
    ReadError(String),
    /// The attribute does not advertise read capability.
    NotReadable,
}

impl AttributeValue {
    /// Lower-case hex rendering of a successful read.
    pub fn hex(&self) -> Option<String> {
        match self {
            Self::Bytes(bytes) => Some(bytes.iter().map(|b| format!("{:02x}", b)).collect()),
            _ => None,
        }
    }
}

/// One characteristic in a dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeEntry {
    /// Advertised capabilities.
    pub properties: Vec<AttributeProperty>,
    /// Captured value.
    pub value: AttributeValue,
}

#[cfg(feature = "serde")]
impl serde::Serialize for AttributeEntry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("properties", &self.properties)?;
        match &self.value {
            AttributeValue::ReadError(e) => map.serialize_entry("value_error", e)?,
            other => map.serialize_entry("value", &other.hex())?,
        }
        map.end()
    }
}

/// Every service and characteristic of an element with the values
/// captured at inspection time.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RawDeviceDump {
    /// The inspected device.
    #[cfg_attr(feature = "serde", serde(rename = "device"))]
    pub address: DeviceAddress,
    /// Advertised name, or `Unknown`.
    pub name: String,
    /// Service UUID to characteristic UUID to entry.
    pub services: BTreeMap<Uuid, BTreeMap<Uuid, AttributeEntry>>,
}

impl RawDeviceDump {
    /// Bytes captured for a characteristic in any service.
    ///
    /// Returns `None` if the characteristic is absent, unreadable or its
    /// read failed.
    pub fn value_bytes(&self, uuid: &Uuid) -> Option<&[u8]> {
        self.services
            .values()
            .filter_map(|chars| chars.get(uuid))
            .find_map(|entry| match &entry.value {
                AttributeValue::Bytes(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
    }

    /// Total number of characteristics in the dump.
    pub fn attribute_count(&self) -> usize {
        self.services.values().map(BTreeMap::len).sum()
    }
}
