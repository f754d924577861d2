//! Attribute inspection.
//!
//! Produces a [`RawDeviceDump`] of every service and characteristic on a
//! connected element. Individual read failures are recorded in the dump
//! rather than aborting the inspection.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ble::connection::DeviceSession;
use crate::ble::transport::BleTransport;
use crate::config::Timings;
use crate::data::{AttributeEntry, AttributeValue, RawDeviceDump};
use crate::error::{Error, Result};

/// Name reported when the element cannot be found by address.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Reads every attribute of a connected element.
pub struct DeviceInspector<T: BleTransport> {
    transport: Arc<T>,
    name_lookup_timeout: Duration,
}

impl<T: BleTransport> DeviceInspector<T> {
    /// Create an inspector.
    pub fn new(transport: Arc<T>, timings: &Timings) -> Self {
        Self {
            transport,
            name_lookup_timeout: timings.name_lookup_timeout,
        }
    }

    /// Dump every attribute of the element behind `session`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InspectionFailed`] if the session has no link or
    /// attribute enumeration fails.
    pub async fn inspect(&self, session: &DeviceSession<T>) -> Result<RawDeviceDump> {
        let address = session.address();
        let failed = |reason: String| Error::InspectionFailed {
            address: address.to_string(),
            reason,
        };

        let link = session
            .link()
            .ok_or_else(|| failed("session not connected".to_string()))?;

        let services = self
            .transport
            .list_attributes(&link)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let name = self.lookup_name(session).await;
        info!(%address, "Device: {}", name);

        let mut dump = RawDeviceDump {
            address: address.clone(),
            name,
            services: BTreeMap::new(),
        };

        for service in services {
            debug!("Service: {}", service.uuid);
            let entries = dump.services.entry(service.uuid).or_default();

            for attribute in service.attributes {
                let value = if attribute.is_readable() {
                    match self.transport.read_attribute(&link, attribute.uuid).await {
                        Ok(bytes) => AttributeValue::Bytes(bytes),
                        Err(e) => {
                            warn!(%address, uuid = %attribute.uuid, "Read failed: {}", e);
                            AttributeValue::ReadError(e.to_string())
                        }
                    }
                } else {
                    AttributeValue::NotReadable
                };

                entries.insert(
                    attribute.uuid,
                    AttributeEntry {
                        properties: attribute.properties,
                        value,
                    },
                );
            }
        }

        Ok(dump)
    }

    async fn lookup_name(&self, session: &DeviceSession<T>) -> String {
        match self
            .transport
            .find_by_address(session.address(), self.name_lookup_timeout)
            .await
        {
            Ok(Some(device)) => device.name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            Ok(None) => UNKNOWN_NAME.to_string(),
            Err(e) => {
                debug!("Name lookup failed: {}", e);
                UNKNOWN_NAME.to_string()
            }
        }
    }
}
