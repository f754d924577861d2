//! Semantic element status.

use std::fmt;

use crate::ble::uuids::{HEATER_TEMP_UUID, OPERATING_MODE_UUID, ROOM_TEMP_UUID};
use crate::data::dump::RawDeviceDump;
use crate::error::{Error, Result};
use crate::protocol::{decode_temperature, DeviceAddress};

/// Where the room current temperature came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RoomTempSource {
    /// An external reference sensor.
    ExternalSensor,
    /// The sensor built into the element.
    HeatingElement,
}

impl fmt::Display for RoomTempSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExternalSensor => write!(f, "ExternalSensor"),
            Self::HeatingElement => write!(f, "HeatingElement"),
        }
    }
}

/// Status of an element, built from one inspection.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceStatus {
    /// Element address.
    #[cfg_attr(feature = "serde", serde(rename = "device"))]
    pub address: DeviceAddress,
    /// Advertised name.
    pub name: String,
    /// Raw mode byte; `None` if the mode attribute was empty.
    pub mode: Option<u8>,
    /// Room temperature, °C.
    pub room_current_temp: f64,
    /// Room target (mode 5), °C.
    pub room_target_temp: f64,
    /// Heater temperature, °C.
    pub heater_current_temp: f64,
    /// Heater target (mode 6), °C.
    pub heater_target_temp: f64,
    /// Origin of `room_current_temp`.
    pub room_temp_source: RoomTempSource,
}

impl DeviceStatus {
    /// Build a status from a raw dump.
    ///
    /// `external` is a reference sensor reading; when present it replaces
    /// the element's own room temperature.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingMeasurement`] if the room, heater or mode value is absent
    /// - [`Error::MalformedPayload`] if a temperature block is too short
    pub fn from_dump(dump: &RawDeviceDump, external: Option<f64>) -> Result<Self> {
        let required = move |uuid: uuid::Uuid| {
            dump.value_bytes(&uuid).ok_or_else(|| Error::MissingMeasurement {
                uuid: uuid.to_string(),
            })
        };

        let room = required(ROOM_TEMP_UUID)?;
        let heater = required(HEATER_TEMP_UUID)?;
        let mode = required(OPERATING_MODE_UUID)?;

        let room_reading = decode_temperature(room)?;
        let heater_reading = decode_temperature(heater)?;

        let (room_current_temp, room_temp_source) = match external {
            Some(celsius) => (celsius, RoomTempSource::ExternalSensor),
            None => (room_reading.current, RoomTempSource::HeatingElement),
        };

        Ok(Self {
            address: dump.address.clone(),
            name: dump.name.clone(),
            mode: mode.first().copied(),
            room_current_temp,
            room_target_temp: room_reading.target,
            heater_current_temp: heater_reading.current,
            heater_target_temp: heater_reading.target,
            room_temp_source,
        })
    }
}

/// The message carried by a degraded set result.
pub const FORCED_OFF_MESSAGE: &str = "verification failed, device forced off";

/// Soft failure of a set request: verification never succeeded and the
/// element has been switched off.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DegradedResult {
    /// Element address.
    #[cfg_attr(feature = "serde", serde(rename = "device"))]
    pub address: DeviceAddress,
    /// Always 0.
    pub mode: u8,
    /// Human readable explanation.
    pub error: String,
}

impl DegradedResult {
    /// Degraded result for an element that was forced off.
    pub fn forced_off(address: DeviceAddress) -> Self {
        Self {
            address,
            mode: 0,
            error: FORCED_OFF_MESSAGE.to_string(),
        }
    }
}

/// Result of a set request.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(untagged))]
pub enum SetOutcome {
    /// The element reported the requested state.
    Verified(DeviceStatus),
    /// Verification failed on every attempt; the element was forced off.
    ForcedOff(DegradedResult),
}

impl SetOutcome {
    /// Check whether the request was verified.
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }

    /// The verified status, if any.
    pub fn status(&self) -> Option<&DeviceStatus> {
        match self {
            Self::Verified(status) => Some(status),
            Self::ForcedOff(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::AttributeProperty;
    use crate::data::dump::{AttributeEntry, AttributeValue};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn dump_with(values: &[(Uuid, Vec<u8>)]) -> RawDeviceDump {
        let chars = values
            .iter()
            .map(|(uuid, bytes)| {
                (
                    *uuid,
                    AttributeEntry {
                        properties: vec![AttributeProperty::Read],
                        value: AttributeValue::Bytes(bytes.clone()),
                    },
                )
            })
            .collect();
        let mut services = BTreeMap::new();
        services.insert(Uuid::nil(), chars);
        RawDeviceDump {
            address: DeviceAddress::parse("CC:22:37:10:43:4B").unwrap(),
            name: "MOA Blue TERMA".to_string(),
            services,
        }
    }

    fn full_dump() -> RawDeviceDump {
        dump_with(&[
            (ROOM_TEMP_UUID, vec![0, 209, 0, 200]),
            (HEATER_TEMP_UUID, vec![1, 173, 0, 200]),
            (OPERATING_MODE_UUID, vec![5]),
        ])
    }

    #[test]
    fn test_status_from_element_sensor() {
        let status = DeviceStatus::from_dump(&full_dump(), None).unwrap();
        assert_eq!(
            status,
            DeviceStatus {
                address: DeviceAddress::parse("CC:22:37:10:43:4B").unwrap(),
                name: "MOA Blue TERMA".to_string(),
                mode: Some(5),
                room_current_temp: 20.9,
                room_target_temp: 20.0,
                heater_current_temp: 42.8,
                heater_target_temp: 20.0,
                room_temp_source: RoomTempSource::HeatingElement,
            }
        );
    }

    #[test]
    fn test_status_prefers_external_reading() {
        let status = DeviceStatus::from_dump(&full_dump(), Some(19.25)).unwrap();
        assert_eq!(status.room_current_temp, 19.25);
        assert_eq!(status.room_temp_source, RoomTempSource::ExternalSensor);
        assert_eq!(status.room_target_temp, 20.0);
        assert_eq!(status.heater_current_temp, 42.8);
    }

    #[test]
    fn test_external_reading_does_not_mask_missing_data() {
        let dump = dump_with(&[(ROOM_TEMP_UUID, vec![0, 209, 0, 200])]);
        assert!(matches!(
            DeviceStatus::from_dump(&dump, Some(19.25)),
            Err(Error::MissingMeasurement { .. })
        ));
    }

    #[test]
    fn test_missing_measurement() {
        let dump = dump_with(&[
            (ROOM_TEMP_UUID, vec![0, 209, 0, 200]),
            (OPERATING_MODE_UUID, vec![0]),
        ]);
        match DeviceStatus::from_dump(&dump, None) {
            Err(Error::MissingMeasurement { uuid }) => {
                assert_eq!(uuid, HEATER_TEMP_UUID.to_string())
            }
            other => panic!("expected MissingMeasurement, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_mode_block() {
        let dump = dump_with(&[
            (ROOM_TEMP_UUID, vec![0, 209, 0, 200]),
            (HEATER_TEMP_UUID, vec![1, 173, 0, 200]),
            (OPERATING_MODE_UUID, vec![]),
        ]);
        let status = DeviceStatus::from_dump(&dump, None).unwrap();
        assert_eq!(status.mode, None);
    }

    #[test]
    fn test_short_block_is_malformed() {
        let dump = dump_with(&[
            (ROOM_TEMP_UUID, vec![0, 209]),
            (HEATER_TEMP_UUID, vec![1, 173, 0, 200]),
            (OPERATING_MODE_UUID, vec![0]),
        ]);
        assert!(matches!(
            DeviceStatus::from_dump(&dump, None),
            Err(Error::MalformedPayload { len: 2 })
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_outcome_serialization() {
        let status = DeviceStatus::from_dump(&full_dump(), None).unwrap();
        let json = serde_json::to_value(SetOutcome::Verified(status)).unwrap();
        assert_eq!(json["device"], "CC:22:37:10:43:4B");
        assert_eq!(json["mode"], 5);
        assert_eq!(json["room_temp_source"], "HeatingElement");

        let degraded = SetOutcome::ForcedOff(DegradedResult::forced_off(
            DeviceAddress::parse("CC:22:37:10:43:4B").unwrap(),
        ));
        let json = serde_json::to_value(degraded).unwrap();
        assert_eq!(json["mode"], 0);
        assert_eq!(json["error"], FORCED_OFF_MESSAGE);
    }
}
