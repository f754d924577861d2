//! BLE Characteristic UUIDs.
//!
//! Contains the UUID constants of the Terma MOA Blue element attributes.

use uuid::Uuid;

/// Room temperature block: current and target for mode 5 (Read, Write).
pub const ROOM_TEMP_UUID: Uuid = Uuid::from_u128(0xd97352b1_d19e_11e2_9e96_0800200c9a66);

/// Heater temperature block: current and target for mode 6 (Read, Write).
pub const HEATER_TEMP_UUID: Uuid = Uuid::from_u128(0xd97352b2_d19e_11e2_9e96_0800200c9a66);

/// Operating mode byte: 0, 5 or 6 (Read, Write).
pub const OPERATING_MODE_UUID: Uuid = Uuid::from_u128(0xd97352b3_d19e_11e2_9e96_0800200c9a66);

/// Name the elements advertise once paired.
pub const ELEMENT_NAME: &str = "MOA Blue TERMA";
