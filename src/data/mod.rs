//! Data structures for element state.
//!
//! This module contains the request, raw dump and status types that
//! flow between the protocol components and the request layer.

pub mod dump;
pub mod mode;
pub mod status;

pub use dump::{AttributeEntry, AttributeValue, RawDeviceDump};
pub use mode::{OperatingMode, SetRequest, HEATER_TEMP_RANGE, ROOM_TEMP_RANGE};
pub use status::{
    DegradedResult, DeviceStatus, RoomTempSource, SetOutcome, FORCED_OFF_MESSAGE,
};
