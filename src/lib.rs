// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # terma-moa-ble
//!
//! A Rust library for controlling Terma MOA Blue electric heating
//! elements over Bluetooth Low Energy.
//!
//! The elements are fiddly: connections drop, writes are silently
//! ignored and switching directly between regulation modes can double the
//! target temperature. This crate wraps them in a control protocol that
//! retries, verifies every change by reading it back and falls back to
//! switching the element off when verification keeps failing.
//!
//! ## Features
//!
//! - **Discovery**: Scan for nearby elements
//! - **Pairing**: Drive the `bluetoothctl` pairing handshake
//! - **Status**: Decode room and heater temperatures, with optional
//!   DS18B20 reference sensor override
//! - **Verified set**: Write mode and target, verify, force Off on failure
//! - **Inspection**: Dump every service and characteristic for troubleshooting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use terma_moa_ble::{BluetoothCtl, BtleplugTransport, HeaterController, Result, Timings};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let transport = Arc::new(BtleplugTransport::new().await?);
//!     let controller = HeaterController::new(
//!         transport,
//!         Arc::new(BluetoothCtl::default()),
//!         None,
//!         Timings::default(),
//!     );
//!
//!     let status = controller.status("CC:22:37:10:43:4B").await?;
//!     println!("Room: {:.1}°C ({})", status.room_current_temp, status.room_temp_source);
//!
//!     // Room regulation at 21°C
//!     let outcome = controller.set("CC:22:37:10:43:4B", 5, 21.0).await?;
//!     println!("Verified: {}", outcome.is_verified());
//!
//!     controller.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### Linux
//! Requires BlueZ and `bluetoothctl`. User may need to be in the
//! `bluetooth` group. The reference sensor needs the `w1-gpio` and
//! `w1-therm` kernel modules.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization for data types
//! - `server` (default): Build the `moa_server` HTTP binary

// Public modules
pub mod ble;
pub mod config;
pub mod control;
pub mod controller;
pub mod data;
pub mod error;
pub mod mode_setter;
pub mod protocol;
pub mod retry;
pub mod sensor;
pub mod session_manager;
pub mod status_reader;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use ble::{BleTransport, BtleplugTransport, ConnectionState, DeviceSession, DiscoveredDevice};
pub use config::{PairingTimings, StatusTimeout, Timings};
pub use control::{BluetoothCtl, ControlInterface, ControlSession, PairingDriver, DEFAULT_PIN};
pub use controller::{HeaterController, DEFAULT_DISCOVER_TIMEOUT};
pub use error::{Error, Result};
pub use mode_setter::ModeSetter;
pub use protocol::DeviceAddress;
pub use sensor::{Ds18b20Sensor, ReferenceSensor};
pub use session_manager::SessionManager;
pub use status_reader::StatusReader;

// Re-export commonly used types from submodules
pub use data::{
    DegradedResult, DeviceStatus, OperatingMode, RawDeviceDump, RoomTempSource, SetOutcome,
    SetRequest,
};
