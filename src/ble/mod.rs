//! BLE communication module.
//!
//! This module provides the transport seam, the btleplug-backed
//! transport, per-element connection sessions and attribute inspection
//! for Terma MOA Blue heating elements.

pub mod adapter;
pub mod connection;
pub mod inspector;
pub mod transport;
pub mod uuids;

pub use adapter::BtleplugTransport;
pub use connection::{
    ConnectionEvent, ConnectionState, DeviceSession, NoRecovery, TransportRecovery,
};
pub use inspector::{DeviceInspector, UNKNOWN_NAME};
pub use transport::{
    AttributeDescriptor, AttributeProperty, BleTransport, DiscoveredDevice, ServiceDescriptor,
};
pub use uuids::*;
