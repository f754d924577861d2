//! Protocol module for the Terma wire formats.
//!
//! This module contains the implementations for:
//! - Device address validation and canonicalization
//! - The 4-byte temperature payload codec

pub mod address;
pub mod temperature;

pub use address::DeviceAddress;
pub use temperature::{decode_temperature, encode_temperature, TemperatureReading};
