//! Temperature payload codec.
//!
//! Room and heater attributes carry a 4-byte block: bytes 0-1 hold the
//! current temperature and bytes 2-3 the target, each as
//! `(hi * 255 + lo) / 10.0` degrees Celsius.
//!
//! The scale constant is 255, not 256. The elements use this exact
//! encoding, so a round trip through [`encode_temperature`] and
//! [`decode_temperature`] is only accurate to the 0.1°C quantization.

use crate::error::{Error, Result};

/// Length of a temperature payload in bytes.
pub const PAYLOAD_LEN: usize = 4;

/// Byte scale used by the element firmware.
const SCALE: u16 = 255;

/// Current and target temperature decoded from a payload, in °C.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    /// Measured temperature.
    pub current: f64,
    /// Configured target temperature.
    pub target: f64,
}

fn decode_pair(hi: u8, lo: u8) -> f64 {
    (hi as f64 * SCALE as f64 + lo as f64) / 10.0
}

/// Decode a 4-byte temperature payload.
///
/// Bytes beyond the fourth are ignored.
///
/// # Errors
///
/// Returns [`Error::MalformedPayload`] if fewer than 4 bytes are supplied.
///
/// # Example
///
/// ```
/// use terma_moa_ble::protocol::decode_temperature;
///
/// let reading = decode_temperature(&[0x00, 0xD1, 0x00, 0xC8]).unwrap();
/// assert!((reading.current - 20.9).abs() < 1e-9);
/// assert!((reading.target - 20.0).abs() < 1e-9);
/// ```
pub fn decode_temperature(data: &[u8]) -> Result<TemperatureReading> {
    if data.len() < PAYLOAD_LEN {
        return Err(Error::MalformedPayload { len: data.len() });
    }

    Ok(TemperatureReading {
        current: decode_pair(data[0], data[1]),
        target: decode_pair(data[2], data[3]),
    })
}

/// Encode a target temperature into a 4-byte payload `[0, 0, hi, lo]`.
///
/// The value is rounded to the nearest tenth of a degree first. Negative
/// inputs saturate to zero.
pub fn encode_temperature(target: f64) -> [u8; PAYLOAD_LEN] {
    let value = (target * 10.0).round().max(0.0) as u32;
    let hi = (value / SCALE as u32).min(u8::MAX as u32) as u8;
    let lo = (value % SCALE as u32) as u8;
    [0, 0, hi, lo]
}
