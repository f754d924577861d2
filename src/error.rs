//! Error types for the terma-moa-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The supplied device address is not six colon-separated octets.
    #[error("Invalid address format: {address}")]
    InvalidAddress {
        /// The address string that was rejected.
        address: String,
    },

    /// The requested operating mode is not one of 0, 5 or 6.
    #[error("Invalid mode {mode}; must be 0, 5, or 6")]
    InvalidMode {
        /// The rejected mode value.
        mode: i64,
    },

    /// The requested target temperature is not a finite number.
    #[error("Invalid target temperature {value}")]
    InvalidTemperature {
        /// The rejected target.
        value: f64,
    },

    /// A temperature payload was too short to decode.
    #[error("Temperature data too short: {len} bytes (need at least 4)")]
    MalformedPayload {
        /// Number of bytes actually supplied.
        len: usize,
    },

    /// All connection attempts, including the post-recovery round, failed.
    #[error("Unable to connect to {address} after {attempts} attempts")]
    ConnectionExhausted {
        /// The device address.
        address: String,
        /// Total number of transport connect attempts made.
        attempts: u32,
    },

    /// Operation requires a connection but the device is not connected.
    #[error("Device not connected")]
    NotConnected,

    /// Attribute enumeration on a live session failed.
    #[error("Inspection of {address} failed: {reason}")]
    InspectionFailed {
        /// The device address.
        address: String,
        /// Description of the failure.
        reason: String,
    },

    /// One of the room, heater or mode attributes was absent from the dump.
    #[error("Missing measurement data in device services: {uuid}")]
    MissingMeasurement {
        /// UUID of the first attribute that could not be found.
        uuid: String,
    },

    /// Every status read attempt failed.
    #[error("Status unavailable after {attempts} attempts: {last_error}")]
    StatusUnavailable {
        /// Number of attempts made.
        attempts: u32,
        /// Rendering of the last error observed.
        last_error: String,
    },

    /// Every overall pairing attempt failed.
    #[error("Pairing with {address} failed after {attempts} attempts")]
    PairingFailed {
        /// The device address.
        address: String,
        /// Number of overall attempts made.
        attempts: u32,
    },

    /// The external reference sensor could not be read.
    #[error("Reference sensor: {message}")]
    Sensor {
        /// Description of the failure.
        message: String,
    },

    /// The interactive control interface misbehaved or exited.
    #[error("Control interface: {message}")]
    ControlInterface {
        /// Description of the failure.
        message: String,
    },

    /// An operation did not complete within its deadline.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// Characteristic not found on the device.
    #[error("Attribute not found: {uuid}")]
    AttributeNotFound {
        /// The UUID of the attribute that was not found.
        uuid: String,
    },

    /// I/O error from the local system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error was caused by bad caller input rather than by the device.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress { .. }
                | Self::InvalidMode { .. }
                | Self::InvalidTemperature { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
