//! Operating modes and validated set requests.

use std::fmt;
use std::ops::RangeInclusive;
use tracing::info;

use crate::error::{Error, Result};

/// Legal room target range (mode 5), °C.
pub const ROOM_TEMP_RANGE: RangeInclusive<f64> = 15.0..=29.9;

/// Legal heater target range (mode 6), °C.
pub const HEATER_TEMP_RANGE: RangeInclusive<f64> = 29.9..=59.8;

/// Element operating mode, as stored in the mode attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(into = "u8"))]
pub enum OperatingMode {
    /// Heating disabled.
    #[default]
    Off,
    /// Regulate on room temperature measured at the element.
    RoomRegulation,
    /// Regulate on the heater (water/surface) temperature.
    HeaterRegulation,
}

impl OperatingMode {
    /// Raw byte written to the mode attribute.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::RoomRegulation => 5,
            Self::HeaterRegulation => 6,
        }
    }

    /// Legal target range for this mode, if it regulates on a temperature.
    pub fn target_range(self) -> Option<RangeInclusive<f64>> {
        match self {
            Self::Off => None,
            Self::RoomRegulation => Some(ROOM_TEMP_RANGE),
            Self::HeaterRegulation => Some(HEATER_TEMP_RANGE),
        }
    }
}

impl From<OperatingMode> for u8 {
    fn from(mode: OperatingMode) -> Self {
        mode.as_byte()
    }
}

impl TryFrom<i64> for OperatingMode {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Off),
            5 => Ok(Self::RoomRegulation),
            6 => Ok(Self::HeaterRegulation),
            mode => Err(Error::InvalidMode { mode }),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off (0)"),
            Self::RoomRegulation => write!(f, "room regulation (5)"),
            Self::HeaterRegulation => write!(f, "heater regulation (6)"),
        }
    }
}

/// A validated request to change mode and target temperature.
///
/// The target is clamped into the mode's legal range on construction.
/// Nothing downstream clamps again; the verify step compares against
/// the clamped value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetRequest {
    mode: OperatingMode,
    target_temp: f64,
}

impl SetRequest {
    /// Build a request, clamping the target for room and heater modes.
    ///
    /// # Example
    ///
    /// ```
    /// use terma_moa_ble::{OperatingMode, SetRequest};
    ///
    /// let req = SetRequest::new(OperatingMode::HeaterRegulation, 75.0).unwrap();
    /// assert_eq!(req.target_temp(), 59.8);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTemperature`] if `target_temp` is NaN or
    /// infinite; clamping cannot bring those into range.
    pub fn new(mode: OperatingMode, target_temp: f64) -> Result<Self> {
        if !target_temp.is_finite() {
            return Err(Error::InvalidTemperature { value: target_temp });
        }

        let target_temp = match mode.target_range() {
            Some(range) => {
                let clamped = target_temp.clamp(*range.start(), *range.end());
                if clamped != target_temp {
                    info!(
                        "Clamping {} target {}°C to {}°C",
                        mode, target_temp, clamped
                    );
                }
                clamped
            }
            None => target_temp,
        };

        Ok(Self { mode, target_temp })
    }

    /// Build a request from an unchecked mode value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMode`] unless `mode` is 0, 5 or 6, and
    /// [`Error::InvalidTemperature`] for a non-finite target.
    pub fn from_raw(mode: i64, target_temp: f64) -> Result<Self> {
        Self::new(OperatingMode::try_from(mode)?, target_temp)
    }

    /// The request that turns the element off.
    pub fn off() -> Self {
        Self {
            mode: OperatingMode::Off,
            target_temp: 20.0,
        }
    }

    /// Requested mode.
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Requested target, already clamped.
    pub fn target_temp(&self) -> f64 {
        self.target_temp
    }
}
