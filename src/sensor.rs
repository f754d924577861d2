//! External reference temperature sensors.
//!
//! A reference sensor placed in the room gives a better room reading
//! than the one built into the element. Not having one is the normal
//! case; the status reader falls back to the element's own sensor on
//! any error from here.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Default sysfs directory of the Linux 1-Wire bus.
pub const W1_DEVICES_DIR: &str = "/sys/bus/w1/devices";

/// Family code prefix of DS18B20 devices on the 1-Wire bus.
const DS18B20_FAMILY_PREFIX: &str = "28-";

/// A thermometer that can report the current room temperature.
///
/// Reads may take most of a second; implementations must not block the
/// calling thread while they wait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReferenceSensor: Send + Sync {
    /// Read the temperature in degrees Celsius.
    async fn read_celsius(&self) -> Result<f64>;
}

/// Read `sensor` if there is one, or `None` when it is absent or fails.
pub async fn reference_reading(sensor: Option<&dyn ReferenceSensor>) -> Option<f64> {
    match sensor?.read_celsius().await {
        Ok(celsius) => Some(celsius),
        Err(e) => {
            debug!("Reference sensor unavailable, using element: {}", e);
            None
        }
    }
}

/// DS18B20 probe read through the kernel `w1_therm` driver.
///
/// Uses the first `28-*` device found under the devices directory.
#[derive(Debug, Clone)]
pub struct Ds18b20Sensor {
    devices_dir: PathBuf,
}

impl Default for Ds18b20Sensor {
    fn default() -> Self {
        Self::new(W1_DEVICES_DIR)
    }
}

impl Ds18b20Sensor {
    /// Create a sensor reading from the given 1-Wire devices directory.
    pub fn new(devices_dir: impl Into<PathBuf>) -> Self {
        Self {
            devices_dir: devices_dir.into(),
        }
    }

    /// The directory scanned for devices.
    pub fn devices_dir(&self) -> &Path {
        &self.devices_dir
    }

    async fn first_device(&self) -> Result<PathBuf> {
        let not_found = |e: std::io::Error| Error::Sensor {
            message: format!("No DS18B20 sensor found: {}", e),
        };
        let mut entries = fs::read_dir(&self.devices_dir).await.map_err(not_found)?;

        let mut devices = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(not_found)? {
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(DS18B20_FAMILY_PREFIX)
            {
                devices.push(entry.path());
            }
        }
        devices.sort();

        devices.into_iter().next().ok_or_else(|| Error::Sensor {
            message: "No DS18B20 sensor found".to_string(),
        })
    }
}

#[async_trait]
impl ReferenceSensor for Ds18b20Sensor {
    async fn read_celsius(&self) -> Result<f64> {
        let device = self.first_device().await?;
        let path = device.join("w1_slave");
        trace!("Reading DS18B20 from {}", path.display());

        // The driver runs a ~750 ms conversion inside this read.
        let contents = fs::read_to_string(&path).await.map_err(|e| Error::Sensor {
            message: format!("Error reading DS18B20 sensor file: {}", e),
        })?;

        let celsius = parse_w1_slave(&contents)?;
        debug!("DS18B20 reports {:.3}°C", celsius);
        Ok(celsius)
    }
}

/// Parse the two-line `w1_slave` output of the `w1_therm` driver.
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub fn parse_w1_slave(contents: &str) -> Result<f64> {
    let mut lines = contents.lines();

    let crc_ok = lines
        .next()
        .map(|l| l.trim_end().ends_with("YES"))
        .unwrap_or(false);
    if !crc_ok {
        return Err(Error::Sensor {
            message: "DS18B20 sensor not ready".to_string(),
        });
    }

    let data = lines.next().unwrap_or_default();
    let pos = data.find("t=").ok_or_else(|| Error::Sensor {
        message: "Temperature reading not found in sensor output".to_string(),
    })?;

    let millidegrees: f64 = data[pos + 2..].trim().parse().map_err(|_| Error::Sensor {
        message: "Invalid temperature format from DS18B20".to_string(),
    })?;

    Ok(millidegrees / 1000.0)
}
