//! High-level heater control.
//!
//! [`HeaterController`] is the entry point used by request handlers. It
//! validates caller input, owns the session registry and wires the status
//! reader, mode setter and pairing driver together.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::ble::transport::{BleTransport, DiscoveredDevice};
use crate::config::{StatusTimeout, Timings};
use crate::control::{AdapterPowerCycle, ControlInterface, PairingDriver};
use crate::data::{DeviceStatus, OperatingMode, RawDeviceDump, SetOutcome, SetRequest};
use crate::error::Result;
use crate::mode_setter::ModeSetter;
use crate::protocol::DeviceAddress;
use crate::sensor::ReferenceSensor;
use crate::session_manager::SessionManager;
use crate::status_reader::StatusReader;

/// Default scan duration for [`HeaterController::discover`].
pub const DEFAULT_DISCOVER_TIMEOUT: Duration = Duration::from_secs(15);

/// Facade over every heater operation.
pub struct HeaterController<T: BleTransport> {
    sessions: Arc<SessionManager<T>>,
    reader: Arc<StatusReader<T>>,
    setter: ModeSetter<T>,
    pairing: PairingDriver,
}

impl<T: BleTransport> HeaterController<T> {
    /// Create a controller.
    ///
    /// `control` drives both pairing and the adapter power-cycle recovery
    /// used when connections keep failing.
    pub fn new(
        transport: Arc<T>,
        control: Arc<dyn ControlInterface>,
        sensor: Option<Arc<dyn ReferenceSensor>>,
        timings: Timings,
    ) -> Self {
        let recovery = Arc::new(AdapterPowerCycle::new(
            control.clone(),
            timings.power_cycle_settle,
        ));
        let pairing = PairingDriver::new(control, timings.pairing.clone());
        let sessions = Arc::new(SessionManager::new(transport, recovery, timings));
        let reader = Arc::new(StatusReader::new(sessions.clone(), sensor));
        let setter = ModeSetter::new(sessions.clone(), reader.clone());

        Self {
            sessions,
            reader,
            setter,
            pairing,
        }
    }

    /// The session registry.
    pub fn sessions(&self) -> &Arc<SessionManager<T>> {
        &self.sessions
    }

    /// Scan for nearby devices.
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        let devices = self.sessions.transport().scan(timeout).await?;
        info!("Discovered {} devices", devices.len());
        Ok(devices)
    }

    /// Pair with an element. The element must be in pairing mode.
    pub async fn pair(&self, address: &str, pin: &str) -> Result<()> {
        let address = DeviceAddress::parse(address)?;
        self.pairing.pair(&address, pin).await
    }

    /// Read the element status, retrying on failure.
    pub async fn status(&self, address: &str) -> Result<DeviceStatus> {
        let address = DeviceAddress::parse(address)?;
        self.reader.read_status(&address).await
    }

    /// Read the element status with a deadline on each attempt.
    pub async fn status_with_timeout(
        &self,
        address: &str,
        limits: StatusTimeout,
    ) -> Result<DeviceStatus> {
        let address = DeviceAddress::parse(address)?;
        self.reader.read_status_with_timeout(&address, limits).await
    }

    /// Dump every attribute of the element, retrying on failure.
    pub async fn inspect(&self, address: &str) -> Result<RawDeviceDump> {
        let address = DeviceAddress::parse(address)?;
        self.reader.inspect(&address).await
    }

    /// Set the operating mode and target temperature.
    ///
    /// The element is always switched off and verified first. Switching
    /// directly between regulation modes can double the target on the
    /// element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`](crate::Error::InvalidAddress),
    /// [`Error::InvalidMode`](crate::Error::InvalidMode) or
    /// [`Error::InvalidTemperature`](crate::Error::InvalidTemperature)
    /// before touching the element.
    pub async fn set(&self, address: &str, mode: i64, target_temp: f64) -> Result<SetOutcome> {
        let address = DeviceAddress::parse(address)?;
        let request = SetRequest::from_raw(mode, target_temp)?;

        info!(%address, "Clearing current config (setting device to mode 0)");
        let cleared = self.setter.set_mode(&address, SetRequest::off()).await?;

        if !cleared.is_verified() || request.mode() == OperatingMode::Off {
            return Ok(cleared);
        }

        self.setter.set_mode(&address, request).await
    }

    /// Disconnect every element.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }
}
