//! Verified mode changes.
//!
//! A set request is written, given time to settle, and then verified by
//! reading the element back. When verification keeps failing the element
//! is forced off so it is never left at an unconfirmed target.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::ble::connection::DeviceSession;
use crate::ble::transport::BleTransport;
use crate::ble::uuids::{HEATER_TEMP_UUID, OPERATING_MODE_UUID, ROOM_TEMP_UUID};
use crate::data::{DegradedResult, DeviceStatus, OperatingMode, SetOutcome, SetRequest};
use crate::error::Result;
use crate::protocol::{encode_temperature, DeviceAddress};
use crate::session_manager::SessionManager;
use crate::status_reader::StatusReader;

/// Runs the write, settle and verify cycle for set requests.
pub struct ModeSetter<T: BleTransport> {
    sessions: Arc<SessionManager<T>>,
    reader: Arc<StatusReader<T>>,
    attempts: u32,
    settle: Duration,
    tolerance: f64,
}

impl<T: BleTransport> ModeSetter<T> {
    /// Create a setter using the registry's timings.
    pub fn new(sessions: Arc<SessionManager<T>>, reader: Arc<StatusReader<T>>) -> Self {
        let timings = sessions.timings();
        let (attempts, settle, tolerance) =
            (timings.set_attempts, timings.settle, timings.verify_tolerance);

        Self {
            sessions,
            reader,
            attempts,
            settle,
            tolerance,
        }
    }

    /// Apply `request` and verify it took effect.
    ///
    /// Returns [`SetOutcome::ForcedOff`] if no attempt could be verified;
    /// the element has then been written back to Off.
    ///
    /// # Errors
    ///
    /// Connection failures and a failed temperature write abort the
    /// request at once.
    pub async fn set_mode(
        &self,
        address: &DeviceAddress,
        request: SetRequest,
    ) -> Result<SetOutcome> {
        for attempt in 1..=self.attempts {
            info!(
                %address,
                mode = %request.mode(),
                target = request.target_temp(),
                "Set attempt {} of {}",
                attempt, self.attempts
            );

            let (session, _link) = self.sessions.connect(address).await?;
            self.write_request(&session, &request).await?;

            info!(%address, "Write commands completed, waiting for device to settle");
            tokio::time::sleep(self.settle).await;

            match self.reader.read_once(address).await {
                Ok(status) => {
                    if self.verify(&request, &status) {
                        info!(%address, "Status verified for mode {}", request.mode());
                        return Ok(SetOutcome::Verified(status));
                    }
                }
                Err(e) => warn!(%address, "Failed to read status: {}", e),
            }

            warn!(
                %address,
                "Retrying set command (attempt {}/{})",
                attempt, self.attempts
            );
        }

        error!(%address, "Verification failed, forcing device off");
        self.force_off(address).await;
        Ok(SetOutcome::ForcedOff(DegradedResult::forced_off(address.clone())))
    }

    async fn write_request(&self, session: &DeviceSession<T>, request: &SetRequest) -> Result<()> {
        let temp_uuid = match request.mode() {
            OperatingMode::Off => {
                if let Err(e) = session.write(OPERATING_MODE_UUID, &[0], false).await {
                    warn!(address = %session.address(), "Could not set device to off: {}", e);
                }
                return Ok(());
            }
            OperatingMode::RoomRegulation => ROOM_TEMP_UUID,
            OperatingMode::HeaterRegulation => HEATER_TEMP_UUID,
        };

        let payload = encode_temperature(request.target_temp());
        info!(
            address = %session.address(),
            uuid = %temp_uuid,
            "Writing temperature payload {:02x?}",
            payload
        );
        session.write(temp_uuid, &payload, false).await?;

        let mode = request.mode().as_byte();
        if let Err(e) = session.write(OPERATING_MODE_UUID, &[mode], false).await {
            warn!(address = %session.address(), "Failed to write operating mode: {}", e);
        }
        Ok(())
    }

    fn verify(&self, request: &SetRequest, status: &DeviceStatus) -> bool {
        let actual = match request.mode() {
            OperatingMode::Off => {
                if status.mode != Some(0) {
                    warn!(
                        address = %status.address,
                        "Reported mode {:?} != expected 0",
                        status.mode
                    );
                }
                return status.mode == Some(0);
            }
            OperatingMode::RoomRegulation => status.room_target_temp,
            OperatingMode::HeaterRegulation => status.heater_target_temp,
        };

        let accepted = (actual - request.target_temp()).abs() < self.tolerance;
        if !accepted {
            warn!(
                address = %status.address,
                "Target {}°C != expected {}°C",
                actual,
                request.target_temp()
            );
        }
        accepted
    }

    /// Best-effort final write of mode 0 over a freshly acquired connection.
    async fn force_off(&self, address: &DeviceAddress) {
        let session = match self.sessions.connect(address).await {
            Ok((session, _link)) => session,
            Err(e) => {
                error!(%address, "Cannot force device off, no connection: {}", e);
                return;
            }
        };

        match session.write(OPERATING_MODE_UUID, &[0], false).await {
            Ok(()) => info!(%address, "Device forced to mode 0"),
            Err(e) => error!(%address, "Failed to force device off: {}", e),
        }
    }
}
