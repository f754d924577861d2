//! Adapter power-cycle recovery.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::ble::connection::TransportRecovery;
use crate::control::ControlInterface;
use crate::error::Result;

/// Re-powers the local adapter through the control interface.
///
/// Sends `power on` twice with a settle pause after each, then exits.
pub struct AdapterPowerCycle {
    control: Arc<dyn ControlInterface>,
    settle: Duration,
}

impl AdapterPowerCycle {
    /// Create the recovery action.
    pub fn new(control: Arc<dyn ControlInterface>, settle: Duration) -> Self {
        Self { control, settle }
    }
}

#[async_trait]
impl TransportRecovery for AdapterPowerCycle {
    async fn recover(&self) -> Result<()> {
        info!("Running adapter power on commands");

        let mut session = self.control.open().await?;
        let result = async {
            for _ in 0..2 {
                session.send_line("power on").await?;
                tokio::time::sleep(self.settle).await;
            }
            session.send_line("exit").await
        }
        .await;
        session.close().await?;
        result?;

        info!("Adapter power on commands executed");
        Ok(())
    }
}
