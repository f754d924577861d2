//! Status reads with retry.
//!
//! A status read connects, inspects the element and builds a
//! [`DeviceStatus`] from the dump. Whole attempts are retried with a
//! fixed pause.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::ble::inspector::DeviceInspector;
use crate::ble::transport::BleTransport;
use crate::config::StatusTimeout;
use crate::data::{DeviceStatus, RawDeviceDump};
use crate::error::{Error, Result};
use crate::protocol::DeviceAddress;
use crate::retry::{self, BackoffPolicy, FixedDelay};
use crate::sensor::{self, ReferenceSensor};
use crate::session_manager::SessionManager;

/// Reads element status, optionally overriding the room temperature with
/// an external reference sensor.
pub struct StatusReader<T: BleTransport> {
    sessions: Arc<SessionManager<T>>,
    inspector: DeviceInspector<T>,
    sensor: Option<Arc<dyn ReferenceSensor>>,
    attempts: u32,
    backoff: Arc<dyn BackoffPolicy>,
}

impl<T: BleTransport> StatusReader<T> {
    /// Create a reader using the registry's timings.
    pub fn new(sessions: Arc<SessionManager<T>>, sensor: Option<Arc<dyn ReferenceSensor>>) -> Self {
        let timings = sessions.timings().clone();
        let inspector = DeviceInspector::new(sessions.transport().clone(), &timings);

        Self {
            sessions,
            inspector,
            sensor,
            attempts: timings.status_attempts,
            backoff: Arc::new(FixedDelay(timings.status_delay)),
        }
    }

    /// Replace the pause policy between failed attempts.
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Connect and dump every attribute once.
    ///
    /// # Errors
    ///
    /// Propagates connection and inspection failures.
    pub async fn inspect_once(&self, address: &DeviceAddress) -> Result<RawDeviceDump> {
        let (session, _link) = self.sessions.connect(address).await?;
        self.inspector.inspect(&session).await
    }

    /// Single status read without retry.
    ///
    /// # Errors
    ///
    /// Propagates connection, inspection and decoding failures.
    pub async fn read_once(&self, address: &DeviceAddress) -> Result<DeviceStatus> {
        let dump = self.inspect_once(address).await?;
        let external = sensor::reference_reading(self.sensor.as_deref()).await;
        let status = DeviceStatus::from_dump(&dump, external)?;
        debug!(
            %address,
            mode = ?status.mode,
            source = %status.room_temp_source,
            "Status read"
        );
        Ok(status)
    }

    /// Status read retried on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StatusUnavailable`] once every attempt has failed.
    pub async fn read_status(&self, address: &DeviceAddress) -> Result<DeviceStatus> {
        self.with_retry("status read", address, || self.read_once(address))
            .await
    }

    /// Attribute dump retried on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StatusUnavailable`] once every attempt has failed.
    pub async fn inspect(&self, address: &DeviceAddress) -> Result<RawDeviceDump> {
        self.with_retry("device query", address, || self.inspect_once(address))
            .await
    }

    /// Status read with a deadline on each attempt.
    ///
    /// Each attempt is a full [`read_status`](Self::read_status) bounded by
    /// `limits.per_attempt`.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error once `limits.retries` attempts have
    /// failed; a deadline miss is reported as [`Error::Timeout`].
    pub async fn read_status_with_timeout(
        &self,
        address: &DeviceAddress,
        limits: StatusTimeout,
    ) -> Result<DeviceStatus> {
        let backoff = FixedDelay(limits.delay);
        let mut last_error = Error::Timeout {
            operation: "status read".to_string(),
        };

        for attempt in 1..=limits.retries {
            debug!(%address, "Bounded status read attempt {}", attempt);

            match tokio::time::timeout(limits.per_attempt, self.read_status(address)).await {
                Ok(Ok(status)) => return Ok(status),
                Ok(Err(e)) => {
                    warn!(%address, "Error on attempt {}: {}", attempt, e);
                    last_error = e;
                }
                Err(_) => {
                    warn!(%address, "Timeout on attempt {}", attempt);
                    last_error = Error::Timeout {
                        operation: format!("status read of {}", address),
                    };
                }
            }

            if attempt < limits.retries {
                retry::pause(&backoff, attempt).await;
            }
        }

        error!(%address, "Bounded status read failed after {} attempts", limits.retries);
        Err(last_error)
    }

    async fn with_retry<F, Fut, R>(&self, what: &str, address: &DeviceAddress, op: F) -> Result<R>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<R>>,
    {
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(%address, "{} succeeded on attempt {}", what, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(%address, "{} attempt {} failed: {}", what, attempt, e);
                    last_error = e.to_string();
                    if attempt < self.attempts {
                        retry::pause(self.backoff.as_ref(), attempt).await;
                    }
                }
            }
        }

        error!(%address, "{} failed after {} attempts", what, self.attempts);
        Err(Error::StatusUnavailable {
            attempts: self.attempts,
            last_error,
        })
    }
}
