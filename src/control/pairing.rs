//! Pairing handshake.
//!
//! Elements must be removed, rediscovered, connected, trusted and
//! paired through the platform Bluetooth stack before the GATT
//! connection will work. The handshake is slow and flaky, so each step
//! is retried and the whole sequence is retried on any step failure.
//! The element has to be in pairing mode while this runs.

use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::PairingTimings;
use crate::control::{send_expect, ControlInterface, ControlSession};
use crate::error::{Error, Result};
use crate::protocol::DeviceAddress;
use crate::retry::{self, BackoffPolicy, FixedDelay};

/// PIN the elements ship with.
pub const DEFAULT_PIN: &str = "123456";

const PROMPT: &str = r"\[bluetooth\]";
const DEFAULT_AGENT_OK: &str = "Default agent request successful";
const CONNECTION_OK: &str = "Connection successful";
const TRUST_OK: &str = "trust succeeded";
const PAIRING_OK: &str = "Pairing successful";
const ENTER_PASSKEY: &str = "Enter passkey";
const REQUEST_PASSKEY: &str = "Request passkey";

/// Compiled output patterns for one handshake.
struct Patterns {
    prompt: Regex,
    default_agent: Regex,
    device_seen: Regex,
    connected: Regex,
    services_resolved: Regex,
    trusted: Regex,
    pair_response: [Regex; 3],
    paired: Regex,
}

impl Patterns {
    fn for_address(address: &DeviceAddress) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::ControlInterface {
                message: format!("bad pattern {:?}: {}", pattern, e),
            })
        };
        let addr = regex::escape(address.as_str());

        Ok(Self {
            prompt: compile(PROMPT)?,
            default_agent: compile(DEFAULT_AGENT_OK)?,
            device_seen: compile(&addr)?,
            connected: compile(CONNECTION_OK)?,
            services_resolved: compile(&format!("{} ServicesResolved: yes", addr))?,
            trusted: compile(TRUST_OK)?,
            pair_response: [
                compile(ENTER_PASSKEY)?,
                compile(REQUEST_PASSKEY)?,
                compile(PAIRING_OK)?,
            ],
            paired: compile(PAIRING_OK)?,
        })
    }
}

fn step_failed(message: impl Into<String>) -> Error {
    Error::ControlInterface {
        message: message.into(),
    }
}

/// Drives the pairing handshake over a [`ControlInterface`].
pub struct PairingDriver {
    control: Arc<dyn ControlInterface>,
    timings: PairingTimings,
    backoff: Arc<dyn BackoffPolicy>,
}

impl PairingDriver {
    /// Create a driver.
    pub fn new(control: Arc<dyn ControlInterface>, timings: PairingTimings) -> Self {
        let backoff = Arc::new(FixedDelay(timings.attempt_delay));
        Self {
            control,
            timings,
            backoff,
        }
    }

    /// Remove, rediscover, connect, trust and pair the element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PairingFailed`] once every overall attempt has failed.
    pub async fn pair(&self, address: &DeviceAddress, pin: &str) -> Result<()> {
        let patterns = Patterns::for_address(address)?;

        for attempt in 1..=self.timings.attempts {
            info!(%address, "Overall pairing attempt {}", attempt);

            let outcome = match self.control.open().await {
                Ok(mut session) => {
                    let outcome = self
                        .handshake(session.as_mut(), address, pin, &patterns)
                        .await;
                    if outcome.is_err() {
                        if let Err(e) = session.close().await {
                            debug!("Closing control session failed: {}", e);
                        }
                    }
                    outcome
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    info!(%address, "Device paired successfully");
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        %address,
                        "Error encountered: {}. Retrying entire pairing process", e
                    );
                    if attempt < self.timings.attempts {
                        retry::pause(self.backoff.as_ref(), attempt).await;
                    }
                }
            }
        }

        error!(%address, "All overall pairing attempts failed");
        Err(Error::PairingFailed {
            address: address.to_string(),
            attempts: self.timings.attempts,
        })
    }

    async fn handshake(
        &self,
        session: &mut dyn ControlSession,
        address: &DeviceAddress,
        pin: &str,
        p: &Patterns,
    ) -> Result<()> {
        let t = &self.timings;

        if !self.expect(session, "", &p.prompt, t.prompt_timeout).await? {
            return Err(step_failed("Initial prompt not received"));
        }

        session.send_line(&format!("remove {}", address)).await?;
        if !self.expect(session, "", &p.prompt, t.prompt_timeout).await? {
            return Err(step_failed("No prompt after remove command"));
        }

        if !self
            .expect(session, "agent KeyboardOnly", &p.prompt, t.prompt_timeout)
            .await?
        {
            return Err(step_failed("Agent command failed"));
        }
        if !self
            .expect(session, "default-agent", &p.default_agent, t.confirm_timeout)
            .await?
        {
            return Err(step_failed("Default agent command failed"));
        }

        if !self
            .expect(session, "power on", &p.prompt, t.prompt_timeout)
            .await?
        {
            return Err(step_failed("Power on command failed"));
        }

        info!(%address, "Starting scan");
        session.send_line("scan on").await?;
        if session
            .await_pattern(std::slice::from_ref(&p.device_seen), t.scan_timeout)
            .await?
            .is_none()
        {
            return Err(step_failed(format!(
                "Timeout waiting for {} to appear in list",
                address
            )));
        }
        info!(%address, "Device detected during scan");

        tokio::time::sleep(t.scan_settle).await;
        self.connect(session, address, p).await?;

        tokio::time::sleep(t.step_settle).await;
        if !self
            .expect(
                session,
                &format!("trust {}", address),
                &p.trusted,
                t.confirm_timeout,
            )
            .await?
        {
            return Err(step_failed("Trust command failed"));
        }

        tokio::time::sleep(t.step_settle).await;
        self.pair_with_pin(session, address, pin, p).await?;

        if !self
            .expect(session, "power off", &p.prompt, t.prompt_timeout)
            .await?
        {
            return Err(step_failed("Power off command failed"));
        }
        if !self
            .expect(session, "power on", &p.prompt, t.prompt_timeout)
            .await?
        {
            return Err(step_failed("Power on command failed"));
        }

        tokio::time::sleep(t.step_settle).await;
        debug!("Exiting control session");
        session.send_line("exit").await?;
        session.close().await
    }

    async fn connect(
        &self,
        session: &mut dyn ControlSession,
        address: &DeviceAddress,
        p: &Patterns,
    ) -> Result<()> {
        let t = &self.timings;
        info!(%address, "Connecting to device");

        for attempt in 1..=t.connect_attempts {
            session.send_line(&format!("connect {}", address)).await?;

            let connected = session
                .await_pattern(std::slice::from_ref(&p.connected), t.connect_timeout)
                .await?
                .is_some();
            if connected {
                debug!("Connection successful received");
                let resolved = session
                    .await_pattern(
                        std::slice::from_ref(&p.services_resolved),
                        t.services_timeout,
                    )
                    .await?
                    .is_some();
                if resolved {
                    debug!("Services confirmed");
                    return Ok(());
                }
            }

            warn!(
                %address,
                "No response after connect command (attempt {} of {})",
                attempt, t.connect_attempts
            );
        }

        Err(step_failed("Failed to connect after multiple attempts"))
    }

    async fn pair_with_pin(
        &self,
        session: &mut dyn ControlSession,
        address: &DeviceAddress,
        pin: &str,
        p: &Patterns,
    ) -> Result<()> {
        let t = &self.timings;
        info!(%address, "Pairing with device");
        session.send_line(&format!("pair {}", address)).await?;

        match session.await_pattern(&p.pair_response, t.pair_timeout).await? {
            Some(0) | Some(1) => {
                info!("Passkey prompt detected, sending PIN");
                session.send_line(pin).await?;
                if session
                    .await_pattern(std::slice::from_ref(&p.paired), t.pair_timeout)
                    .await?
                    .is_none()
                {
                    return Err(step_failed("Pairing failed: no confirmation after PIN"));
                }
                Ok(())
            }
            Some(_) => {
                info!("Pairing successful (no passkey prompt)");
                Ok(())
            }
            None => Err(step_failed("Pairing failed: operation timed out")),
        }
    }

    async fn expect(
        &self,
        session: &mut dyn ControlSession,
        command: &str,
        pattern: &Regex,
        timeout: Duration,
    ) -> Result<bool> {
        send_expect(session, command, pattern, timeout, self.timings.step_retries).await
    }
}
