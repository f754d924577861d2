//! Line-oriented control interface to the local Bluetooth stack.
//!
//! Pairing and adapter recovery are driven through an interactive text
//! session (`bluetoothctl` on Linux). The session is modelled as a
//! `send_line` / `await_pattern` capability so the protocol drivers can
//! run against a scripted fake.

pub mod bluetoothctl;
pub mod pairing;
pub mod recovery;

use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::Result;

pub use bluetoothctl::BluetoothCtl;
pub use pairing::{PairingDriver, DEFAULT_PIN};
pub use recovery::AdapterPowerCycle;

/// One open interactive session.
#[async_trait]
pub trait ControlSession: Send {
    /// Send a line of input.
    async fn send_line(&mut self, line: &str) -> Result<()>;

    /// Wait until one of `patterns` appears in the output.
    ///
    /// Returns the index of the pattern whose match starts earliest
    /// (ties go to the lower index), or `None` on timeout. Output up to
    /// the end of the match is consumed.
    async fn await_pattern(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
    ) -> Result<Option<usize>>;

    /// End the session.
    async fn close(&mut self) -> Result<()>;
}

/// Factory for interactive sessions.
#[async_trait]
pub trait ControlInterface: Send + Sync {
    /// Start a new interactive session.
    async fn open(&self) -> Result<Box<dyn ControlSession>>;
}

/// Find the earliest match of any pattern in `buffer`.
///
/// Returns the pattern index and the byte offset where the match ends.
pub(crate) fn match_earliest(buffer: &str, patterns: &[Regex]) -> Option<(usize, usize)> {
    patterns
        .iter()
        .enumerate()
        .filter_map(|(index, re)| re.find(buffer).map(|m| (m.start(), index, m.end())))
        .min_by_key(|(start, index, _)| (*start, *index))
        .map(|(_, index, end)| (index, end))
}

/// Send `command` and wait for `expected`, resending up to `retries` times.
///
/// Returns `false` if the pattern never showed up.
pub async fn send_expect(
    session: &mut dyn ControlSession,
    command: &str,
    expected: &Regex,
    timeout: Duration,
    retries: u32,
) -> Result<bool> {
    for attempt in 1..=retries {
        debug!("Sending command: {:?} (attempt {})", command, attempt);
        session.send_line(command).await?;

        if session
            .await_pattern(std::slice::from_ref(expected), timeout)
            .await?
            .is_some()
        {
            debug!("Expected output received for command: {:?}", command);
            return Ok(true);
        }

        warn!(
            "Timeout waiting for '{}' after command: {:?}",
            expected.as_str(),
            command
        );
    }

    error!("Failed after {} attempts: {:?}", retries, command);
    Ok(false)
}
