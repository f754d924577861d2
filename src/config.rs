//! Timing and retry configuration.
//!
//! Every attempt count, pause and timeout used by the control protocol
//! lives in [`Timings`]. The defaults are the values the elements have
//! been observed to need; tests construct [`Timings::immediate`].

use std::time::Duration;

/// Attempt counts, delays and timeouts for every protocol component.
#[derive(Debug, Clone, PartialEq)]
pub struct Timings {
    /// Transport connect attempts per round (a second round follows recovery).
    pub connect_attempts: u32,
    /// Pause after each failed connect attempt.
    pub connect_delay: Duration,
    /// Timeout handed to the transport for a single connect.
    pub connect_timeout: Duration,
    /// Timeout for the advertised-name lookup during inspection.
    pub name_lookup_timeout: Duration,
    /// Outer status read attempts.
    pub status_attempts: u32,
    /// Pause between failed status reads.
    pub status_delay: Duration,
    /// Outer mode-set attempts.
    pub set_attempts: u32,
    /// Pause after writing before the verify read.
    pub settle: Duration,
    /// Maximum accepted difference between requested and reported target.
    pub verify_tolerance: f64,
    /// Pause between `power on` commands during adapter recovery.
    pub power_cycle_settle: Duration,
    /// Pairing protocol timings.
    pub pairing: PairingTimings,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            connect_delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            name_lookup_timeout: Duration::from_secs(3),
            status_attempts: 3,
            status_delay: Duration::from_secs(3),
            set_attempts: 3,
            settle: Duration::from_secs(3),
            verify_tolerance: 0.5,
            power_cycle_settle: Duration::from_secs(2),
            pairing: PairingTimings::default(),
        }
    }
}

impl Timings {
    /// Default attempt counts with every pause set to zero.
    ///
    /// Timeouts are kept so that scripted collaborators still see them.
    pub fn immediate() -> Self {
        Self {
            connect_delay: Duration::ZERO,
            status_delay: Duration::ZERO,
            settle: Duration::ZERO,
            power_cycle_settle: Duration::ZERO,
            pairing: PairingTimings {
                attempt_delay: Duration::ZERO,
                scan_settle: Duration::ZERO,
                step_settle: Duration::ZERO,
                ..PairingTimings::default()
            },
            ..Self::default()
        }
    }
}

/// Timings for the interactive pairing handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingTimings {
    /// Overall attempts of the whole handshake.
    pub attempts: u32,
    /// Pause between overall attempts.
    pub attempt_delay: Duration,
    /// Retries of a single send-and-expect step.
    pub step_retries: u32,
    /// Wait for the interactive prompt.
    pub prompt_timeout: Duration,
    /// Wait for explicit success text (`default-agent`, `trust`).
    pub confirm_timeout: Duration,
    /// Wait for the device to show up in scan output.
    pub scan_timeout: Duration,
    /// Pause after the device is seen, before connecting.
    pub scan_settle: Duration,
    /// Connect attempts within one overall attempt.
    pub connect_attempts: u32,
    /// Wait for `Connection successful`.
    pub connect_timeout: Duration,
    /// Wait for `ServicesResolved: yes`.
    pub services_timeout: Duration,
    /// Pause before `trust` and before `pair`.
    pub step_settle: Duration,
    /// Wait for a passkey request or pairing success, and again after the PIN.
    pub pair_timeout: Duration,
}

impl Default for PairingTimings {
    fn default() -> Self {
        Self {
            attempts: 3,
            attempt_delay: Duration::from_secs(3),
            step_retries: 3,
            prompt_timeout: Duration::from_secs(5),
            confirm_timeout: Duration::from_secs(2),
            scan_timeout: Duration::from_secs(30),
            scan_settle: Duration::from_secs(2),
            connect_attempts: 3,
            connect_timeout: Duration::from_secs(5),
            services_timeout: Duration::from_secs(15),
            step_settle: Duration::from_secs(1),
            pair_timeout: Duration::from_secs(5),
        }
    }
}

/// Parameters for the bounded status read used by callers that need a
/// latency ceiling per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTimeout {
    /// Number of bounded attempts.
    pub retries: u32,
    /// Pause after each failed attempt.
    pub delay: Duration,
    /// Deadline for a single attempt.
    pub per_attempt: Duration,
}

impl Default for StatusTimeout {
    fn default() -> Self {
        Self {
            retries: 5,
            delay: Duration::from_secs(5),
            per_attempt: Duration::from_secs(5),
        }
    }
}
