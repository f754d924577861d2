//! Device address validation.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A validated Bluetooth device address in canonical upper-case form,
/// e.g. `CC:22:37:10:43:4B`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(transparent))]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Number of colon-separated octets in an address.
    pub const OCTETS: usize = 6;

    /// Validate an address string and return its canonical form.
    ///
    /// Input is accepted in any case; the result is always upper-case.
    ///
    /// # Example
    ///
    /// ```
    /// use terma_moa_ble::DeviceAddress;
    ///
    /// let addr = DeviceAddress::parse("cc:22:37:10:43:4b").unwrap();
    /// assert_eq!(addr.as_str(), "CC:22:37:10:43:4B");
    /// assert!(DeviceAddress::parse("CC:22:37:10:43").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let well_formed = parts.len() == Self::OCTETS
            && parts
                .iter()
                .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));

        if !well_formed {
            return Err(Error::InvalidAddress {
                address: s.to_string(),
            });
        }

        Ok(Self(s.to_ascii_uppercase()))
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for DeviceAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
