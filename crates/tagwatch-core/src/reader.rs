//! Reader capability: opening devices and listing visible tags.
//!
//! The monitor talks to hardware only through [`ReaderDriver`] and
//! [`ReaderHandle`]. Drivers are picked by the scheme of a reader's address
//! (`sim:demos/two-tags.toml`, `pcsc:ACS ACR122U`), much like a libnfc
//! connstring.
//!
//! Poll outcomes are classified at this boundary:
//!
//! | Outcome                  | Meaning                          | Monitor reaction          |
//! |--------------------------|----------------------------------|---------------------------|
//! | `Ok(targets)`            | modulation answered              | recorded in the snapshot  |
//! | `Err(PollError::Timeout)`| nothing in the field             | recorded as empty, silent |
//! | `Err(Transport)`         | transient fault for this sweep   | modulation skipped        |
//! | `Err(Device)`            | handle is no longer usable       | session closed, reopened  |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::types::{Modulation, TargetInfo};

pub mod atr;
#[cfg(feature = "pcsc")]
pub mod pcsc;
pub mod simulated;

/// `driver:port`, driver being a lowercase identifier.
static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z0-9_]+):(.*)$").expect("valid address regex"));

// =============================================================================
// ERRORS
// =============================================================================

/// Errors raised while bringing a reader up.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The device could not be opened.
    #[error("Failed to open reader '{address}': {message}")]
    Open {
        /// Address that was opened.
        address: String,
        /// Driver-specific reason.
        message: String,
    },

    /// The device opened but would not enter initiator mode.
    #[error("Failed to initialize reader as initiator: {message}")]
    Init {
        /// Driver-specific reason.
        message: String,
    },

    /// No driver is registered for the address scheme.
    #[error("Unsupported reader driver '{driver}'. Available drivers: {available}")]
    UnsupportedDriver {
        /// Scheme from the address.
        driver: String,
        /// Comma-separated list of compiled-in drivers.
        available: String,
    },

    /// The address is not of the form `driver:port`.
    #[error("Invalid reader address '{0}'. Expected 'driver:port' (e.g. 'pcsc:ACS ACR122U').")]
    InvalidAddress(String),

    /// A simulated reader's scenario could not be loaded.
    #[error("Invalid reader scenario: {0}")]
    Scenario(String),
}

/// Result alias for reader lifecycle calls.
pub type ReaderResult<T> = std::result::Result<T, ReaderError>;

/// Why one modulation could not be polled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// Nothing answered within the polling window. Not a failure.
    #[error("no target answered within the polling window")]
    Timeout,

    /// Transient fault (RF noise, contention); retry next sweep.
    #[error("transport error: {0}")]
    Transport(String),

    /// The device is gone or wedged; the session must be reopened.
    #[error("device error: {0}")]
    Device(String),
}

// =============================================================================
// ADDRESS
// =============================================================================

/// Parsed `driver:port` reader address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReaderAddress {
    driver: String,
    port: String,
}

impl ReaderAddress {
    /// Parses an address.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::InvalidAddress`] if it is not `driver:port`.
    pub fn parse(address: &str) -> ReaderResult<Self> {
        let caps = ADDRESS_RE
            .captures(address.trim())
            .ok_or_else(|| ReaderError::InvalidAddress(address.to_string()))?;
        Ok(Self {
            driver: caps[1].to_string(),
            port: caps[2].to_string(),
        })
    }

    /// Whether `address` is of the form `driver:port`.
    #[must_use]
    pub fn is_valid(address: &str) -> bool {
        ADDRESS_RE.is_match(address.trim())
    }

    /// Driver scheme.
    #[must_use]
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Driver-specific port (device path, reader name, scenario file).
    #[must_use]
    pub fn port(&self) -> &str {
        &self.port
    }
}

impl fmt::Display for ReaderAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.driver, self.port)
    }
}

impl FromStr for ReaderAddress {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ReaderAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReaderAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// CAPABILITY TRAITS
// =============================================================================

/// Opens reader devices. One driver instance belongs to one monitor and is
/// asked for a fresh handle every time the monitor (re)opens its device.
pub trait ReaderDriver: Send {
    /// Opens the device at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Open`] if the device is absent or busy.
    fn open(&mut self, address: &ReaderAddress) -> ReaderResult<Box<dyn ReaderHandle>>;
}

/// An open reader device, owned exclusively by one monitor.
pub trait ReaderHandle: Send {
    /// Device name reported by the hardware.
    fn name(&self) -> &str;

    /// Puts the device in initiator (reader) mode.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Init`] if the device refuses.
    fn initialize_as_initiator(&mut self) -> ReaderResult<()>;

    /// Called once at the start of every sweep, before any modulation is
    /// polled.
    ///
    /// # Errors
    ///
    /// A [`PollError::Device`] ends the session; any other error skips the
    /// sweep.
    fn begin_sweep(&mut self) -> Result<(), PollError> {
        Ok(())
    }

    /// Lists tags answering at `modulation`, blocking for at most `window`.
    ///
    /// # Errors
    ///
    /// See [`PollError`].
    fn list_visible_tags(
        &mut self,
        modulation: Modulation,
        window: Duration,
    ) -> Result<Vec<TargetInfo>, PollError>;

    /// Releases the device. The handle is dropped right after.
    fn close(&mut self);
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Driver schemes compiled into this build.
#[must_use]
pub fn available_drivers() -> Vec<&'static str> {
    let mut drivers = vec![simulated::SCHEME];
    #[cfg(feature = "pcsc")]
    drivers.push(pcsc::SCHEME);
    drivers
}

/// Whether a driver for `scheme` is compiled in.
#[must_use]
pub fn is_driver_available(scheme: &str) -> bool {
    available_drivers().contains(&scheme)
}

/// Creates the driver for an address's scheme.
///
/// # Errors
///
/// Returns [`ReaderError::UnsupportedDriver`] for unknown schemes and
/// [`ReaderError::Scenario`] if a simulated reader's script cannot be loaded.
pub fn driver_for(address: &ReaderAddress) -> ReaderResult<Box<dyn ReaderDriver>> {
    match address.driver() {
        simulated::SCHEME => Ok(Box::new(simulated::SimulatedDriver::from_file(
            address.port(),
        )?)),
        #[cfg(feature = "pcsc")]
        pcsc::SCHEME => Ok(Box::new(pcsc::PcscDriver::new())),
        other => Err(ReaderError::UnsupportedDriver {
            driver: other.to_string(),
            available: available_drivers().join(", "),
        }),
    }
}
