//! Unified error types for the tagwatch core library.
//!
//! [`TagwatchError`] covers every failure mode surfaced outside the core.
//! Modules keep their own specific errors ([`ConfigError`], [`ReaderError`])
//! and convert into it at the boundary.
//!
//! Poll-level faults ([`crate::reader::PollError`]) never show up here: the
//! monitor absorbs them and reflects them in reader status instead.
//!
//! # Example
//!
//! ```rust
//! use tagwatch_core::error::{Result, TagwatchError};
//! use std::path::PathBuf;
//!
//! fn require_config(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(TagwatchError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`ConfigError`]: crate::config::ConfigError
//! [`ReaderError`]: crate::reader::ReaderError

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all tagwatch operations.
#[derive(Debug, Error)]
pub enum TagwatchError {
    // =========================================================================
    // READER ERRORS
    // =========================================================================
    /// The reader device could not be opened.
    #[error("Reader unavailable: {0}. Check that it is plugged in and not claimed by another process.")]
    ReaderUnavailable(String),

    /// The reader opened but refused initiator mode.
    #[error("Reader initialization failed: {0}")]
    ReaderInitFailed(String),

    /// No driver in this build handles the address scheme.
    #[error("{0}")]
    UnsupportedDriver(String),

    /// A simulated reader's scenario is missing or malformed.
    #[error("Invalid reader scenario: {0}")]
    InvalidScenario(String),

    /// No reader is configured under this name.
    #[error("Reader not found: '{0}'")]
    ReaderNotFound(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE ERRORS
    // =========================================================================
    /// Reading or writing a file failed.
    #[error("Persistence error: {0}")]
    PersistenceError(String),
}

/// A specialized [`Result`] type for tagwatch operations.
pub type Result<T> = std::result::Result<T, TagwatchError>;

impl TagwatchError {
    /// Returns `true` if this error concerns a reader device or driver.
    #[inline]
    #[must_use]
    pub const fn is_reader_error(&self) -> bool {
        matches!(
            self,
            Self::ReaderUnavailable(_)
                | Self::ReaderInitFailed(_)
                | Self::UnsupportedDriver(_)
                | Self::InvalidScenario(_)
                | Self::ReaderNotFound(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if retrying later may succeed without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::ReaderUnavailable(_) | Self::ReaderInitFailed(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 404 Not Found
            Self::ConfigNotFound(_) | Self::ReaderNotFound(_) => 404,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_)
            | Self::ConfigValidationError(_)
            | Self::UnsupportedDriver(_)
            | Self::InvalidScenario(_) => 422,

            // 500 Internal Server Error
            Self::PersistenceError(_) => 500,

            // 503 Service Unavailable - hardware issues
            Self::ReaderUnavailable(_) | Self::ReaderInitFailed(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ReaderUnavailable(_) => "READER_UNAVAILABLE",
            Self::ReaderInitFailed(_) => "READER_INIT_FAILED",
            Self::UnsupportedDriver(_) => "UNSUPPORTED_DRIVER",
            Self::InvalidScenario(_) => "INVALID_SCENARIO",
            Self::ReaderNotFound(_) => "READER_NOT_FOUND",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for TagwatchError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {path}: {source}"))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::reader::ReaderError> for TagwatchError {
    fn from(err: crate::reader::ReaderError) -> Self {
        use crate::reader::ReaderError;
        match err {
            ReaderError::Open { address, message } => {
                Self::ReaderUnavailable(format!("{address}: {message}"))
            }
            ReaderError::Init { message } => Self::ReaderInitFailed(message),
            e @ ReaderError::UnsupportedDriver { .. } => Self::UnsupportedDriver(e.to_string()),
            e @ ReaderError::InvalidAddress(_) => Self::ConfigValidationError(e.to_string()),
            ReaderError::Scenario(message) => Self::InvalidScenario(message),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::reader::ReaderError;

    #[test]
    fn test_reader_error_classification() {
        assert!(TagwatchError::ReaderUnavailable("x".into()).is_reader_error());
        assert!(TagwatchError::ReaderInitFailed("x".into()).is_reader_error());
        assert!(TagwatchError::ReaderNotFound("Reader 9".into()).is_reader_error());
        assert!(!TagwatchError::ConfigParseError("x".into()).is_reader_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(TagwatchError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(TagwatchError::ConfigParseError("syntax error".into()).is_config_error());
        assert!(TagwatchError::ConfigValidationError("invalid value".into()).is_config_error());
        assert!(!TagwatchError::ReaderUnavailable("x".into()).is_config_error());
    }

    #[test]
    fn test_config_read_failure_is_persistence_error() {
        let err: TagwatchError = ConfigError::ReadError {
            path: "/etc/tagwatch/config.toml".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert!(matches!(err, TagwatchError::PersistenceError(_)));
        assert!(!err.is_config_error());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "PERSISTENCE_ERROR");
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(TagwatchError::ReaderUnavailable("busy".into()).is_recoverable());
        assert!(TagwatchError::ReaderInitFailed("nak".into()).is_recoverable());
        assert!(!TagwatchError::UnsupportedDriver("pn71xx".into()).is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(TagwatchError::ReaderNotFound("x".into()).http_status_code(), 404);
        assert_eq!(
            TagwatchError::ConfigValidationError("x".into()).http_status_code(),
            422
        );
        assert_eq!(TagwatchError::PersistenceError("x".into()).http_status_code(), 500);
        assert_eq!(TagwatchError::ReaderUnavailable("x".into()).http_status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            TagwatchError::ReaderNotFound("x".into()).error_code(),
            "READER_NOT_FOUND"
        );
        assert_eq!(
            TagwatchError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_config_error() {
        let err: TagwatchError = ConfigError::NotFound("/etc/tagwatch/config.toml".into()).into();
        assert!(matches!(err, TagwatchError::ConfigNotFound(_)));

        let err: TagwatchError = ConfigError::MultipleValidationErrors(vec![
            ConfigError::ValidationError {
                field: "readers".into(),
                message: "empty".into(),
            },
            ConfigError::ValidationError {
                field: "api.bind".into(),
                message: "bad".into(),
            },
        ])
        .into();
        let text = err.to_string();
        assert!(text.contains("readers"));
        assert!(text.contains("api.bind"));
    }

    #[test]
    fn test_from_reader_error() {
        let err: TagwatchError = ReaderError::Open {
            address: "pcsc:ACR122U".into(),
            message: "no matching PC/SC reader".into(),
        }
        .into();
        assert!(matches!(err, TagwatchError::ReaderUnavailable(_)));
        assert!(err.to_string().contains("pcsc:ACR122U"));

        let err: TagwatchError = ReaderError::UnsupportedDriver {
            driver: "pn71xx".into(),
            available: "sim".into(),
        }
        .into();
        assert_eq!(err.error_code(), "UNSUPPORTED_DRIVER");
        assert!(err.to_string().contains("pn71xx"));

        let err: TagwatchError = ReaderError::InvalidAddress("nope".into()).into();
        assert!(err.is_config_error());
    }
}
