//! Application configuration management.
//!
//! Handles loading, saving, and validating tagwatch configuration including:
//! - Readers to monitor (name + `driver:port` address)
//! - Poll cadence, polling window and reopen backoff
//! - Modulations swept on every cycle
//! - Logging and status API settings
//!
//! Values come from a TOML file, overridden by `TAGWATCH__SECTION__KEY`
//! environment variables (e.g. `TAGWATCH__POLLING__INTERVAL_MS=50`).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reader::{available_drivers, is_driver_available, ReaderAddress};
use crate::types::Modulation;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TAGWATCH";

// =============================================================================
// ERRORS
// =============================================================================

/// Errors from loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("Configuration file not found at: {0}")]
    NotFound(String),

    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] ::config::ConfigError),

    /// The configuration could not be serialized.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted path of the field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("Configuration has {} problems: {}", .0.len(), join_errors(.0))]
    MultipleValidationErrors(Vec<ConfigError>),
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// =============================================================================
// SECTIONS
// =============================================================================

/// Poll cadence and recovery timing shared by all readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Sleep between the end of one sweep and the start of the next.
    pub interval_ms: u64,

    /// Longest a single modulation poll may block.
    pub window_ms: u64,

    /// Wait after a failed open or initialization before retrying.
    pub open_backoff_secs: u64,

    /// Wait after losing an open device before reopening it.
    pub reopen_delay_secs: u64,

    /// How long shutdown waits for monitors to finish their current sweep.
    pub shutdown_grace_secs: u64,

    /// Modulations polled each sweep, in order.
    pub modulations: Vec<Modulation>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            window_ms: 300,
            open_backoff_secs: 5,
            reopen_delay_secs: 1,
            shutdown_grace_secs: 5,
            modulations: Modulation::default_sweep(),
        }
    }
}

impl PollingConfig {
    /// Inter-sweep sleep.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Per-modulation polling window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Backoff after open/init failures.
    #[must_use]
    pub const fn open_backoff(&self) -> Duration {
        Duration::from_secs(self.open_backoff_secs)
    }

    /// Delay before reopening a lost device.
    #[must_use]
    pub const fn reopen_delay(&self) -> Duration {
        Duration::from_secs(self.reopen_delay_secs)
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,

    /// JSON logs to rolling files plus compact stdout.
    pub production: bool,

    /// Directory for log files; platform default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            production: false,
            directory: None,
        }
    }
}

/// Read-only status API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Whether to serve the API.
    pub enabled: bool,

    /// Listen address.
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl ApiConfig {
    /// Parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `bind` is not `ip:port`.
    pub fn bind_addr(&self) -> ConfigResult<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| invalid("api.bind", format!("'{}' is not ip:port ({e})", self.bind)))
    }
}

/// One physical reader to monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Name used in logs and events (e.g. "Reader 1").
    pub name: String,

    /// `driver:port` address (e.g. `pcsc:ACR122U`, `sim:demos/two-tags.toml`).
    pub address: String,

    /// Overrides `polling.modulations` for this reader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulations: Option<Vec<Modulation>>,
}

impl ReaderConfig {
    /// Creates a reader entry using the shared modulation list.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            modulations: None,
        }
    }

    /// Parsed address.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the address is malformed.
    pub fn parsed_address(&self) -> ConfigResult<ReaderAddress> {
        ReaderAddress::parse(&self.address)
            .map_err(|e| invalid(format!("readers.{}.address", self.name), e.to_string()))
    }

    /// Modulations to sweep on this reader.
    #[must_use]
    pub fn modulations<'a>(&'a self, polling: &'a PollingConfig) -> &'a [Modulation] {
        self.modulations.as_deref().unwrap_or(&polling.modulations)
    }
}

// =============================================================================
// ROOT
// =============================================================================

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Poll timing and modulations.
    pub polling: PollingConfig,

    /// Logging.
    pub logging: LoggingConfig,

    /// Status API.
    pub api: ApiConfig,

    /// Readers to monitor.
    pub readers: Vec<ReaderConfig>,
}

impl Config {
    /// Loads, overlays environment overrides, and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing, a parse
    /// error if it is malformed, or validation errors.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses TOML text, overlays environment overrides, and validates.
    ///
    /// # Errors
    ///
    /// Returns a parse error or validation errors.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from_str(content, ::config::FileFormat::Toml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let write_error = |source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(path, self.to_toml_string()?).map_err(write_error)?;
        Ok(())
    }

    /// Renders the configuration as pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SerializeError`] if serialization fails.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns the single problem found, or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        validate_polling(&self.polling, &mut errors);

        if self.logging.level.trim().is_empty() {
            errors.push(invalid("logging.level", "must not be empty"));
        }

        if self.api.enabled {
            if let Err(e) = self.api.bind_addr() {
                errors.push(e);
            }
        }

        if self.readers.is_empty() {
            errors.push(invalid("readers", "at least one reader must be configured"));
        }

        let mut names = HashSet::new();
        for (i, reader) in self.readers.iter().enumerate() {
            validate_reader(i, reader, &mut names, &mut errors);
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Default configuration file location.
    ///
    /// On Linux: `/etc/tagwatch/config.toml`
    /// Elsewhere: the platform config directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/tagwatch/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "tagwatch").map_or_else(
                || PathBuf::from("tagwatch.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }
}

fn validate_polling(polling: &PollingConfig, errors: &mut Vec<ConfigError>) {
    if polling.interval_ms == 0 {
        errors.push(invalid("polling.interval_ms", "must be greater than 0"));
    }
    if polling.window_ms == 0 {
        errors.push(invalid("polling.window_ms", "must be greater than 0"));
    }
    if polling.open_backoff_secs == 0 {
        errors.push(invalid("polling.open_backoff_secs", "must be greater than 0"));
    }
    validate_modulations("polling.modulations", &polling.modulations, errors);
}

fn validate_modulations(field: &str, modulations: &[Modulation], errors: &mut Vec<ConfigError>) {
    if modulations.is_empty() {
        errors.push(invalid(field, "at least one modulation must be polled"));
    }
    for m in modulations.iter().filter(|m| !m.is_supported()) {
        let rates: Vec<String> = m
            .family
            .supported_baud_rates()
            .iter()
            .map(|r| r.kbps().to_string())
            .collect();
        errors.push(invalid(
            field,
            format!(
                "{} cannot be polled at {} kbps (supported: {})",
                m.family,
                m.baud_rate.kbps(),
                rates.join(", ")
            ),
        ));
    }
}

fn validate_reader(
    index: usize,
    reader: &ReaderConfig,
    names: &mut HashSet<String>,
    errors: &mut Vec<ConfigError>,
) {
    let prefix = format!("readers[{index}]");

    if reader.name.trim().is_empty() {
        errors.push(invalid(format!("{prefix}.name"), "must not be empty"));
    } else if !names.insert(reader.name.clone()) {
        errors.push(invalid(
            format!("{prefix}.name"),
            format!("duplicate reader name '{}'", reader.name),
        ));
    }

    match ReaderAddress::parse(&reader.address) {
        Ok(address) if !is_driver_available(address.driver()) => errors.push(invalid(
            format!("{prefix}.address"),
            format!(
                "driver '{}' is not available in this build (available: {})",
                address.driver(),
                available_drivers().join(", ")
            ),
        )),
        Ok(_) => {}
        Err(e) => errors.push(invalid(format!("{prefix}.address"), e.to_string())),
    }

    if let Some(modulations) = &reader.modulations {
        validate_modulations(&format!("{prefix}.modulations"), modulations, errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BaudRate, ProtocolFamily};

    const MINIMAL: &str = r#"
        [[readers]]
        name = "Reader 1"
        address = "sim:demos/two-tags.toml"
    "#;

    #[test]
    fn test_defaults() {
        let polling = PollingConfig::default();
        assert_eq!(polling.interval(), Duration::from_millis(100));
        assert_eq!(polling.window(), Duration::from_millis(300));
        assert_eq!(polling.open_backoff(), Duration::from_secs(5));
        assert_eq!(polling.reopen_delay(), Duration::from_secs(1));
        assert_eq!(polling.modulations, Modulation::default_sweep());
        assert!(ApiConfig::default().enabled);
    }

    #[test]
    fn test_minimal_file_fills_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.readers.len(), 1);
        assert_eq!(config.readers[0].name, "Reader 1");
        assert_eq!(config.polling, PollingConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml_str(
            r#"
            [polling]
            interval_ms = 50
            window_ms = 150
            modulations = [
                { family = "type_a", baud_rate = 106 },
                { family = "felica", baud_rate = 424 },
            ]

            [logging]
            level = "debug"
            production = true
            directory = "/tmp/tagwatch-logs"

            [api]
            enabled = false

            [[readers]]
            name = "Door"
            address = "sim:door.toml"

            [[readers]]
            name = "Desk"
            address = "sim:desk.toml"
            modulations = [{ family = "jewel", baud_rate = 106 }]
            "#,
        )
        .unwrap();

        assert_eq!(config.polling.interval_ms, 50);
        assert_eq!(config.polling.modulations.len(), 2);
        assert!(config.logging.production);
        assert!(!config.api.enabled);

        let door = &config.readers[0];
        let desk = &config.readers[1];
        assert_eq!(door.modulations(&config.polling).len(), 2);
        assert_eq!(
            desk.modulations(&config.polling),
            &[Modulation::new(ProtocolFamily::Jewel, BaudRate::Kbps106)]
        );
        assert_eq!(desk.parsed_address().unwrap().port(), "desk.toml");
    }

    #[test]
    fn test_no_readers_is_invalid() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "readers"));
    }

    #[test]
    fn test_collects_every_problem() {
        let mut config = Config::default();
        config.polling.interval_ms = 0;
        config.polling.modulations = vec![Modulation::new(ProtocolFamily::Jewel, BaudRate::Kbps424)];
        config.api.bind = "not-an-address".to_string();
        config.readers = vec![
            ReaderConfig::new("Reader 1", "sim:a.toml"),
            ReaderConfig::new("Reader 1", "no-scheme"),
            ReaderConfig::new("", "pn71xx:/dev/pn5xx_i2c0"),
        ];

        let err = config.validate().unwrap_err();
        let ConfigError::MultipleValidationErrors(errors) = &err else {
            panic!("expected multiple errors, got {err}");
        };
        assert_eq!(errors.len(), 7);

        let text = err.to_string();
        assert!(text.contains("polling.interval_ms"));
        assert!(text.contains("Jewel cannot be polled at 424 kbps"));
        assert!(text.contains("api.bind"));
        assert!(text.contains("duplicate reader name"));
        assert!(text.contains("readers[1].address"));
        assert!(text.contains("readers[2].name"));
        assert!(text.contains("driver 'pn71xx' is not available"));
    }

    #[test]
    fn test_disabled_api_skips_bind_check() {
        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        config.api.enabled = false;
        config.api.bind = "nonsense".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_baud_rate_is_a_parse_error() {
        let err = Config::from_toml_str(
            r#"
            [polling]
            modulations = [{ family = "type_a", baud_rate = 300 }]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        config.readers.push(ReaderConfig {
            name: "Reader 2".to_string(),
            address: "sim:other.toml".to_string(),
            modulations: Some(vec![Modulation::new(ProtocolFamily::TypeB, BaudRate::Kbps106)]),
        });
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
