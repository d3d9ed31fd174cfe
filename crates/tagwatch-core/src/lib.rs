//! # tagwatch-core
//!
//! Core presence tracking for contactless tag readers.
//!
//! This crate provides:
//! - Per-reader device monitors that open, initialize and poll readers,
//!   recovering from device loss on their own
//! - Presence reconciliation turning poll sweeps into arrival/departure events
//! - Reader drivers behind a small capability trait (simulated, PC/SC)
//! - Configuration loading, saving and validation
//!
//! ## Architecture
//!
//! - [`monitor`] - Device monitor state machine and status reporting
//! - [`presence`] - Sweep snapshots, presence sets and reconciliation
//! - [`reader`] - Reader capability traits, addresses and drivers
//! - [`sink`] - Event delivery
//! - [`config`] - Application configuration
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Tag identities, protocol families and events

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod monitor;
pub mod presence;
pub mod reader;
pub mod sink;
pub mod types;

// Re-export primary types for convenience
pub use config::{
    ApiConfig, Config, ConfigError, ConfigResult, LoggingConfig, PollingConfig, ReaderConfig,
};
pub use error::{Result, TagwatchError};
pub use monitor::{
    start_all, DeviceMonitor, MonitorHandle, MonitorState, PresentTag, ReaderStatus, StatusHandle,
};
pub use presence::{reconcile, PresenceSet, PresenceTracker, Reconciliation, Snapshot};
pub use reader::{
    available_drivers, driver_for, PollError, ReaderAddress, ReaderDriver, ReaderError,
    ReaderHandle, ReaderResult,
};
pub use sink::{ChannelSink, EventSink, TracingSink};
pub use types::{
    BaudRate, Modulation, ProtocolFamily, ReaderEvent, TagEvent, TagIdentity, TargetInfo,
};
