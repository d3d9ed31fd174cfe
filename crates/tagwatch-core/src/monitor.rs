//! Device monitor: keeps one reader operational and drives its poll loop.
//!
//! ```text
//!            open ok            init ok
//!  Closed ──────────▶ Opening ──────────▶ Initializing ──────────▶ Polling
//!    ▲  ▲   open err    │         init err     │                      │
//!    │  └──(backoff)────┘◀────────────────────┘                      │
//!    └────────────────(reopen delay, tracker reset)── device error ───┘
//! ```
//!
//! Each monitor runs on its own blocking-pool thread and owns its device
//! handle and [`PresenceTracker`] outright. The only state shared with other
//! threads is the [`ReaderStatus`] behind a per-device lock, which is taken
//! briefly after each step and never across a poll call.
//!
//! Stopping is cooperative: it is observed at the top of each sweep, between
//! modulations, and wakes any backoff or inter-sweep sleep early. A poll call
//! already in flight runs to the end of its window.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, PollingConfig, ReaderConfig};
use crate::error::Result;
use crate::presence::{PresenceTracker, Snapshot};
use crate::reader::{driver_for, PollError, ReaderAddress, ReaderDriver, ReaderHandle};
use crate::sink::EventSink;
use crate::types::{Modulation, ReaderEvent, TagEvent, TagIdentity};

// =============================================================================
// STATUS
// =============================================================================

/// Where a monitor is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// No device handle; waiting to (re)open.
    #[default]
    Closed,
    /// Opening the device.
    Opening,
    /// Putting the device in initiator mode.
    Initializing,
    /// Sweeping for tags.
    Polling,
    /// The monitor has exited.
    Stopped,
}

impl MonitorState {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Initializing => "initializing",
            Self::Polling => "polling",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tag the monitor currently believes present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresentTag {
    /// Tag identity.
    pub identity: TagIdentity,
    /// Modulation it was last seen at.
    pub modulation: Modulation,
}

/// Point-in-time view of one monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReaderStatus {
    /// Configured reader name.
    pub name: String,
    /// Configured address.
    pub address: String,
    /// Lifecycle state.
    pub state: MonitorState,
    /// Name reported by the open device.
    pub device_name: Option<String>,
    /// Current device session.
    pub session: Option<Uuid>,
    /// Sweeps reconciled since start.
    pub cycles: u64,
    /// Device sessions opened since start.
    pub sessions: u64,
    /// Failed open attempts.
    pub open_failures: u64,
    /// Failed initiator initializations.
    pub init_failures: u64,
    /// Modulation polls skipped for transport errors.
    pub transport_errors: u64,
    /// Sessions ended by a device error.
    pub device_errors: u64,
    /// Targets excluded for lacking an identity.
    pub malformed_targets: u64,
    /// Most recent open, init, transport or device error.
    pub last_error: Option<String>,
    /// When the last sweep was reconciled.
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Tags currently present.
    pub present: Vec<PresentTag>,
}

/// Cloneable read-only accessor for one monitor's status.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<Mutex<ReaderStatus>>,
}

impl StatusHandle {
    fn new(status: ReaderStatus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(status)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReaderStatus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current status.
    #[must_use]
    pub fn snapshot(&self) -> ReaderStatus {
        self.lock().clone()
    }

    fn update(&self, f: impl FnOnce(&mut ReaderStatus)) {
        f(&mut self.lock());
    }
}

// =============================================================================
// STOP SIGNAL
// =============================================================================

/// Cooperative stop flag with interruptible sleeps.
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self) {
        *self.lock() = true;
        self.wake.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *self.lock()
    }

    /// Sleeps for `duration` or until stopped. Returns whether stopped.
    fn sleep(&self, duration: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

// =============================================================================
// MONITOR
// =============================================================================

enum Sweep {
    Complete(Snapshot),
    Skipped,
    Stopped,
    DeviceLost(String),
}

enum SessionEnd {
    Stopped,
    DeviceLost(String),
}

/// Owns one reader device and its presence state.
pub struct DeviceMonitor {
    name: String,
    address: ReaderAddress,
    modulations: Vec<Modulation>,
    polling: PollingConfig,
    driver: Box<dyn ReaderDriver>,
    sink: Arc<dyn EventSink>,
    stop: Arc<StopSignal>,
    status: StatusHandle,
}

impl std::fmt::Debug for DeviceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMonitor")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("modulations", &self.modulations)
            .finish_non_exhaustive()
    }
}

impl DeviceMonitor {
    /// Creates a monitor for one configured reader.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the reader's address is malformed.
    pub fn new(
        reader: ReaderConfig,
        polling: PollingConfig,
        driver: Box<dyn ReaderDriver>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let address = reader.parsed_address()?;
        let modulations = reader.modulations(&polling).to_vec();
        let status = StatusHandle::new(ReaderStatus {
            name: reader.name.clone(),
            address: reader.address.clone(),
            ..ReaderStatus::default()
        });

        Ok(Self {
            name: reader.name,
            address,
            modulations,
            polling,
            driver,
            sink,
            stop: Arc::new(StopSignal::default()),
            status,
        })
    }

    /// Configured reader name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts the monitor on the Tokio blocking pool and returns at once.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(self) -> MonitorHandle {
        let name = self.name.clone();
        let stop = Arc::clone(&self.stop);
        let status = self.status.clone();
        let task = tokio::task::spawn_blocking(move || self.run());

        MonitorHandle {
            name,
            stop,
            status,
            task,
        }
    }

    fn run(mut self) {
        info!(reader = %self.name, address = %self.address, "Monitor started");

        let mut tracker = PresenceTracker::new();
        while !self.stop.is_stopped() {
            let Some(mut handle) = self.open() else {
                if self.stop.sleep(self.polling.open_backoff()) {
                    break;
                }
                continue;
            };

            let session = Uuid::now_v7();
            let device_name = handle.name().to_string();
            self.status.update(|s| {
                s.state = MonitorState::Polling;
                s.sessions += 1;
                s.session = Some(session);
                s.device_name = Some(device_name);
            });

            let end = self.poll_session(handle.as_mut(), &mut tracker, session);

            handle.close();
            tracker.reset();
            self.status.update(|s| {
                s.state = MonitorState::Closed;
                s.session = None;
                s.device_name = None;
                s.present.clear();
            });

            match end {
                SessionEnd::Stopped => break,
                SessionEnd::DeviceLost(message) => {
                    warn!(
                        reader = %self.name,
                        error = %message,
                        "Reader lost, reopening in {}s",
                        self.polling.reopen_delay_secs
                    );
                    self.status.update(|s| {
                        s.device_errors += 1;
                        s.last_error = Some(message);
                    });
                    if self.stop.sleep(self.polling.reopen_delay()) {
                        break;
                    }
                }
            }
        }

        self.status.update(|s| s.state = MonitorState::Stopped);
        info!(reader = %self.name, "Monitor stopped");
    }

    /// Opens and initializes the device, recording any failure.
    fn open(&mut self) -> Option<Box<dyn ReaderHandle>> {
        self.status.update(|s| s.state = MonitorState::Opening);
        let mut handle = match self.driver.open(&self.address) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(
                    reader = %self.name,
                    error = %e,
                    "Failed to open reader, retrying in {}s",
                    self.polling.open_backoff_secs
                );
                self.status.update(|s| {
                    s.state = MonitorState::Closed;
                    s.open_failures += 1;
                    s.last_error = Some(e.to_string());
                });
                return None;
            }
        };
        info!(reader = %self.name, device = handle.name(), "NFC reader opened");

        self.status.update(|s| s.state = MonitorState::Initializing);
        if let Err(e) = handle.initialize_as_initiator() {
            warn!(
                reader = %self.name,
                error = %e,
                "Failed to initialize reader, retrying in {}s",
                self.polling.open_backoff_secs
            );
            handle.close();
            self.status.update(|s| {
                s.state = MonitorState::Closed;
                s.init_failures += 1;
                s.last_error = Some(e.to_string());
            });
            return None;
        }

        Some(handle)
    }

    fn poll_session(
        &self,
        handle: &mut dyn ReaderHandle,
        tracker: &mut PresenceTracker,
        session: Uuid,
    ) -> SessionEnd {
        loop {
            if self.stop.is_stopped() {
                return SessionEnd::Stopped;
            }

            match self.sweep(handle) {
                Sweep::Complete(snapshot) => self.apply(&snapshot, tracker, session),
                Sweep::Skipped => {}
                Sweep::Stopped => return SessionEnd::Stopped,
                Sweep::DeviceLost(message) => return SessionEnd::DeviceLost(message),
            }

            if self.stop.sleep(self.polling.interval()) {
                return SessionEnd::Stopped;
            }
        }
    }

    /// Polls every modulation once and assembles the sweep's snapshot.
    fn sweep(&self, handle: &mut dyn ReaderHandle) -> Sweep {
        match handle.begin_sweep() {
            Ok(()) | Err(PollError::Timeout) => {}
            Err(PollError::Device(message)) => return Sweep::DeviceLost(message),
            Err(PollError::Transport(message)) => {
                warn!(reader = %self.name, error = %message, "Transport error, skipping sweep");
                self.status.update(|s| {
                    s.transport_errors += 1;
                    s.last_error = Some(message);
                });
                return Sweep::Skipped;
            }
        }

        let window = self.polling.window();
        let mut snapshot = Snapshot::new();
        for &modulation in &self.modulations {
            if self.stop.is_stopped() {
                return Sweep::Stopped;
            }
            match handle.list_visible_tags(modulation, window) {
                Ok(targets) => snapshot.record(modulation, targets),
                Err(PollError::Timeout) => snapshot.record_timeout(modulation),
                Err(PollError::Transport(message)) => {
                    warn!(
                        reader = %self.name,
                        %modulation,
                        error = %message,
                        "Transport error, skipping modulation this cycle"
                    );
                    self.status.update(|s| s.last_error = Some(message));
                    snapshot.record_transport_error(modulation);
                }
                Err(PollError::Device(message)) => return Sweep::DeviceLost(message),
            }
        }
        Sweep::Complete(snapshot)
    }

    /// Reconciles a sweep, emits its events, and publishes status.
    fn apply(&self, snapshot: &Snapshot, tracker: &mut PresenceTracker, session: Uuid) {
        if snapshot.excluded() > 0 {
            debug!(
                reader = %self.name,
                count = snapshot.excluded(),
                "Excluded targets without a usable identity"
            );
        }

        let reconciliation = tracker.reconcile(snapshot);
        let observed_at = Utc::now();
        let envelope = |event| ReaderEvent {
            reader: self.name.clone(),
            session,
            observed_at,
            event,
        };

        for identity in reconciliation.departed {
            self.sink.emit(envelope(TagEvent::Departed { identity }));
        }
        for (identity, target) in reconciliation.arrived {
            self.sink
                .emit(envelope(TagEvent::Arrived { identity, target }));
        }

        let present: Vec<PresentTag> = tracker
            .present()
            .iter()
            .map(|(identity, modulation)| PresentTag {
                identity: identity.clone(),
                modulation,
            })
            .collect();
        let unobserved = snapshot.unobserved().len() as u64;
        let excluded = snapshot.excluded() as u64;
        self.status.update(|s| {
            s.cycles += 1;
            s.transport_errors += unobserved;
            s.malformed_targets += excluded;
            s.last_cycle_at = Some(observed_at);
            s.present = present;
        });
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Controls a running monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    name: String,
    stop: Arc<StopSignal>,
    status: StatusHandle,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Configured reader name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks the monitor to exit at its next safe point.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ReaderStatus {
        self.status.snapshot()
    }

    /// Accessor for the status that outlives this handle.
    #[must_use]
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Whether the monitor thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the monitor thread to exit.
    ///
    /// # Errors
    ///
    /// Returns the join error if the monitor thread panicked.
    pub async fn join(self) -> std::result::Result<(), JoinError> {
        self.task.await
    }
}

/// Builds a monitor for every configured reader, then starts them all.
///
/// Nothing is started unless every reader has a usable address and driver.
///
/// # Errors
///
/// Returns the first reader whose address, driver or scenario is unusable.
pub fn start_all(config: &Config, sink: &Arc<dyn EventSink>) -> Result<Vec<MonitorHandle>> {
    let monitors = config
        .readers
        .iter()
        .map(|reader| {
            let driver = driver_for(&reader.parsed_address()?)?;
            DeviceMonitor::new(
                reader.clone(),
                config.polling.clone(),
                driver,
                Arc::clone(sink),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(monitors.into_iter().map(DeviceMonitor::start).collect())
}
