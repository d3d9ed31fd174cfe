//! Scripted reader for demos and tests.
//!
//! A [`Scenario`] lists what the reader sees sweep by sweep. The script
//! position is shared by every handle the driver opens, so a session that
//! ends in a device loss resumes from the next cycle once reopened.
//!
//! ```toml
//! device_name = "Simulated PN7150"
//! open_failures = 1
//! repeat = true
//!
//! [[cycle]]
//! tags = [{ family = "type_a", uid = "04A1B2C3", atqa = "0044", sak = 8 }]
//!
//! [[cycle]]
//! transport_errors = ["type_a"]
//!
//! [[cycle]]
//! device_lost = true
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{PollError, ReaderAddress, ReaderDriver, ReaderError, ReaderHandle, ReaderResult};
use crate::types::{Modulation, ProtocolFamily, TargetInfo};

/// Address scheme of the simulated driver.
pub const SCHEME: &str = "sim";

const DEFAULT_DEVICE_NAME: &str = "Simulated Reader";

// =============================================================================
// SCENARIO
// =============================================================================

/// What a simulated reader does, sweep by sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Name reported by opened handles.
    pub device_name: String,
    /// How many open attempts fail before one succeeds.
    pub open_failures: u32,
    /// How many initiator initializations fail before one succeeds.
    pub init_failures: u32,
    /// Simulated time each poll takes, capped at the polling window.
    pub poll_latency_ms: u64,
    /// Restart from the first cycle after the last; otherwise hold the last.
    pub repeat: bool,
    /// Sweeps in order.
    #[serde(rename = "cycle")]
    pub cycles: Vec<ScenarioCycle>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            open_failures: 0,
            init_failures: 0,
            poll_latency_ms: 0,
            repeat: false,
            cycles: Vec::new(),
        }
    }
}

impl Scenario {
    /// Scenario holding the given cycles, played once.
    #[must_use]
    pub fn from_cycles(cycles: Vec<ScenarioCycle>) -> Self {
        Self {
            cycles,
            ..Self::default()
        }
    }

    /// Parses a scenario from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Scenario`] on malformed input.
    pub fn from_toml(content: &str) -> ReaderResult<Self> {
        toml::from_str(content).map_err(|e| ReaderError::Scenario(e.to_string()))
    }

    /// Reads and parses a scenario file.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Scenario`] if the file is unreadable or malformed.
    pub fn load(path: impl AsRef<Path>) -> ReaderResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReaderError::Scenario(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }
}

/// One sweep of a scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioCycle {
    /// Targets in the field.
    pub tags: Vec<TargetInfo>,
    /// Families whose polls fail with a transport error.
    pub transport_errors: Vec<ProtocolFamily>,
    /// The device disappears at the start of this sweep.
    pub device_lost: bool,
}

impl ScenarioCycle {
    /// Cycle with the given targets in the field.
    #[must_use]
    pub fn with_tags(tags: Vec<TargetInfo>) -> Self {
        Self {
            tags,
            ..Self::default()
        }
    }

    /// Cycle in which the device is lost.
    #[must_use]
    pub fn device_lost() -> Self {
        Self {
            device_lost: true,
            ..Self::default()
        }
    }

    /// Adds a family whose polls fail this cycle.
    #[must_use]
    pub fn failing(mut self, family: ProtocolFamily) -> Self {
        self.transport_errors.push(family);
        self
    }
}

// =============================================================================
// DRIVER
// =============================================================================

#[derive(Debug)]
struct Script {
    scenario: Scenario,
    next_cycle: usize,
    opens_attempted: u32,
    inits_attempted: u32,
}

impl Script {
    fn advance(&mut self) -> ScenarioCycle {
        let len = self.scenario.cycles.len();
        if len == 0 {
            return ScenarioCycle::default();
        }
        let index = if self.next_cycle < len {
            self.next_cycle += 1;
            self.next_cycle - 1
        } else if self.scenario.repeat {
            self.next_cycle = 1;
            0
        } else {
            len - 1
        };
        self.scenario.cycles[index].clone()
    }
}

/// Counters shared between a simulated driver and whoever inspects it.
#[derive(Debug, Default)]
pub struct SimulatedStats {
    opens: AtomicU64,
    closes: AtomicU64,
    sweeps: AtomicU64,
}

impl SimulatedStats {
    /// Successful opens.
    #[must_use]
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Handles closed.
    #[must_use]
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Sweeps started.
    #[must_use]
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::SeqCst)
    }
}

/// Driver replaying a [`Scenario`].
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    script: Arc<Mutex<Script>>,
    stats: Arc<SimulatedStats>,
}

impl SimulatedDriver {
    /// Creates a driver replaying `scenario`.
    #[must_use]
    pub fn new(scenario: Scenario) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                scenario,
                next_cycle: 0,
                opens_attempted: 0,
                inits_attempted: 0,
            })),
            stats: Arc::new(SimulatedStats::default()),
        }
    }

    /// Creates a driver from a scenario file.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Scenario`] if the file cannot be loaded.
    pub fn from_file(path: impl AsRef<Path>) -> ReaderResult<Self> {
        Ok(Self::new(Scenario::load(path)?))
    }

    /// Open/close/sweep counters.
    #[must_use]
    pub fn stats(&self) -> Arc<SimulatedStats> {
        Arc::clone(&self.stats)
    }
}

fn lock(script: &Mutex<Script>) -> MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReaderDriver for SimulatedDriver {
    fn open(&mut self, address: &ReaderAddress) -> ReaderResult<Box<dyn ReaderHandle>> {
        let mut script = lock(&self.script);
        script.opens_attempted += 1;
        if script.opens_attempted <= script.scenario.open_failures {
            return Err(ReaderError::Open {
                address: address.to_string(),
                message: "simulated device not present".to_string(),
            });
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SimulatedHandle {
            name: script.scenario.device_name.clone(),
            latency: Duration::from_millis(script.scenario.poll_latency_ms),
            script: Arc::clone(&self.script),
            stats: Arc::clone(&self.stats),
            current: ScenarioCycle::default(),
        }))
    }
}

struct SimulatedHandle {
    name: String,
    latency: Duration,
    script: Arc<Mutex<Script>>,
    stats: Arc<SimulatedStats>,
    current: ScenarioCycle,
}

impl ReaderHandle for SimulatedHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize_as_initiator(&mut self) -> ReaderResult<()> {
        let mut script = lock(&self.script);
        script.inits_attempted += 1;
        if script.inits_attempted <= script.scenario.init_failures {
            return Err(ReaderError::Init {
                message: "simulated initiator init failure".to_string(),
            });
        }
        Ok(())
    }

    fn begin_sweep(&mut self) -> Result<(), PollError> {
        self.current = lock(&self.script).advance();
        self.stats.sweeps.fetch_add(1, Ordering::SeqCst);
        if self.current.device_lost {
            return Err(PollError::Device("simulated device lost".to_string()));
        }
        Ok(())
    }

    fn list_visible_tags(
        &mut self,
        modulation: Modulation,
        window: Duration,
    ) -> Result<Vec<TargetInfo>, PollError> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency.min(window));
        }
        if self.current.transport_errors.contains(&modulation.family) {
            return Err(PollError::Transport("RF Transmission Error".to_string()));
        }

        let targets: Vec<TargetInfo> = self
            .current
            .tags
            .iter()
            .filter(|t| t.family() == modulation.family)
            .cloned()
            .collect();

        if targets.is_empty() {
            Err(PollError::Timeout)
        } else {
            debug!(%modulation, count = targets.len(), "simulated targets listed");
            Ok(targets)
        }
    }

    fn close(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BaudRate, TypeATarget};

    fn addr() -> ReaderAddress {
        ReaderAddress::parse("sim:test").unwrap()
    }

    fn type_a() -> Modulation {
        Modulation::new(ProtocolFamily::TypeA, BaudRate::Kbps106)
    }

    fn tag(uid: u8) -> TargetInfo {
        TargetInfo::TypeA(TypeATarget {
            uid: vec![uid; 4],
            ..TypeATarget::default()
        })
    }

    #[test]
    fn test_scenario_from_toml() {
        let scenario = Scenario::from_toml(
            r#"
            device_name = "Bench PN7150"
            open_failures = 2
            repeat = true

            [[cycle]]
            tags = [{ family = "type_a", uid = "04A1B2C3", atqa = "0044", sak = 8 }]

            [[cycle]]
            transport_errors = ["felica"]

            [[cycle]]
            device_lost = true
            "#,
        )
        .unwrap();

        assert_eq!(scenario.device_name, "Bench PN7150");
        assert_eq!(scenario.open_failures, 2);
        assert_eq!(scenario.cycles.len(), 3);
        assert_eq!(scenario.cycles[0].tags[0].identity().unwrap().to_hex(), "04A1B2C3");
        assert_eq!(scenario.cycles[1].transport_errors, vec![ProtocolFamily::Felica]);
        assert!(scenario.cycles[2].device_lost);
    }

    #[test]
    fn test_malformed_scenario_is_rejected() {
        let err = Scenario::from_toml("[[cycle]]\ntags = [{ family = \"warp\" }]").unwrap_err();
        assert!(matches!(err, ReaderError::Scenario(_)));
    }

    #[test]
    fn test_open_failures_then_success() {
        let mut driver = SimulatedDriver::new(Scenario {
            open_failures: 2,
            ..Scenario::default()
        });
        assert!(driver.open(&addr()).is_err());
        assert!(driver.open(&addr()).is_err());
        assert!(driver.open(&addr()).is_ok());
        assert_eq!(driver.stats().opens(), 1);
    }

    #[test]
    fn test_cycles_hold_last_without_repeat() {
        let mut driver = SimulatedDriver::new(Scenario::from_cycles(vec![
            ScenarioCycle::with_tags(vec![tag(1)]),
            ScenarioCycle::default(),
        ]));
        let mut handle = driver.open(&addr()).unwrap();
        let window = Duration::from_millis(10);

        handle.begin_sweep().unwrap();
        assert_eq!(handle.list_visible_tags(type_a(), window).unwrap().len(), 1);
        handle.begin_sweep().unwrap();
        assert_eq!(handle.list_visible_tags(type_a(), window), Err(PollError::Timeout));
        handle.begin_sweep().unwrap();
        assert_eq!(handle.list_visible_tags(type_a(), window), Err(PollError::Timeout));
    }

    #[test]
    fn test_cycles_repeat() {
        let mut driver = SimulatedDriver::new(Scenario {
            repeat: true,
            ..Scenario::from_cycles(vec![
                ScenarioCycle::with_tags(vec![tag(1)]),
                ScenarioCycle::default(),
            ])
        });
        let mut handle = driver.open(&addr()).unwrap();
        let window = Duration::from_millis(10);

        for _ in 0..2 {
            handle.begin_sweep().unwrap();
            assert!(handle.list_visible_tags(type_a(), window).is_ok());
            handle.begin_sweep().unwrap();
            assert!(handle.list_visible_tags(type_a(), window).is_err());
        }
    }

    #[test]
    fn test_transport_errors_and_device_loss() {
        let mut driver = SimulatedDriver::new(Scenario::from_cycles(vec![
            ScenarioCycle::with_tags(vec![tag(1)]).failing(ProtocolFamily::TypeA),
            ScenarioCycle::device_lost(),
            ScenarioCycle::with_tags(vec![tag(2)]),
        ]));
        let mut handle = driver.open(&addr()).unwrap();
        let window = Duration::from_millis(10);

        handle.begin_sweep().unwrap();
        assert!(matches!(
            handle.list_visible_tags(type_a(), window),
            Err(PollError::Transport(_))
        ));
        assert!(matches!(handle.begin_sweep(), Err(PollError::Device(_))));
        handle.close();

        // The script position survives a reopen.
        let mut handle = driver.open(&addr()).unwrap();
        handle.begin_sweep().unwrap();
        let targets = handle.list_visible_tags(type_a(), window).unwrap();
        assert_eq!(targets[0].identity_bytes(), &[2; 4]);

        let stats = driver.stats();
        assert_eq!(stats.opens(), 2);
        assert_eq!(stats.closes(), 1);
        assert_eq!(stats.sweeps(), 3);
    }
}
