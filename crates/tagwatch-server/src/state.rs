//! Application state shared across handlers.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tagwatch_core::{ReaderEvent, ReaderStatus, StatusHandle};
use tokio::sync::RwLock;

/// How many events `/api/events` keeps.
pub const RECENT_EVENTS: usize = 100;

/// State handle passed to every handler.
pub type SharedState = Arc<RwLock<AppState>>;

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Status accessors, in configuration order.
    readers: Vec<StatusHandle>,
    /// Most recent events, oldest first.
    recent: VecDeque<ReaderEvent>,
    started_at: DateTime<Utc>,
}

impl AppState {
    /// Creates state over the given monitors' status accessors.
    #[must_use]
    pub fn new(readers: Vec<StatusHandle>) -> Self {
        Self {
            readers,
            recent: VecDeque::with_capacity(RECENT_EVENTS),
            started_at: Utc::now(),
        }
    }

    /// Wraps the state for sharing with handlers.
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Current status of every reader.
    #[must_use]
    pub fn reader_statuses(&self) -> Vec<ReaderStatus> {
        self.readers.iter().map(StatusHandle::snapshot).collect()
    }

    /// Current status of the named reader.
    #[must_use]
    pub fn reader_status(&self, name: &str) -> Option<ReaderStatus> {
        self.readers
            .iter()
            .map(StatusHandle::snapshot)
            .find(|status| status.name == name)
    }

    /// Remembers an event, dropping the oldest beyond [`RECENT_EVENTS`].
    pub fn record_event(&mut self, event: ReaderEvent) {
        if self.recent.len() == RECENT_EVENTS {
            self.recent.pop_front();
        }
        self.recent.push_back(event);
    }

    /// Remembered events, newest first.
    pub fn recent_events(&self) -> impl Iterator<Item = &ReaderEvent> {
        self.recent.iter().rev()
    }

    /// When the daemon started.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
