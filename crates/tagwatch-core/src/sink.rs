//! Event sinks: where monitors deliver presence transitions.
//!
//! Monitors run on blocking threads and must never stall on a slow
//! consumer, so [`EventSink::emit`] is synchronous and non-blocking.

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::types::{ReaderEvent, TagEvent};

/// Receives presence events from one or more monitors.
pub trait EventSink: Send + Sync {
    /// Delivers one event. Must not block.
    fn emit(&self, event: ReaderEvent);
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ReaderEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver draining it.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReaderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ReaderEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            debug!(reader = %event.reader, "event receiver dropped, discarding event");
        }
    }
}

/// Logs every event at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ReaderEvent) {
        match &event.event {
            TagEvent::Arrived { identity, target } => info!(
                reader = %event.reader,
                session = %event.session,
                uid = %identity,
                tag_type = target.type_name(),
                "Tag arrived"
            ),
            TagEvent::Departed { identity } => info!(
                reader = %event.reader,
                session = %event.session,
                uid = %identity,
                "Tag departed"
            ),
        }
    }
}

impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn emit(&self, event: ReaderEvent) {
        (**self).emit(event);
    }
}
