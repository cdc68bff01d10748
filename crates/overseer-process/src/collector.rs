//! Status sinks
//!
//! A [`StatusCollector`] receives every status transition of a controller,
//! tagged with the controller's external identifier.
//!
//! Collectors are invoked synchronously while the controller holds its state
//! lock. An implementation must return promptly and must not call back into
//! the controller that is reporting to it: `status()`, `stop()` and friends
//! would wait on the lock that is already held and deadlock.

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::status::Status;

/// Receiver of controller status transitions
pub trait StatusCollector: Send + Sync {
    /// Record that the controller identified by `external_id` entered `status`
    fn record_status(&self, external_id: &str, status: Status);
}

impl<F> StatusCollector for F
where
    F: Fn(&str, Status) + Send + Sync,
{
    fn record_status(&self, external_id: &str, status: Status) {
        self(external_id, status)
    }
}

/// One reported transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub external_id: String,
    pub status: Status,
}

/// Collector that keeps every transition in memory, in report order
#[derive(Default)]
pub struct MemoryCollector {
    events: Mutex<Vec<StatusEvent>>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded transitions
    pub fn history(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    /// Recorded statuses for one external identifier
    pub fn history_for(&self, external_id: &str) -> Vec<Status> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.external_id == external_id)
            .map(|event| event.status)
            .collect()
    }

    /// Most recent status for one external identifier
    pub fn latest(&self, external_id: &str) -> Option<Status> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|event| event.external_id == external_id)
            .map(|event| event.status)
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl fmt::Debug for MemoryCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCollector")
            .field("events", &self.events.lock().len())
            .finish()
    }
}

impl StatusCollector for MemoryCollector {
    fn record_status(&self, external_id: &str, status: Status) {
        self.events.lock().push(StatusEvent {
            external_id: external_id.to_string(),
            status,
        });
    }
}

/// Collector that forwards transitions into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelCollector {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelCollector {
    /// Create the collector and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusCollector for ChannelCollector {
    fn record_status(&self, external_id: &str, status: Status) {
        // Receiver gone means nobody is aggregating anymore.
        let _ = self.tx.send(StatusEvent {
            external_id: external_id.to_string(),
            status,
        });
    }
}
