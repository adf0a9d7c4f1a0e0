//! Session event system.
//!
//! Every lifecycle transition and every accepted reading is also published
//! as a [`SessionEvent`] on a broadcast channel, for loggers and UIs that
//! prefer a single ordered feed over polling the `watch` receivers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use cartlink_types::{ChannelKind, ChannelReading, DeviceDescriptor};

/// Events emitted by discovery and the connection session.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// A new device was added to the registry.
    Discovered { device: DeviceDescriptor },
    /// A connect attempt started.
    Connecting { device: DeviceDescriptor },
    /// The link is up and monitors are running.
    Connected {
        device_id: String,
        /// Channels whose subscription failed.
        degraded: Vec<ChannelKind>,
    },
    /// The connect timer won the race.
    ConnectTimedOut { device_id: String, timeout_ms: u64 },
    /// The connect sequence failed before the timer fired.
    ConnectFailed { device_id: String, reason: String },
    /// One channel could not be subscribed.
    SubscriptionFailed {
        device_id: String,
        channel: ChannelKind,
        reason: String,
    },
    /// A reading was accepted.
    Reading { reading: ChannelReading },
    /// The session was torn down.
    Disconnected {
        device_id: String,
        /// Whether the remote side acknowledged the teardown in time.
        acknowledged: bool,
    },
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Fan-out of session events to any number of receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
