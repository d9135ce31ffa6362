/// Event system for connection notifications
///
/// Connections publish what happens on the wire; collaborators (display,
/// triggers, loggers) subscribe:
/// - `Connected` / `Disconnected` for lifecycle changes
/// - `DataReceived` for decoded content
/// - `NetworkError` for fatal socket or decompression faults

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Default number of events buffered per subscriber
const EVENT_BUFFER_SIZE: usize = 1024;

/// Events published by a connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetEvent {
    /// Connection established
    Connected {
        connection_id: Uuid,
        host: String,
        port: u16,
    },

    /// Peer closed the connection
    Disconnected {
        connection_id: Uuid,
        reason: String,
    },

    /// Decoded content, free of Telnet control sequences
    DataReceived {
        connection_id: Uuid,
        data: Vec<u8>,
        /// The chunk ended with `IAC GA` (end of prompt)
        go_ahead: bool,
    },

    /// Fatal connection error; the connection has been torn down
    NetworkError {
        connection_id: Uuid,
        error: String,
    },
}

impl NetEvent {
    /// Get the connection ID associated with this event
    pub fn connection_id(&self) -> Uuid {
        match self {
            NetEvent::Connected { connection_id, .. }
            | NetEvent::Disconnected { connection_id, .. }
            | NetEvent::DataReceived { connection_id, .. }
            | NetEvent::NetworkError { connection_id, .. } => *connection_id,
        }
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(self, NetEvent::NetworkError { .. })
    }

    /// Whether the connection is gone after this event
    pub fn is_terminal(&self) -> bool {
        matches!(self, NetEvent::Disconnected { .. } | NetEvent::NetworkError { .. })
    }
}

/// Event bus for pub/sub communication
pub struct EventBus {
    sender: broadcast::Sender<NetEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUFFER_SIZE)
    }

    /// Create an event bus buffering `capacity` events per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: NetEvent) {
        // broadcast::send returns error only if no receivers exist, which is ok
        if self.sender.send(event).is_err() {
            trace!("Event published with no subscribers");
        }
    }

    /// Subscribe to events
    ///
    /// Returns a receiver that will receive all future events. A receiver
    /// that falls behind by more than the bus capacity observes
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<NetEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
