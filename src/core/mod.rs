/// Core connection logic
///
/// This module ties the network pieces into a single connection and
/// defines the events it publishes.

pub mod connection;
pub mod events;

// Re-export commonly used types
pub use connection::{Connection, ConnectionState};
pub use events::{EventBus, NetEvent};
