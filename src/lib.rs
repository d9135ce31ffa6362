/// mushlink - connectivity layer for MUD clients
///
/// Opens a TCP (optionally TLS) connection to a MUD server, strips and
/// answers Telnet control sequences, transparently inflates MCCP compressed
/// streams and publishes decoded content as events.

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod network;

// Re-export commonly used types
pub use crate::config::{ConnectionConfig, ConnectionConfigBuilder};
pub use crate::core::{Connection, ConnectionState, EventBus, NetEvent};
pub use crate::error::{MushError, Result};
pub use crate::network::{CompressionState, CompressionStats};

/// Initialize logging infrastructure
///
/// Honours `RUST_LOG`, defaulting to `info`. Safe to call more than once;
/// only the first call installs the subscriber.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .is_ok()
    {
        tracing::info!("mushlink {} starting...", env!("CARGO_PKG_VERSION"));
    }
}
