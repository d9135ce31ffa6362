/// Error types for the MUSHlink connectivity core
///
/// Every fallible operation returns `Result<T>`. Errors that happen inside
/// the connection's background tasks never escape as values; they are
/// converted into `NetEvent::NetworkError` at the task boundary.

use thiserror::Error;

/// Main error type for MUSHlink operations
#[derive(Error, Debug)]
pub enum MushError {
    // ========================================
    // Connection Errors
    // ========================================

    #[error("Failed to connect to {host}:{port} - {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection timeout after {timeout_secs} seconds")]
    ConnectionTimeout {
        timeout_secs: u64,
    },

    #[error("TLS handshake failed: {0}")]
    TlsError(String),

    // ========================================
    // Decompression Errors
    // ========================================

    #[error("Compression error: {0}")]
    CompressionError(String),

    #[error("Decompressed output exceeded {limit} bytes for a single chunk")]
    InflateLimitExceeded {
        limit: usize,
    },

    // ========================================
    // Validation Errors
    // ========================================

    #[error("Invalid input for field '{field}': {reason}")]
    ValidationError {
        field: String,
        reason: String,
    },

    #[error("Invalid hostname: {0}")]
    InvalidHostname(String),

    #[error("Invalid port: {0} (must be 1-65535)")]
    InvalidPort(u16),

    // ========================================
    // IO / Serialization Errors
    // ========================================

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl MushError {
    /// Whether this error must tear the connection down.
    ///
    /// Socket faults and decompression failures leave the stream in an
    /// unknown state, so there is nothing to resync against.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MushError::ConnectionFailed { .. }
                | MushError::ConnectionTimeout { .. }
                | MushError::TlsError(_)
                | MushError::CompressionError(_)
                | MushError::InflateLimitExceeded { .. }
                | MushError::IoError(_)
        )
    }
}

/// Result type alias for MUSHlink operations
pub type Result<T> = std::result::Result<T, MushError>;
