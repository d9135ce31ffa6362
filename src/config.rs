/// Connection configuration
///
/// Describes where to connect and how large the connection's buffers and
/// queues may grow. Every constructor validates before handing out a value.

use crate::error::{MushError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_READ_BUFFER_SIZE: usize = 8192;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_MAX_INFLATE_PER_CHUNK: usize = 4 * 1024 * 1024;

/// Settings for a single MUD server connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Host address
    pub host: String,

    /// Port number
    pub port: u16,

    /// Connect (and TLS handshake) timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Wrap the socket in TLS
    #[serde(default)]
    pub use_tls: bool,

    /// Capacity of the fixed receive buffer; a single read never yields more
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Number of received chunks that may wait for the decode worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Hard limit on decompressed bytes produced from one inbound chunk
    #[serde(default = "default_max_inflate_per_chunk")]
    pub max_inflate_per_chunk: usize,

    /// Disable Nagle's algorithm on the socket
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_max_inflate_per_chunk() -> usize {
    DEFAULT_MAX_INFLATE_PER_CHUNK
}

fn default_nodelay() -> bool {
    true
}

impl ConnectionConfig {
    /// Create a validated configuration with default buffer sizes
    ///
    /// # Errors
    /// - `MushError::ValidationError`: Host is empty/whitespace only
    /// - `MushError::InvalidHostname`: Host contains consecutive, leading or trailing dots
    /// - `MushError::InvalidPort`: Port is 0
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::builder(host, port).build()
    }

    /// Create a builder for custom configuration
    ///
    /// # Examples
    /// ```ignore
    /// let config = ConnectionConfig::builder("mud.example.com", 4000)
    ///     .timeout_secs(10)
    ///     .use_tls(true)
    ///     .queue_capacity(16)
    ///     .build()?;
    /// ```
    pub fn builder(host: impl Into<String>, port: u16) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new(host, port)
    }

    /// Parse a JSON document and validate the result
    pub fn from_json(json: &str) -> Result<Self> {
        debug!("Parsing connection config ({} bytes)", json.len());
        let config: ConnectionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// `host:port` as passed to the resolver
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate every field
    ///
    /// # Errors
    /// Returns the first validation error encountered.
    pub fn validate(&self) -> Result<()> {
        let trimmed_host = self.host.trim();
        if trimmed_host.is_empty() {
            warn!("Validation failed: empty host");
            return Err(MushError::ValidationError {
                field: "host".to_string(),
                reason: "Host cannot be empty".to_string(),
            });
        }

        // Basic hostname validation - reject obvious invalid patterns
        if trimmed_host.contains("..") || trimmed_host.starts_with('.') || trimmed_host.ends_with('.') {
            warn!("Validation failed: invalid hostname pattern '{}'", self.host);
            return Err(MushError::InvalidHostname(self.host.clone()));
        }

        if self.port == 0 {
            warn!("Validation failed: port cannot be 0");
            return Err(MushError::InvalidPort(self.port));
        }

        for (field, value) in [
            ("read_buffer_size", self.read_buffer_size),
            ("queue_capacity", self.queue_capacity),
            ("max_inflate_per_chunk", self.max_inflate_per_chunk),
        ] {
            if value == 0 {
                warn!("Validation failed: {} is zero", field);
                return Err(MushError::ValidationError {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        debug!("Validation passed for {}", self.address());
        Ok(())
    }
}

/// Builder for `ConnectionConfig`
#[derive(Debug)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            config: ConnectionConfig {
                host: host.into(),
                port,
                timeout_secs: DEFAULT_TIMEOUT_SECS,
                use_tls: false,
                read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
                max_inflate_per_chunk: DEFAULT_MAX_INFLATE_PER_CHUNK,
                nodelay: true,
            },
        }
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn use_tls(mut self, enabled: bool) -> Self {
        self.config.use_tls = enabled;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn max_inflate_per_chunk(mut self, limit: usize) -> Self {
        self.config.max_inflate_per_chunk = limit;
        self
    }

    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    pub fn build(self) -> Result<ConnectionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_config_with_defaults() {
        let config = ConnectionConfig::new("mud.example.com", 4000).unwrap();

        assert_eq!(config.host, "mud.example.com");
        assert_eq!(config.port, 4000);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.read_buffer_size, 8192);
        assert_eq!(config.queue_capacity, 64);
        assert!(!config.use_tls);
        assert!(config.nodelay);
        assert_eq!(config.address(), "mud.example.com:4000");
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_empty_host() {
        let result = ConnectionConfig::new("   ", 4000);
        assert!(
            matches!(result, Err(MushError::ValidationError { .. })),
            "Should reject whitespace-only host"
        );
    }

    #[test]
    fn test_validate_invalid_hostname() {
        for host in ["invalid..host", ".leading", "trailing."] {
            let result = ConnectionConfig::new(host, 4000);
            assert!(
                matches!(result, Err(MushError::InvalidHostname(_))),
                "Should reject '{}'",
                host
            );
        }
    }

    #[test]
    fn test_validate_port_zero() {
        let result = ConnectionConfig::new("mud.example.com", 0);
        assert!(matches!(result, Err(MushError::InvalidPort(0))));
    }

    #[test]
    fn test_validate_zero_sizes() {
        let result = ConnectionConfig::builder("localhost", 4000)
            .queue_capacity(0)
            .build();

        match result {
            Err(MushError::ValidationError { field, .. }) => assert_eq!(field, "queue_capacity"),
            other => panic!("Expected ValidationError, got {:?}", other),
        }

        assert!(ConnectionConfig::builder("localhost", 4000)
            .read_buffer_size(0)
            .build()
            .is_err());
        assert!(ConnectionConfig::builder("localhost", 4000)
            .max_inflate_per_chunk(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ConnectionConfig::builder("192.168.1.100", 23)
            .timeout_secs(5)
            .use_tls(true)
            .read_buffer_size(1024)
            .queue_capacity(8)
            .max_inflate_per_chunk(65536)
            .nodelay(false)
            .build()
            .unwrap();

        assert_eq!(config.timeout_secs, 5);
        assert!(config.use_tls);
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.max_inflate_per_chunk, 65536);
        assert!(!config.nodelay);
    }

    #[test]
    fn test_json_defaults_fill_missing_fields() {
        let config = ConnectionConfig::from_json(r#"{"host": "localhost", "port": 4000}"#).unwrap();

        assert_eq!(config, ConnectionConfig::new("localhost", 4000).unwrap());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = ConnectionConfig::builder("mud.example.com", 4000)
            .use_tls(true)
            .queue_capacity(3)
            .build()
            .unwrap();

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(ConnectionConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_json_is_validated() {
        let result = ConnectionConfig::from_json(r#"{"host": "localhost", "port": 0}"#);
        assert!(matches!(result, Err(MushError::InvalidPort(0))));

        let result = ConnectionConfig::from_json("not json");
        assert!(matches!(result, Err(MushError::JsonError(_))));
    }
}
