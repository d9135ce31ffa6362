/// TLS support for secure MUD connections
///
/// Builds a rustls connector backed by the system certificate store and
/// wraps an established TCP stream.

use crate::error::{MushError, Result};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::{debug, error, info, warn};

/// Create TLS connector with system certificates
pub fn create_tls_connector() -> Result<TlsConnector> {
    let mut root_store = rustls::RootCertStore::empty();

    let cert_result = rustls_native_certs::load_native_certs();
    for cert in cert_result.certs {
        root_store
            .add(cert)
            .map_err(|e| MushError::TlsError(format!("Failed to add certificate: {:?}", e)))?;
    }

    // Log any errors encountered while loading certs (but don't fail)
    for err in cert_result.errors {
        warn!("Certificate loading error: {}", err);
    }
    debug!("Loaded {} root certificates", root_store.len());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| MushError::TlsError(format!("Unsupported protocol versions: {}", e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Perform the TLS handshake over an established TCP stream
///
/// # Errors
/// - `MushError::TlsError`: Invalid server name or handshake failure
/// - `MushError::ConnectionTimeout`: Handshake exceeded `timeout_duration`
pub async fn handshake(
    host: &str,
    tcp_stream: TcpStream,
    timeout_duration: Duration,
) -> Result<TlsStream<TcpStream>> {
    let connector = create_tls_connector()?;

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| MushError::TlsError(format!("Invalid hostname for TLS: {}", e)))?;

    match timeout(timeout_duration, connector.connect(server_name, tcp_stream)).await {
        Ok(Ok(tls_stream)) => {
            info!("TLS handshake successful with {}", host);
            Ok(tls_stream)
        }
        Ok(Err(e)) => {
            error!("TLS handshake failed with {}: {}", host, e);
            Err(MushError::TlsError(format!("TLS handshake failed: {}", e)))
        }
        Err(_) => {
            error!("TLS handshake timeout after {}s to {}", timeout_duration.as_secs(), host);
            Err(MushError::ConnectionTimeout {
                timeout_secs: timeout_duration.as_secs(),
            })
        }
    }
}
