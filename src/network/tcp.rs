/// TCP transport for MUD connections
///
/// Opens the socket (optionally wrapped in TLS) and runs the two halves of a
/// live connection:
/// - the reader loop: one outstanding read at a time into a fixed buffer,
///   each chunk copied out and handed to the dispatch queue
/// - the writer loop: drains queued outbound bytes in order

use crate::config::ConnectionConfig;
use crate::error::{MushError, Result};
use crate::network::dispatch::DispatchQueue;
use crate::network::telnet::Responder;
use crate::network::tls;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Plain or TLS stream
pub enum MudStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl MudStream {
    /// Split into independently owned read and write halves
    pub fn into_split(self) -> (BoxedReader, BoxedWriter) {
        match self {
            MudStream::Plain(stream) => {
                let (reader, writer) = stream.into_split();
                (Box::new(reader), Box::new(writer))
            }
            MudStream::Tls(stream) => {
                let (reader, writer) = tokio::io::split(*stream);
                (Box::new(reader), Box::new(writer))
            }
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, MudStream::Tls(_))
    }
}

/// Connect to the configured server
///
/// # Errors
/// - `MushError::ConnectionFailed`: DNS resolution failed or connection refused
/// - `MushError::ConnectionTimeout`: Connect (or TLS handshake) exceeded the timeout
/// - `MushError::TlsError`: TLS handshake failed
pub async fn open_stream(config: &ConnectionConfig) -> Result<MudStream> {
    let addr = config.address();
    info!(
        "Connecting to {} (timeout: {}s, TLS: {})",
        addr, config.timeout_secs, config.use_tls
    );

    let tcp_stream = match timeout(config.timeout(), TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => {
            debug!("TCP connection established to {}", addr);
            stream
        }
        Ok(Err(e)) => {
            error!("Connection failed to {}: {}", addr, e);
            return Err(MushError::ConnectionFailed {
                host: config.host.clone(),
                port: config.port,
                source: e,
            });
        }
        Err(_) => {
            error!("Connection timeout after {}s to {}", config.timeout_secs, addr);
            return Err(MushError::ConnectionTimeout {
                timeout_secs: config.timeout_secs,
            });
        }
    };

    if let Err(e) = tcp_stream.set_nodelay(config.nodelay) {
        warn!("Failed to set TCP_NODELAY on {}: {}", addr, e);
    }

    if config.use_tls {
        let tls_stream = tls::handshake(&config.host, tcp_stream, config.timeout()).await?;
        Ok(MudStream::Tls(Box::new(tls_stream)))
    } else {
        info!("Plain TCP connection established to {}", addr);
        Ok(MudStream::Plain(tcp_stream))
    }
}

/// Why the reader loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// Zero-byte read
    PeerClosed,
    /// Cancelled, or the dispatch worker went away
    Stopped,
}

/// Read until the peer closes, the token fires or the socket faults
///
/// The buffer is reused for every read; each chunk crossing into the queue
/// is a private copy.
///
/// # Errors
/// - `MushError::IoError`: the socket read failed
pub async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    buffer_size: usize,
    queue: DispatchQueue,
    token: CancellationToken,
) -> Result<ReadEnd> {
    let mut buffer = vec![0u8; buffer_size];

    loop {
        let n = select! {
            biased;
            _ = token.cancelled() => return Ok(ReadEnd::Stopped),
            read = reader.read(&mut buffer) => read?,
        };

        if n == 0 {
            info!("Connection closed by remote host");
            return Ok(ReadEnd::PeerClosed);
        }

        debug!("Received {} bytes", n);
        if !queue.enqueue(buffer[..n].to_vec()).await {
            debug!("Dispatch queue gone, stopping reader");
            return Ok(ReadEnd::Stopped);
        }
    }
}

/// Cloneable handle onto the writer loop's queue
///
/// Sending never blocks and never fails towards the caller; bytes queued
/// after the writer has stopped are dropped.
#[derive(Debug, Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl WriteHandle {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { tx }
    }

    /// Queue already-escaped bytes for transmission
    pub fn send(&self, data: Vec<u8>) {
        if self.tx.send(data).is_err() {
            debug!("Writer stopped, dropping outbound bytes");
        }
    }
}

impl Responder for WriteHandle {
    fn respond(&mut self, bytes: &[u8]) {
        self.send(bytes.to_vec());
    }
}

/// Write queued bytes in order until the queue closes or the token fires
///
/// # Errors
/// - `MushError::IoError`: the socket write failed
pub async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        let data = select! {
            biased;
            _ = token.cancelled() => break,
            next = rx.recv() => match next {
                Some(data) => data,
                None => break,
            },
        };

        debug!("Sending {} bytes", data.len());
        select! {
            biased;
            _ = token.cancelled() => break,
            written = async {
                writer.write_all(&data).await?;
                writer.flush().await
            } => written?,
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Error during graceful shutdown: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as MushResult;
    use crate::network::dispatch::ChunkHandler;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    /// Helper: Start a mock MUD server for testing
    async fn start_mock_server() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<Vec<u8>>>>);

    impl ChunkHandler for Collect {
        fn handle_chunk(&mut self, chunk: Vec<u8>) -> MushResult<()> {
            self.0.lock().unwrap().push(chunk);
            Ok(())
        }
        fn handle_end(&mut self) {}
        fn handle_failure(&mut self, _error: MushError) {}
    }

    #[tokio::test]
    async fn test_open_plain_stream() {
        let (listener, port) = start_mock_server().await;
        tokio::spawn(async move {
            let _accept = listener.accept().await;
        });

        let config = ConnectionConfig::new("127.0.0.1", port).unwrap();
        let stream = open_stream(&config).await.expect("Should connect");

        assert!(!stream.is_tls());
    }

    #[tokio::test]
    async fn test_open_refused() {
        let (listener, port) = start_mock_server().await;
        drop(listener);

        let config = ConnectionConfig::new("127.0.0.1", port).unwrap();
        let result = open_stream(&config).await;

        assert!(matches!(result, Err(MushError::ConnectionFailed { .. })));
    }

    #[tokio::test]
    async fn test_invalid_hostname() {
        let config = ConnectionConfig::builder("invalid.nonexistent.host", 4000)
            .timeout_secs(5)
            .build()
            .unwrap();
        let result = open_stream(&config).await;

        assert!(result.is_err(), "Should fail on unresolvable hostname");
    }

    #[tokio::test]
    async fn test_read_loop_copies_chunks_until_eof() {
        let reader = tokio_test::io::Builder::new()
            .read(b"Welcome ")
            .read(b"to the MUD!\n")
            .build();
        let collect = Collect::default();
        let chunks = collect.0.clone();
        let token = CancellationToken::new();

        let (queue, worker) = DispatchQueue::spawn(4, token.clone(), collect);
        let end = read_loop(reader, 64, queue, token).await.unwrap();
        worker.await.unwrap();

        assert_eq!(end, ReadEnd::PeerClosed);
        assert_eq!(
            *chunks.lock().unwrap(),
            vec![b"Welcome ".to_vec(), b"to the MUD!\n".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_read_loop_respects_buffer_size() {
        let reader = tokio_test::io::Builder::new().read(b"0123456789").build();
        let collect = Collect::default();
        let chunks = collect.0.clone();
        let token = CancellationToken::new();

        let (queue, worker) = DispatchQueue::spawn(4, token.clone(), collect);
        read_loop(reader, 4, queue, token).await.unwrap();
        worker.await.unwrap();

        assert_eq!(
            *chunks.lock().unwrap(),
            vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_read_loop_reports_socket_fault() {
        let reader = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let token = CancellationToken::new();
        let (queue, _worker) = DispatchQueue::spawn(4, token.clone(), Collect::default());

        let result = read_loop(reader, 64, queue, token).await;

        assert!(matches!(result, Err(MushError::IoError(_))));
    }

    #[tokio::test]
    async fn test_read_loop_stops_on_cancel() {
        let (listener, port) = start_mock_server().await;
        tokio::spawn(async move {
            if let Ok((_socket, _)) = listener.accept().await {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        });

        let config = ConnectionConfig::new("127.0.0.1", port).unwrap();
        let (reader, _writer) = open_stream(&config).await.unwrap().into_split();
        let token = CancellationToken::new();
        let (queue, _worker) = DispatchQueue::spawn(4, token.clone(), Collect::default());

        let reading = tokio::spawn(read_loop(reader, 64, queue, token.clone()));
        token.cancel();

        assert_eq!(reading.await.unwrap().unwrap(), ReadEnd::Stopped);
    }

    #[tokio::test]
    async fn test_write_loop_preserves_order() {
        let writer = tokio_test::io::Builder::new()
            .write(b"north\r\n")
            .write(&[0xFF, 0xFD, 0x55])
            .write(b"look\r\n")
            .build();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = WriteHandle::new(tx);

        handle.send(b"north\r\n".to_vec());
        handle.respond(&[0xFF, 0xFD, 0x55]);
        handle.send(b"look\r\n".to_vec());
        drop(handle);

        write_loop(writer, rx, CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_loop_reports_socket_fault() {
        let writer = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"))
            .build();
        let (tx, rx) = mpsc::unbounded_channel();
        WriteHandle::new(tx).send(b"say hi\r\n".to_vec());

        let result = write_loop(writer, rx, CancellationToken::new()).await;

        assert!(matches!(result, Err(MushError::IoError(_))));
    }

    #[test]
    fn test_send_after_writer_stopped_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        WriteHandle::new(tx).send(b"ignored".to_vec());
    }
}
