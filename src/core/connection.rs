/// Connection management with event generation
///
/// Composes the transport, dispatch queue, compression negotiator and Telnet
/// framer into one connection and publishes everything that happens to it on
/// the `EventBus`.
///
/// Each `connect` starts a session of three tasks sharing one cancellation
/// token: the socket reader, the socket writer and the dispatch worker that
/// owns the decoder. `dispose` cancels the token and joins all three, so no
/// event is published once it returns.

use crate::config::ConnectionConfig;
use crate::core::{EventBus, NetEvent};
use crate::error::{MushError, Result};
use crate::network::decoder::StreamDecoder;
use crate::network::dispatch::{ChunkHandler, DispatchQueue};
use crate::network::mccp::CompressionStats;
use crate::network::tcp::{self, ReadEnd, WriteHandle};
use crate::network::telnet::escape;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// State shared between the connection handle and its session tasks
struct Shared {
    connection_id: Uuid,
    event_bus: Arc<EventBus>,
    state: Arc<AtomicU8>,
    token: CancellationToken,
    stats: Arc<Mutex<CompressionStats>>,
}

impl Shared {
    fn is_live(&self) -> bool {
        !self.token.is_cancelled()
            && ConnectionState::from_u8(self.state.load(Ordering::Acquire)) == ConnectionState::Connected
    }

    /// Claim the teardown; only the first of dispose / peer close / fault wins
    fn claim_teardown(&self) -> bool {
        let claimed = self
            .state
            .compare_exchange(
                ConnectionState::Connected as u8,
                ConnectionState::Disconnected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if claimed {
            self.token.cancel();
        }
        claimed
    }

    fn fail(&self, error: &MushError) {
        if self.claim_teardown() {
            error!("Connection {} failed: {}", self.connection_id, error);
            self.event_bus.publish(NetEvent::NetworkError {
                connection_id: self.connection_id,
                error: error.to_string(),
            });
        } else {
            debug!("Ignoring late error after teardown: {}", error);
        }
    }

    fn peer_closed(&self) {
        if self.claim_teardown() {
            info!("Connection {} closed by remote host", self.connection_id);
            self.event_bus.publish(NetEvent::Disconnected {
                connection_id: self.connection_id,
                reason: "Connection closed by remote host".to_string(),
            });
        }
    }
}

/// Dispatch worker side: decodes chunks and publishes content
struct SessionWorker {
    shared: Arc<Shared>,
    decoder: StreamDecoder,
    writer: WriteHandle,
}

impl ChunkHandler for SessionWorker {
    fn handle_chunk(&mut self, chunk: Vec<u8>) -> Result<()> {
        if !self.shared.is_live() {
            return Ok(());
        }

        let decoded = self.decoder.decode(&chunk, &mut self.writer)?;

        if let Ok(mut stats) = self.shared.stats.lock() {
            *stats = self.decoder.stats();
        }

        if !decoded.is_empty() && self.shared.is_live() {
            self.shared.event_bus.publish(NetEvent::DataReceived {
                connection_id: self.shared.connection_id,
                data: decoded.data,
                go_ahead: decoded.go_ahead,
            });
        }
        Ok(())
    }

    fn handle_end(&mut self) {
        self.shared.peer_closed();
    }

    fn handle_failure(&mut self, error: MushError) {
        self.shared.fail(&error);
    }
}

/// Handles of one connect() .. dispose() span
struct Session {
    token: CancellationToken,
    writer: WriteHandle,
    tasks: Vec<JoinHandle<()>>,
}

/// A MUD server connection
pub struct Connection {
    connection_id: Uuid,
    config: ConnectionConfig,
    event_bus: Arc<EventBus>,
    state: Arc<AtomicU8>,
    stats: Arc<Mutex<CompressionStats>>,
    session: Option<Session>,
}

impl Connection {
    /// Create a new, not yet connected, connection
    pub fn new(config: ConnectionConfig, event_bus: Arc<EventBus>) -> Self {
        let connection_id = Uuid::new_v4();
        debug!("Creating connection {} for {}", connection_id, config.address());

        Self {
            connection_id,
            config,
            event_bus,
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)),
            stats: Arc::new(Mutex::new(CompressionStats::default())),
            session: None,
        }
    }

    /// Connect to the MUD server
    ///
    /// Publishes `Connected` on success and starts the receive loop.
    /// Publishes `NetworkError` on failure and returns the error.
    pub async fn connect(&mut self) -> Result<()> {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Connected => {
                warn!("Already connected to {}", self.config.address());
                return Ok(());
            }
            ConnectionState::Disconnected | ConnectionState::Disconnecting => {}
        }

        // Reap a session that ended on its own (peer close or fault)
        self.dispose().await;
        self.set_state(ConnectionState::Connecting);

        let stream = match tcp::open_stream(&self.config).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Connection failed for {}: {}", self.config.address(), e);
                self.set_state(ConnectionState::Disconnected);
                self.event_bus.publish(NetEvent::NetworkError {
                    connection_id: self.connection_id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let (reader, writer) = stream.into_split();
        let token = CancellationToken::new();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let write_handle = WriteHandle::new(write_tx);

        if let Ok(mut stats) = self.stats.lock() {
            *stats = CompressionStats::default();
        }

        let shared = Arc::new(Shared {
            connection_id: self.connection_id,
            event_bus: self.event_bus.clone(),
            state: self.state.clone(),
            token: token.clone(),
            stats: self.stats.clone(),
        });

        self.set_state(ConnectionState::Connected);
        info!("Successfully connected to {}", self.config.address());
        self.event_bus.publish(NetEvent::Connected {
            connection_id: self.connection_id,
            host: self.config.host.clone(),
            port: self.config.port,
        });

        let writer_task = {
            let shared = shared.clone();
            let token = token.clone();
            tokio::spawn(async move {
                if let Err(e) = tcp::write_loop(writer, write_rx, token).await {
                    shared.fail(&e);
                }
            })
        };

        let worker = SessionWorker {
            shared: shared.clone(),
            decoder: StreamDecoder::new(self.config.max_inflate_per_chunk),
            writer: write_handle.clone(),
        };
        let (queue, worker_task) = DispatchQueue::spawn(self.config.queue_capacity, token.clone(), worker);

        let reader_task = {
            let token = token.clone();
            let buffer_size = self.config.read_buffer_size;
            tokio::spawn(async move {
                match tcp::read_loop(reader, buffer_size, queue, token).await {
                    // The queue handle was dropped with the loop; the worker
                    // drains what is left and reports the close.
                    Ok(ReadEnd::PeerClosed) => {}
                    Ok(ReadEnd::Stopped) => debug!("Reader stopped"),
                    Err(e) => shared.fail(&e),
                }
            })
        };

        self.session = Some(Session {
            token,
            writer: write_handle,
            tasks: vec![reader_task, writer_task, worker_task],
        });

        Ok(())
    }

    /// Send bytes to the MUD server
    ///
    /// Literal 0xFF bytes are escaped. Fire-and-forget: write failures are
    /// reported as `NetworkError` events, and sending while not connected is
    /// a silent no-op.
    pub fn send(&self, data: &[u8]) {
        match (&self.session, self.state()) {
            (Some(session), ConnectionState::Connected) => session.writer.send(escape(data)),
            _ => debug!("Dropping {} bytes: not connected", data.len()),
        }
    }

    /// Send a line of text terminated with CRLF
    pub fn send_line(&self, line: &str) {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.send(&data);
    }

    /// Tear the connection down
    ///
    /// Idempotent. Stops the reader, writer and worker and waits for them;
    /// publishes nothing.
    pub async fn dispose(&mut self) {
        let Some(session) = self.session.take() else {
            self.set_state(ConnectionState::Disconnected);
            return;
        };

        if self
            .state
            .compare_exchange(
                ConnectionState::Connected as u8,
                ConnectionState::Disconnecting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            info!("Disconnecting from {}", self.config.address());
        }

        session.token.cancel();
        for task in session.tasks {
            if let Err(e) = task.await {
                warn!("Connection task ended abnormally: {}", e);
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("Connection {} disposed", self.connection_id);
    }

    /// Alias for `dispose`
    pub async fn disconnect(&mut self) {
        self.dispose().await;
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Get MCCP compression statistics for the current session
    pub fn compression_stats(&self) -> CompressionStats {
        match self.stats.lock() {
            Ok(stats) => *stats,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.token.cancel();
        }
    }
}
