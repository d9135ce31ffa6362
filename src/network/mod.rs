/// Network layer: transport and MUD wire protocols
///
/// - TCP client with async I/O and optional TLS
/// - Dispatch queue between the socket reader and the decoder
/// - Telnet framing and option negotiation
/// - MCCP (zlib) stream decompression

pub mod decoder;
pub mod dispatch;
pub mod mccp;
pub mod tcp;
pub mod telnet;
pub mod tls;

// Re-export commonly used types
pub use decoder::{Decoded, StreamDecoder};
pub use dispatch::{ChunkHandler, DispatchQueue};
pub use mccp::{CompressionState, CompressionStats, MccpHandler};
pub use tcp::{MudStream, ReadEnd, WriteHandle};
pub use telnet::{Framer, FramerState, Responder};
