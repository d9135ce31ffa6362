/// MCCP (Mud Client Compression Protocol) Support
///
/// Server-to-client compression only. Once the start marker has been seen,
/// every raw byte belongs to one continuous zlib stream; the inflater keeps
/// its state across chunks until that stream ends. Each later start marker
/// begins a new stream with a fresh inflater.
///
/// References:
/// - https://tintin.mudhalla.net/protocols/mccp/
/// - https://www.gammon.com.au/mccp/protocol.html

use crate::error::{MushError, Result};
use flate2::{Decompress, FlushDecompress, Status};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Output is grown in steps of this size while inflating
const INFLATE_STEP: usize = 16 * 1024;

/// MCCP compression state
///
/// Moves forward, except that a server restarting compression after ending
/// a stream takes `Finished` back to `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum CompressionState {
    /// No compression negotiated
    #[default]
    None,
    /// Server offered compression and we agreed, waiting for the start marker
    Enabled,
    /// Inbound bytes are a zlib stream
    InProgress,
    /// The server ended the zlib stream; bytes are plain again until the
    /// next start marker
    Finished,
}

/// Result of feeding raw bytes to the inflater
#[derive(Debug, Default)]
pub struct Inflated {
    pub data: Vec<u8>,
    /// Raw bytes consumed; short of the input only when the stream ended
    pub consumed: usize,
}

/// MCCP handler for decompression
pub struct MccpHandler {
    state: CompressionState,
    decompressor: Option<Decompress>,
    max_inflate_per_chunk: usize,
    compressed_bytes: u64,
    inflated_bytes: u64,
}

impl MccpHandler {
    /// Create a new MCCP handler
    pub fn new(max_inflate_per_chunk: usize) -> Self {
        Self {
            state: CompressionState::None,
            decompressor: None,
            max_inflate_per_chunk,
            compressed_bytes: 0,
            inflated_bytes: 0,
        }
    }

    pub fn state(&self) -> CompressionState {
        self.state
    }

    /// Server offered compression and the framer already replied `IAC DO`
    pub fn handle_will(&mut self) {
        if self.state == CompressionState::None {
            info!("Server offered MCCP compression");
            self.state = CompressionState::Enabled;
        }
    }

    /// Start marker seen; returns whether the stream is now compressed.
    ///
    /// A marker without a prior offer, or one inside a live compressed
    /// stream, is ignored.
    pub fn start(&mut self) -> bool {
        match self.state {
            CompressionState::Enabled => info!("MCCP compression starting"),
            CompressionState::Finished => info!("MCCP compression restarting"),
            CompressionState::None | CompressionState::InProgress => {
                warn!("Ignoring MCCP start marker in state {:?}", self.state);
                return false;
            }
        }

        self.state = CompressionState::InProgress;
        self.decompressor = Some(Decompress::new(true));
        true
    }

    /// Check if server-to-client compression is active
    pub fn is_receiving_compressed(&self) -> bool {
        self.state == CompressionState::InProgress
    }

    /// Inflate raw bytes from the compressed substream
    ///
    /// # Errors
    /// - `MushError::CompressionError`: corrupt stream or compression not active
    /// - `MushError::InflateLimitExceeded`: this chunk inflated past the configured limit
    pub fn decompress(&mut self, compressed_data: &[u8]) -> Result<Inflated> {
        if self.state != CompressionState::InProgress {
            return Err(MushError::CompressionError(
                "Decompression requested while compression is not active".to_string(),
            ));
        }

        let decompressor = self
            .decompressor
            .as_mut()
            .ok_or_else(|| MushError::CompressionError("No decompressor initialized".to_string()))?;

        let mut output = Vec::with_capacity(INFLATE_STEP.min(self.max_inflate_per_chunk));
        let mut consumed = 0;
        let mut finished = false;

        loop {
            if output.len() == output.capacity() {
                output.reserve(INFLATE_STEP);
            }

            let before_in = decompressor.total_in();
            let before_out = output.len();
            let status = decompressor
                .decompress_vec(&compressed_data[consumed..], &mut output, FlushDecompress::None)
                .map_err(|e| MushError::CompressionError(format!("Decompression failed: {}", e)))?;
            consumed += (decompressor.total_in() - before_in) as usize;

            if output.len() > self.max_inflate_per_chunk {
                return Err(MushError::InflateLimitExceeded {
                    limit: self.max_inflate_per_chunk,
                });
            }

            if status == Status::StreamEnd {
                finished = true;
                break;
            }

            // A full buffer means zlib may hold more output; otherwise it
            // wants more input.
            if output.len() < output.capacity() {
                if consumed == compressed_data.len() {
                    break;
                }
                let progressed = decompressor.total_in() != before_in || output.len() != before_out;
                if !progressed {
                    return Err(MushError::CompressionError(
                        "Decompressor made no progress".to_string(),
                    ));
                }
            }
        }

        self.compressed_bytes += consumed as u64;
        self.inflated_bytes += output.len() as u64;

        if finished {
            info!("MCCP compression ended by server");
            self.state = CompressionState::Finished;
            self.decompressor = None;
        }

        if !output.is_empty() {
            debug!("Decompressed {} bytes to {} bytes", consumed, output.len());
        }

        Ok(Inflated { data: output, consumed })
    }

    /// Get compression statistics
    pub fn get_stats(&self) -> CompressionStats {
        CompressionStats {
            state: self.state,
            compressed_bytes: self.compressed_bytes,
            inflated_bytes: self.inflated_bytes,
        }
    }
}

/// Compression statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub state: CompressionState,
    pub compressed_bytes: u64,
    pub inflated_bytes: u64,
}
