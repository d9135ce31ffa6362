/// Inbound stream decoding
///
/// Routes each received chunk either straight into the Telnet framer or, once
/// MCCP has started, through the inflater first. Owned by the dispatch worker;
/// nothing else touches it while a connection is live.

use crate::error::Result;
use crate::network::mccp::{CompressionStats, MccpHandler};
use crate::network::telnet::{Framer, Responder, Scan};
use tracing::debug;

/// Content decoded from one inbound chunk
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub data: Vec<u8>,
    /// `IAC GA` closed the chunk
    pub go_ahead: bool,
}

impl Decoded {
    /// Whether there is anything worth delivering upward
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && !self.go_ahead
    }
}

/// Compression negotiator in front of the framer
pub struct StreamDecoder {
    framer: Framer,
    mccp: MccpHandler,
}

impl StreamDecoder {
    pub fn new(max_inflate_per_chunk: usize) -> Self {
        Self {
            framer: Framer::new(),
            mccp: MccpHandler::new(max_inflate_per_chunk),
        }
    }

    /// Decode one raw chunk in stream order
    ///
    /// # Errors
    /// Decompression failures; the stream cannot be resynchronised after one.
    pub fn decode(&mut self, chunk: &[u8], responder: &mut dyn Responder) -> Result<Decoded> {
        let mut decoded = Decoded::default();
        let mut raw = chunk;

        while !raw.is_empty() {
            if self.mccp.is_receiving_compressed() {
                let inflated = self.mccp.decompress(raw)?;
                raw = &raw[inflated.consumed..];
                self.frame_inflated(&inflated.data, &mut decoded, responder);
                continue;
            }

            let scan = self.framer.feed(raw, &mut decoded.data, responder);
            self.absorb(&scan, &mut decoded);
            raw = &raw[scan.consumed..];

            if scan.compress_start && self.mccp.start() {
                debug!("{} raw bytes follow the start marker in this chunk", raw.len());
            }
        }

        Ok(decoded)
    }

    pub fn stats(&self) -> CompressionStats {
        self.mccp.get_stats()
    }

    /// Decompressed bytes still carry Telnet sequences; a start marker in
    /// here cannot begin a new raw stream and is dropped.
    fn frame_inflated(&mut self, mut data: &[u8], decoded: &mut Decoded, responder: &mut dyn Responder) {
        while !data.is_empty() {
            let scan = self.framer.feed(data, &mut decoded.data, responder);
            self.absorb(&scan, decoded);
            data = &data[scan.consumed..];

            if scan.compress_start {
                debug!("Ignoring compression start marker inside compressed data");
            }
        }
    }

    fn absorb(&mut self, scan: &Scan, decoded: &mut Decoded) {
        if scan.compress_offered {
            self.mccp.handle_will();
        }
        decoded.go_ahead = scan.go_ahead;
    }
}
