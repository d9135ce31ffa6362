/// Telnet framing
///
/// Converts a raw, control-laden byte stream into pure content bytes. The
/// parse state lives in a single `FramerState` value and survives chunk
/// boundaries, so a sequence split across two reads decodes the same as one
/// delivered whole.
///
/// References:
/// - RFC 854 (Telnet), RFC 855 (option negotiation)
/// - https://tintin.mudhalla.net/protocols/mccp/

use tracing::{debug, trace};

/// Interpret As Command
pub const IAC: u8 = 0xFF;
pub const DONT: u8 = 0xFE;
pub const DO: u8 = 0xFD;
pub const WONT: u8 = 0xFC;
pub const WILL: u8 = 0xFB;
/// Subnegotiation Begin
pub const SB: u8 = 0xFA;
pub const GOAHEAD: u8 = 0xF9;
/// Subnegotiation End
pub const SE: u8 = 0xF0;

/// MCCP v1 option
pub const TELOPT_COMPRESS: u8 = 0x55;
/// MCCP v2 option
pub const TELOPT_COMPRESS2: u8 = 0x56;

/// Longest subnegotiation payload skipped before the framer gives up on
/// finding `IAC SE` and returns to plain data
pub const MAX_SUBNEGOTIATION_LEN: usize = 64 * 1024;

/// Sink for negotiation replies
///
/// The framer answers the peer while it scans, so a reply is written before
/// any byte that follows the request in the same chunk is looked at.
#[cfg_attr(test, mockall::automock)]
pub trait Responder {
    fn respond(&mut self, bytes: &[u8]);
}

impl Responder for Vec<u8> {
    fn respond(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Double every literal 0xFF so the peer reads it as data
pub fn escape(data: &[u8]) -> Vec<u8> {
    let extra = data.iter().filter(|&&b| b == IAC).count();
    let mut out = Vec::with_capacity(data.len() + extra);
    for &byte in data {
        out.push(byte);
        if byte == IAC {
            out.push(IAC);
        }
    }
    out
}

/// Collapse `IAC IAC` pairs back into single 0xFF bytes
pub fn unescape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().copied().peekable();
    while let Some(byte) = iter.next() {
        out.push(byte);
        if byte == IAC && iter.peek() == Some(&IAC) {
            iter.next();
        }
    }
    out
}

/// Where the framer is inside a control sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramerState {
    #[default]
    Normal,
    SawIac,
    SawIacWill,
    SawIacWont,
    SawIacDo,
    SawIacDont,
    SawIacSb,
    /// Inside a subnegotiation payload, waiting for `IAC SE`
    Subnegotiation,
    /// `IAC` seen inside a subnegotiation payload
    SubnegotiationIac,
    /// `IAC SB <compress option>` seen
    CompressSb(u8),
    /// Compress start marker seen (`WILL` for v1, `IAC` for v2), waiting for `SE`
    CompressSbMarker(u8),
}

impl FramerState {
    fn in_subnegotiation(self) -> bool {
        matches!(
            self,
            FramerState::Subnegotiation
                | FramerState::SubnegotiationIac
                | FramerState::CompressSb(_)
                | FramerState::CompressSbMarker(_)
        )
    }
}

/// What a call to `Framer::feed` observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scan {
    /// Bytes of the input consumed; less than the input length only when
    /// `compress_start` is set
    pub consumed: usize,
    /// `IAC GA` was the last byte of the input
    pub go_ahead: bool,
    /// The peer offered compression (`IAC WILL COMPRESS[2]`)
    pub compress_offered: bool,
    /// A start marker for an offered compression option ended at
    /// `consumed`; everything after it belongs to the compressed substream
    pub compress_start: bool,
}

/// Per-byte Telnet state machine
#[derive(Debug, Default)]
pub struct Framer {
    state: FramerState,
    /// `IAC WILL COMPRESS` seen and not withdrawn
    compress_offered: bool,
    /// `IAC WILL COMPRESS2` seen and not withdrawn
    compress2_offered: bool,
    subnegotiation_len: usize,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FramerState {
        self.state
    }

    /// Whether the peer currently offers compression `option`
    pub fn is_offered(&self, option: u8) -> bool {
        match option {
            TELOPT_COMPRESS => self.compress_offered,
            TELOPT_COMPRESS2 => self.compress2_offered,
            _ => false,
        }
    }

    fn set_offered(&mut self, option: u8, offered: bool) {
        match option {
            TELOPT_COMPRESS => self.compress_offered = offered,
            TELOPT_COMPRESS2 => self.compress2_offered = offered,
            _ => {}
        }
    }

    /// Count subnegotiation bytes; an unterminated one is abandoned
    fn bound_subnegotiation(&mut self, next: FramerState) -> FramerState {
        if !next.in_subnegotiation() {
            self.subnegotiation_len = 0;
            return next;
        }

        self.subnegotiation_len += 1;
        if self.subnegotiation_len >= MAX_SUBNEGOTIATION_LEN {
            debug!(
                "Subnegotiation exceeded {} bytes without IAC SE, resyncing",
                MAX_SUBNEGOTIATION_LEN
            );
            self.subnegotiation_len = 0;
            return FramerState::Normal;
        }
        next
    }

    /// Scan `input`, appending content bytes to `out` and answering option
    /// offers through `responder`.
    ///
    /// Stops early right after the start marker of an offered compression
    /// option. Markers for options the peer never offered are consumed
    /// without effect.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>, responder: &mut dyn Responder) -> Scan {
        let mut scan = Scan::default();
        let last = input.len().saturating_sub(1);

        for (index, &byte) in input.iter().enumerate() {
            let next = match (self.state, byte) {
                (FramerState::Normal, IAC) => FramerState::SawIac,
                (FramerState::Normal, _) => {
                    out.push(byte);
                    FramerState::Normal
                }

                (FramerState::SawIac, IAC) => {
                    out.push(IAC);
                    FramerState::Normal
                }
                (FramerState::SawIac, WILL) => FramerState::SawIacWill,
                (FramerState::SawIac, WONT) => FramerState::SawIacWont,
                (FramerState::SawIac, DO) => FramerState::SawIacDo,
                (FramerState::SawIac, DONT) => FramerState::SawIacDont,
                (FramerState::SawIac, SB) => FramerState::SawIacSb,
                (FramerState::SawIac, GOAHEAD) => {
                    if index == last {
                        scan.go_ahead = true;
                    }
                    FramerState::Normal
                }
                (FramerState::SawIac, command) => {
                    trace!("Swallowing IAC {:#04x}", command);
                    FramerState::Normal
                }

                (FramerState::SawIacWill, option) => {
                    debug!("Peer WILL {:#04x}, replying DO", option);
                    responder.respond(&[IAC, DO, option]);
                    if option == TELOPT_COMPRESS || option == TELOPT_COMPRESS2 {
                        self.set_offered(option, true);
                        scan.compress_offered = true;
                    }
                    FramerState::Normal
                }
                (FramerState::SawIacWont, option) => {
                    self.set_offered(option, false);
                    FramerState::Normal
                }
                (FramerState::SawIacDo, _) | (FramerState::SawIacDont, _) => FramerState::Normal,

                (FramerState::SawIacSb, option @ (TELOPT_COMPRESS | TELOPT_COMPRESS2)) => {
                    FramerState::CompressSb(option)
                }
                (FramerState::SawIacSb, IAC) => FramerState::SubnegotiationIac,
                (FramerState::SawIacSb, _) => FramerState::Subnegotiation,

                (FramerState::CompressSb(TELOPT_COMPRESS), WILL) => {
                    FramerState::CompressSbMarker(TELOPT_COMPRESS)
                }
                (FramerState::CompressSb(TELOPT_COMPRESS2), IAC) => {
                    FramerState::CompressSbMarker(TELOPT_COMPRESS2)
                }
                (FramerState::CompressSb(_), IAC) => FramerState::SubnegotiationIac,
                (FramerState::CompressSb(_), _) => FramerState::Subnegotiation,

                (FramerState::CompressSbMarker(option), SE) if !self.is_offered(option) => {
                    debug!("Ignoring start marker for option {:#04x} the peer never offered", option);
                    FramerState::Normal
                }
                (FramerState::CompressSbMarker(option), SE) => {
                    debug!("Compression start marker for option {:#04x}", option);
                    self.state = FramerState::Normal;
                    self.subnegotiation_len = 0;
                    scan.consumed = index + 1;
                    scan.compress_start = true;
                    return scan;
                }
                (FramerState::CompressSbMarker(_), IAC) => FramerState::SubnegotiationIac,
                (FramerState::CompressSbMarker(_), _) => FramerState::Subnegotiation,

                (FramerState::Subnegotiation, IAC) => FramerState::SubnegotiationIac,
                (FramerState::Subnegotiation, _) => FramerState::Subnegotiation,
                (FramerState::SubnegotiationIac, SE) => FramerState::Normal,
                (FramerState::SubnegotiationIac, _) => FramerState::Subnegotiation,
            };
            self.state = self.bound_subnegotiation(next);
        }

        scan.consumed = input.len();
        scan
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn frame_in_pieces(input: &[u8], cuts: &[usize]) -> (Vec<u8>, Vec<u8>) {
        let mut framer = Framer::new();
        let mut out = Vec::new();
        let mut replies = Vec::new();
        let mut start = 0;

        let mut bounds: Vec<usize> = cuts.iter().map(|c| c % (input.len() + 1)).collect();
        bounds.sort_unstable();
        bounds.push(input.len());

        for end in bounds {
            let mut piece = &input[start..end.max(start)];
            while !piece.is_empty() {
                let scan = framer.feed(piece, &mut out, &mut replies);
                piece = &piece[scan.consumed..];
            }
            start = end.max(start);
        }

        (out, replies)
    }

    proptest! {
        #[test]
        fn test_escape_unescape_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(unescape(&escape(&data)), data);
        }

        #[test]
        fn test_framer_recovers_escaped_data(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let (out, replies) = frame_in_pieces(&escape(&data), &[]);
            prop_assert_eq!(out, data);
            prop_assert!(replies.is_empty());
        }

        #[test]
        fn test_chunk_boundaries_do_not_change_output(
            data in proptest::collection::vec(
                prop_oneof![
                    4 => any::<u8>(),
                    1 => Just(IAC),
                    1 => prop_oneof![Just(WILL), Just(WONT), Just(DO), Just(DONT), Just(SB), Just(SE)],
                ],
                0..512,
            ),
            cuts in proptest::collection::vec(any::<usize>(), 0..8),
        ) {
            let whole = frame_in_pieces(&data, &[]);
            let split = frame_in_pieces(&data, &cuts);
            prop_assert_eq!(whole, split);
        }
    }
}
