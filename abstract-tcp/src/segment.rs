//! Wire-format definitions for abstract TCP segments.
//!
//! Every unit handed to the network layer is a [`Segment`].  This module is
//! responsible for:
//! - Defining the fixed binary layout (addresses, ports, seq/ack, window).
//! - Serialising a [`Segment`] into a byte buffer ready for delivery.
//! - Deserialising a raw byte slice back into a [`Segment`], returning errors
//!   for truncated or malformed input.
//!
//! No I/O happens here.  There is no checksum and no options area: the
//! simulated wire never corrupts bytes, and nothing is negotiated.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Source Address                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Destination Address                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |       Destination Port        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Offset/Flags |     Flags     |            Window             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 24 bytes.  The payload is everything
//! after the header.
//!
//! # Segment kinds
//!
//! Data and acknowledgments are never combined: data segments carry `ack = 0`
//! and ACK segments carry `seq = 0`.  The kind travels in the `flags` byte
//! and is exposed as [`SegmentKind`], so a close request is its own kind
//! rather than a magic sequence value.

use std::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// The sender has finished the session.
    pub const FIN: u8 = 0b0000_0001;
    /// Acknowledgment field is valid; the segment carries no data.
    pub const ACK: u8 = 0b0001_0000;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 24;

/// Value written into the combined offset/flags byte: header length in
/// 32-bit words, in the upper nibble.
const DATA_OFFSET: u8 = ((HEADER_LEN / 4) as u8) << 4;

// Byte offsets of each field within the serialised header.
const OFF_SRC_ADDR: usize = 0;
const OFF_DST_ADDR: usize = 4;
const OFF_SRC_PORT: usize = 8;
const OFF_DST_PORT: usize = 10;
const OFF_SEQ: usize = 12;
const OFF_ACK: usize = 16;
const OFF_OFFSET_FLAGS: usize = 20;
const OFF_FLAGS: usize = 21;
const OFF_WINDOW: usize = 22;

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// A node address and port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// 32-bit node address.
    pub addr: u32,
    /// Transport port.
    pub port: u16,
}

impl Endpoint {
    /// Wildcard remote endpoint of a passive listener.
    pub const ANY: Endpoint = Endpoint { addr: 0, port: 0 };

    pub const fn new(addr: u32, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }
}

impl fmt::Display for Endpoint {
    /// Dotted `a.b.c.d.port`, the same shape tcpdump prints.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", Ipv4Addr::from(self.addr), self.port)
    }
}

// ---------------------------------------------------------------------------
// Header / Segment
// ---------------------------------------------------------------------------

/// What a segment means to the receiving engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// One application payload at sequence `seq`.
    Data,
    /// A cumulative acknowledgment up to (not including) `ack`.
    Ack,
    /// The peer has closed its side of the session.
    Close,
}

impl SegmentKind {
    fn to_flags(self) -> u8 {
        match self {
            SegmentKind::Data => 0,
            SegmentKind::Ack => flags::ACK,
            SegmentKind::Close => flags::FIN,
        }
    }

    fn from_flags(bits: u8) -> Self {
        if bits & flags::FIN != 0 {
            SegmentKind::Close
        } else if bits & flags::ACK != 0 {
            SegmentKind::Ack
        } else {
            SegmentKind::Data
        }
    }
}

/// Fixed-size segment header, in host byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub src: Endpoint,
    pub dst: Endpoint,
    /// Sequence number of the payload; zero on ACK and close segments.
    pub seq: u32,
    /// Next sequence number expected from the peer; zero on data segments.
    pub ack: u32,
    /// Combined data-offset/flags byte, kept for layout compatibility.
    pub offset_flags: u8,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Advertised receive window in bytes.
    pub window: u16,
}

/// A complete segment: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    fn with_kind(
        kind: SegmentKind,
        src: Endpoint,
        dst: Endpoint,
        seq: u32,
        ack: u32,
        window: u16,
        payload: Vec<u8>,
    ) -> Self {
        Segment {
            header: Header {
                src,
                dst,
                seq,
                ack,
                offset_flags: DATA_OFFSET,
                flags: kind.to_flags(),
                window,
            },
            payload,
        }
    }

    /// Build a data segment; the acknowledgment field is always zero.
    pub fn data(src: Endpoint, dst: Endpoint, seq: u32, window: u16, payload: Vec<u8>) -> Self {
        Self::with_kind(SegmentKind::Data, src, dst, seq, 0, window, payload)
    }

    /// Build an empty acknowledgment segment.
    pub fn ack(src: Endpoint, dst: Endpoint, ack: u32, window: u16) -> Self {
        Self::with_kind(SegmentKind::Ack, src, dst, 0, ack, window, Vec::new())
    }

    /// Build the segment that tells the peer this session is over.
    pub fn close(src: Endpoint, dst: Endpoint, window: u16) -> Self {
        Self::with_kind(SegmentKind::Close, src, dst, 0, 0, window, Vec::new())
    }

    pub fn kind(&self) -> SegmentKind {
        SegmentKind::from_flags(self.header.flags)
    }

    /// Serialise this segment into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let h = &self.header;
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        buf[OFF_SRC_ADDR..OFF_SRC_ADDR + 4].copy_from_slice(&h.src.addr.to_be_bytes());
        buf[OFF_DST_ADDR..OFF_DST_ADDR + 4].copy_from_slice(&h.dst.addr.to_be_bytes());
        buf[OFF_SRC_PORT..OFF_SRC_PORT + 2].copy_from_slice(&h.src.port.to_be_bytes());
        buf[OFF_DST_PORT..OFF_DST_PORT + 2].copy_from_slice(&h.dst.port.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&h.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&h.ack.to_be_bytes());
        buf[OFF_OFFSET_FLAGS] = h.offset_flags;
        buf[OFF_FLAGS] = h.flags;
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&h.window.to_be_bytes());

        buf[HEADER_LEN..].copy_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`], or
    /// - a data segment carries sequence number 0 (sequence space starts at 1), or
    /// - a data segment carries no payload.
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::BufferTooShort(buf.len()));
        }

        let header = Header {
            src: Endpoint::new(read_u32(buf, OFF_SRC_ADDR), read_u16(buf, OFF_SRC_PORT)),
            dst: Endpoint::new(read_u32(buf, OFF_DST_ADDR), read_u16(buf, OFF_DST_PORT)),
            seq: read_u32(buf, OFF_SEQ),
            ack: read_u32(buf, OFF_ACK),
            offset_flags: buf[OFF_OFFSET_FLAGS],
            flags: buf[OFF_FLAGS],
            window: read_u16(buf, OFF_WINDOW),
        };

        if SegmentKind::from_flags(header.flags) == SegmentKind::Data && header.seq == 0 {
            return Err(SegmentError::ZeroSequence);
        }

        if SegmentKind::from_flags(header.flags) == SegmentKind::Data && buf.len() == HEADER_LEN {
            return Err(SegmentError::EmptyData);
        }

        Ok(Segment {
            header,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

/// Errors that can arise when parsing a raw segment.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SegmentError {
    /// Buffer shorter than the fixed header size.
    #[error("segment of {0} bytes is shorter than the {}-byte header", HEADER_LEN)]
    BufferTooShort(usize),
    /// A data segment claimed sequence number 0.
    #[error("data segment carries sequence number 0")]
    ZeroSequence,
    /// A data segment with nothing after the header.
    #[error("data segment carries no payload")]
    EmptyData,
}
