//! Fixed 32-byte frame header (big endian).
//!
//! ```text
//!  offset  size  field
//!    0      8    source id (u64)
//!    8      8    destination id (u64)
//!   16      2    length (u16, header + payload)
//!   18      2    sequence (u16)
//!   20      1    session (u8)
//!   21      1    command (u8)
//!   22      1    qualifier (u8)
//!   23      1    aqlf (u8)
//!   24      8    reserved
//! ```

use core::fmt;
use static_assertions::const_assert;

/// Serialized header size in bytes.
pub const HEADER_SIZE: usize = 32;
/// Maximum transmission unit, header included.
pub const MTU: usize = 1024;
/// Maximum payload bytes per frame.
pub const MAX_PAYLOAD: usize = MTU - HEADER_SIZE;

const_assert!(MTU > HEADER_SIZE);

#[derive(Debug)]
pub enum FrameError {
    /// Fewer than `HEADER_SIZE` bytes available.
    Truncated,
    /// Declared length outside `[HEADER_SIZE, MTU]`.
    BadLength(u16),
    /// Payload does not match the handler's expected size.
    BadPayload,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "truncated frame header"),
            FrameError::BadLength(n) => write!(f, "invalid frame length {}", n),
            FrameError::BadPayload => write!(f, "payload size mismatch"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Decoded frame header. `length` counts the header itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub source: u64,
    pub destination: u64,
    pub length: u16,
    pub sequence: u16,
    pub session: u8,
    pub command: u8,
    pub qualifier: u8,
    pub aqlf: u8,
}

impl Header {
    /// Parses and validates a serialized header.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::Truncated);
        }
        let header = Self {
            source: u64::from_be_bytes(buf[0..8].try_into().unwrap()),
            destination: u64::from_be_bytes(buf[8..16].try_into().unwrap()),
            length: u16::from_be_bytes(buf[16..18].try_into().unwrap()),
            sequence: u16::from_be_bytes(buf[18..20].try_into().unwrap()),
            session: buf[20],
            command: buf[21],
            qualifier: buf[22],
            aqlf: buf[23],
        };
        if (header.length as usize) < HEADER_SIZE || (header.length as usize) > MTU {
            return Err(FrameError::BadLength(header.length));
        }
        Ok(header)
    }

    /// Serializes the header into the first `HEADER_SIZE` bytes of `buf`.
    pub fn serialize(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.source.to_be_bytes());
        buf[8..16].copy_from_slice(&self.destination.to_be_bytes());
        buf[16..18].copy_from_slice(&self.length.to_be_bytes());
        buf[18..20].copy_from_slice(&self.sequence.to_be_bytes());
        buf[20] = self.session;
        buf[21] = self.command;
        buf[22] = self.qualifier;
        buf[23] = self.aqlf;
        buf[24..32].fill(0);
    }

    /// Payload bytes that follow the header on the wire.
    pub fn payload_length(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_SIZE)
    }
}
