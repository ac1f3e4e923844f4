//! Wire framing for the rendezvous protocol
//!
//! Every packet on the wire has the same shape:
//!
//! ```text
//! ┌──────────────────┬───────────────────┬──────────────────┐
//! │ packet_type: u16 │ payload_size: u16 │ string_size: u16 │  header (6 B, LE)
//! ├──────────────────┴───────────────────┴──────────────────┤
//! │ payload_size bytes of fixed-layout payload              │
//! ├─────────────────────────────────────────────────────────┤
//! │ string block: repeated [len: u16][len bytes]            │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Framing and string parsing are deliberately separate steps: a short
//! buffer is "need more data" (not an error), an oversize declaration is a
//! fatal framing error, and a string block that does not partition exactly
//! discards only that one packet.

use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// Length of the frame header: packet type, payload size, string size.
pub const HEADER_LEN: usize = 6;

/// Maximum total packet size (header + payload + string block).
pub const MAX_PACKET_SIZE: usize = 5100;

// ============================================================================
// Frame
// ============================================================================

/// One reassembled wire frame, not yet validated against the packet registry.
///
/// The string block is kept raw here; [`parse_strings`] splits it so that a
/// malformed block can be rejected without touching the framing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub packet_type: u16,
    pub payload: Vec<u8>,
    pub string_block: Vec<u8>,
}

/// Result of attempting to pull one frame out of a receive buffer.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// The buffer does not yet hold a complete frame.
    NeedMore,
    /// A complete frame; `consumed` bytes should be shifted out of the buffer.
    Frame { frame: Frame, consumed: usize },
}

// ============================================================================
// Errors
// ============================================================================

/// Fatal framing error: the stream can no longer be trusted.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    /// The header declares a total size beyond [`MAX_PACKET_SIZE`].
    Oversize { declared: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Oversize { declared } => {
                write!(f, "declared packet size {} exceeds {}", declared, MAX_PACKET_SIZE)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Encoding failure: the packet cannot be represented on the wire.
#[derive(Debug, PartialEq, Eq)]
pub enum EncodeError {
    /// Total encoded size would exceed [`MAX_PACKET_SIZE`].
    TooLarge { size: usize },
    /// A single string exceeds the u16 length prefix.
    StringTooLong { len: usize },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::TooLarge { size } => {
                write!(f, "encoded packet size {} exceeds {}", size, MAX_PACKET_SIZE)
            }
            EncodeError::StringTooLong { len } => {
                write!(f, "string of {} bytes exceeds u16 length prefix", len)
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// The string block did not partition exactly into `[len][bytes]` entries.
#[derive(Debug, PartialEq, Eq)]
pub struct StringBlockError;

impl fmt::Display for StringBlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "string block does not partition into length-prefixed entries")
    }
}

impl std::error::Error for StringBlockError {}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a frame into wire bytes.
///
/// Fails when the total size would exceed [`MAX_PACKET_SIZE`]; callers log
/// the failure and drop the packet (no partial send ever happens).
pub fn encode_frame(
    packet_type: u16,
    payload: &[u8],
    strings: &[String],
) -> Result<Vec<u8>, EncodeError> {
    let mut string_size: usize = 0;
    for s in strings {
        if s.len() > u16::MAX as usize {
            return Err(EncodeError::StringTooLong { len: s.len() });
        }
        string_size += 2 + s.len();
    }

    let total = HEADER_LEN + payload.len() + string_size;
    if total > MAX_PACKET_SIZE || payload.len() > u16::MAX as usize || string_size > u16::MAX as usize
    {
        return Err(EncodeError::TooLarge { size: total });
    }

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&packet_type.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(&(string_size as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    for s in strings {
        buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    Ok(buf)
}

// ============================================================================
// Decoding
// ============================================================================

/// Try to pull one complete frame from the front of `buf`.
///
/// Returns [`DecodeOutcome::NeedMore`] when the header or the declared body
/// has not fully arrived yet. Returns [`FrameError::Oversize`] when the
/// header itself is impossible; the stream is desynchronized at that point
/// and the connection must be torn down.
pub fn try_decode(buf: &[u8]) -> Result<DecodeOutcome, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(DecodeOutcome::NeedMore);
    }

    let packet_type = u16::from_le_bytes([buf[0], buf[1]]);
    let payload_size = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    let string_size = u16::from_le_bytes([buf[4], buf[5]]) as usize;

    let total = HEADER_LEN + payload_size + string_size;
    if total > MAX_PACKET_SIZE {
        return Err(FrameError::Oversize { declared: total });
    }
    if buf.len() < total {
        return Ok(DecodeOutcome::NeedMore);
    }

    let frame = Frame {
        packet_type,
        payload: buf[HEADER_LEN..HEADER_LEN + payload_size].to_vec(),
        string_block: buf[HEADER_LEN + payload_size..total].to_vec(),
    };

    Ok(DecodeOutcome::Frame { frame, consumed: total })
}

/// Split a raw string block into its entries.
///
/// The block must partition *exactly*: every entry needs its full two-byte
/// length prefix and `len` bytes, and the final entry must end on the last
/// byte. Strings are recovered lossily as UTF-8 (the wire carries raw bytes).
pub fn parse_strings(block: &[u8]) -> Result<Vec<String>, StringBlockError> {
    let mut strings = Vec::new();
    let mut cursor = 0;

    while cursor < block.len() {
        if cursor + 2 > block.len() {
            return Err(StringBlockError);
        }
        let len = u16::from_le_bytes([block[cursor], block[cursor + 1]]) as usize;
        cursor += 2;

        if cursor + len > block.len() {
            return Err(StringBlockError);
        }
        strings.push(String::from_utf8_lossy(&block[cursor..cursor + len]).into_owned());
        cursor += len;
    }

    Ok(strings)
}

// ============================================================================
// Tests
// ============================================================================
