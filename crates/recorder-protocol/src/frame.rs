//! HDLC-style framing with CRC16.
//!
//! A frame carries one packet between two break bytes. The payload is
//! followed by its CRC16 (little-endian), and the whole body is escaped so
//! that neither the break nor the escape byte appears in it unescaped:
//!
//! ```text
//! 0x7E | escape(payload ++ crc16_le(payload)) | 0x7E
//! ```
//!
//! # Example
//!
//! ```
//! use recorder_protocol::frame;
//!
//! let framed = frame::encode(b"\x7E hello \x7D");
//! assert_eq!(framed.first(), Some(&0x7E));
//! assert_eq!(frame::decode(&framed).unwrap(), b"\x7E hello \x7D");
//! ```

use recorder_core::RecorderError;
use recorder_core::constants::{
    CRC_GOOD_RESIDUE, CRC_INIT, CRC_LEN, HDLC_BREAK, HDLC_ESCAPE, HDLC_ESCAPE_XOR,
};

/// Reflected CRC-16/X.25 lookup table (polynomial 0x8408).
static CRC16_TABLE: [u16; 256] = build_crc_table();

const fn build_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x8408
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Errors produced while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// No break byte terminates the data; more bytes may still arrive.
    #[error("incomplete frame: {len} bytes without a break character")]
    Incomplete { len: usize },

    #[error("checksum mismatch: frame carries 0x{carried:04X}, computed 0x{computed:04X}")]
    Checksum { carried: u16, computed: u16 },

    /// The body ends in an escape byte with nothing to unescape.
    #[error("dangling escape byte at end of frame")]
    DanglingEscape,

    #[error("frame body too short for a checksum ({len} bytes)")]
    TooShort { len: usize },

    #[error("{len} bytes of trailing data after frame")]
    TrailingData { len: usize },
}

impl From<FrameError> for RecorderError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Incomplete { len } => RecorderError::IncompleteFrame(len),
            FrameError::Checksum { carried, computed } => RecorderError::Checksum {
                expected: carried,
                actual: computed,
            },
            other => RecorderError::malformed_frame(other.to_string()),
        }
    }
}

/// Whether decoding validates the trailing CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrcMode {
    #[default]
    Verify,
    /// Strip the CRC without checking it.
    Ignore,
}

/// Run the CRC register over `data`, starting from `crc`. Not finalized.
#[must_use]
pub fn crc16_update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        let index = usize::from((crc ^ u16::from(byte)) & 0xFF);
        crc = CRC16_TABLE[index] ^ (crc >> 8);
    }
    crc
}

/// Finalized CRC16 of `data`, as appended to a frame.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    crc16_update(CRC_INIT, data) ^ 0xFFFF
}

fn push_escaped(out: &mut Vec<u8>, byte: u8) {
    if byte == HDLC_BREAK || byte == HDLC_ESCAPE {
        out.push(HDLC_ESCAPE);
        out.push(byte ^ HDLC_ESCAPE_XOR);
    } else {
        out.push(byte);
    }
}

/// Frame `payload`: append its CRC16, escape, and wrap in break bytes.
///
/// An empty payload is legal and yields a frame carrying only a checksum.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let crc = crc16(payload);
    let mut out = Vec::with_capacity(payload.len() + payload.len() / 8 + 6);
    out.push(HDLC_BREAK);
    for &byte in payload.iter().chain(crc.to_le_bytes().iter()) {
        push_escaped(&mut out, byte);
    }
    out.push(HDLC_BREAK);
    out
}

/// Decode one framed packet, verifying its checksum.
///
/// Leading break bytes are skipped. The frame ends at the next break byte;
/// anything but further break bytes after it is an error.
///
/// # Errors
/// [`FrameError::Incomplete`] if no terminating break byte is present,
/// [`FrameError::Checksum`] on CRC mismatch, and the other variants for
/// malformed bodies.
pub fn decode(framed: &[u8]) -> Result<Vec<u8>, FrameError> {
    decode_with(framed, CrcMode::Verify)
}

/// [`decode`] with an explicit CRC mode.
///
/// # Errors
/// See [`decode`].
pub fn decode_with(framed: &[u8], mode: CrcMode) -> Result<Vec<u8>, FrameError> {
    let start = framed
        .iter()
        .position(|&b| b != HDLC_BREAK)
        .unwrap_or(framed.len());
    let rest = &framed[start..];

    let Some(end) = rest.iter().position(|&b| b == HDLC_BREAK) else {
        // Only break bytes: a complete, empty frame body.
        if rest.is_empty() && !framed.is_empty() {
            return decode_body(rest, mode);
        }
        return Err(FrameError::Incomplete { len: framed.len() });
    };

    let trailing = rest[end..].iter().filter(|&&b| b != HDLC_BREAK).count();
    if trailing > 0 {
        return Err(FrameError::TrailingData { len: trailing });
    }

    decode_body(&rest[..end], mode)
}

/// Unescape a frame body (the bytes between break characters) and strip
/// its checksum.
///
/// # Errors
/// [`FrameError::DanglingEscape`], [`FrameError::TooShort`] or
/// [`FrameError::Checksum`].
pub fn decode_body(body: &[u8], mode: CrcMode) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(body.len());
    let mut escaped = false;
    for &byte in body {
        if escaped {
            out.push(byte ^ HDLC_ESCAPE_XOR);
            escaped = false;
        } else if byte == HDLC_ESCAPE {
            escaped = true;
        } else {
            out.push(byte);
        }
    }
    if escaped {
        return Err(FrameError::DanglingEscape);
    }
    if out.len() < CRC_LEN {
        return Err(FrameError::TooShort { len: out.len() });
    }

    if mode == CrcMode::Verify && crc16_update(CRC_INIT, &out) != CRC_GOOD_RESIDUE {
        let split = out.len() - CRC_LEN;
        let carried = u16::from_le_bytes([out[split], out[split + 1]]);
        return Err(FrameError::Checksum {
            carried,
            computed: crc16(&out[..split]),
        });
    }

    out.truncate(out.len() - CRC_LEN);
    Ok(out)
}
