//! Incremental frame extraction from a serial byte stream.
//!
//! Serial reads return arbitrary slices of the device's output: part of a
//! frame, several frames, or noise left over from a cancelled exchange. The
//! [`FrameParser`] buffers bytes and splits them on the break byte (`0x7E`),
//! queueing every non-empty frame body it finds.
//!
//! Bodies are returned still escaped and with their checksum attached; pass
//! them to [`decode_body`](crate::frame::decode_body). A body that fails to
//! decode is simply dropped by the caller. Since every break byte starts a
//! fresh body, the parser resynchronises on the next break after any
//! corruption.
//!
//! # Usage
//!
//! ```
//! use recorder_protocol::{frame, FrameParser, CrcMode};
//!
//! let framed = frame::encode(b"response");
//! let mut parser = FrameParser::new();
//!
//! parser.feed(&framed[..4]);
//! assert!(parser.next_frame().is_none());
//!
//! parser.feed(&framed[4..]);
//! let body = parser.next_frame().unwrap();
//! assert_eq!(frame::decode_body(&body, CrcMode::Verify).unwrap(), b"response");
//! ```

use bytes::{Bytes, BytesMut};
use recorder_core::constants::HDLC_BREAK;
use std::collections::VecDeque;
use tracing::{trace, warn};

/// Largest frame body buffered while waiting for a break byte.
///
/// Device packets are far smaller; a body growing past this is noise.
const MAX_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

const INITIAL_BUFFER_CAPACITY: usize = 512;

const INITIAL_FRAME_QUEUE_CAPACITY: usize = 4;

/// Parser state.
///
/// ```text
/// ┌──────┐  non-break byte  ┌────────────┐
/// │ Idle │─────────────────>│ Collecting │──┐ non-break byte
/// └──────┘                  └────────────┘<─┘
///    ^  │ break byte              │ break byte
///    └──┘ (empty body skipped)    │ (body queued)
///    ^                            │
///    └────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// No partial body is buffered.
    Idle,

    /// Bytes of a body have arrived; waiting for its terminating break.
    Collecting,
}

/// Splits a byte stream into frame bodies.
#[derive(Debug)]
pub struct FrameParser {
    buffer: BytesMut,
    state: ParserState,
    frames: VecDeque<Bytes>,
    discarded: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            state: ParserState::Idle,
            frames: VecDeque::with_capacity(INITIAL_FRAME_QUEUE_CAPACITY),
            discarded: 0,
        }
    }

    /// Append bytes read from the stream, queueing each completed body.
    pub fn feed(&mut self, bytes: &[u8]) {
        trace!(len = bytes.len(), "feeding frame parser");
        let mut rest = bytes;
        while !rest.is_empty() {
            match rest.iter().position(|&b| b == HDLC_BREAK) {
                Some(pos) => {
                    self.buffer.extend_from_slice(&rest[..pos]);
                    self.finish_body();
                    rest = &rest[pos + 1..];
                }
                None => {
                    self.buffer.extend_from_slice(rest);
                    self.state = ParserState::Collecting;
                    rest = &[];
                }
            }
            self.enforce_limit();
        }
    }

    fn finish_body(&mut self) {
        if !self.buffer.is_empty() {
            let body = self.buffer.split().freeze();
            self.frames.push_back(body);
        }
        self.state = ParserState::Idle;
    }

    fn enforce_limit(&mut self) {
        if self.buffer.len() > MAX_BUFFER_SIZE {
            warn!(
                len = self.buffer.len(),
                "frame body exceeded buffer limit, discarding"
            );
            self.discarded += self.buffer.len();
            self.buffer.clear();
            self.state = ParserState::Idle;
        }
    }

    /// Pop the oldest complete frame body.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        self.frames.pop_front()
    }

    /// Iterate over (and remove) every complete frame body.
    pub fn drain(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.frames.drain(..)
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn frames_available(&self) -> usize {
        self.frames.len()
    }

    /// Bytes of the partial body still waiting for a break.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes dropped by the overflow guard.
    pub fn discarded_bytes(&self) -> usize {
        self.discarded
    }

    /// Forget buffered bytes and queued frames.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.frames.clear();
        self.state = ParserState::Idle;
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
