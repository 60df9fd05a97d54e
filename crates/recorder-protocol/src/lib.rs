//! Wire protocol for recorder command traffic.
//!
//! - [`frame`]: HDLC-style escaping, break delimiters and CRC16.
//! - [`stream_parser`]: incremental frame extraction from a byte stream.
//! - [`document`]: the EBML structured-document codec.
//! - [`schema`]: element tables for command/response traffic, DEVINFO and
//!   device configuration roots.
//! - [`packet`]: Corbus headers, command documents and sequence indices.

pub mod document;
pub mod frame;
pub mod packet;
pub mod schema;
pub mod stream_parser;

pub use document::{Document, DocumentCodec, DocumentError, EbmlCodec, Value};
pub use frame::{CrcMode, FrameError, crc16, decode, decode_body, encode};
pub use packet::{CommandPacket, ResponsePacket, SequenceIndex};
pub use schema::{ElementDef, ElementKind, Schema};
pub use stream_parser::{FrameParser, ParserState};
