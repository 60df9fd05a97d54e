//! Command and response packets.
//!
//! A command document names one command and carries a sequence index used
//! to correlate the device's answer:
//!
//! ```text
//! EBMLCommand { <Name>: payload, CommandIdx: n }
//! EBMLResponse { ResponseIdx: n, CMDQueueDepth, DeviceStatusCode, ... }
//! ```
//!
//! On serial links the encoded document is wrapped in a Corbus header and
//! then framed:
//!
//! ```text
//! command:  0x80 0x26 0x00 0x0A | EBML
//! response: 0x81 0x00 <result>  | EBML
//! ```

use recorder_core::constants::{
    COMMAND_HEADER, RESPONSE_HEADER, RESPONSE_HEADER_LEN, SEQUENCE_MODULUS,
};
use recorder_core::{DeviceStatusCode, RecorderError, Result};
use std::fmt;
use tracing::warn;

use crate::document::{Document, DocumentCodec, Value};
use crate::frame;

pub const COMMAND_ELEMENT: &str = "EBMLCommand";
pub const RESPONSE_ELEMENT: &str = "EBMLResponse";
pub const COMMAND_INDEX: &str = "CommandIdx";
pub const RESPONSE_INDEX: &str = "ResponseIdx";
pub const QUEUE_DEPTH: &str = "CMDQueueDepth";
pub const STATUS_CODE: &str = "DeviceStatusCode";
pub const STATUS_MESSAGE: &str = "DeviceStatusMessage";
pub const LOCK_ID: &str = "LockID";

/// Correlation index carried as `CommandIdx`/`ResponseIdx`.
///
/// The field is 16 bits wide on the wire, so indices wrap from 65535 to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SequenceIndex(u16);

impl SequenceIndex {
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Reduce a raw index read from a response into index space.
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self((raw % u64::from(SEQUENCE_MODULUS)) as u16)
    }

    /// Whether a raw `ResponseIdx` answers this index.
    #[must_use]
    pub fn matches(self, raw: u64) -> bool {
        Self::from_raw(raw) == self
    }

    /// Steps from `earlier` forward to `self`, modulo the index width.
    #[must_use]
    pub fn distance_from(self, earlier: Self) -> u16 {
        self.0.wrapping_sub(earlier.0)
    }

    /// `true` if `other` was issued before `self` (within half the index
    /// space), i.e. a response bearing it is stale.
    #[must_use]
    pub fn is_after(self, other: Self) -> bool {
        let distance = self.distance_from(other);
        distance != 0 && u32::from(distance) < SEQUENCE_MODULUS / 2
    }
}

impl fmt::Display for SequenceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    name: String,
    payload: Value,
    index: Option<SequenceIndex>,
    lock_id: Option<Vec<u8>>,
}

impl CommandPacket {
    pub fn new(name: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            index: None,
            lock_id: None,
        }
    }

    /// A command whose payload is an empty master element.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Document::new())
    }

    #[must_use]
    pub fn with_index(mut self, index: SequenceIndex) -> Self {
        self.index = Some(index);
        self
    }

    #[must_use]
    pub fn with_lock_id(mut self, lock_id: impl Into<Vec<u8>>) -> Self {
        self.lock_id = Some(lock_id.into());
        self
    }

    pub fn set_index(&mut self, index: SequenceIndex) {
        self.index = Some(index);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn index(&self) -> Option<SequenceIndex> {
        self.index
    }

    pub fn lock_id(&self) -> Option<&[u8]> {
        self.lock_id.as_deref()
    }

    /// `EBMLCommand { <name>: payload, CommandIdx, LockID }`.
    pub fn document(&self) -> Document {
        let mut inner = Document::new().with(self.name.clone(), self.payload.clone());
        if let Some(index) = self.index {
            inner.insert(COMMAND_INDEX, u64::from(index.value()));
        }
        if let Some(lock_id) = &self.lock_id {
            inner.insert(LOCK_ID, lock_id.clone());
        }
        Document::new().with(COMMAND_ELEMENT, inner)
    }

    /// Encoded command document.
    ///
    /// # Errors
    /// `RecorderError::InvalidCommand` if the encoding exceeds `max_size`;
    /// `RecorderError::Document` if it cannot be encoded.
    pub fn encode(&self, codec: &dyn DocumentCodec, max_size: Option<usize>) -> Result<Vec<u8>> {
        let ebml = codec.serialize(&self.document())?;
        check_size(&ebml, max_size)?;
        Ok(ebml)
    }

    /// Bare `{ <name>: payload }` encoding, for firmware that predates the
    /// `EBMLCommand` wrapper.
    ///
    /// # Errors
    /// See [`encode`](Self::encode).
    pub fn encode_legacy(
        &self,
        codec: &dyn DocumentCodec,
        max_size: Option<usize>,
    ) -> Result<Vec<u8>> {
        let document = Document::new().with(self.name.clone(), self.payload.clone());
        let ebml = codec.serialize(&document)?;
        check_size(&ebml, max_size)?;
        Ok(ebml)
    }

    /// Framed serial packet: Corbus header, EBML, CRC16, break bytes.
    ///
    /// # Errors
    /// See [`encode`](Self::encode).
    pub fn to_frame(&self, codec: &dyn DocumentCodec, max_size: Option<usize>) -> Result<Vec<u8>> {
        let ebml = self.encode(codec, max_size)?;
        let mut packet = Vec::with_capacity(COMMAND_HEADER.len() + ebml.len());
        packet.extend_from_slice(&COMMAND_HEADER);
        packet.extend_from_slice(&ebml);
        Ok(frame::encode(&packet))
    }

    /// Parse an unframed serial command packet (device side).
    ///
    /// # Errors
    /// `RecorderError::InvalidCommand` for a missing header or command
    /// element; `RecorderError::Document` for undecodable EBML.
    pub fn from_corbus(packet: &[u8], codec: &dyn DocumentCodec) -> Result<Self> {
        let ebml = packet
            .strip_prefix(&COMMAND_HEADER[..])
            .ok_or_else(|| RecorderError::invalid_command("missing Corbus command header"))?;
        Self::from_document(codec.deserialize(ebml)?)
    }

    /// Extract the command from a decoded `EBMLCommand` document.
    ///
    /// # Errors
    /// `RecorderError::InvalidCommand` if no command element is present.
    pub fn from_document(mut document: Document) -> Result<Self> {
        let mut inner = match document.remove(COMMAND_ELEMENT) {
            Some(Value::Master(inner)) => inner,
            _ => document,
        };
        let index = inner.remove(COMMAND_INDEX).and_then(|v| v.as_uint());
        let lock_id = inner
            .remove(LOCK_ID)
            .and_then(|v| v.as_bytes().map(<[u8]>::to_vec));
        let (name, payload) = inner
            .iter()
            .next()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .ok_or_else(|| RecorderError::invalid_command("document names no command"))?;
        Ok(Self {
            name,
            payload,
            index: index.map(SequenceIndex::from_raw),
            lock_id,
        })
    }
}

fn check_size(ebml: &[u8], max_size: Option<usize>) -> Result<()> {
    match max_size {
        Some(max) if ebml.len() > max => Err(RecorderError::invalid_command(format!(
            "Command too large ({}); max size is {max}",
            ebml.len()
        ))),
        _ => Ok(()),
    }
}

/// Message for a non-zero Corbus result code.
#[must_use]
pub fn corbus_error_name(result: u8) -> &'static str {
    match result {
        0x01 => "Corbus command failed",
        0x07 => "bad Corbus command",
        _ => "unknown error",
    }
}

/// A decoded device response: the contents of `EBMLResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    body: Document,
}

impl ResponsePacket {
    /// Unwrap `EBMLResponse` from a decoded document. A document without
    /// it is used as-is.
    pub fn from_document(mut document: Document) -> Self {
        match document.remove(RESPONSE_ELEMENT) {
            Some(Value::Master(body)) => Self { body },
            _ => {
                warn!("response did not contain an EBMLResponse element");
                Self { body: document }
            }
        }
    }

    /// Decode a bare EBML response (file interface).
    ///
    /// # Errors
    /// `RecorderError::InvalidCommand` if the data cannot be decoded.
    pub fn from_ebml(ebml: &[u8], codec: &dyn DocumentCodec) -> Result<Self> {
        let document = codec.deserialize(ebml).map_err(|err| {
            RecorderError::invalid_command(format!(
                "Response from device could not be decoded ({err})"
            ))
        })?;
        Ok(Self::from_document(document))
    }

    /// Decode an unframed serial response packet.
    ///
    /// Returns `Ok(None)` for packets without the response header; they may
    /// be addressed to another device on the bus.
    ///
    /// # Errors
    /// `RecorderError::InvalidCommand` for a non-zero Corbus result code or
    /// an undecodable payload.
    pub fn from_corbus(packet: &[u8], codec: &dyn DocumentCodec) -> Result<Option<Self>> {
        if packet.len() < RESPONSE_HEADER_LEN || !packet.starts_with(&RESPONSE_HEADER) {
            return Ok(None);
        }
        let result = packet[RESPONSE_HEADER.len()];
        if result != 0 {
            return Err(RecorderError::invalid_command(format!(
                "Response header indicated an error (0x{result:02x}: {})",
                corbus_error_name(result)
            )));
        }
        Self::from_ebml(&packet[RESPONSE_HEADER_LEN..], codec).map(Some)
    }

    /// Encode a response body as a framed serial packet (device side).
    ///
    /// # Errors
    /// `RecorderError::Document` if the body cannot be encoded.
    pub fn frame(body: &Document, codec: &dyn DocumentCodec) -> Result<Vec<u8>> {
        let mut packet = RESPONSE_HEADER.to_vec();
        packet.push(0);
        packet.extend(Self::encode(body, codec)?);
        Ok(frame::encode(&packet))
    }

    /// Encode a response body as `EBMLResponse` EBML (device side).
    ///
    /// # Errors
    /// `RecorderError::Document` if the body cannot be encoded.
    pub fn encode(body: &Document, codec: &dyn DocumentCodec) -> Result<Vec<u8>> {
        let document = Document::new().with(RESPONSE_ELEMENT, body.clone());
        Ok(codec.serialize(&document)?)
    }

    pub fn body(&self) -> &Document {
        &self.body
    }

    pub fn into_body(self) -> Document {
        self.body
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    /// Raw `ResponseIdx`, if present.
    pub fn index(&self) -> Option<u64> {
        self.body.uint(RESPONSE_INDEX)
    }

    /// `true` if this response carries the given command index.
    pub fn answers(&self, index: SequenceIndex) -> bool {
        self.index().is_some_and(|raw| index.matches(raw))
    }

    /// `CMDQueueDepth`; devices that omit it have room.
    pub fn queue_depth(&self) -> u64 {
        self.body.uint(QUEUE_DEPTH).unwrap_or(1)
    }

    pub fn queue_full(&self) -> bool {
        self.queue_depth() == 0
    }

    pub fn status_code(&self) -> i32 {
        self.body
            .int(STATUS_CODE)
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(0)
    }

    pub fn status(&self) -> DeviceStatusCode {
        DeviceStatusCode::from_code(self.status_code())
    }

    pub fn status_message(&self) -> Option<&str> {
        self.body.str(STATUS_MESSAGE)
    }

    /// Fail with `RecorderError::Command` on a negative status code.
    ///
    /// # Errors
    /// See above.
    pub fn check_status(&self) -> Result<()> {
        let code = self.status_code();
        if code < 0 {
            return Err(RecorderError::command(code, self.status_message()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::EbmlCodec;
    use crate::frame::CrcMode;
    use rstest::rstest;

    fn codec() -> EbmlCodec {
        EbmlCodec::command_response()
    }

    #[test]
    fn test_sequence_wraps() {
        let last = SequenceIndex::new(u16::MAX);
        assert_eq!(last.next(), SequenceIndex::new(0));
        assert!(last.next().is_after(last));
        assert!(!last.is_after(last.next()));
    }

    #[rstest]
    #[case(1, 1, true)]
    #[case(1, 2, false)]
    #[case(0, 65_536, true)]
    #[case(5, 65_541, true)]
    fn test_sequence_matches(#[case] index: u16, #[case] raw: u64, #[case] expected: bool) {
        assert_eq!(SequenceIndex::new(index).matches(raw), expected);
    }

    #[test]
    fn test_command_document_shape() {
        let packet = CommandPacket::new("SendPing", b"hi".to_vec()).with_index(SequenceIndex::new(7));
        let doc = packet.document();
        let inner = doc.document("EBMLCommand").unwrap();
        assert_eq!(inner.bytes("SendPing"), Some(&b"hi"[..]));
        assert_eq!(inner.uint("CommandIdx"), Some(7));
    }

    #[test]
    fn test_command_frame_round_trip() {
        let codec = codec();
        let packet = CommandPacket::new("GetInfo", 3u64).with_index(SequenceIndex::new(2));
        let framed = packet.to_frame(&codec, Some(128)).unwrap();
        let body = frame::decode(&framed).unwrap();
        assert!(body.starts_with(&COMMAND_HEADER));

        let parsed = CommandPacket::from_corbus(&body, &codec).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_oversize_command_rejected() {
        let packet = CommandPacket::new("SendPing", vec![0u8; 200]);
        let err = packet.to_frame(&codec(), Some(128)).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidCommand { .. }));
        assert!(packet.to_frame(&codec(), None).is_ok());
    }

    #[test]
    fn test_legacy_encoding_has_no_wrapper() {
        let ebml = CommandPacket::empty("RecStart")
            .encode_legacy(&codec(), None)
            .unwrap();
        assert_eq!(&ebml[..2], &[0x57, 0x03]);
    }

    #[test]
    fn test_response_round_trip() {
        let codec = codec();
        let body = Document::new()
            .with("ResponseIdx", 1u64)
            .with("CMDQueueDepth", 1u64)
            .with("DeviceStatusCode", 0i64)
            .with("PingReply", b"hello".to_vec());
        let framed = ResponsePacket::frame(&body, &codec).unwrap();
        let unframed = frame::decode_with(&framed, CrcMode::Verify).unwrap();
        let response = ResponsePacket::from_corbus(&unframed, &codec)
            .unwrap()
            .unwrap();

        assert!(response.answers(SequenceIndex::new(1)));
        assert_eq!(response.status(), DeviceStatusCode::Idle);
        assert_eq!(response.body().bytes("PingReply"), Some(&b"hello"[..]));
        assert!(response.check_status().is_ok());
    }

    #[test]
    fn test_negative_status_is_command_error() {
        let response = ResponsePacket::from_document(
            Document::new().with("EBMLResponse", Document::new().with("DeviceStatusCode", -60i64)),
        );
        let err = response.check_status().unwrap_err();
        assert_eq!(err.to_string(), "Command failed [-60]: bad checksum");
    }

    #[test]
    fn test_foreign_header_ignored() {
        let packet = [0x82, 0x00, 0x00, 0x52, 0x01, 0x81, 0x01];
        assert!(ResponsePacket::from_corbus(&packet, &codec()).unwrap().is_none());
    }

    #[rstest]
    #[case(0x01, "Corbus command failed")]
    #[case(0x07, "bad Corbus command")]
    #[case(0x33, "unknown error")]
    fn test_corbus_result_codes(#[case] result: u8, #[case] message: &str) {
        let packet = [0x81, 0x00, result];
        let err = ResponsePacket::from_corbus(&packet, &codec()).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidCommand { .. }));
        assert!(err.to_string().contains(message));
    }

    #[test]
    fn test_missing_fields_default() {
        let response = ResponsePacket::from_document(Document::new());
        assert_eq!(response.queue_depth(), 1);
        assert_eq!(response.status_code(), 0);
        assert!(response.index().is_none());
    }
}
