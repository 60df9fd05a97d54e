//! Structured documents and their EBML encoding.
//!
//! Commands, responses and the DEVINFO identity file are nested key/value
//! documents with typed leaves. On the wire each entry is an EBML element:
//!
//! ```text
//! element ID (1-4 bytes, length-marked) | size (vint, 1-8 bytes) | data
//! ```
//!
//! Unsigned and signed integers are big-endian in the fewest bytes, strings
//! are UTF-8, and master elements contain further elements. Names are
//! resolved to IDs through a [`Schema`]; elements with IDs the schema does
//! not know are skipped on decode.
//!
//! # Example
//!
//! ```
//! use recorder_protocol::{Document, DocumentCodec, EbmlCodec};
//!
//! let codec = EbmlCodec::command_response();
//! let command = Document::new().with(
//!     "EBMLCommand",
//!     Document::new().with("SendPing", b"hi".to_vec()).with("CommandIdx", 1u64),
//! );
//!
//! let bytes = codec.serialize(&command).unwrap();
//! assert_eq!(codec.deserialize(&bytes).unwrap(), command);
//! ```

use std::sync::Arc;

use recorder_core::RecorderError;
use serde::Serialize;
use serde::ser::SerializeMap;
use tracing::debug;

use crate::schema::{ElementKind, Schema, id_len};

/// Master elements nested deeper than this are rejected.
const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("element {name} is not in schema {schema}")]
    UnknownElement { name: String, schema: String },

    #[error("element {name} expects a {expected} value")]
    TypeMismatch { name: String, expected: ElementKind },

    #[error("element {name} holds a {len}-byte integer")]
    IntegerTooLarge { name: String, len: usize },

    #[error("element {name} is not valid UTF-8")]
    InvalidUtf8 { name: String },

    #[error("truncated data at offset {offset}")]
    Truncated { offset: usize },

    #[error("invalid variable-length integer at offset {offset}")]
    InvalidVint { offset: usize },

    #[error("0x{id:X} is not a valid EBML ID")]
    InvalidId { id: u32 },

    #[error("EBML ID 0x{id:X} is already used by {existing}")]
    DuplicateId { id: u32, existing: String },

    #[error("documents nested deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

impl From<DocumentError> for RecorderError {
    fn from(err: DocumentError) -> Self {
        RecorderError::document(err.to_string())
    }
}

/// A typed leaf or nested document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    UInt(u64),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Master(Document),
}

impl Value {
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Master(doc) => Some(doc),
            _ => None,
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Self::Master(v)
    }
}

/// Ordered name/value entries. Names are unique within one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    entries: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set `name`, replacing an existing entry in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn uint(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Value::as_uint)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        self.get(name).and_then(Value::as_bytes)
    }

    pub fn document(&self, name: &str) -> Option<&Document> {
        self.get(name).and_then(Value::as_document)
    }

    /// Follow a chain of master elements.
    pub fn path(&self, names: &[&str]) -> Option<&Document> {
        names
            .iter()
            .try_fold(self, |doc, name| doc.document(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Document {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Serializer/deserializer for structured documents.
pub trait DocumentCodec: Send + Sync {
    /// Encode a document.
    ///
    /// # Errors
    /// Fails if an element is unknown or holds the wrong kind of value.
    fn serialize(&self, document: &Document) -> Result<Vec<u8>, DocumentError>;

    /// Decode a document.
    ///
    /// # Errors
    /// Fails on truncated or malformed data.
    fn deserialize(&self, bytes: &[u8]) -> Result<Document, DocumentError>;
}

/// EBML implementation of [`DocumentCodec`].
#[derive(Debug, Clone)]
pub struct EbmlCodec {
    schema: Arc<Schema>,
}

impl EbmlCodec {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema: Arc::new(schema),
        }
    }

    pub fn command_response() -> Self {
        Self::new(Schema::command_response())
    }

    pub fn device_info() -> Self {
        Self::new(Schema::device_info())
    }

    pub fn device_config() -> Self {
        Self::new(Schema::device_config())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn encode_document(
        &self,
        document: &Document,
        out: &mut Vec<u8>,
        depth: usize,
    ) -> Result<(), DocumentError> {
        if depth > MAX_DEPTH {
            return Err(DocumentError::TooDeep);
        }
        for (name, value) in document.iter() {
            let def = self
                .schema
                .by_name(name)
                .ok_or_else(|| DocumentError::UnknownElement {
                    name: name.to_string(),
                    schema: self.schema.name().to_string(),
                })?;
            let mismatch = || DocumentError::TypeMismatch {
                name: name.to_string(),
                expected: def.kind,
            };

            let data = match def.kind {
                ElementKind::UInt => encode_uint(value.as_uint().ok_or_else(mismatch)?),
                ElementKind::Int => encode_int(value.as_int().ok_or_else(mismatch)?),
                ElementKind::Str => value.as_str().ok_or_else(mismatch)?.as_bytes().to_vec(),
                ElementKind::Bytes => value.as_bytes().ok_or_else(mismatch)?.to_vec(),
                ElementKind::Master => {
                    let mut nested = Vec::new();
                    self.encode_document(
                        value.as_document().ok_or_else(mismatch)?,
                        &mut nested,
                        depth + 1,
                    )?;
                    nested
                }
            };

            write_id(def.id, out)?;
            write_size(data.len() as u64, out);
            out.extend_from_slice(&data);
        }
        Ok(())
    }

    fn decode_document(
        &self,
        bytes: &[u8],
        base: usize,
        depth: usize,
    ) -> Result<Document, DocumentError> {
        if depth > MAX_DEPTH {
            return Err(DocumentError::TooDeep);
        }
        let mut document = Document::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let (id, id_len) = read_id(&bytes[pos..], base + pos)?;
            pos += id_len;
            let (size, size_len) = read_size(&bytes[pos..], base + pos)?;
            pos += size_len;
            let end = usize::try_from(size)
                .ok()
                .and_then(|size| pos.checked_add(size))
                .filter(|&end| end <= bytes.len())
                .ok_or(DocumentError::Truncated { offset: base + pos })?;
            let data = &bytes[pos..end];

            match self.schema.by_id(id) {
                None => debug!(id = format_args!("0x{id:X}"), "skipping unknown element"),
                Some(def) => {
                    let value = match def.kind {
                        ElementKind::UInt => Value::UInt(decode_uint(&def.name, data)?),
                        ElementKind::Int => Value::Int(decode_int(&def.name, data)?),
                        ElementKind::Str => Value::Str(decode_str(&def.name, data)?),
                        ElementKind::Bytes => Value::Bytes(data.to_vec()),
                        ElementKind::Master => {
                            Value::Master(self.decode_document(data, base + pos, depth + 1)?)
                        }
                    };
                    document.insert(def.name.clone(), value);
                }
            }
            pos = end;
        }
        Ok(document)
    }
}

impl DocumentCodec for EbmlCodec {
    fn serialize(&self, document: &Document) -> Result<Vec<u8>, DocumentError> {
        let mut out = Vec::new();
        self.encode_document(document, &mut out, 0)?;
        Ok(out)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Document, DocumentError> {
        self.decode_document(bytes, 0, 0)
    }
}

fn write_id(id: u32, out: &mut Vec<u8>) -> Result<(), DocumentError> {
    let len = id_len(id).ok_or(DocumentError::InvalidId { id })?;
    out.extend_from_slice(&id.to_be_bytes()[4 - len..]);
    Ok(())
}

fn write_size(size: u64, out: &mut Vec<u8>) {
    // All-ones data bits mean "unknown size", so each width holds one less.
    let len = (1..=8u32)
        .find(|&len| size < (1u64 << (7 * len)) - 1)
        .unwrap_or(8);
    let marked = size | (1u64 << (7 * len));
    out.extend_from_slice(&marked.to_be_bytes()[8 - len as usize..]);
}

fn read_id(bytes: &[u8], offset: usize) -> Result<(u32, usize), DocumentError> {
    let first = *bytes.first().ok_or(DocumentError::Truncated { offset })?;
    let len = first.leading_zeros() as usize + 1;
    if len > 4 {
        return Err(DocumentError::InvalidVint { offset });
    }
    let raw = bytes
        .get(..len)
        .ok_or(DocumentError::Truncated { offset })?;
    let id = raw.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    Ok((id, len))
}

fn read_size(bytes: &[u8], offset: usize) -> Result<(u64, usize), DocumentError> {
    let first = *bytes.first().ok_or(DocumentError::Truncated { offset })?;
    if first == 0 {
        return Err(DocumentError::InvalidVint { offset });
    }
    let len = first.leading_zeros() as usize + 1;
    let raw = bytes
        .get(..len)
        .ok_or(DocumentError::Truncated { offset })?;
    let mut value = u64::from(first & (0xFF >> len));
    for &b in &raw[1..] {
        value = (value << 8) | u64::from(b);
    }
    if value == (1u64 << (7 * len)) - 1 {
        // Unknown-size elements are not used by recorders.
        return Err(DocumentError::InvalidVint { offset });
    }
    Ok((value, len))
}

fn encode_uint(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    bytes[skip..].to_vec()
}

fn encode_int(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Drop redundant sign-extension bytes.
    while start < 7 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        let redundant = (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn decode_uint(name: &str, data: &[u8]) -> Result<u64, DocumentError> {
    if data.len() > 8 {
        return Err(DocumentError::IntegerTooLarge {
            name: name.to_string(),
            len: data.len(),
        });
    }
    Ok(data.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

fn decode_int(name: &str, data: &[u8]) -> Result<i64, DocumentError> {
    let Some(&first) = data.first() else {
        return Ok(0);
    };
    let unsigned = decode_uint(name, data)?;
    let bits = data.len() * 8;
    if first & 0x80 != 0 && bits < 64 {
        Ok((unsigned | (u64::MAX << bits)) as i64)
    } else {
        Ok(unsigned as i64)
    }
}

fn decode_str(name: &str, data: &[u8]) -> Result<String, DocumentError> {
    let trimmed = match data.iter().position(|&b| b == 0) {
        Some(nul) => &data[..nul],
        None => data,
    };
    String::from_utf8(trimmed.to_vec()).map_err(|_| DocumentError::InvalidUtf8 {
        name: name.to_string(),
    })
}
