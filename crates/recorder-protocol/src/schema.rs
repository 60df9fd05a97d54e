//! Element tables for the EBML documents exchanged with recorders.
//!
//! A [`Schema`] maps element names to their EBML IDs and value kinds. Three
//! tables ship with the library: [`Schema::command_response`] for command
//! traffic, [`Schema::device_info`] for the DEVINFO identity file and
//! [`Schema::device_config`] for the roots of `config.cfg`. All can be
//! extended at runtime with [`Schema::with_element`].

use std::collections::HashMap;
use std::fmt;

use crate::document::DocumentError;

/// Value kind of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    UInt,
    Int,
    Str,
    Bytes,
    Master,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UInt => "unsigned integer",
            Self::Int => "signed integer",
            Self::Str => "string",
            Self::Bytes => "binary",
            Self::Master => "master",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDef {
    pub id: u32,
    pub name: String,
    pub kind: ElementKind,
}

/// Number of bytes in an EBML ID, or `None` if `id` lacks a valid length
/// marker (or is a reserved all-ones ID).
#[must_use]
pub fn id_len(id: u32) -> Option<usize> {
    match id {
        0x80..=0xFE => Some(1),
        0x4000..=0x7FFE => Some(2),
        0x20_0000..=0x3F_FFFE => Some(3),
        0x1000_0000..=0x1FFF_FFFE => Some(4),
        _ => None,
    }
}

const COMMAND_RESPONSE_ELEMENTS: &[(u32, &str, ElementKind)] = &[
    // Envelopes
    (0x5100, "EBMLCommand", ElementKind::Master),
    (0x5101, "CommandIdx", ElementKind::UInt),
    (0x5102, "LockID", ElementKind::Bytes),
    (0x5200, "EBMLResponse", ElementKind::Master),
    (0x5201, "ResponseIdx", ElementKind::UInt),
    (0x5202, "CMDQueueDepth", ElementKind::UInt),
    (0x5203, "DeviceStatusCode", ElementKind::Int),
    (0x5204, "DeviceStatusMessage", ElementKind::Str),
    // Commands
    (0x5700, "SendPing", ElementKind::Bytes),
    (0x5701, "GetClock", ElementKind::Master),
    (0x5702, "SetClock", ElementKind::Bytes),
    (0x5703, "RecStart", ElementKind::Master),
    (0x5704, "RecStop", ElementKind::Master),
    (0x5705, "Reset", ElementKind::Master),
    (0x5706, "Blink", ElementKind::Bytes),
    (0x5707, "GetBattery", ElementKind::Master),
    (0x5708, "SetKeys", ElementKind::Bytes),
    (0x5709, "SecureUpdateAll", ElementKind::Master),
    (0x570A, "LegacyAll", ElementKind::Master),
    (0x570B, "QueryWiFi", ElementKind::Master),
    (0x570C, "NetworkStatus", ElementKind::Master),
    (0x5B00, "GetInfo", ElementKind::UInt),
    (0x5B01, "SetInfo", ElementKind::Master),
    (0x5B02, "InfoIndex", ElementKind::UInt),
    (0x5B03, "InfoPayload", ElementKind::Bytes),
    (0x5B04, "GetLockID", ElementKind::Master),
    (0x5B05, "SetLockID", ElementKind::Master),
    (0x5B06, "CurrentLockID", ElementKind::Bytes),
    (0x5B07, "NewLockID", ElementKind::Bytes),
    // Response payloads
    (0x5205, "PingReply", ElementKind::Bytes),
    (0x5206, "ClockTime", ElementKind::Bytes),
    (0x5207, "BatteryState", ElementKind::UInt),
    (0x5208, "GetInfoResponse", ElementKind::Master),
    (0x5209, "QueryWiFiResponse", ElementKind::Master),
    (0x520A, "WiFiConnectionStatus", ElementKind::UInt),
    (0x520B, "SSID", ElementKind::Str),
    (0x520C, "NetworkStatusResponse", ElementKind::Master),
    (0x520D, "CurrentWiFiStatus", ElementKind::UInt),
    (0x520E, "IPV4Address", ElementKind::Bytes),
    (0x520F, "MACAddress", ElementKind::Bytes),
];

const DEVICE_INFO_ELEMENTS: &[(u32, &str, ElementKind)] = &[
    (0x1852_6563, "RecordingProperties", ElementKind::Master),
    (0x4000, "RecorderInfo", ElementKind::Master),
    (0x4001, "RecorderTypeUID", ElementKind::UInt),
    (0x4002, "RecorderSerial", ElementKind::UInt),
    (0x4003, "ProductName", ElementKind::Str),
    (0x4004, "PartNumber", ElementKind::Str),
    (0x4005, "HwRev", ElementKind::UInt),
    (0x4006, "FwRev", ElementKind::UInt),
    (0x4007, "FwRevStr", ElementKind::Str),
    (0x4008, "McuType", ElementKind::Str),
    (0x4009, "UniqueChipID", ElementKind::UInt),
    (0x400A, "UniqueChipIDLong", ElementKind::Bytes),
    (0x400B, "UserDeviceName", ElementKind::Str),
    (0x400C, "DateOfManufacture", ElementKind::Int),
    (0x400D, "FileCommandInterface", ElementKind::UInt),
];

// Only the root elements; configuration items are opaque to this library.
const DEVICE_CONFIG_ELEMENTS: &[(u32, &str, ElementKind)] = &[
    (0x1A00_5100, "RecorderConfiguration", ElementKind::Master),
    (0x1A00_5200, "RecorderConfigurationList", ElementKind::Master),
];

/// Bidirectional name/ID lookup for one document type.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    by_name: HashMap<String, ElementDef>,
    by_id: HashMap<u32, ElementDef>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    fn from_table(name: &str, table: &[(u32, &str, ElementKind)]) -> Self {
        let mut schema = Self::new(name);
        for &(id, element, kind) in table {
            schema.insert(ElementDef {
                id,
                name: element.to_string(),
                kind,
            });
        }
        schema
    }

    /// Schema for `EBMLCommand` / `EBMLResponse` documents.
    pub fn command_response() -> Self {
        Self::from_table("command-response", COMMAND_RESPONSE_ELEMENTS)
    }

    /// Schema for the DEVINFO identity document.
    pub fn device_info() -> Self {
        Self::from_table("device-info", DEVICE_INFO_ELEMENTS)
    }

    /// Schema for the root of a device configuration file.
    pub fn device_config() -> Self {
        Self::from_table("device-config", DEVICE_CONFIG_ELEMENTS)
    }

    fn insert(&mut self, def: ElementDef) {
        self.by_id.insert(def.id, def.clone());
        self.by_name.insert(def.name.clone(), def);
    }

    /// Add (or redefine) an element.
    ///
    /// # Errors
    /// Returns `DocumentError::InvalidId` if `id` is not a valid EBML ID, or
    /// `DocumentError::DuplicateId` if another element already uses it.
    pub fn with_element(
        mut self,
        id: u32,
        name: impl Into<String>,
        kind: ElementKind,
    ) -> Result<Self, DocumentError> {
        let name = name.into();
        if id_len(id).is_none() {
            return Err(DocumentError::InvalidId { id });
        }
        if let Some(existing) = self.by_id.get(&id)
            && existing.name != name
        {
            return Err(DocumentError::DuplicateId {
                id,
                existing: existing.name.clone(),
            });
        }
        if let Some(previous) = self.by_name.remove(&name) {
            self.by_id.remove(&previous.id);
        }
        self.insert(ElementDef { id, name, kind });
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn by_name(&self, name: &str) -> Option<&ElementDef> {
        self.by_name.get(name)
    }

    pub fn by_id(&self, id: u32) -> Option<&ElementDef> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
