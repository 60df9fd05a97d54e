//! DEVINFO identification.
//!
//! A mounted recorder describes itself in `SYSTEM/DEV/DEVINFO`, an EBML
//! document whose `RecordingProperties > RecorderInfo` element carries the
//! identity fields. Only that element is decoded; anything else in the file
//! is kept as raw bytes.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;

use recorder_core::constants::{INFO_FILE, MAX_INFO_FILE_SIZE};
use recorder_core::{DeviceIdentity, RecorderError, Result};
use recorder_protocol::{Document, DocumentCodec, EbmlCodec};
use tracing::trace;

use crate::kind::RecorderKind;

/// Identity read from one DEVINFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identity: DeviceIdentity,
    pub kind: RecorderKind,
    /// `Some(false)` when the firmware disables the file command interface.
    pub file_command_interface: Option<bool>,
    raw: Vec<u8>,
}

impl DeviceInfo {
    /// Decode DEVINFO bytes.
    ///
    /// # Errors
    /// `RecorderError::Document` if the bytes are not a DEVINFO document.
    /// A product name no family claims gives a
    /// [`Generic`](RecorderKind::Generic) recorder.
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        let document = EbmlCodec::device_info().deserialize(&raw)?;
        let info = document
            .path(&["RecordingProperties", "RecorderInfo"])
            .or_else(|| document.document("RecorderInfo"))
            .ok_or_else(|| RecorderError::document("DEVINFO has no RecorderInfo"))?;

        let product_name = info
            .str("ProductName")
            .or_else(|| info.str("PartNumber"))
            .ok_or_else(|| RecorderError::document("DEVINFO has no ProductName"))?;
        let kind = RecorderKind::from_product_name(product_name);

        let identity = identity_from(info, product_name);
        trace!(product = %identity.product_name, serial = ?identity.serial, "parsed DEVINFO");
        Ok(Self {
            identity,
            kind,
            file_command_interface: info.uint("FileCommandInterface").map(|flag| flag != 0),
            raw,
        })
    }

    /// Read and decode `<root>/SYSTEM/DEV/DEVINFO`.
    ///
    /// # Errors
    /// `RecorderError::Io` if the file cannot be read, or is larger than a
    /// DEVINFO can be; see also [`parse`](Self::parse).
    pub fn read(root: &Path) -> Result<Self> {
        Self::parse(read_raw(root)?)
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Cache key: a hash of the raw DEVINFO bytes.
    pub fn hash_key(&self) -> u64 {
        hash_key(&self.raw)
    }

    /// Formatted serial number, empty if the device reports none.
    pub fn serial_string(&self) -> String {
        self.identity
            .serial
            .map(|sn| self.kind.format_serial(sn, &self.identity.part_number))
            .unwrap_or_default()
    }
}

fn identity_from(info: &Document, product_name: &str) -> DeviceIdentity {
    let mut identity = DeviceIdentity::new(product_name, info.str("PartNumber").unwrap_or(product_name));
    identity.serial = info.uint("RecorderSerial").and_then(|sn| u32::try_from(sn).ok());
    identity.hardware_revision = info.uint("HwRev").and_then(|rev| u32::try_from(rev).ok());
    identity.firmware_revision = info.uint("FwRev").and_then(|rev| u32::try_from(rev).ok());
    identity.firmware = info.str("FwRevStr").map(str::to_owned);
    identity.mcu_type = info.str("McuType").map(str::to_owned);
    identity.chip_id = info
        .bytes("UniqueChipIDLong")
        .filter(|bytes| !bytes.is_empty() && bytes.len() <= 16)
        .map(|bytes| bytes.iter().fold(0u128, |acc, &b| (acc << 8) | u128::from(b)))
        .or_else(|| info.uint("UniqueChipID").map(u128::from));
    identity.user_name = info.str("UserDeviceName").map(str::to_owned);
    identity.date_of_manufacture = info.int("DateOfManufacture");
    identity
}

/// Raw DEVINFO bytes of the volume at `root`.
///
/// # Errors
/// `RecorderError::Io` on read failure or an oversized file.
pub fn read_raw(root: &Path) -> Result<Vec<u8>> {
    let path = root.join(INFO_FILE);
    let size = fs::metadata(&path)?.len();
    if size > MAX_INFO_FILE_SIZE {
        return Err(RecorderError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{} is too large ({size} bytes)", path.display()),
        )));
    }
    Ok(fs::read(&path)?)
}

/// Hash of raw DEVINFO bytes. Stable for the life of the process.
pub fn hash_key(raw: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    raw.hash(&mut hasher);
    hasher.finish()
}

/// Encode a DEVINFO document, as a recorder's firmware writes it.
///
/// # Errors
/// `RecorderError::Document` if `info` holds unknown elements.
pub fn encode(info: Document) -> Result<Vec<u8>> {
    let document = Document::new().with("RecordingProperties", Document::new().with("RecorderInfo", info));
    Ok(EbmlCodec::device_info().serialize(&document)?)
}
