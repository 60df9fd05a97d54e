//! Synthetic recorder volumes.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use recorder_discovery::devinfo;
use recorder_discovery::{DiscoveryConfig, Mount, Registry, StaticMounts};
use recorder_protocol::{Document, DocumentCodec, EbmlCodec};

/// Write a recorder volume named `part_number` under `parent`.
pub fn recorder_dir(parent: &Path, part_number: &str, serial: u64, chip_id: u64) -> PathBuf {
    let root = parent.join(part_number);
    fs::create_dir_all(root.join("SYSTEM/DEV")).unwrap();
    let info = Document::new()
        .with("ProductName", part_number)
        .with("PartNumber", part_number)
        .with("RecorderSerial", serial)
        .with("UniqueChipID", chip_id)
        .with("HwRev", 20000u64)
        .with("FwRevStr", "3.0.0");
    write_devinfo(&root, info);
    root
}

pub fn write_devinfo(root: &Path, info: Document) {
    fs::write(root.join("SYSTEM/DEV/DEVINFO"), devinfo::encode(info).unwrap()).unwrap();
}

/// Mount entries marking each of `roots` as a FAT volume.
pub fn fat_mounts(roots: &[PathBuf]) -> StaticMounts {
    StaticMounts(
        roots
            .iter()
            .enumerate()
            .map(|(n, root)| Mount::new(format!("/dev/sd{}1", char::from(b'b' + n as u8)), root, "vfat"))
            .collect(),
    )
}

/// A strict registry that sees exactly `roots` as mounted.
pub fn registry_for(roots: &[PathBuf], config: DiscoveryConfig) -> Registry {
    Registry::new(config).with_mount_table(fat_mounts(roots))
}

/// An empty device configuration with the given root element.
pub fn config_file(root: &str) -> Vec<u8> {
    EbmlCodec::device_config()
        .serialize(&Document::new().with(root, Document::new()))
        .unwrap()
}
