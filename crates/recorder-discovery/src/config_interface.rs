//! Access to a recorder's configuration files.
//!
//! The device reads `SYSTEM/config.cfg` when it starts recording and
//! describes its configurable items in `SYSTEM/CONFIG.UI`. Both are kept
//! as raw bytes here; only the root element of `config.cfg` is decoded, to
//! tell the legacy format from the current one.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use recorder_core::constants::{
    CONFIG_FILE, CONFIG_UI_FILE, DEVICE_CONFIG_VERSION, INFO_FILE, LEGACY_DEVICE_CONFIG_VERSION,
};
use recorder_core::{RecorderError, Result};
use recorder_protocol::{DocumentCodec, EbmlCodec};
use tracing::{debug, info};

use crate::devinfo::DeviceInfo;

/// MCU whose early firmware only understands legacy configuration.
const LEGACY_MCU: &str = "EFM32GG330";

/// First firmware revision of [`LEGACY_MCU`] devices that also reads the
/// current format.
const LEGACY_MCU_CURRENT_FORMAT_REV: u32 = 15;

/// Version of an encoded configuration, from its root element.
///
/// # Errors
/// `RecorderError::Document` if `data` does not decode;
/// `RecorderError::Config` if it has no configuration root.
pub fn detect_version(data: &[u8]) -> Result<u32> {
    let document = EbmlCodec::device_config().deserialize(data)?;
    if document.contains("RecorderConfigurationList") {
        Ok(DEVICE_CONFIG_VERSION)
    } else if document.contains("RecorderConfiguration") {
        Ok(LEGACY_DEVICE_CONFIG_VERSION)
    } else {
        Err(RecorderError::config("data is not a recorder configuration"))
    }
}

#[derive(Debug, Clone)]
pub struct ConfigInterface {
    root: PathBuf,
    supported: Vec<u32>,
}

impl ConfigInterface {
    /// Interface for the volume at `root`, accepting only the current
    /// configuration format.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            supported: vec![DEVICE_CONFIG_VERSION],
        }
    }

    /// Interface for a recorder, with the formats its firmware reads.
    pub fn for_device(root: impl Into<PathBuf>, info: &DeviceInfo) -> Self {
        let identity = &info.identity;
        let legacy_mcu = identity
            .mcu_type
            .as_deref()
            .is_none_or(|mcu| mcu.starts_with(LEGACY_MCU));
        let supported = if !legacy_mcu {
            vec![DEVICE_CONFIG_VERSION]
        } else if identity.firmware_revision.unwrap_or(0) >= LEGACY_MCU_CURRENT_FORMAT_REV {
            vec![LEGACY_DEVICE_CONFIG_VERSION, DEVICE_CONFIG_VERSION]
        } else {
            vec![LEGACY_DEVICE_CONFIG_VERSION]
        };
        Self {
            root: root.into(),
            supported,
        }
    }

    /// Whether the volume at `root` describes its configuration.
    pub fn has_interface(root: &Path) -> bool {
        root.join(CONFIG_UI_FILE).is_file()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Whether the volume is still mounted.
    pub fn is_available(&self) -> bool {
        self.root.join(INFO_FILE).is_file()
    }

    /// Supported configuration versions, oldest first.
    pub fn supported_versions(&self) -> &[u32] {
        &self.supported
    }

    /// The version written when the caller does not pick one.
    pub fn preferred_version(&self) -> u32 {
        self.supported.last().copied().unwrap_or(DEVICE_CONFIG_VERSION)
    }

    /// # Errors
    /// `RecorderError::ConfigVersion` if the device cannot read `version`.
    pub fn check_version(&self, version: u32) -> Result<()> {
        if self.supported.contains(&version) {
            Ok(())
        } else {
            Err(RecorderError::ConfigVersion {
                found: version,
                supported: self.preferred_version(),
            })
        }
    }

    /// Raw `CONFIG.UI`, if the device has one.
    ///
    /// # Errors
    /// `RecorderError::Io` on read failure.
    pub fn config_ui(&self) -> Result<Option<Vec<u8>>> {
        read_optional(&self.root.join(CONFIG_UI_FILE))
    }

    /// Raw `config.cfg`. `None` when the device has never been configured.
    ///
    /// # Errors
    /// `RecorderError::Io` on read failure.
    pub fn read_config(&self) -> Result<Option<Vec<u8>>> {
        Ok(read_optional(&self.config_path())?.filter(|data| !data.is_empty()))
    }

    /// Format of the current `config.cfg`, if there is one.
    ///
    /// # Errors
    /// See [`read_config`](Self::read_config) and [`detect_version`].
    pub fn config_version(&self) -> Result<Option<u32>> {
        self.read_config()?.map(|data| detect_version(&data)).transpose()
    }

    /// Replace `config.cfg` with `data`.
    ///
    /// The data is checked before anything on the volume changes, and
    /// written beside the old file first so a failed write leaves the old
    /// configuration in place.
    ///
    /// # Errors
    /// - `RecorderError::Io` if the volume is gone or the write fails.
    /// - `RecorderError::Config` or `RecorderError::Document` if `data` is
    ///   not a configuration.
    /// - `RecorderError::ConfigVersion` if the device cannot read its format.
    pub fn write_config(&self, data: &[u8]) -> Result<()> {
        if !self.is_available() {
            return Err(RecorderError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("Could not find recorder at {}; is it connected?", self.root.display()),
            )));
        }
        let version = detect_version(data)?;
        self.check_version(version)?;

        let path = self.config_path();
        let staged = path.with_extension("cfg.new");
        if let Err(err) = fs::write(&staged, data).and_then(|()| fs::rename(&staged, &path)) {
            debug!(path = %staged.display(), "removing partial configuration");
            let _ = fs::remove_file(&staged);
            return Err(err.into());
        }
        info!(path = %path.display(), version, bytes = data.len(), "configuration written");
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
