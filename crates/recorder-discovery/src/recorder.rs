//! A single recorder, identified by its DEVINFO and reached through its
//! mounted volume.
//!
//! The command interface is built on first use. Serial is preferred when a
//! USB port with the recorder's serial number is present; otherwise the
//! volume's `COMMAND`/`RESPONSE` files are used, unless the firmware has
//! disabled them.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use recorder_command::{CommandConfig, CommandInterface, DeviceLock};
use recorder_core::constants::{
    INFO_FILE, MANIFEST_FILE, PROPERTIES_FILE, SYSCAL_FILE, USERCAL_FILE, USERPAGE_COUNT,
    USERPAGE_FILE_PREFIX,
};
use recorder_core::{DeviceIdentity, RecorderError, Result};
use recorder_transport::{AnyTransport, FileTransport, SerialConfig, SerialTransport, find_port};
use tracing::{debug, info};

use crate::config_interface::ConfigInterface;
use crate::devinfo::DeviceInfo;
use crate::kind::RecorderKind;

pub struct Recorder {
    path: Arc<RwLock<PathBuf>>,
    info: DeviceInfo,
    lock: Arc<DeviceLock>,
    command: Mutex<Option<Arc<CommandInterface>>>,
    command_config: CommandConfig,
    serial_config: SerialConfig,
}

impl Recorder {
    /// Identify the recorder mounted at `path`.
    ///
    /// # Errors
    /// See [`DeviceInfo::read`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let info = DeviceInfo::read(&path)?;
        Ok(Self::from_info(path, info))
    }

    pub fn from_info(path: impl Into<PathBuf>, info: DeviceInfo) -> Self {
        let command_config = CommandConfig::default();
        Self {
            path: Arc::new(RwLock::new(path.into())),
            info,
            lock: Arc::new(DeviceLock::with_timeout(command_config.lock_timeout)),
            command: Mutex::new(None),
            command_config,
            serial_config: SerialConfig::default(),
        }
    }

    /// Settings for the command interface built later.
    #[must_use]
    pub fn with_command_config(mut self, config: CommandConfig) -> Self {
        self.lock = Arc::new(DeviceLock::with_timeout(config.lock_timeout));
        self.command_config = config;
        self
    }

    #[must_use]
    pub fn with_serial_config(mut self, config: SerialConfig) -> Self {
        self.serial_config = config;
        self
    }

    pub fn path(&self) -> PathBuf {
        self.path.read().clone()
    }

    /// Point the recorder at a new mount point. A command interface built
    /// for the old path is dropped.
    pub fn set_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut current = self.path.write();
        if *current != path {
            info!(serial = %self.serial_string(), from = %current.display(), to = %path.display(), "recorder moved");
            *current = path;
            drop(current);
            self.command_slot().take();
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.info.identity
    }

    pub fn kind(&self) -> RecorderKind {
        self.info.kind
    }

    pub fn serial(&self) -> Option<u32> {
        self.info.identity.serial
    }

    pub fn serial_string(&self) -> String {
        self.info.serial_string()
    }

    pub fn chip_id(&self) -> Option<u128> {
        self.info.identity.chip_id
    }

    pub fn product_name(&self) -> &str {
        &self.info.identity.product_name
    }

    pub fn part_number(&self) -> &str {
        &self.info.identity.part_number
    }

    pub fn has_wifi(&self) -> bool {
        self.info.kind.has_wifi()
    }

    /// Registry key; see [`DeviceInfo::hash_key`].
    pub fn hash_key(&self) -> u64 {
        self.info.hash_key()
    }

    /// The lock shared by every command interface of this recorder.
    pub fn device_lock(&self) -> &Arc<DeviceLock> {
        &self.lock
    }

    /// Whether the volume is still mounted.
    pub fn is_available(&self) -> bool {
        self.path().join(INFO_FILE).is_file()
    }

    fn command_slot(&self) -> MutexGuard<'_, Option<Arc<CommandInterface>>> {
        self.command.lock()
    }

    /// The recorder's command interface, built on first call.
    ///
    /// # Errors
    /// `RecorderError::UnsupportedFeature` if the recorder has neither a
    /// serial port nor an enabled file interface.
    pub fn command_interface(&self) -> Result<Arc<CommandInterface>> {
        let mut slot = self.command_slot();
        if let Some(interface) = slot.as_ref() {
            return Ok(Arc::clone(interface));
        }
        let interface = Arc::new(self.build_command_interface()?);
        *slot = Some(Arc::clone(&interface));
        Ok(interface)
    }

    /// Install a prebuilt command interface, e.g. one over a simulated
    /// transport. It should share [`device_lock`](Self::device_lock).
    pub fn set_command_interface(&self, interface: CommandInterface) {
        *self.command_slot() = Some(Arc::new(interface));
    }

    fn build_command_interface(&self) -> Result<CommandInterface> {
        let root = self.path();
        let transport = if let Some(port) = self.serial().and_then(find_port) {
            debug!(port = %port, serial = %self.serial_string(), "using serial command interface");
            AnyTransport::from(SerialTransport::with_config(port, self.serial_config.clone()))
        } else if self.info.file_command_interface != Some(false) && FileTransport::has_interface(&root) {
            debug!(root = %root.display(), "using file command interface");
            AnyTransport::from(
                FileTransport::new(root).with_poll_interval(self.command_config.poll_interval),
            )
        } else {
            return Err(RecorderError::unsupported(format!(
                "{} {} has no command interface",
                self.info.kind,
                self.serial_string()
            )));
        };

        let file_backed = matches!(transport, AnyTransport::File(_));
        let interface = CommandInterface::with_config(transport, self.command_config.clone())
            .with_lock(Arc::clone(&self.lock))
            .with_wifi(self.has_wifi());
        if !file_backed {
            return Ok(interface);
        }
        let path = Arc::clone(&self.path);
        Ok(interface.with_availability(move || path.read().join(INFO_FILE).is_file()))
    }

    /// Access to `config.cfg` and `CONFIG.UI` at the current mount point.
    pub fn config_interface(&self) -> ConfigInterface {
        ConfigInterface::for_device(self.path(), &self.info)
    }

    fn read_system_file(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path().join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Raw `SYSTEM/DEV/manifest`, if present.
    ///
    /// # Errors
    /// `RecorderError::Io` on read failure.
    pub fn manifest(&self) -> Result<Option<Vec<u8>>> {
        self.read_system_file(MANIFEST_FILE)
    }

    /// Raw factory calibration (`SYSTEM/DEV/syscal`).
    ///
    /// # Errors
    /// `RecorderError::Io` on read failure.
    pub fn calibration(&self) -> Result<Option<Vec<u8>>> {
        self.read_system_file(SYSCAL_FILE)
    }

    /// Raw user calibration (`SYSTEM/usercal.dat`).
    ///
    /// # Errors
    /// `RecorderError::Io` on read failure.
    pub fn user_calibration(&self) -> Result<Option<Vec<u8>>> {
        self.read_system_file(USERCAL_FILE)
    }

    /// Raw userpage `page` (`SYSTEM/DEV/USERPG0` to `USERPG3`). Only
    /// EFM32-based devices have userpages.
    ///
    /// # Errors
    /// `RecorderError::InvalidArgument` for a page past the last one;
    /// `RecorderError::Io` on read failure.
    pub fn userpage(&self, page: usize) -> Result<Option<Vec<u8>>> {
        if page >= USERPAGE_COUNT {
            return Err(RecorderError::invalid_argument(format!(
                "userpage {page} out of range (0-{})",
                USERPAGE_COUNT - 1
            )));
        }
        self.read_system_file(&format!("{USERPAGE_FILE_PREFIX}{page}"))
    }

    /// Raw `SYSTEM/DEV/DEVPROPS`.
    ///
    /// # Errors
    /// `RecorderError::Io` on read failure.
    pub fn properties(&self) -> Result<Option<Vec<u8>>> {
        self.read_system_file(PROPERTIES_FILE)
    }
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("kind", &self.info.kind)
            .field("serial", &self.serial_string())
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} at {}", self.info.kind, self.serial_string(), self.path().display())
    }
}

/// Whether `root` has the directory layout of a recorder volume.
pub fn has_recorder_layout(root: &Path) -> bool {
    root.join(INFO_FILE).is_file()
}
