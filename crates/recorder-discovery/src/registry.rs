//! Weak cache of known recorders.
//!
//! Recorders are keyed by a hash of their DEVINFO bytes, so the same
//! physical device maps to the same [`Recorder`] no matter where it is
//! mounted. The registry holds only [`Weak`] references: once the caller
//! drops every `Arc<Recorder>`, the entry is dead and a later lookup builds
//! a new recorder. A live entry is never evicted; `cache_size` only bounds
//! how many entries are kept before dead ones are swept.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use recorder_command::CommandConfig;
use recorder_core::{DeviceSelector, Result};
use recorder_transport::SerialConfig;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::devinfo::{self, DeviceInfo};
use crate::mounts::{Mount, MountTable, system_mounts};
use crate::recorder::{Recorder, has_recorder_layout};

#[derive(Debug)]
struct Entry {
    key: u64,
    recorder: Weak<Recorder>,
}

/// What [`Registry::device_changed`] saw last time.
#[derive(Debug, Default)]
struct Snapshot {
    mounts: Option<Vec<Mount>>,
    recorders: Option<Vec<PathBuf>>,
}

#[derive(Debug)]
pub struct Registry {
    config: DiscoveryConfig,
    command_config: CommandConfig,
    serial_config: SerialConfig,
    mounts: Box<dyn MountTable>,
    entries: Mutex<Vec<Entry>>,
    snapshot: Mutex<Snapshot>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DiscoveryConfig::default())
    }
}

impl Registry {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            command_config: CommandConfig::default(),
            serial_config: SerialConfig::default(),
            mounts: system_mounts(),
            entries: Mutex::new(Vec::new()),
            snapshot: Mutex::new(Snapshot::default()),
        }
    }

    #[must_use]
    pub fn with_mount_table(mut self, mounts: impl MountTable + 'static) -> Self {
        self.mounts = Box::new(mounts);
        self
    }

    /// Settings for the command interfaces of recorders created from now on.
    #[must_use]
    pub fn with_command_config(mut self, config: CommandConfig) -> Self {
        self.command_config = config;
        self
    }

    #[must_use]
    pub fn with_serial_config(mut self, config: SerialConfig) -> Self {
        self.serial_config = config;
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Whether `path` looks like a recorder volume. Strict checks also
    /// require `path` to be a FAT mount point.
    pub fn is_recorder(&self, path: &Path, strict: bool) -> bool {
        if !has_recorder_layout(path) {
            return false;
        }
        if !strict {
            return true;
        }
        match self.mounts.mount_at(path) {
            Ok(Some(mount)) => mount.is_fat(),
            Ok(None) => false,
            Err(err) => {
                debug!(error = %err, "mount table unavailable");
                false
            }
        }
    }

    /// Root of the recorder volume holding `path`, which may be a file or
    /// directory anywhere on it. The path itself need not exist.
    pub fn on_recorder(&self, path: &Path, strict: bool) -> Option<PathBuf> {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        path.ancestors()
            .find(|candidate| self.is_recorder(candidate, strict))
            .map(|root| root.canonicalize().unwrap_or_else(|_| root.to_path_buf()))
    }

    /// The recorder at `path`, from the cache when its DEVINFO is known.
    ///
    /// Returns `Ok(None)` when `path` is not a recorder.
    ///
    /// # Errors
    /// `RecorderError::Io` if DEVINFO cannot be read. In strict mode, also
    /// `RecorderError::Document` if it does not decode.
    pub fn get_recorder(&self, path: &Path, strict: bool) -> Result<Option<Arc<Recorder>>> {
        if !self.is_recorder(path, strict) {
            return Ok(None);
        }
        let raw = devinfo::read_raw(path)?;
        let key = devinfo::hash_key(&raw);

        let mut entries = self.entries.lock();
        if let Some(at) = entries.iter().position(|entry| entry.key == key) {
            let entry = entries.remove(at);
            if let Some(recorder) = entry.recorder.upgrade() {
                entries.push(entry);
                if self.config.update_paths {
                    recorder.set_path(path);
                }
                return Ok(Some(recorder));
            }
        }

        let info = match DeviceInfo::parse(raw) {
            Ok(info) => info,
            Err(err) if !strict => {
                warn!(path = %path.display(), error = %err, "unreadable DEVINFO");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let recorder = Arc::new(
            Recorder::from_info(path, info)
                .with_command_config(self.command_config.clone())
                .with_serial_config(self.serial_config.clone()),
        );
        info!(recorder = %recorder, "found recorder");
        entries.push(Entry {
            key,
            recorder: Arc::downgrade(&recorder),
        });
        if entries.len() > self.config.cache_size {
            entries.retain(|entry| entry.recorder.strong_count() > 0);
            if entries.len() > self.config.cache_size {
                debug!(live = entries.len(), cache_size = self.config.cache_size, "every cached recorder is in use");
            }
        }
        Ok(Some(recorder))
    }

    /// Mount points that hold recorders, without identifying them.
    ///
    /// # Errors
    /// `RecorderError::Io` if the mount table cannot be read.
    pub fn device_list(&self, strict: bool) -> Result<Vec<PathBuf>> {
        Ok(recorder_mounts(&self.mounts.mounts()?, strict))
    }

    /// Whether a volume was mounted or unmounted since the previous call.
    /// With `recorders_only`, only changes to recorder volumes count. The
    /// first call always reports a change.
    ///
    /// This only reads the mount table and checks for DEVINFO, so it is
    /// cheap enough to poll.
    ///
    /// # Errors
    /// `RecorderError::Io` if the mount table cannot be read.
    pub fn device_changed(&self, recorders_only: bool) -> Result<bool> {
        let mounts = self.mounts.mounts()?;
        let mut snapshot = self.snapshot.lock();
        let recorders = recorder_mounts(&mounts, self.config.strict);

        let mounts_changed = snapshot.mounts.as_ref() != Some(&mounts);
        let recorders_changed = snapshot.recorders.as_ref() != Some(&recorders);
        snapshot.mounts = Some(mounts);
        snapshot.recorders = Some(recorders);
        Ok(if recorders_only { recorders_changed } else { mounts_changed })
    }

    /// Forget what [`device_changed`](Self::device_changed) has seen, so
    /// the next call reports a change.
    pub fn reset_device_changed(&self) {
        *self.snapshot.lock() = Snapshot::default();
    }

    /// Identify every recorder among `paths`, or among all mount points.
    ///
    /// A path that fails identification is logged and skipped.
    ///
    /// # Errors
    /// `RecorderError::Io` if the mount table cannot be read.
    pub fn scan(&self, paths: Option<&[PathBuf]>, strict: bool) -> Result<Vec<Arc<Recorder>>> {
        let candidates = match paths {
            Some(paths) => paths.to_vec(),
            None => self.mounts.mounts()?.into_iter().map(|mount| mount.path).collect(),
        };

        let mut found: Vec<Arc<Recorder>> = Vec::new();
        for path in &candidates {
            match self.get_recorder(path, strict) {
                Ok(Some(recorder)) => {
                    if !found.iter().any(|known| Arc::ptr_eq(known, &recorder)) {
                        found.push(recorder);
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "skipping volume"),
            }
        }
        debug!(candidates = candidates.len(), found = found.len(), "scan finished");
        Ok(found)
    }

    /// [`scan`](Self::scan) with the configured strictness.
    ///
    /// # Errors
    /// See [`scan`](Self::scan).
    pub fn get_devices(&self, paths: Option<&[PathBuf]>) -> Result<Vec<Arc<Recorder>>> {
        self.scan(paths, self.config.strict)
    }

    /// The first attached recorder matching `selector`. Cached recorders
    /// are checked before scanning.
    ///
    /// # Errors
    /// See [`scan`](Self::scan).
    pub fn find_device(
        &self,
        selector: DeviceSelector,
        paths: Option<&[PathBuf]>,
    ) -> Result<Option<Arc<Recorder>>> {
        if let Some(recorder) = self
            .recorders()
            .into_iter()
            .find(|recorder| recorder.is_available() && selector.matches(recorder.identity()))
        {
            return Ok(Some(recorder));
        }
        Ok(self
            .get_devices(paths)?
            .into_iter()
            .find(|recorder| selector.matches(recorder.identity())))
    }

    /// Live cached recorders, least recently used first.
    pub fn recorders(&self) -> Vec<Arc<Recorder>> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| entry.recorder.upgrade())
            .collect()
    }

    /// Number of live cached recorders.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.recorder.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every recorder. Existing `Arc`s stay usable.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn recorder_mounts(mounts: &[Mount], strict: bool) -> Vec<PathBuf> {
    mounts
        .iter()
        .filter(|mount| !strict || mount.is_fat())
        .filter(|mount| has_recorder_layout(&mount.path))
        .map(|mount| mount.path.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::RecorderKind;
    use crate::mounts::StaticMounts;
    use recorder_core::RecorderError;
    use recorder_protocol::Document;
    use std::fs;
    use tempfile::TempDir;

    fn volume(serial: u64) -> TempDir {
        let dir = TempDir::new().unwrap();
        let info = Document::new()
            .with("ProductName", "S3-E25D40")
            .with("PartNumber", "S3-E25D40")
            .with("RecorderSerial", serial);
        fs::create_dir_all(dir.path().join("SYSTEM/DEV")).unwrap();
        fs::write(dir.path().join("SYSTEM/DEV/DEVINFO"), devinfo::encode(info).unwrap()).unwrap();
        dir
    }

    fn registry(config: DiscoveryConfig) -> Registry {
        Registry::new(config).with_mount_table(StaticMounts::default())
    }

    #[test]
    fn test_cache_returns_same_object() {
        let dir = volume(1);
        let registry = registry(DiscoveryConfig::default().with_strict(false));
        let a = registry.get_recorder(dir.path(), false).unwrap().unwrap();
        let b = registry.get_recorder(dir.path(), false).unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dropped_recorder_is_swept() {
        let dir = volume(1);
        let registry = registry(DiscoveryConfig::default());
        let first = registry.get_recorder(dir.path(), false).unwrap().unwrap();
        let key = first.hash_key();
        drop(first);
        assert!(registry.is_empty());
        let again = registry.get_recorder(dir.path(), false).unwrap().unwrap();
        assert_eq!(again.hash_key(), key);
    }

    #[test]
    fn test_live_recorders_outlast_cache_size() {
        let dirs: Vec<_> = (1..=3).map(volume).collect();
        let registry = registry(DiscoveryConfig::default().with_cache_size(1));
        let held: Vec<_> = dirs
            .iter()
            .map(|dir| registry.get_recorder(dir.path(), false).unwrap().unwrap())
            .collect();
        assert_eq!(registry.len(), 3);

        let reloaded = registry.get_recorder(dirs[0].path(), false).unwrap().unwrap();
        assert!(Arc::ptr_eq(&reloaded, &held[0]));
        assert!(Arc::ptr_eq(reloaded.device_lock(), held[0].device_lock()));
        let serials: Vec<_> = registry.recorders().iter().map(|r| r.serial()).collect();
        assert_eq!(serials, vec![Some(2), Some(3), Some(1)]);
    }

    #[test]
    fn test_cache_size_sweeps_dead_entries() {
        let dirs: Vec<_> = (1..=3).map(volume).collect();
        let registry = registry(DiscoveryConfig::default().with_cache_size(2));
        let kept = registry.get_recorder(dirs[0].path(), false).unwrap().unwrap();
        drop(registry.get_recorder(dirs[1].path(), false).unwrap());
        assert_eq!(registry.entries.lock().len(), 2);

        let third = registry.get_recorder(dirs[2].path(), false).unwrap().unwrap();
        assert_eq!(registry.entries.lock().len(), 2);
        let live: Vec<_> = registry.recorders();
        assert!(Arc::ptr_eq(&live[0], &kept));
        assert!(Arc::ptr_eq(&live[1], &third));
    }

    #[test]
    fn test_strict_requires_fat_mount() {
        let dir = volume(1);
        let loose = registry(DiscoveryConfig::default());
        assert!(loose.is_recorder(dir.path(), false));
        assert!(!loose.is_recorder(dir.path(), true));

        let fat = registry(DiscoveryConfig::default())
            .with_mount_table(StaticMounts(vec![Mount::new("/dev/sdb1", dir.path(), "vfat")]));
        assert!(fat.is_recorder(dir.path(), true));

        let ext4 = registry(DiscoveryConfig::default())
            .with_mount_table(StaticMounts(vec![Mount::new("/dev/sdb1", dir.path(), "ext4")]));
        assert!(!ext4.is_recorder(dir.path(), true));
    }

    #[test]
    fn test_unknown_product_is_a_generic_recorder() {
        let dir = TempDir::new().unwrap();
        let info = Document::new().with("ProductName", "Toaster").with("PartNumber", "T-1");
        fs::create_dir_all(dir.path().join("SYSTEM/DEV")).unwrap();
        fs::write(dir.path().join("SYSTEM/DEV/DEVINFO"), devinfo::encode(info).unwrap()).unwrap();
        let registry = registry(DiscoveryConfig::default());
        let recorder = registry.get_recorder(dir.path(), false).unwrap().unwrap();
        assert_eq!(recorder.kind(), RecorderKind::Generic);
        assert_eq!(recorder.product_name(), "Toaster");
    }

    #[test]
    fn test_on_recorder_walks_up() {
        let dir = volume(1);
        let registry = registry(DiscoveryConfig::default());
        let root = dir.path().canonicalize().unwrap();
        let nested = dir.path().join("DATA/2026/rec001.IDE");
        assert_eq!(registry.on_recorder(&nested, false), Some(root.clone()));
        assert_eq!(registry.on_recorder(&root.join("SYSTEM/DEV/DEVINFO"), false), Some(root));
        assert_eq!(registry.on_recorder(&nested, true), None);

        let elsewhere = TempDir::new().unwrap();
        assert_eq!(registry.on_recorder(elsewhere.path(), false), None);
    }

    #[derive(Debug, Clone, Default)]
    struct SharedMounts(Arc<Mutex<Vec<Mount>>>);

    impl MountTable for SharedMounts {
        fn mounts(&self) -> Result<Vec<Mount>> {
            Ok(self.0.lock().clone())
        }
    }

    #[test]
    fn test_device_changed() {
        let dir = volume(1);
        let mounts = SharedMounts::default();
        mounts.0.lock().push(Mount::new("/dev/sda1", "/", "ext4"));
        let registry = registry(DiscoveryConfig::default()).with_mount_table(mounts.clone());

        assert!(registry.device_changed(false).unwrap());
        assert!(!registry.device_changed(false).unwrap());

        mounts.0.lock().push(Mount::new("/dev/sdc1", "/media/usb", "ext4"));
        assert!(!registry.device_changed(true).unwrap());
        assert!(!registry.device_changed(false).unwrap());

        mounts.0.lock().push(Mount::new("/dev/sdb1", dir.path(), "vfat"));
        assert!(registry.device_changed(true).unwrap());
        assert!(!registry.device_changed(true).unwrap());
        assert_eq!(registry.device_list(true).unwrap(), vec![dir.path().to_path_buf()]);

        registry.reset_device_changed();
        assert!(registry.device_changed(true).unwrap());
    }

    #[test]
    fn test_garbage_devinfo_strictness() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("SYSTEM/DEV")).unwrap();
        fs::write(dir.path().join("SYSTEM/DEV/DEVINFO"), [0xFF, 0x00, 0x12]).unwrap();
        let registry = registry(DiscoveryConfig::default())
            .with_mount_table(StaticMounts(vec![Mount::new("/dev/sdb1", dir.path(), "vfat")]));
        assert!(registry.get_recorder(dir.path(), false).unwrap().is_none());
        assert!(matches!(
            registry.get_recorder(dir.path(), true),
            Err(RecorderError::Document { .. })
        ));
    }
}
