//! Discovery entry points over a caller-owned [`Registry`].
//!
//! Recorders found through one registry are the same objects for every
//! caller sharing it. Keep one registry per process, or per test.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use recorder_core::{DeviceSelector, Result};

use crate::recorder::Recorder;
use crate::registry::Registry;

/// All attached recorders, or those among `paths`.
///
/// # Errors
/// `RecorderError::Io` if the mount table cannot be read.
pub fn get_devices(
    registry: &Registry,
    paths: Option<&[PathBuf]>,
    strict: bool,
) -> Result<Vec<Arc<Recorder>>> {
    registry.scan(paths, strict)
}

/// The recorder mounted at `path`, or `None` if it is not one.
///
/// # Errors
/// See [`Registry::get_recorder`].
pub fn get_recorder(registry: &Registry, path: &Path, strict: bool) -> Result<Option<Arc<Recorder>>> {
    registry.get_recorder(path, strict)
}

pub fn is_recorder(registry: &Registry, path: &Path, strict: bool) -> bool {
    registry.is_recorder(path, strict)
}

/// Root of the recorder that `path` lies on.
pub fn on_recorder(registry: &Registry, path: &Path, strict: bool) -> Option<PathBuf> {
    registry.on_recorder(path, strict)
}

/// Find a recorder by serial number or chip ID, given as text. Exactly one
/// of the two must be supplied.
///
/// # Errors
/// `RecorderError::InvalidArgument` for a missing, doubled or unparsable
/// key; otherwise see [`Registry::find_device`].
pub fn find_device(
    registry: &Registry,
    serial: Option<&str>,
    chip_id: Option<&str>,
    paths: Option<&[PathBuf]>,
) -> Result<Option<Arc<Recorder>>> {
    let selector = DeviceSelector::from_args(serial, chip_id)?;
    registry.find_device(selector, paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::mounts::StaticMounts;
    use recorder_core::RecorderError;

    fn registry() -> Registry {
        Registry::new(DiscoveryConfig::default()).with_mount_table(StaticMounts::default())
    }

    #[test]
    fn test_find_device_needs_one_key() {
        let registry = registry();
        assert!(matches!(
            find_device(&registry, None, None, Some(&[])),
            Err(RecorderError::InvalidArgument(_))
        ));
        assert!(matches!(
            find_device(&registry, Some("S0000001"), Some("ABCD"), Some(&[])),
            Err(RecorderError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_non_recorder_path() {
        let registry = registry();
        let dir = tempfile::TempDir::new().unwrap();
        assert!(!is_recorder(&registry, dir.path(), false));
        assert!(get_recorder(&registry, dir.path(), false).unwrap().is_none());
        assert!(on_recorder(&registry, dir.path(), false).is_none());
        assert!(registry.is_empty());
    }
}
