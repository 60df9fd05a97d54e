//! Mounted filesystem enumeration.
//!
//! Discovery only needs two things from the OS: the list of mount points,
//! and each one's filesystem type (strict scans accept only FAT volumes).
//! [`MountTable`] is that seam. [`system_mounts`] picks the platform
//! implementation at compile time; [`StaticMounts`] serves fixed entries for
//! tests and for callers that enumerate volumes themselves.

use std::fmt;
use std::path::{Path, PathBuf};

use recorder_core::Result;

/// One mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub device: String,
    pub path: PathBuf,
    pub fs_type: String,
}

impl Mount {
    pub fn new(device: impl Into<String>, path: impl Into<PathBuf>, fs_type: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            path: path.into(),
            fs_type: fs_type.into(),
        }
    }

    /// `vfat`, `msdos`, `exfat`, `FAT32` and the like.
    pub fn is_fat(&self) -> bool {
        self.fs_type.to_ascii_lowercase().contains("fat")
    }
}

pub trait MountTable: Send + Sync + fmt::Debug {
    /// Currently mounted filesystems.
    ///
    /// # Errors
    /// `RecorderError::Io` if the OS table cannot be read.
    fn mounts(&self) -> Result<Vec<Mount>>;

    /// The mount whose mount point is `path`.
    ///
    /// # Errors
    /// See [`mounts`](Self::mounts).
    fn mount_at(&self, path: &Path) -> Result<Option<Mount>> {
        let wanted = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Ok(self.mounts()?.into_iter().find(|mount| {
            mount.path == wanted || mount.path.canonicalize().is_ok_and(|p| p == wanted)
        }))
    }
}

/// A fixed mount list.
#[derive(Debug, Clone, Default)]
pub struct StaticMounts(pub Vec<Mount>);

impl MountTable for StaticMounts {
    fn mounts(&self) -> Result<Vec<Mount>> {
        Ok(self.0.clone())
    }
}

/// Linux `/proc/mounts`.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone)]
pub struct ProcMounts {
    path: PathBuf,
}

#[cfg(target_os = "linux")]
impl Default for ProcMounts {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/proc/mounts"),
        }
    }
}

#[cfg(target_os = "linux")]
impl ProcMounts {
    /// Read a mounts file other than `/proc/mounts`.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(target_os = "linux")]
impl MountTable for ProcMounts {
    fn mounts(&self) -> Result<Vec<Mount>> {
        let text = std::fs::read_to_string(&self.path)?;
        Ok(parse_mounts(&text))
    }
}

/// Parse `fstab`-format lines. Spaces in fields arrive octal-escaped.
pub fn parse_mounts(text: &str) -> Vec<Mount> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let path = fields.next()?;
            let fs_type = fields.next()?;
            Some(Mount::new(unescape(device), unescape(path), fs_type))
        })
        .collect()
}

fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && let Some(code) = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok())
        {
            out.push(code);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// The platform's mount table.
pub fn system_mounts() -> Box<dyn MountTable> {
    #[cfg(target_os = "linux")]
    {
        Box::new(ProcMounts::default())
    }
    #[cfg(not(target_os = "linux"))]
    {
        // No portable mount table elsewhere yet; callers pass paths.
        Box::new(StaticMounts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/sda1 / ext4 rw,relatime 0 0
/dev/sdb1 /media/user/S3\\040RECORDER vfat rw,nosuid,nodev,relatime 0 0
/dev/sdc1 /mnt/big exfat rw 0 0
";

    #[test]
    fn test_parse_mounts() {
        let mounts = parse_mounts(SAMPLE);
        assert_eq!(mounts.len(), 4);
        assert_eq!(mounts[2].path, PathBuf::from("/media/user/S3 RECORDER"));
        assert_eq!(mounts[2].device, "/dev/sdb1");
        assert!(mounts[2].is_fat());
        assert!(mounts[3].is_fat());
        assert!(!mounts[1].is_fat());
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("a\\040b", "a b")]
    #[case("tab\\011", "tab\t")]
    #[case("short\\04", "short\\04")]
    fn test_unescape(#[case] field: &str, #[case] expected: &str) {
        assert_eq!(unescape(field), expected);
    }

    #[test]
    fn test_static_mount_lookup() {
        let dir = tempfile::TempDir::new().unwrap();
        let table = StaticMounts(vec![Mount::new("/dev/sdz1", dir.path(), "vfat")]);
        let found = table.mount_at(dir.path()).unwrap().unwrap();
        assert!(found.is_fat());
        assert!(table.mount_at(Path::new("/nonexistent/volume")).unwrap().is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_mounts_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("mounts");
        std::fs::write(&file, SAMPLE).unwrap();
        let mounts = ProcMounts::from_file(&file).mounts().unwrap();
        assert_eq!(mounts.len(), 4);
    }
}
