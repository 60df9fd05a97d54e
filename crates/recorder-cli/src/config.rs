//! Optional TOML settings file.
//!
//! ```toml
//! version = 1
//!
//! [command]
//! timeout = 10000
//!
//! [serial]
//! baud_rate = 115200
//!
//! [discovery]
//! strict = false
//! ```

use std::fs;
use std::path::Path;

use recorder_command::CommandConfig;
use recorder_core::constants::SUPPORTED_CONFIG_VERSION;
use recorder_core::{RecorderError, Result};
use recorder_discovery::DiscoveryConfig;
use recorder_transport::SerialConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: u32,
    pub command: CommandConfig,
    pub serial: SerialConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            command: CommandConfig::default(),
            serial: SerialConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Settings {
    /// Parse settings text.
    ///
    /// # Errors
    /// `RecorderError::Config` for malformed TOML;
    /// `RecorderError::ConfigVersion` for a file from a newer release.
    pub fn parse(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text).map_err(|err| RecorderError::config(err.to_string()))?;
        if settings.version > SUPPORTED_CONFIG_VERSION {
            return Err(RecorderError::ConfigVersion {
                found: settings.version,
                supported: SUPPORTED_CONFIG_VERSION,
            });
        }
        Ok(settings)
    }

    /// Load `path`, or the defaults when there is no file.
    ///
    /// # Errors
    /// `RecorderError::Io` if the file exists but cannot be read; see also
    /// [`parse`](Self::parse).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::parse(&fs::read_to_string(path)?),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Settings::parse("").unwrap(), Settings::default());
    }

    #[test]
    fn test_tables_override_defaults() {
        let settings = Settings::parse(
            "version = 1\n[command]\ntimeout = 2500\nignore_crc = true\n[discovery]\nstrict = false\ncache_size = 8\n",
        )
        .unwrap();
        assert_eq!(settings.command.timeout, Duration::from_millis(2500));
        assert!(settings.command.ignore_crc);
        assert!(!settings.discovery.strict);
        assert_eq!(settings.discovery.cache_size, 8);
        assert_eq!(settings.serial, SerialConfig::default());
    }

    #[test]
    fn test_malformed_file() {
        assert!(matches!(
            Settings::parse("[command\ntimeout = "),
            Err(RecorderError::Config(_))
        ));
    }

    #[rstest]
    #[case("version = 0", true)]
    #[case("version = 1", true)]
    #[case("version = 2", false)]
    #[case("version = 40", false)]
    fn test_settings_version(#[case] text: &str, #[case] accepted: bool) {
        match Settings::parse(text) {
            Ok(settings) => {
                assert!(accepted, "{text} should be rejected");
                assert_eq!(settings.command, CommandConfig::default());
            }
            Err(RecorderError::ConfigVersion { found, supported }) => {
                assert!(!accepted, "{text} should be accepted");
                assert!(found > supported);
                assert_eq!(supported, SUPPORTED_CONFIG_VERSION);
            }
            Err(other) => panic!("unexpected error for {text}: {other}"),
        }
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("recorder.toml");
        fs::write(&path, "[serial]\nbaud_rate = 9600\n").unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap().serial.baud_rate, 9600);
        assert!(matches!(
            Settings::load(Some(&dir.path().join("missing.toml"))),
            Err(RecorderError::Io(_))
        ));
    }
}
