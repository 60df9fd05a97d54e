use crate::{Result, error::RecorderError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status reported by the device in every command response.
///
/// Negative values denote errors. Codes the library does not know are kept
/// numerically in [`DeviceStatusCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatusCode {
    Idle,
    Recording,
    ResetPending,
    StartPending,
    ErrBusy,
    ErrInvalidCommand,
    ErrUnknownCommand,
    ErrBadPayload,
    ErrBadEbml,
    ErrBadChecksum,
    ErrBadPacket,
    ErrBadInfoIndex,
    ErrBadLockId,
    ErrInternalError,
    Unknown(i32),
}

impl DeviceStatusCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Idle,
            10 => Self::Recording,
            20 => Self::ResetPending,
            30 => Self::StartPending,
            -10 => Self::ErrBusy,
            -20 => Self::ErrInvalidCommand,
            -30 => Self::ErrUnknownCommand,
            -40 => Self::ErrBadPayload,
            -50 => Self::ErrBadEbml,
            -60 => Self::ErrBadChecksum,
            -70 => Self::ErrBadPacket,
            -80 => Self::ErrBadInfoIndex,
            -90 => Self::ErrBadLockId,
            -100 => Self::ErrInternalError,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Idle => 0,
            Self::Recording => 10,
            Self::ResetPending => 20,
            Self::StartPending => 30,
            Self::ErrBusy => -10,
            Self::ErrInvalidCommand => -20,
            Self::ErrUnknownCommand => -30,
            Self::ErrBadPayload => -40,
            Self::ErrBadEbml => -50,
            Self::ErrBadChecksum => -60,
            Self::ErrBadPacket => -70,
            Self::ErrBadInfoIndex => -80,
            Self::ErrBadLockId => -90,
            Self::ErrInternalError => -100,
            Self::Unknown(code) => *code,
        }
    }

    /// Human-readable meaning, as carried by command errors.
    #[must_use]
    pub fn meaning(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::ResetPending => "reset pending",
            Self::StartPending => "recording start pending",
            Self::ErrBusy => "communication channel is busy",
            Self::ErrInvalidCommand => "badly formed command",
            Self::ErrUnknownCommand => "unknown command",
            Self::ErrBadPayload => "bad command payload",
            Self::ErrBadEbml => "malformed command EBML",
            Self::ErrBadChecksum => "bad checksum",
            Self::ErrBadPacket => "bad or damaged packet",
            Self::ErrBadInfoIndex => "bad info index",
            Self::ErrBadLockId => "bad lock ID",
            Self::ErrInternalError => "internal device error",
            Self::Unknown(_) => "unknown status code",
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.code() < 0
    }
}

impl fmt::Display for DeviceStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.meaning())
    }
}

/// Wi-Fi state reported by `QueryWiFi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WiFiConnectionStatus {
    Idle,
    Pending,
    Connected,
}

impl WiFiConnectionStatus {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Idle),
            1 => Some(Self::Pending),
            2 => Some(Self::Connected),
            _ => None,
        }
    }
}

/// Network state reported by `NetworkStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentWiFiStatus {
    ConnectionFailed,
    Connecting,
    Connected,
    ConnectedCloud,
}

impl CurrentWiFiStatus {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::ConnectionFailed),
            1 => Some(Self::Connecting),
            2 => Some(Self::Connected),
            3 => Some(Self::ConnectedCloud),
            _ => None,
        }
    }
}

/// Parse a formatted serial number such as `"S0012345"` or `"SSX0000042"`.
///
/// Leading ASCII letters and zeros are stripped; an empty remainder is
/// serial number 0.
///
/// # Errors
/// Returns `RecorderError::InvalidArgument` if the remainder is not numeric.
pub fn parse_serial(text: &str) -> Result<u32> {
    let digits = text
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_alphabetic() || c == '0');
    if digits.is_empty() {
        return Ok(0);
    }
    digits
        .parse()
        .map_err(|_| RecorderError::invalid_argument(format!("Invalid serial number: {text}")))
}

/// Parse a chip ID given as hex, with or without a `0x` prefix.
///
/// # Errors
/// Returns `RecorderError::InvalidArgument` for non-hex input.
pub fn parse_chip_id(text: &str) -> Result<u128> {
    let trimmed = text.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u128::from_str_radix(hex, 16)
        .map_err(|_| RecorderError::invalid_argument(format!("Invalid chip ID: {text}")))
}

/// What `find_device` looks for. Exactly one key is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSelector {
    Serial(u32),
    ChipId(u128),
}

impl DeviceSelector {
    /// Build a selector from optional, textual arguments.
    ///
    /// # Errors
    /// Returns `RecorderError::InvalidArgument` if both or neither key is
    /// given, or a key does not parse.
    pub fn from_args(serial: Option<&str>, chip_id: Option<&str>) -> Result<Self> {
        match (serial, chip_id) {
            (Some(_), Some(_)) => Err(RecorderError::invalid_argument(
                "Either a serial number or chip ID is required, not both",
            )),
            (None, None) => Err(RecorderError::invalid_argument(
                "Either a serial number or chip ID is required",
            )),
            (Some(sn), None) => Ok(Self::Serial(parse_serial(sn)?)),
            (None, Some(chip)) => Ok(Self::ChipId(parse_chip_id(chip)?)),
        }
    }

    #[must_use]
    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        match self {
            Self::Serial(sn) => identity.serial == Some(*sn),
            Self::ChipId(chip) => identity.chip_id == Some(*chip),
        }
    }
}

/// Identity of one physical recorder, read once from DEVINFO.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub product_name: String,
    pub part_number: String,
    pub serial: Option<u32>,
    pub hardware_revision: Option<u32>,
    pub firmware_revision: Option<u32>,
    pub firmware: Option<String>,
    pub mcu_type: Option<String>,
    pub chip_id: Option<u128>,
    pub user_name: Option<String>,
    pub date_of_manufacture: Option<i64>,
}

impl DeviceIdentity {
    #[must_use]
    pub fn new(product_name: impl Into<String>, part_number: impl Into<String>) -> Self {
        Self {
            product_name: product_name.into(),
            part_number: part_number.into(),
            serial: None,
            hardware_revision: None,
            firmware_revision: None,
            firmware: None,
            mcu_type: None,
            chip_id: None,
            user_name: None,
            date_of_manufacture: None,
        }
    }

    /// Hardware version for display.
    ///
    /// Revisions above 99 pack `major * 10000 + minor * 100 + bom`, where
    /// `bom` is rendered as a letter (1 = `B`).
    #[must_use]
    pub fn hardware_version(&self) -> String {
        match self.hardware_revision {
            None => String::from("-1"),
            Some(rev) if rev <= 99 => rev.to_string(),
            Some(rev) => {
                let major = rev / 10_000;
                let minor = (rev % 10_000) / 100;
                let bom = rev % 100;
                let letters = match bom {
                    0 => String::new(),
                    1..=25 => char::from(b'A' + bom as u8).to_string(),
                    _ => {
                        let letter = char::from(b'@' + (bom % 25) as u8);
                        letter.to_string().repeat((bom / 25 + 1) as usize)
                    }
                };
                format!("v{major}r{minor}{letters}")
            }
        }
    }

    /// Firmware version string; older firmware reports only a number.
    #[must_use]
    pub fn firmware_version(&self) -> String {
        match (&self.firmware, self.firmware_revision) {
            (Some(text), _) if !text.is_empty() => text.clone(),
            (_, Some(rev)) => format!("1.{rev}"),
            _ => String::from("1.-1"),
        }
    }

    #[must_use]
    pub fn manufactured(&self) -> Option<DateTime<Utc>> {
        self.date_of_manufacture
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Decoded `BatteryState` bit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub has_battery: bool,
    pub charging: bool,
    /// `true` if `level` is a percentage; otherwise 0 is empty, 255 full,
    /// and anything else "some" charge.
    pub percentage: bool,
    pub level: u8,
    /// `None` when the device cannot report external power.
    pub external_power: Option<bool>,
}

impl BatteryStatus {
    const HAS_BATTERY: u64 = 0x8000;
    const REPORTS_EXTERNAL: u64 = 0x4000;
    const EXTERNAL_POWER: u64 = 0x2000;
    const CHARGING: u64 = 0x0200;
    const PERCENTAGE: u64 = 0x0100;
    const LEVEL_MASK: u64 = 0x00FF;

    #[must_use]
    pub fn from_bits(bits: u64) -> Self {
        let has_battery = bits & Self::HAS_BATTERY != 0;
        if !has_battery {
            return Self {
                has_battery,
                charging: false,
                percentage: false,
                level: 0,
                external_power: None,
            };
        }
        Self {
            has_battery,
            charging: bits & Self::CHARGING != 0,
            percentage: bits & Self::PERCENTAGE != 0,
            level: (bits & Self::LEVEL_MASK) as u8,
            external_power: (bits & Self::REPORTS_EXTERNAL != 0)
                .then_some(bits & Self::EXTERNAL_POWER != 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, DeviceStatusCode::Idle)]
    #[case(30, DeviceStatusCode::StartPending)]
    #[case(-60, DeviceStatusCode::ErrBadChecksum)]
    #[case(-99, DeviceStatusCode::Unknown(-99))]
    fn test_status_code_round_trip(#[case] code: i32, #[case] expected: DeviceStatusCode) {
        let status = DeviceStatusCode::from_code(code);
        assert_eq!(status, expected);
        assert_eq!(status.code(), code);
    }

    #[test]
    fn test_status_code_display() {
        assert_eq!(
            DeviceStatusCode::ErrBadChecksum.to_string(),
            "-60 (bad checksum)"
        );
        assert!(DeviceStatusCode::ErrBusy.is_error());
        assert!(!DeviceStatusCode::Recording.is_error());
    }

    #[rstest]
    #[case("S0012345", 12345)]
    #[case("SSX0000042", 42)]
    #[case("W0000000", 0)]
    #[case("12345", 12345)]
    #[case("", 0)]
    fn test_parse_serial(#[case] text: &str, #[case] expected: u32) {
        assert_eq!(parse_serial(text).unwrap(), expected);
    }

    #[test]
    fn test_parse_serial_rejects_garbage() {
        assert!(parse_serial("S12-34").is_err());
    }

    #[rstest]
    #[case("DEADBEEF", 0xDEAD_BEEF)]
    #[case("0x1f", 0x1F)]
    fn test_parse_chip_id(#[case] text: &str, #[case] expected: u128) {
        assert_eq!(parse_chip_id(text).unwrap(), expected);
    }

    #[test]
    fn test_selector_requires_exactly_one_key() {
        assert!(DeviceSelector::from_args(None, None).is_err());
        assert!(DeviceSelector::from_args(Some("1"), Some("ab")).is_err());
        assert_eq!(
            DeviceSelector::from_args(Some("S0000007"), None).unwrap(),
            DeviceSelector::Serial(7)
        );
    }

    #[test]
    fn test_selector_matches_identity() {
        let mut identity = DeviceIdentity::new("S3-E25D40", "S3-E25D40");
        identity.serial = Some(9);
        identity.chip_id = Some(0xABCD);
        assert!(DeviceSelector::Serial(9).matches(&identity));
        assert!(DeviceSelector::ChipId(0xABCD).matches(&identity));
        assert!(!DeviceSelector::Serial(10).matches(&identity));
    }

    #[rstest]
    #[case(None, "-1")]
    #[case(Some(12), "12")]
    #[case(Some(20_100), "v2r1")]
    #[case(Some(20_102), "v2r1C")]
    fn test_hardware_version(#[case] rev: Option<u32>, #[case] expected: &str) {
        let mut identity = DeviceIdentity::new("W8-R2000D40", "W8-R2000D40");
        identity.hardware_revision = rev;
        assert_eq!(identity.hardware_version(), expected);
    }

    #[test]
    fn test_firmware_version_falls_back_to_number() {
        let mut identity = DeviceIdentity::new("Slam Stick X", "LOG-0002-100G");
        identity.firmware_revision = Some(17);
        assert_eq!(identity.firmware_version(), "1.17");
        identity.firmware = Some("3.1.4".to_string());
        assert_eq!(identity.firmware_version(), "3.1.4");
    }

    #[test]
    fn test_battery_without_battery() {
        let status = BatteryStatus::from_bits(0x02FF);
        assert!(!status.has_battery);
        assert_eq!(status.level, 0);
    }

    #[test]
    fn test_battery_bits() {
        let status = BatteryStatus::from_bits(0x8000 | 0x4000 | 0x0200 | 0x0100 | 87);
        assert!(status.has_battery);
        assert!(status.charging);
        assert!(status.percentage);
        assert_eq!(status.level, 87);
        assert_eq!(status.external_power, Some(false));
    }

    #[test]
    fn test_wifi_codes() {
        assert_eq!(
            WiFiConnectionStatus::from_code(2),
            Some(WiFiConnectionStatus::Connected)
        );
        assert_eq!(CurrentWiFiStatus::from_code(9), None);
    }
}
