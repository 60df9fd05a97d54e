//! Recorder product families.
//!
//! The family is decided by the `ProductName` in DEVINFO. Patterns are
//! tried in [`RecorderKind::ALL`] order and the first match wins, so the
//! broad `Slam Stick` pattern comes late and [`RecorderKind::Generic`],
//! which accepts any product, comes last.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecorderKind {
    SlamStickC,
    EndaqS,
    EndaqW,
    SlamStickS,
    SlamStickX,
    /// A device with a DEVINFO but no recognized product name.
    Generic,
}

static SLAM_STICK_C: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Slam Stick C|^S[234]-D16").expect("valid pattern"));
static ENDAQ_S: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^S(\d|\d\d)-").expect("valid pattern"));
static ENDAQ_W: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^W(\d|\d\d)-").expect("valid pattern"));
static SLAM_STICK_S: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Slam Stick S").expect("valid pattern"));
static SLAM_STICK_X: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Slam Stick").expect("valid pattern"));

impl RecorderKind {
    /// Match order.
    pub const ALL: [RecorderKind; 6] = [
        RecorderKind::SlamStickC,
        RecorderKind::EndaqS,
        RecorderKind::EndaqW,
        RecorderKind::SlamStickS,
        RecorderKind::SlamStickX,
        RecorderKind::Generic,
    ];

    fn pattern(self) -> Option<&'static Regex> {
        match self {
            RecorderKind::SlamStickC => Some(&*SLAM_STICK_C),
            RecorderKind::EndaqS => Some(&*ENDAQ_S),
            RecorderKind::EndaqW => Some(&*ENDAQ_W),
            RecorderKind::SlamStickS => Some(&*SLAM_STICK_S),
            RecorderKind::SlamStickX => Some(&*SLAM_STICK_X),
            RecorderKind::Generic => None,
        }
    }

    /// The family whose pattern matches `product_name` first.
    pub fn from_product_name(product_name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|kind| kind.matches(product_name))
            .unwrap_or(RecorderKind::Generic)
    }

    pub fn matches(self, product_name: &str) -> bool {
        self.pattern().is_none_or(|pattern| pattern.is_match(product_name))
    }

    pub fn is_generic(self) -> bool {
        self == RecorderKind::Generic
    }

    /// `true` for families with a Wi-Fi adapter.
    pub fn has_wifi(self) -> bool {
        self == RecorderKind::EndaqW
    }

    fn serial_prefix(self, part_number: &str) -> &'static str {
        match self {
            // D16 parts are sold as enDAQ S but identify as Slam Stick C.
            RecorderKind::SlamStickC if part_number.contains("-D16") => "S",
            RecorderKind::SlamStickC => "SSC",
            RecorderKind::EndaqS => "S",
            RecorderKind::EndaqW => "W",
            RecorderKind::SlamStickS => "SSS",
            RecorderKind::SlamStickX => "SSX",
            RecorderKind::Generic => "",
        }
    }

    /// Formatted serial number, e.g. `S0012345`. Generic recorders use the
    /// bare number.
    pub fn format_serial(self, serial: u32, part_number: &str) -> String {
        if self.is_generic() {
            return serial.to_string();
        }
        format!("{}{serial:07}", self.serial_prefix(part_number))
    }
}

impl fmt::Display for RecorderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderKind::SlamStickC => "Slam Stick C",
            RecorderKind::EndaqS => "enDAQ S",
            RecorderKind::EndaqW => "enDAQ W",
            RecorderKind::SlamStickS => "Slam Stick S",
            RecorderKind::SlamStickX => "Slam Stick X",
            RecorderKind::Generic => "Recorder",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Slam Stick C", RecorderKind::SlamStickC)]
    #[case("S3-D16", RecorderKind::SlamStickC)]
    #[case("S3-E25D40", RecorderKind::EndaqS)]
    #[case("S10-D40", RecorderKind::EndaqS)]
    #[case("W8-E100D40", RecorderKind::EndaqW)]
    #[case("Slam Stick S", RecorderKind::SlamStickS)]
    #[case("Slam Stick X", RecorderKind::SlamStickX)]
    #[case("S123-D40", RecorderKind::Generic)]
    #[case("Accelerometer", RecorderKind::Generic)]
    #[case("", RecorderKind::Generic)]
    fn test_kind_from_product_name(#[case] name: &str, #[case] kind: RecorderKind) {
        assert_eq!(RecorderKind::from_product_name(name), kind);
    }

    #[test]
    fn test_generic_matches_anything() {
        assert!(RecorderKind::Generic.matches("Toaster"));
        assert!(!RecorderKind::EndaqS.matches("Toaster"));
        assert_eq!(RecorderKind::Generic.to_string(), "Recorder");
    }

    #[rstest]
    #[case(RecorderKind::EndaqS, "S3-E25D40", 12345, "S0012345")]
    #[case(RecorderKind::EndaqW, "W5-E25D40", 42, "W0000042")]
    #[case(RecorderKind::SlamStickC, "LOG-0002-100G", 7, "SSC0000007")]
    #[case(RecorderKind::SlamStickC, "S4-D16", 7, "S0000007")]
    #[case(RecorderKind::SlamStickX, "LOG-0002-100G", 9_876_543, "SSX9876543")]
    #[case(RecorderKind::Generic, "T-1", 42, "42")]
    fn test_format_serial(
        #[case] kind: RecorderKind,
        #[case] part: &str,
        #[case] serial: u32,
        #[case] expected: &str,
    ) {
        assert_eq!(kind.format_serial(serial, part), expected);
    }

    #[test]
    fn test_only_w_has_wifi() {
        let wifi: Vec<_> = RecorderKind::ALL.into_iter().filter(|k| k.has_wifi()).collect();
        assert_eq!(wifi, vec![RecorderKind::EndaqW]);
    }
}
