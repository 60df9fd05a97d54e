//! Caller-facing error taxonomy.
//!
//! Every failure surfaced by the recorder crates ends up as a
//! [`RecorderError`]. Lower layers keep narrower error enums of their own and
//! convert into this type at the crate boundary.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Not open: {resource}")]
    NotOpen { resource: String },

    // Framing errors
    #[error("Checksum mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    Checksum { expected: u16, actual: u16 },

    #[error("Incomplete frame: {0} bytes without a break character")]
    IncompleteFrame(usize),

    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    // Protocol errors
    #[error("Command failed [{code}]: {message}")]
    Command { code: i32, message: String },

    #[error("Invalid command: {message}")]
    InvalidCommand { message: String },

    #[error("Malformed document: {message}")]
    Document { message: String },

    #[error("Device timeout: {message}")]
    Timeout { message: String },

    #[error("Device busy: lock not acquired within {}ms", .waited.as_millis())]
    Busy { waited: Duration },

    #[error("Unsupported feature: {feature}")]
    UnsupportedFeature { feature: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration version {found} is not supported (newest supported: {supported})")]
    ConfigVersion { found: u32, supported: u32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn not_open(resource: impl Into<String>) -> Self {
        Self::NotOpen {
            resource: resource.into(),
        }
    }

    /// Build the error for a negative device status code.
    ///
    /// `message` is the device's own status message if it sent one; the
    /// documented meaning of `code` is used otherwise.
    pub fn command(code: i32, message: Option<&str>) -> Self {
        let message = match message {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => crate::types::DeviceStatusCode::from_code(code)
                .meaning()
                .to_string(),
        };
        Self::Command { code, message }
    }

    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            message: message.into(),
        }
    }

    pub fn document(message: impl Into<String>) -> Self {
        Self::Document {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn busy(waited: Duration) -> Self {
        Self::Busy { waited }
    }

    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            feature: feature.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Status codes -20 through -30 report a badly formed or unknown
    /// request; every other negative code is a device-side failure.
    #[must_use]
    pub fn is_request_fault(&self) -> bool {
        matches!(self, Self::Command { code, .. } if (-30..=-20).contains(code))
    }

    /// Framing problems are transient: the exchange keeps reading until its
    /// deadline instead of failing.
    #[must_use]
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::Checksum { .. } | Self::IncompleteFrame(_) | Self::MalformedFrame { .. }
        )
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_command_error_uses_documented_meaning() {
        let error = RecorderError::command(-60, None);
        assert_eq!(error.to_string(), "Command failed [-60]: bad checksum");
    }

    #[test]
    fn test_command_error_prefers_device_message() {
        let error = RecorderError::command(-40, Some("payload too short"));
        assert_eq!(error.to_string(), "Command failed [-40]: payload too short");
    }

    #[test]
    fn test_empty_device_message_falls_back() {
        let error = RecorderError::command(-30, Some(""));
        assert_eq!(error.to_string(), "Command failed [-30]: unknown command");
    }

    #[rstest]
    #[case(-20, true)]
    #[case(-30, true)]
    #[case(-10, false)]
    #[case(-60, false)]
    fn test_request_fault_split(#[case] code: i32, #[case] expected: bool) {
        assert_eq!(RecorderError::command(code, None).is_request_fault(), expected);
    }

    #[test]
    fn test_checksum_display() {
        let error = RecorderError::Checksum {
            expected: 0xF0B8,
            actual: 0x1234,
        };
        assert_eq!(
            error.to_string(),
            "Checksum mismatch: expected 0xF0B8, got 0x1234"
        );
        assert!(error.is_framing());
    }

    #[test]
    fn test_busy_display() {
        let error = RecorderError::busy(Duration::from_millis(250));
        assert_eq!(
            error.to_string(),
            "Device busy: lock not acquired within 250ms"
        );
        assert!(!error.is_timeout());
    }

    #[test]
    fn test_error_display() {
        let errors = vec![
            RecorderError::transport("port vanished"),
            RecorderError::not_open("/dev/ttyACM0"),
            RecorderError::timeout("Timed out waiting for command response"),
            RecorderError::unsupported("query_wifi"),
            RecorderError::ConfigVersion {
                found: 3,
                supported: 1,
            },
        ];

        for error in errors {
            let _ = format!("{}", error);
            let _ = format!("{:?}", error);
        }
    }
}
