//! Error types for transport operations.
//!
//! Transport errors are surfaced immediately and never retried by the
//! command layer. They convert into [`RecorderError`] at the crate boundary.

use recorder_core::RecorderError;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport has not been opened, or was closed.
    #[error("Transport not open: {resource}")]
    NotOpen { resource: String },

    /// The port or volume cannot be opened.
    #[error("Transport unavailable: {resource}: {reason}")]
    Unavailable { resource: String, reason: String },

    /// The device went away while in use, e.g. after a reset command.
    #[error("Device disconnected: {resource}")]
    Disconnected { resource: String },

    #[error("Serial port error: {message}")]
    Serial { message: String },

    #[error("I/O error on {resource}: {source}")]
    Io {
        resource: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    pub fn not_open(resource: impl Into<String>) -> Self {
        Self::NotOpen {
            resource: resource.into(),
        }
    }

    pub fn unavailable(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn disconnected(resource: impl Into<String>) -> Self {
        Self::Disconnected {
            resource: resource.into(),
        }
    }

    pub fn serial(message: impl Into<String>) -> Self {
        Self::Serial {
            message: message.into(),
        }
    }

    /// Wrap an OS error. Errors meaning "the device is gone" become
    /// [`TransportError::Disconnected`].
    pub fn io(resource: impl Into<String>, source: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let resource = resource.into();
        // EIO is what Linux reports for a vanished tty.
        let gone = matches!(
            source.kind(),
            ErrorKind::NotFound | ErrorKind::BrokenPipe | ErrorKind::NotConnected
        ) || source.raw_os_error() == Some(5);
        if gone {
            Self::Disconnected { resource }
        } else {
            Self::Io { resource, source }
        }
    }

    /// `true` if the failure means the device is no longer attached.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::NotOpen { .. })
    }
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => Self::Disconnected {
                resource: err.description,
            },
            _ => Self::serial(err.description),
        }
    }
}

impl From<TransportError> for RecorderError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotOpen { resource } => RecorderError::not_open(resource),
            TransportError::Io { source, .. } => RecorderError::Io(source),
            other => RecorderError::transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_not_open_error() {
        let error = TransportError::not_open("/dev/ttyACM0");
        assert_eq!(error.to_string(), "Transport not open: /dev/ttyACM0");
        assert!(error.is_disconnect());
        let converted: RecorderError = error.into();
        assert!(matches!(converted, RecorderError::NotOpen { .. }));
    }

    #[test]
    fn test_unavailable_error() {
        let error = TransportError::unavailable("E:\\", "no COMMAND file");
        assert_eq!(
            error.to_string(),
            "Transport unavailable: E:\\: no COMMAND file"
        );
        assert!(!error.is_disconnect());
    }

    #[test]
    fn test_vanished_port_is_disconnect() {
        let error = TransportError::io("/dev/ttyACM0", io::Error::from_raw_os_error(5));
        assert!(error.is_disconnect());
        let error = TransportError::io("COMMAND", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(error, TransportError::Disconnected { .. }));
    }

    #[test]
    fn test_other_io_is_preserved() {
        let error = TransportError::io(
            "RESPONSE",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(!error.is_disconnect());
        let converted: RecorderError = error.into();
        assert!(matches!(converted, RecorderError::Io(_)));
    }

    #[test]
    fn test_serialport_no_device() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        assert!(TransportError::from(err).is_disconnect());
    }
}
