//! Serial port transport and recorder port enumeration.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use recorder_core::constants::{RECORDER_USB_IDS, SERIAL_BAUD_RATE, SERIAL_TIMEOUT};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::traits::{Framing, Transport};

/// Serial line settings. Recorders use 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: SERIAL_BAUD_RATE,
            timeout: SERIAL_TIMEOUT,
        }
    }
}

impl SerialConfig {
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// A recorder's USB serial interface, as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderPort {
    pub path: String,
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
}

impl RecorderPort {
    /// The USB serial number as a recorder serial, if it is numeric.
    pub fn recorder_serial(&self) -> Option<u32> {
        self.serial_number.as_deref()?.trim().parse().ok()
    }
}

/// USB serial ports whose vendor/product IDs belong to recorders.
///
/// # Errors
/// `TransportError::Serial` if the OS port list cannot be read.
pub fn recorder_ports() -> Result<Vec<RecorderPort>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(usb) if RECORDER_USB_IDS.contains(&(usb.vid, usb.pid)) => {
                Some(RecorderPort {
                    path: port.port_name,
                    vid: usb.vid,
                    pid: usb.pid,
                    serial_number: usb.serial_number,
                })
            }
            _ => None,
        })
        .collect())
}

/// Path of the serial port belonging to the recorder with serial `sn`.
pub fn find_port(sn: u32) -> Option<String> {
    match recorder_ports() {
        Ok(ports) => ports
            .into_iter()
            .find(|port| port.recorder_serial() == Some(sn))
            .map(|port| port.path),
        Err(err) => {
            debug!(error = %err, "serial port enumeration failed");
            None
        }
    }
}

/// Transport over a (USB) serial port. The port is opened lazily.
pub struct SerialTransport {
    path: String,
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_config(path, SerialConfig::default())
    }

    pub fn with_config(path: impl Into<String>, config: SerialConfig) -> Self {
        Self {
            path: path.into(),
            config,
            port: None,
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| TransportError::not_open(self.path.clone()))
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.path
    }

    fn framing(&self) -> Framing {
        Framing::Framed
    }

    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.path, self.config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.config.timeout)
            .open()
            .map_err(|err| TransportError::unavailable(self.path.clone(), err.description))?;
        info!(path = %self.path, baud = self.config.baud_rate, "opened serial port");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            info!(path = %self.path, "closed serial port");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        let path = self.path.clone();
        let port = self.port()?;
        let deadline = Instant::now() + timeout;

        // Prefer what is already buffered; otherwise block for the first byte.
        let waiting = port.bytes_to_read()? as usize;
        let want = if waiting > 0 { waiting.min(max) } else { 1.min(max) };
        if want == 0 {
            return Ok(Vec::new());
        }

        port.set_timeout(deadline.saturating_duration_since(Instant::now()))?;
        let mut buffer = vec![0u8; want];
        let count = match port.read(&mut buffer) {
            Ok(count) => count,
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(err) => return Err(TransportError::io(path, err)),
        };
        buffer.truncate(count);
        trace!(len = count, data = ?buffer, "serial read");
        Ok(buffer)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let path = self.path.clone();
        let port = self.port()?;
        let written = port
            .write(data)
            .map_err(|err| TransportError::io(path.clone(), err))?;
        port.flush().map_err(|err| TransportError::io(path, err))?;
        trace!(len = written, data = ?data, "serial write");
        Ok(written)
    }

    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn discard_input(&mut self) -> Result<usize> {
        let port = self.port()?;
        let pending = port.bytes_to_read()? as usize;
        if pending > 0 {
            port.clear(ClearBuffer::Input)?;
        }
        Ok(pending)
    }

    fn is_available(&self) -> bool {
        serialport::available_ports()
            .map(|ports| ports.iter().any(|port| port.port_name == self.path))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_recorder_line() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_closed_port_reports_not_open() {
        let mut transport = SerialTransport::new("/dev/does-not-exist");
        assert!(!transport.is_open());
        let err = transport.write(b"x").unwrap_err();
        assert!(matches!(err, TransportError::NotOpen { .. }));
        assert!(matches!(
            transport.read(1, Duration::ZERO),
            Err(TransportError::NotOpen { .. })
        ));
    }

    #[test]
    fn test_open_missing_port_is_unavailable() {
        let mut transport = SerialTransport::new("/dev/does-not-exist");
        let err = transport.open().unwrap_err();
        assert!(matches!(err, TransportError::Unavailable { .. }));
        assert!(!transport.is_open());
    }

    #[test]
    fn test_recorder_serial_parsing() {
        let port = RecorderPort {
            path: "/dev/ttyACM0".into(),
            vid: 0x10C4,
            pid: 0x0004,
            serial_number: Some("12345".into()),
        };
        assert_eq!(port.recorder_serial(), Some(12345));

        let port = RecorderPort {
            serial_number: Some("ABC".into()),
            ..port
        };
        assert_eq!(port.recorder_serial(), None);
    }
}
