//! Enum dispatch over the concrete transports.
//!
//! The set of transports is closed, so a recorder holds an
//! [`AnyTransport`] rather than a boxed trait object.
//!
//! ```
//! use recorder_transport::{AnyTransport, Framing, SimulatedTransport, Transport};
//!
//! let (simulated, _handle) = SimulatedTransport::new();
//! let transport = AnyTransport::from(simulated);
//! assert_eq!(transport.framing(), Framing::Framed);
//! ```

use std::time::Duration;

use crate::error::Result;
use crate::file::FileTransport;
use crate::serial::SerialTransport;
use crate::simulated::SimulatedTransport;
use crate::traits::{Framing, Transport};

#[derive(Debug)]
#[non_exhaustive]
pub enum AnyTransport {
    Serial(SerialTransport),
    File(FileTransport),
    Simulated(SimulatedTransport),
}

macro_rules! dispatch {
    ($self:ident, $transport:ident => $body:expr) => {
        match $self {
            AnyTransport::Serial($transport) => $body,
            AnyTransport::File($transport) => $body,
            AnyTransport::Simulated($transport) => $body,
        }
    };
}

impl AnyTransport {
    /// Short label for the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Serial(_) => "serial",
            Self::File(_) => "file",
            Self::Simulated(_) => "simulated",
        }
    }
}

impl Transport for AnyTransport {
    fn name(&self) -> &str {
        dispatch!(self, t => t.name())
    }

    fn framing(&self) -> Framing {
        dispatch!(self, t => t.framing())
    }

    fn open(&mut self) -> Result<()> {
        dispatch!(self, t => t.open())
    }

    fn close(&mut self) -> Result<()> {
        dispatch!(self, t => t.close())
    }

    fn is_open(&self) -> bool {
        dispatch!(self, t => t.is_open())
    }

    fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        dispatch!(self, t => t.read(max, timeout))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        dispatch!(self, t => t.write(data))
    }

    fn bytes_available(&mut self) -> Result<usize> {
        dispatch!(self, t => t.bytes_available())
    }

    fn discard_input(&mut self) -> Result<usize> {
        dispatch!(self, t => t.discard_input())
    }

    fn is_available(&self) -> bool {
        dispatch!(self, t => t.is_available())
    }

    fn read_clock(&mut self) -> Result<Option<Vec<u8>>> {
        dispatch!(self, t => t.read_clock())
    }

    fn write_clock(&mut self, data: &[u8]) -> Result<bool> {
        dispatch!(self, t => t.write_clock(data))
    }
}

impl From<SerialTransport> for AnyTransport {
    fn from(transport: SerialTransport) -> Self {
        Self::Serial(transport)
    }
}

impl From<FileTransport> for AnyTransport {
    fn from(transport: FileTransport) -> Self {
        Self::File(transport)
    }
}

impl From<SimulatedTransport> for AnyTransport {
    fn from(transport: SimulatedTransport) -> Self {
        Self::Simulated(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AnyTransport::from(SerialTransport::new("/dev/ttyACM0")), "serial", Framing::Framed)]
    #[case(AnyTransport::from(FileTransport::new("/media/REC")), "file", Framing::Unframed)]
    #[case(AnyTransport::from(SimulatedTransport::new().0), "simulated", Framing::Framed)]
    fn test_dispatch_kind_and_framing(
        #[case] transport: AnyTransport,
        #[case] kind: &str,
        #[case] framing: Framing,
    ) {
        assert_eq!(transport.kind(), kind);
        assert_eq!(transport.framing(), framing);
        assert!(!transport.is_open());
    }

    #[test]
    fn test_dispatch_forwards_io() {
        let (simulated, handle) = SimulatedTransport::new();
        let mut transport = AnyTransport::from(simulated);
        transport.open().unwrap();
        handle.inject(b"xyz");
        assert_eq!(transport.bytes_available().unwrap(), 3);
        assert_eq!(transport.read(8, Duration::ZERO).unwrap(), b"xyz");
        transport.write(b"out").unwrap();
        assert_eq!(handle.last_write(), Some(b"out".to_vec()));
    }
}
