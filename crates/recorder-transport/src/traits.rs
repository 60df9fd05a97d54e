//! The transport contract.
//!
//! A [`Transport`] moves command bytes to a recorder and response bytes
//! back. Two very different media satisfy it:
//!
//! - a serial byte stream, where responses arrive in arbitrary pieces and
//!   carry their own framing and checksum;
//! - a pair of files on the recorder's volume, where a whole response is
//!   replaced at once and the filesystem provides integrity.
//!
//! [`Transport::framing`] tells the command layer which of the two it is
//! talking to.
//!
//! All methods are blocking. `read` waits at most its timeout and returns
//! whatever arrived, possibly nothing; only the command layer turns "not
//! enough data before the deadline" into an error.

use std::time::Duration;

use crate::error::Result;

/// How command and response bytes are delimited on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Byte stream; packets are HDLC framed with a CRC16.
    Framed,
    /// Whole-message medium; packets are bare EBML.
    Unframed,
}

pub trait Transport: Send {
    /// Port name or volume path, for logs and errors.
    fn name(&self) -> &str;

    fn framing(&self) -> Framing;

    /// Open the underlying handle. Opening an open transport is a no-op.
    ///
    /// # Errors
    /// `TransportError::Unavailable` if the port or volume is missing.
    fn open(&mut self) -> Result<()>;

    /// Close the handle. Closing a closed transport is a no-op.
    ///
    /// # Errors
    /// Errors from the OS while releasing the handle.
    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Read up to `max` bytes, waiting at most `timeout` for data.
    ///
    /// Returns an empty vector if nothing arrived in time.
    ///
    /// # Errors
    /// `TransportError::NotOpen` when closed; OS errors otherwise.
    fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Write `data`, returning the number of bytes queued.
    ///
    /// # Errors
    /// `TransportError::NotOpen` when closed; OS errors otherwise.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Bytes that can be read without blocking.
    ///
    /// # Errors
    /// `TransportError::NotOpen` when closed.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Drop unread input, returning how many bytes were discarded.
    ///
    /// # Errors
    /// `TransportError::NotOpen` when closed.
    fn discard_input(&mut self) -> Result<usize>;

    /// Whether the device behind this transport is currently attached.
    fn is_available(&self) -> bool {
        true
    }

    /// Read the device clock out of band, for media that expose it
    /// directly. `Ok(None)` means the clock is only reachable by command.
    ///
    /// # Errors
    /// OS errors while reading.
    fn read_clock(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Write the device clock out of band. Returns `false` if the medium
    /// has no such channel.
    ///
    /// # Errors
    /// OS errors while writing.
    fn write_clock(&mut self, _data: &[u8]) -> Result<bool> {
        Ok(false)
    }
}
