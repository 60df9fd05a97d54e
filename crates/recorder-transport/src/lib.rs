//! Byte-level channels to recorders.
//!
//! - [`SerialTransport`]: a USB serial port; responses are HDLC framed.
//! - [`FileTransport`]: the `COMMAND`/`RESPONSE` files on a mounted volume.
//! - [`SimulatedTransport`]: an in-memory port with a device-side
//!   [`SimulatedHandle`], for tests.
//!
//! All three implement the blocking [`Transport`] trait and are gathered in
//! the [`AnyTransport`] enum. Errors are [`TransportError`]s, which convert
//! into `recorder_core::RecorderError`.

pub mod any;
pub mod error;
pub mod file;
pub mod serial;
pub mod simulated;
pub mod traits;

pub use any::AnyTransport;
pub use error::{Result, TransportError};
pub use file::FileTransport;
pub use serial::{RecorderPort, SerialConfig, SerialTransport, find_port, recorder_ports};
pub use simulated::{Responder, SimulatedHandle, SimulatedTransport};
pub use traits::{Framing, Transport};
