//! Command/response exchanges with enDAQ-style recorders.
//!
//! [`CommandInterface`] owns one [`Transport`](recorder_transport::Transport)
//! and turns typed commands into EBML documents, sends them (framed over
//! serial, or through the COMMAND/RESPONSE file pair), and matches the
//! replies back by sequence index. All traffic to one device is serialized
//! by a re-entrant [`DeviceLock`].
//!
//! [`emulator::DeviceEmulator`] plays the device side over a simulated
//! transport.

pub mod commands;
pub mod config;
pub mod emulator;
pub mod error;
pub mod interface;
pub mod lock;
pub mod state;

pub use commands::{BlinkPattern, ClockReading, NetworkStatus, SimpleCommandOptions, WifiInfo};
pub use config::CommandConfig;
pub use error::CommandError;
pub use interface::{Availability, Callback, CommandInterface, SendOptions, Status, Timeout};
pub use lock::{DeviceLock, DeviceLockGuard};
pub use state::{ExchangeState, ExchangeTracker, ExchangeTransition};
