//! Finding recorders on mounted volumes.
//!
//! A recorder volume carries `SYSTEM/DEV/DEVINFO`. [`Registry`] scans mount
//! points for it, identifies the device, and hands out one shared
//! [`Recorder`] per physical device. The free functions in [`facade`] take
//! the registry to use; there is no process-wide one.
//!
//! ```no_run
//! use recorder_discovery::{Registry, get_devices};
//!
//! let registry = Registry::default();
//! for recorder in get_devices(&registry, None, true)? {
//!     println!("{recorder}");
//! }
//! # Ok::<(), recorder_core::RecorderError>(())
//! ```

pub mod config;
pub mod config_interface;
pub mod devinfo;
pub mod facade;
pub mod kind;
pub mod mounts;
pub mod recorder;
pub mod registry;

pub use config::DiscoveryConfig;
pub use config_interface::ConfigInterface;
pub use devinfo::DeviceInfo;
pub use facade::{find_device, get_devices, get_recorder, is_recorder, on_recorder};
pub use kind::RecorderKind;
pub use mounts::{Mount, MountTable, StaticMounts};
pub use recorder::Recorder;
pub use registry::Registry;
