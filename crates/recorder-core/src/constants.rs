//! Protocol and layout constants shared by the recorder crates.
//!
//! # Wire layout
//!
//! Serial traffic is HDLC-style framed. Each frame carries a short Corbus
//! header, an EBML document and a CRC16:
//!
//! ```text
//! 0x7E | header | EBML document | crc lo | crc hi | 0x7E
//! ```
//!
//! Inside a frame, `0x7E` and `0x7D` are escaped as `0x7D, byte ^ 0x20`.
//!
//! # Volume layout
//!
//! A mounted recorder exposes its control files below `SYSTEM/DEV`:
//!
//! | File | Purpose |
//! |------|---------|
//! | `DEVINFO` | EBML identity document |
//! | `CLOCK` | device clock, little-endian epoch seconds |
//! | `COMMAND` / `RESPONSE` | file command interface |

use std::time::Duration;

// ============================================================================
// Framing
// ============================================================================

/// Frame delimiter.
pub const HDLC_BREAK: u8 = 0x7E;

/// Escape marker; the following byte is XORed with [`HDLC_ESCAPE_XOR`].
pub const HDLC_ESCAPE: u8 = 0x7D;

pub const HDLC_ESCAPE_XOR: u8 = 0x20;

/// CRC16 initial register value.
pub const CRC_INIT: u16 = 0xFFFF;

/// Register value left after running the CRC over a payload followed by
/// its own (finalized, little-endian) checksum.
pub const CRC_GOOD_RESIDUE: u16 = 0xF0B8;

/// Size of the trailing checksum field.
pub const CRC_LEN: usize = 2;

// ============================================================================
// Corbus packet headers
// ============================================================================

/// Command header: broadcast address, EBML payload, immediate write.
pub const COMMAND_HEADER: [u8; 4] = [0x80, 0x26, 0x00, 0x0A];

/// Response header prefix. A third byte carries the Corbus result code.
pub const RESPONSE_HEADER: [u8; 2] = [0x81, 0x00];

/// Length of a response header including the result code.
pub const RESPONSE_HEADER_LEN: usize = 3;

// ============================================================================
// Command interface
// ============================================================================

/// Largest encoded command accepted by device firmware.
pub const DEFAULT_MAX_COMMAND_SIZE: usize = 128;

/// `CommandIdx` / `ResponseIdx` are 16-bit unsigned EBML integers; indices
/// wrap at this modulus.
pub const SEQUENCE_MODULUS: u32 = 1 << 16;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for quick queries (clock, battery).
pub const QUICK_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for commands that make the device reset or dismount.
pub const SIMPLE_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between RESPONSE file polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Idle delay between serial reads while waiting for bytes.
pub const SERIAL_READ_POLL: Duration = Duration::from_millis(10);

/// Delay between availability checks while waiting for a reboot.
pub const REBOOT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Serial ports
// ============================================================================

pub const SERIAL_BAUD_RATE: u32 = 115_200;

pub const SERIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// USB vendor/product IDs of recorder serial interfaces.
pub const RECORDER_USB_IDS: [(u16, u16); 2] = [(0x10C4, 0x0004), (0x0483, 0x4003)];

// ============================================================================
// Volume layout
// ============================================================================

pub const INFO_FILE: &str = "SYSTEM/DEV/DEVINFO";
pub const CLOCK_FILE: &str = "SYSTEM/DEV/CLOCK";
pub const COMMAND_FILE: &str = "SYSTEM/DEV/COMMAND";
pub const RESPONSE_FILE: &str = "SYSTEM/DEV/RESPONSE";
pub const PROPERTIES_FILE: &str = "SYSTEM/DEV/DEVPROPS";
pub const MANIFEST_FILE: &str = "SYSTEM/DEV/manifest";
pub const SYSCAL_FILE: &str = "SYSTEM/DEV/syscal";
pub const CONFIG_FILE: &str = "SYSTEM/config.cfg";
pub const USERCAL_FILE: &str = "SYSTEM/usercal.dat";
pub const CONFIG_UI_FILE: &str = "SYSTEM/CONFIG.UI";

/// Device configuration formats. Version 1 is the legacy
/// `RecorderConfiguration` layout, only written by old EFM32GG330 firmware.
pub const LEGACY_DEVICE_CONFIG_VERSION: u32 = 1;
pub const DEVICE_CONFIG_VERSION: u32 = 2;

/// Userpage files on EFM32-based devices, `USERPG0` through `USERPG3`.
pub const USERPAGE_FILE_PREFIX: &str = "SYSTEM/DEV/USERPG";
pub const USERPAGE_COUNT: usize = 4;

/// Identification only needs the start of DEVINFO.
pub const MAX_INFO_FILE_SIZE: u64 = 64 * 1024;

// ============================================================================
// Registry
// ============================================================================

/// Registry entries kept before dead recorder handles are swept.
pub const RECORDER_CACHE_SIZE: usize = 100;

/// Newest settings file format understood by this library.
pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_bytes_distinct() {
        assert_ne!(HDLC_BREAK, HDLC_ESCAPE);
        assert_eq!(HDLC_BREAK ^ HDLC_ESCAPE_XOR, 0x5E);
        assert_eq!(HDLC_ESCAPE ^ HDLC_ESCAPE_XOR, 0x5D);
    }

    #[test]
    fn test_headers_do_not_contain_control_bytes() {
        for byte in COMMAND_HEADER.iter().chain(RESPONSE_HEADER.iter()) {
            assert_ne!(*byte, HDLC_BREAK);
            assert_ne!(*byte, HDLC_ESCAPE);
        }
    }

    #[test]
    fn test_timeouts_ordered() {
        assert!(QUICK_COMMAND_TIMEOUT < SIMPLE_COMMAND_TIMEOUT);
        assert!(SIMPLE_COMMAND_TIMEOUT < DEFAULT_COMMAND_TIMEOUT);
        assert!(SERIAL_READ_POLL < DEFAULT_POLL_INTERVAL);
    }
}
