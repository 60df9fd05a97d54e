//! Typed commands.
//!
//! Thin wrappers over [`CommandInterface::send_command`]: each builds one
//! command document, picks a timeout and decodes the fields it needs from
//! the response. All of them take the device lock for their whole body.

use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use recorder_core::constants::{QUICK_COMMAND_TIMEOUT, SIMPLE_COMMAND_TIMEOUT};
use recorder_core::{
    BatteryStatus, CurrentWiFiStatus, DeviceStatusCode, RecorderError, Result, WiFiConnectionStatus,
};
use recorder_protocol::packet::LOCK_ID;
use recorder_protocol::{CommandPacket, Document, DocumentCodec, ResponsePacket};
use recorder_transport::{Framing, Transport};
use serde::Serialize;
use tracing::{debug, info};

use crate::interface::{Callback, CommandInterface, SendOptions, Timeout};

/// Host and device clocks, read as close together as possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockReading {
    pub host: DateTime<Utc>,
    pub device: DateTime<Utc>,
}

impl ClockReading {
    /// Host time minus device time.
    pub fn drift(&self) -> TimeDelta {
        self.host - self.device
    }
}

/// LED blink request: `[duration, priority, pattern a, pattern b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    /// Seconds; 0 blinks until another blink command.
    pub duration: u8,
    pub priority: u8,
    pub a: u8,
    pub b: u8,
}

impl Default for BlinkPattern {
    fn default() -> Self {
        Self {
            duration: 3,
            priority: 0,
            a: 0b0000_0111,
            b: 0b0000_0000,
        }
    }
}

impl BlinkPattern {
    pub fn to_bytes(self) -> [u8; 4] {
        [self.duration, self.priority, self.a, self.b]
    }
}

/// Options for commands that make the recorder reset or dismount.
#[derive(Clone, Copy)]
pub struct SimpleCommandOptions<'a> {
    /// Wait for the recorder to disconnect before returning.
    pub wait: bool,
    pub timeout: Timeout,
    pub callback: Option<Callback<'a>>,
}

impl Default for SimpleCommandOptions<'_> {
    fn default() -> Self {
        Self {
            wait: true,
            timeout: Timeout::After(SIMPLE_COMMAND_TIMEOUT),
            callback: None,
        }
    }
}

impl<'a> SimpleCommandOptions<'a> {
    #[must_use]
    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = timeout.into();
        self
    }

    #[must_use]
    pub fn callback(mut self, callback: Callback<'a>) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// Decoded `QueryWiFiResponse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WifiInfo {
    pub ssid: Option<String>,
    pub status: Option<WiFiConnectionStatus>,
}

/// Decoded `NetworkStatusResponse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    pub mac_address: Option<String>,
    pub ipv4_address: Option<Ipv4Addr>,
    pub wifi_status: Option<CurrentWiFiStatus>,
}

const CLOCK_TIME: &str = "ClockTime";
const INFO_INDEX: &str = "InfoIndex";
const INFO_PAYLOAD: &str = "InfoPayload";

fn epoch_bytes(seconds: i64) -> Result<[u8; 4]> {
    u32::try_from(seconds)
        .map(u32::to_le_bytes)
        .map_err(|_| RecorderError::invalid_argument(format!("Clock time {seconds} out of range")))
}

fn parse_epoch(data: &[u8]) -> Result<DateTime<Utc>> {
    let bytes: [u8; 4] = data
        .get(..4)
        .and_then(|head| head.try_into().ok())
        .ok_or_else(|| {
            RecorderError::invalid_command(format!("Clock value too short ({} bytes)", data.len()))
        })?;
    let seconds = i64::from(u32::from_le_bytes(bytes));
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| RecorderError::invalid_command(format!("Clock value {seconds} out of range")))
}

/// Sleep until the wall clock reaches the next whole second.
fn wait_for_next_second() {
    let now = Utc::now();
    let into_second = u64::from(now.timestamp_subsec_nanos());
    thread::sleep(Duration::from_nanos(1_000_000_000 - into_second));
}

/// Sleep until the wall clock reaches `target` epoch seconds.
fn wait_until(target: i64) {
    loop {
        let now = Utc::now();
        if now.timestamp() >= target {
            return;
        }
        let left = (target - now.timestamp()) * 1_000_000_000 - i64::from(now.timestamp_subsec_nanos());
        thread::sleep(Duration::from_nanos(u64::try_from(left).unwrap_or(0).max(1_000)));
    }
}

fn expect_response(response: Option<ResponsePacket>, command: &str) -> Result<Document> {
    response
        .map(ResponsePacket::into_body)
        .ok_or_else(|| RecorderError::timeout(format!("No response to {command}")))
}

impl<T: Transport> CommandInterface<T> {
    /// Send `data` and return the device's echo.
    ///
    /// # Errors
    /// `RecorderError::InvalidCommand` if the reply carries no `PingReply`,
    /// plus the errors of [`send_command`](Self::send_command).
    pub fn ping(&self, data: &[u8]) -> Result<Vec<u8>> {
        let response =
            self.send_command(CommandPacket::new("SendPing", data.to_vec()), &SendOptions::new())?;
        let body = expect_response(response, "SendPing")?;
        body.bytes("PingReply")
            .map(<[u8]>::to_vec)
            .ok_or_else(|| RecorderError::invalid_command("Ping response did not contain a PingReply"))
    }

    /// Read the device clock.
    ///
    /// With `pause`, waits for the next whole host second first; the
    /// device clock only has whole seconds.
    ///
    /// # Errors
    /// Transport and command errors.
    pub fn get_clock(&self, pause: bool) -> Result<ClockReading> {
        let _guard = self.lock()?;
        if pause {
            wait_for_next_second();
        }
        let host = Utc::now();
        if let Some(data) = self.read_clock_raw()? {
            return Ok(ClockReading {
                host,
                device: parse_epoch(&data)?,
            });
        }

        let response = self.send_command(
            CommandPacket::empty("GetClock"),
            &SendOptions::new().timeout(QUICK_COMMAND_TIMEOUT),
        )?;
        let body = expect_response(response, "GetClock")?;
        let data = body
            .bytes(CLOCK_TIME)
            .ok_or_else(|| RecorderError::invalid_command("GetClock response did not contain ClockTime"))?;
        Ok(ClockReading {
            host,
            device: parse_epoch(data)?,
        })
    }

    /// Set the device clock to `time`, or to host time if `None`.
    ///
    /// With `pause` (and no explicit time) the clock is set on the next
    /// whole second. Returns the host time at the write and the time set.
    ///
    /// # Errors
    /// `RecorderError::InvalidArgument` for times outside the 32-bit epoch
    /// range; transport and command errors.
    pub fn set_clock(&self, time: Option<DateTime<Utc>>, pause: bool) -> Result<ClockReading> {
        let (target, pause) = match time {
            Some(time) => (time.timestamp(), false),
            None => (Utc::now().timestamp() + i64::from(pause), pause),
        };
        let payload = epoch_bytes(target)?;

        let _guard = self.lock()?;
        if pause {
            wait_until(target);
        }
        let host = Utc::now();
        if !self.write_clock_raw(&payload)? {
            self.send_command(
                CommandPacket::new("SetClock", payload.to_vec()),
                &SendOptions::new().no_response().timeout(QUICK_COMMAND_TIMEOUT),
            )?;
        }
        debug!(target, "set device clock");
        Ok(ClockReading {
            host,
            device: parse_epoch(&payload)?,
        })
    }

    /// Host time minus device time. A transport hiccup is retried once.
    ///
    /// # Errors
    /// See [`get_clock`](Self::get_clock).
    pub fn clock_drift(&self, pause: bool) -> Result<TimeDelta> {
        let mut retries = 1;
        loop {
            match self.get_clock(pause) {
                Ok(reading) => return Ok(reading.drift()),
                Err(err @ (RecorderError::Io(_) | RecorderError::Transport { .. })) if retries > 0 => {
                    debug!(error = %err, "clock read failed; retrying");
                    retries -= 1;
                    thread::sleep(Duration::from_millis(250));
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Send a command the recorder acts on by resetting or dismounting.
    ///
    /// Over a framed transport the command is acknowledged with a status;
    /// any status other than `expected` returns `false` without waiting.
    /// Over the file interface only the first two bytes of the legacy
    /// (unwrapped) encoding are written. With `options.wait`, the call then
    /// waits for the recorder to disconnect.
    fn run_simple_command(
        &self,
        name: &str,
        expected: DeviceStatusCode,
        timeout_message: &str,
        options: &SimpleCommandOptions<'_>,
    ) -> Result<bool> {
        let _guard = self.lock()?;
        let packet = CommandPacket::empty(name);
        match self.framing() {
            Framing::Framed => {
                let mut send = SendOptions::new().no_response().timeout(options.timeout);
                send.callback = options.callback;
                self.send_command(packet, &send)?;
                if let Some((status, _)) = self.status()
                    && status != expected
                {
                    info!(command = name, %status, "unexpected acknowledgement");
                    return Ok(false);
                }
            }
            Framing::Unframed => {
                let legacy = packet.encode_legacy(self.codec(), self.config().max_command_size)?;
                self.write_raw(&legacy[..legacy.len().min(2)])?;
            }
        }

        if !options.wait {
            return Ok(true);
        }
        self.await_availability(false, options.timeout, options.callback, timeout_message)
    }

    /// # Errors
    /// See [`send_command`](Self::send_command); also `Timeout` if the
    /// recorder does not start within the timeout.
    pub fn start_recording(&self, options: &SimpleCommandOptions<'_>) -> Result<bool> {
        self.run_simple_command(
            "RecStart",
            DeviceStatusCode::StartPending,
            "Timed out waiting for recording to start",
            options,
        )
    }

    /// # Errors
    /// See [`start_recording`](Self::start_recording).
    pub fn stop_recording(&self, options: &SimpleCommandOptions<'_>) -> Result<bool> {
        self.run_simple_command(
            "RecStop",
            DeviceStatusCode::Idle,
            "Timed out waiting for recording to stop",
            options,
        )
    }

    /// # Errors
    /// See [`start_recording`](Self::start_recording).
    pub fn reset(&self, options: &SimpleCommandOptions<'_>) -> Result<bool> {
        self.run_simple_command(
            "Reset",
            DeviceStatusCode::ResetPending,
            "Timed out waiting for device to reset",
            options,
        )
    }

    /// Apply firmware/userpage update files already copied to the
    /// recorder. `secure` selects signed packages.
    ///
    /// # Errors
    /// See [`start_recording`](Self::start_recording).
    pub fn update_all(&self, secure: bool, options: &SimpleCommandOptions<'_>) -> Result<bool> {
        let name = if secure { "SecureUpdateAll" } else { "LegacyAll" };
        self.run_simple_command(
            name,
            DeviceStatusCode::ResetPending,
            "Timed out waiting for update to begin",
            options,
        )
    }

    /// Read info slot `index`. With `locked`, the command carries this
    /// host's lock ID, as some slots require.
    ///
    /// # Errors
    /// `RecorderError::Command` with `ErrBadInfoIndex` or `ErrBadLockId`
    /// from the device; see [`send_command`](Self::send_command).
    pub fn get_info(&self, index: u64, locked: bool) -> Result<Vec<u8>> {
        let mut packet = CommandPacket::new("GetInfo", index);
        if locked {
            packet = packet.with_lock_id(self.host_id().to_vec());
        }
        let response = self.send_command(packet, &SendOptions::new())?;
        let body = expect_response(response, "GetInfo")?;
        let info = body
            .document("GetInfoResponse")
            .ok_or_else(|| RecorderError::invalid_command("GetInfo response did not contain GetInfoResponse"))?;
        Ok(info.bytes(INFO_PAYLOAD).map(<[u8]>::to_vec).unwrap_or_default())
    }

    /// Write info slot `index`.
    ///
    /// # Errors
    /// See [`get_info`](Self::get_info).
    pub fn set_info(&self, index: u64, payload: &[u8], locked: bool) -> Result<()> {
        let body = Document::new()
            .with(INFO_INDEX, index)
            .with(INFO_PAYLOAD, payload.to_vec());
        let mut packet = CommandPacket::new("SetInfo", body);
        if locked {
            packet = packet.with_lock_id(self.host_id().to_vec());
        }
        self.send_command(packet, &SendOptions::new())?;
        Ok(())
    }

    /// Blink the recorder's LEDs. No response is expected.
    ///
    /// # Errors
    /// Transport errors, or a negative status if the device answers.
    pub fn blink(&self, pattern: BlinkPattern) -> Result<()> {
        self.send_command(
            CommandPacket::new("Blink", pattern.to_bytes().to_vec()),
            &SendOptions::new().no_response(),
        )?;
        Ok(())
    }

    /// Battery state, or `None` if the device does not report one.
    ///
    /// # Errors
    /// See [`send_command`](Self::send_command).
    pub fn battery_status(&self, timeout: impl Into<Timeout>) -> Result<Option<BatteryStatus>> {
        let response = self.send_command(
            CommandPacket::empty("GetBattery"),
            &SendOptions::new().timeout(timeout),
        )?;
        Ok(response
            .and_then(|response| response.body().uint("BatteryState"))
            .map(BatteryStatus::from_bits))
    }

    /// [`battery_status`](Self::battery_status) with the quick-query timeout.
    ///
    /// # Errors
    /// See [`send_command`](Self::send_command).
    pub fn battery(&self) -> Result<Option<BatteryStatus>> {
        self.battery_status(QUICK_COMMAND_TIMEOUT)
    }

    /// The device-side lock ID, `None` when unlocked (all zeros).
    ///
    /// # Errors
    /// See [`send_command`](Self::send_command).
    pub fn get_lock_id(&self) -> Result<Option<Vec<u8>>> {
        let response = self.send_command(CommandPacket::empty("GetLockID"), &SendOptions::new())?;
        let body = expect_response(response, "GetLockID")?;
        Ok(body
            .bytes(LOCK_ID)
            .filter(|id| id.iter().any(|&byte| byte != 0))
            .map(<[u8]>::to_vec))
    }

    /// Replace the device-side lock ID. `current` must match the device's
    /// unless it is unlocked.
    ///
    /// # Errors
    /// `RecorderError::Command` with `ErrBadLockId` on a mismatch.
    pub fn set_lock_id(&self, current: &[u8], new: &[u8]) -> Result<()> {
        let body = Document::new()
            .with("CurrentLockID", current.to_vec())
            .with("NewLockID", new.to_vec());
        self.send_command(CommandPacket::new("SetLockID", body), &SendOptions::new())?;
        Ok(())
    }

    /// Lock the device to this host.
    ///
    /// # Errors
    /// See [`set_lock_id`](Self::set_lock_id).
    pub fn claim_lock(&self) -> Result<()> {
        let id = *self.host_id();
        self.set_lock_id(&id, &id)
    }

    /// Release this host's device-side lock.
    ///
    /// # Errors
    /// See [`set_lock_id`](Self::set_lock_id).
    pub fn clear_lock_id(&self) -> Result<()> {
        let id = *self.host_id();
        self.set_lock_id(&id, &[0u8; 16])
    }

    fn require_wifi(&self, command: &str) -> Result<()> {
        if !self.has_wifi() {
            return Err(RecorderError::unsupported(format!(
                "{command}: {} has no Wi-Fi adapter",
                self.name()
            )));
        }
        if self.framing() != Framing::Framed {
            return Err(RecorderError::unsupported(format!(
                "{command}: not available over the file command interface"
            )));
        }
        Ok(())
    }

    /// Current Wi-Fi connection, `None` without a response.
    ///
    /// # Errors
    /// `RecorderError::UnsupportedFeature` (before any I/O) unless the
    /// recorder has Wi-Fi and a serial command interface.
    pub fn query_wifi(&self, timeout: impl Into<Timeout>) -> Result<Option<WifiInfo>> {
        self.require_wifi("query_wifi")?;
        let response = self.send_command(
            CommandPacket::empty("QueryWiFi"),
            &SendOptions::new().timeout(timeout),
        )?;
        Ok(response.and_then(|response| {
            response.body().document("QueryWiFiResponse").map(|info| WifiInfo {
                ssid: info.str("SSID").map(str::to_owned),
                status: info
                    .uint("WiFiConnectionStatus")
                    .and_then(WiFiConnectionStatus::from_code),
            })
        }))
    }

    /// Network interface state, `None` without a response.
    ///
    /// # Errors
    /// See [`query_wifi`](Self::query_wifi).
    pub fn network_status(&self, timeout: impl Into<Timeout>) -> Result<Option<NetworkStatus>> {
        self.require_wifi("network_status")?;
        let response = self.send_command(
            CommandPacket::empty("NetworkStatus"),
            &SendOptions::new().timeout(timeout),
        )?;
        Ok(response.and_then(|response| {
            response
                .body()
                .document("NetworkStatusResponse")
                .map(|status| NetworkStatus {
                    mac_address: status.bytes("MACAddress").map(|mac| {
                        mac.iter()
                            .map(|byte| format!("{byte:02x}"))
                            .collect::<Vec<_>>()
                            .join(":")
                    }),
                    ipv4_address: status
                        .bytes("IPV4Address")
                        .and_then(|ip| <[u8; 4]>::try_from(ip).ok())
                        .map(Ipv4Addr::from),
                    wifi_status: status
                        .uint("CurrentWiFiStatus")
                        .and_then(CurrentWiFiStatus::from_code),
                })
        }))
    }

    /// Encode `document` with this interface's codec (for diagnostics).
    ///
    /// # Errors
    /// `RecorderError::Document` if the document does not fit the schema.
    pub fn encode_document(&self, document: &Document) -> Result<Vec<u8>> {
        Ok(self.codec().serialize(document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_blink_defaults() {
        assert_eq!(BlinkPattern::default().to_bytes(), [3, 0, 7, 0]);
    }

    #[rstest]
    #[case(&[0, 0, 0, 0], 0)]
    #[case(&[0x00, 0xF1, 0x53, 0x65], 1_700_000_000)]
    #[case(&[0x00, 0xF1, 0x53, 0x65, 0xFF], 1_700_000_000)]
    fn test_parse_epoch(#[case] data: &[u8], #[case] seconds: i64) {
        assert_eq!(parse_epoch(data).unwrap().timestamp(), seconds);
    }

    #[test]
    fn test_parse_epoch_short() {
        assert!(matches!(
            parse_epoch(&[1, 2]),
            Err(RecorderError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn test_epoch_range() {
        assert_eq!(epoch_bytes(1_700_000_000).unwrap(), [0x00, 0xF1, 0x53, 0x65]);
        assert!(epoch_bytes(-1).is_err());
        assert!(epoch_bytes(i64::from(u32::MAX) + 1).is_err());
    }

    #[test]
    fn test_drift_sign() {
        let reading = ClockReading {
            host: DateTime::from_timestamp(100, 0).unwrap(),
            device: DateTime::from_timestamp(97, 0).unwrap(),
        };
        assert_eq!(reading.drift(), TimeDelta::seconds(3));
    }
}
