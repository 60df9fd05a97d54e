//! Software recorder for tests and demos.
//!
//! [`DeviceEmulator`] answers host commands on a
//! [`SimulatedTransport`](recorder_transport::SimulatedTransport) the way
//! recorder firmware does: it decodes the command, runs it against a small
//! device model (clock, info slots, lock ID, battery, recording state) and
//! writes back an `EBMLResponse` with the command's index, a queue depth
//! and a status code.
//!
//! Framed transports get HDLC-framed Corbus replies. Unframed transports
//! get bare EBML in the simulated RESPONSE file, and two-byte legacy
//! writes are treated as the commands whose element ID they carry.
//!
//! # Examples
//!
//! ```
//! use recorder_command::CommandInterface;
//! use recorder_command::emulator::DeviceEmulator;
//! use recorder_transport::SimulatedTransport;
//!
//! let (transport, handle) = SimulatedTransport::new();
//! let emulator = DeviceEmulator::new();
//! emulator.attach(&handle);
//!
//! let interface = CommandInterface::new(transport);
//! assert_eq!(interface.ping(b"hello").unwrap(), b"hello");
//! assert_eq!(emulator.commands(), vec!["SendPing".to_string()]);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use recorder_core::{DeviceStatusCode, RecorderError};
use recorder_protocol::frame::{self, CrcMode, FrameError};
use recorder_protocol::packet::{LOCK_ID, QUEUE_DEPTH, RESPONSE_INDEX, STATUS_CODE, STATUS_MESSAGE};
use recorder_protocol::{CommandPacket, Document, EbmlCodec, ResponsePacket, Value};
use recorder_transport::{Framing, SimulatedHandle};
use tracing::{debug, warn};

const UNLOCKED: [u8; 16] = [0; 16];

#[derive(Debug, Clone, PartialEq, Eq)]
struct InfoSlot {
    payload: Vec<u8>,
    requires_lock: bool,
}

/// A refused command: status and optional message.
#[derive(Debug)]
struct Fault {
    status: DeviceStatusCode,
    message: Option<String>,
}

impl Fault {
    fn new(status: DeviceStatusCode) -> Self {
        Self {
            status,
            message: None,
        }
    }

    fn with_message(status: DeviceStatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

impl From<RecorderError> for Fault {
    fn from(err: RecorderError) -> Self {
        match err {
            RecorderError::Document { .. } => Self::with_message(DeviceStatusCode::ErrBadEbml, err.to_string()),
            RecorderError::InvalidCommand { .. } => Self::new(DeviceStatusCode::ErrInvalidCommand),
            other => Self::with_message(DeviceStatusCode::ErrInternalError, other.to_string()),
        }
    }
}

type Handled = Result<Document, Fault>;

#[derive(Debug)]
struct EmulatorState {
    status: DeviceStatusCode,
    lock_id: [u8; 16],
    /// Device clock minus host clock, in seconds.
    clock_offset: i64,
    info: BTreeMap<u64, InfoSlot>,
    battery: Option<u64>,
    wifi: Option<(String, u64)>,
    network: Option<([u8; 6], [u8; 4], u64)>,
    blinks: Vec<[u8; 4]>,
    queue_full: usize,
    corrupt: usize,
    silent: bool,
    detach_on_reset: bool,
    commands: Vec<String>,
}

impl Default for EmulatorState {
    fn default() -> Self {
        Self {
            status: DeviceStatusCode::Idle,
            lock_id: UNLOCKED,
            clock_offset: 0,
            info: BTreeMap::new(),
            battery: None,
            wifi: None,
            network: None,
            blinks: Vec::new(),
            queue_full: 0,
            corrupt: 0,
            silent: false,
            detach_on_reset: true,
            commands: Vec::new(),
        }
    }
}

/// Emulated recorder firmware. Clones share one device model.
#[derive(Debug, Clone)]
pub struct DeviceEmulator {
    state: Arc<Mutex<EmulatorState>>,
    codec: EbmlCodec,
}

impl Default for DeviceEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceEmulator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EmulatorState::default())),
            codec: EbmlCodec::command_response(),
        }
    }

    fn state(&self) -> MutexGuard<'_, EmulatorState> {
        self.state.lock()
    }

    /// Add an info slot readable with `GetInfo` and writable with `SetInfo`.
    #[must_use]
    pub fn with_info(self, index: u64, payload: impl Into<Vec<u8>>) -> Self {
        self.insert_info(index, payload.into(), false);
        self
    }

    /// Add an info slot that refuses hosts not holding the device lock.
    #[must_use]
    pub fn with_locked_info(self, index: u64, payload: impl Into<Vec<u8>>) -> Self {
        self.insert_info(index, payload.into(), true);
        self
    }

    fn insert_info(&self, index: u64, payload: Vec<u8>, requires_lock: bool) {
        self.state().info.insert(
            index,
            InfoSlot {
                payload,
                requires_lock,
            },
        );
    }

    /// Report this raw `BatteryState` to `GetBattery`.
    #[must_use]
    pub fn with_battery(self, bits: u64) -> Self {
        self.state().battery = Some(bits);
        self
    }

    /// Run the device clock `offset` seconds ahead of the host.
    #[must_use]
    pub fn with_clock_offset(self, offset: i64) -> Self {
        self.state().clock_offset = offset;
        self
    }

    /// Give the recorder a Wi-Fi adapter connected to `ssid`.
    #[must_use]
    pub fn with_wifi(self, ssid: impl Into<String>, mac: [u8; 6], ip: [u8; 4]) -> Self {
        let mut state = self.state();
        state.wifi = Some((ssid.into(), 2));
        state.network = Some((mac, ip, 2));
        drop(state);
        self
    }

    /// Keep the device attached after `Reset`, `RecStart` and updates.
    #[must_use]
    pub fn stay_attached(self) -> Self {
        self.state().detach_on_reset = false;
        self
    }

    /// Answer the next `count` framed commands with a full queue instead
    /// of running them.
    pub fn set_queue_full(&self, count: usize) {
        self.state().queue_full = count;
    }

    /// Damage the checksum of the next `count` framed replies.
    pub fn set_corrupt(&self, count: usize) {
        self.state().corrupt = count;
    }

    /// Run commands without answering them.
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Names of the commands received, oldest first.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn status(&self) -> DeviceStatusCode {
        self.state().status
    }

    /// Current device-side lock ID; all zeros when unlocked.
    pub fn lock_id(&self) -> [u8; 16] {
        self.state().lock_id
    }

    pub fn info(&self, index: u64) -> Option<Vec<u8>> {
        self.state().info.get(&index).map(|slot| slot.payload.clone())
    }

    pub fn clock_offset(&self) -> i64 {
        self.state().clock_offset
    }

    /// Blink patterns received, oldest first.
    pub fn blinks(&self) -> Vec<[u8; 4]> {
        self.state().blinks.clone()
    }

    /// Answer host writes on `handle`.
    ///
    /// Unframed transports also get an idle RESPONSE file and an
    /// out-of-band clock, as a mounted recorder has.
    pub fn attach(&self, handle: &SimulatedHandle) {
        let framing = handle.framing();
        if framing == Framing::Unframed {
            let idle = Document::new()
                .with(QUEUE_DEPTH, 1u64)
                .with(STATUS_CODE, i64::from(self.status().code()));
            match ResponsePacket::encode(&idle, &self.codec) {
                Ok(ebml) => handle.inject(&ebml),
                Err(err) => warn!(error = %err, "could not encode idle response"),
            }
            if let Some(clock) = self.device_clock() {
                handle.set_clock(&clock);
            }
        }

        let emulator = self.clone();
        let device = handle.clone();
        handle.set_responder(move |data| match framing {
            Framing::Framed => emulator.respond_framed(data, &device),
            Framing::Unframed => emulator.respond_unframed(data, &device),
        });
    }

    fn device_clock(&self) -> Option<[u8; 4]> {
        let seconds = Utc::now().timestamp() + self.clock_offset();
        u32::try_from(seconds).ok().map(u32::to_le_bytes)
    }

    fn respond_framed(&self, data: &[u8], device: &SimulatedHandle) -> Option<Vec<u8>> {
        let (index, handled) = match frame::decode_with(data, CrcMode::Verify) {
            Ok(packet) => match CommandPacket::from_corbus(&packet, &self.codec) {
                Ok(command) => {
                    let index = command.index().map(|index| u64::from(index.value()));
                    if self.take_queue_full() {
                        debug!(command = command.name(), "emulated queue full");
                        let body = Document::new()
                            .with(RESPONSE_INDEX, index.unwrap_or_default())
                            .with(QUEUE_DEPTH, 0u64)
                            .with(STATUS_CODE, i64::from(self.status().code()));
                        return self.frame_reply(&body);
                    }
                    (index, self.execute(&command, device))
                }
                Err(err @ RecorderError::InvalidCommand { .. }) => {
                    debug!(error = %err, "unparseable command packet");
                    (None, Err(Fault::new(DeviceStatusCode::ErrBadPacket)))
                }
                Err(err) => (None, Err(Fault::from(err))),
            },
            Err(FrameError::Checksum { .. }) => (None, Err(Fault::new(DeviceStatusCode::ErrBadChecksum))),
            Err(err) => {
                debug!(error = %err, "bad command frame");
                (None, Err(Fault::new(DeviceStatusCode::ErrBadPacket)))
            }
        };

        if self.state().silent {
            return None;
        }
        let body = self.response_body(index, handled);
        self.frame_reply(&body)
    }

    fn frame_reply(&self, body: &Document) -> Option<Vec<u8>> {
        let mut reply = match ResponsePacket::frame(body, &self.codec) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "could not encode response");
                return None;
            }
        };
        let mut state = self.state();
        if state.corrupt > 0 {
            state.corrupt -= 1;
            // First header byte; never an escape or break byte either way.
            reply[1] ^= 0x01;
        }
        Some(reply)
    }

    fn respond_unframed(&self, data: &[u8], device: &SimulatedHandle) -> Option<Vec<u8>> {
        if data.len() <= 2 {
            self.run_legacy(data, device);
            return None;
        }

        let parsed = self
            .codec_deserialize(data)
            .and_then(CommandPacket::from_document);
        let (index, handled) = match parsed {
            Ok(command) => (
                command.index().map(|index| u64::from(index.value())),
                self.execute(&command, device),
            ),
            Err(err) => (None, Err(Fault::from(err))),
        };

        if let Some(clock) = self.device_clock() {
            device.set_clock(&clock);
        }
        if self.state().silent {
            return None;
        }
        let body = self.response_body(index, handled);
        match ResponsePacket::encode(&body, &self.codec) {
            Ok(ebml) => Some(ebml),
            Err(err) => {
                warn!(error = %err, "could not encode response");
                None
            }
        }
    }

    fn codec_deserialize(&self, data: &[u8]) -> recorder_core::Result<Document> {
        use recorder_protocol::DocumentCodec;
        Ok(self.codec.deserialize(data)?)
    }

    /// The first two bytes of a legacy command: the element ID alone.
    fn run_legacy(&self, data: &[u8], device: &SimulatedHandle) {
        let id = data.iter().fold(0u32, |acc, &byte| (acc << 8) | u32::from(byte));
        let Some(name) = self.codec.schema().by_id(id).map(|def| def.name.clone()) else {
            warn!(id = format_args!("0x{id:04X}"), "unknown legacy command");
            return;
        };
        let command = CommandPacket::empty(name);
        if let Err(fault) = self.execute(&command, device) {
            debug!(status = %fault.status, "legacy command refused");
        }
    }

    fn take_queue_full(&self) -> bool {
        let mut state = self.state();
        if state.queue_full > 0 {
            state.queue_full -= 1;
            return true;
        }
        false
    }

    fn response_body(&self, index: Option<u64>, handled: Handled) -> Document {
        let mut body = Document::new();
        if let Some(index) = index {
            body.insert(RESPONSE_INDEX, index);
        }
        body.insert(QUEUE_DEPTH, 1u64);
        match handled {
            Ok(result) => {
                body.insert(STATUS_CODE, i64::from(self.status().code()));
                for (name, value) in result.iter() {
                    body.insert(name, value.clone());
                }
            }
            Err(fault) => {
                body.insert(STATUS_CODE, i64::from(fault.status.code()));
                if let Some(message) = fault.message {
                    body.insert(STATUS_MESSAGE, message);
                }
            }
        }
        body
    }

    fn execute(&self, command: &CommandPacket, device: &SimulatedHandle) -> Handled {
        let name = command.name();
        debug!(command = name, index = ?command.index(), "emulator received command");
        self.state().commands.push(name.to_string());

        match name {
            "SendPing" => {
                let data = command.payload().as_bytes().unwrap_or_default();
                Ok(Document::new().with("PingReply", data))
            }
            "GetClock" => self
                .device_clock()
                .map(|clock| Document::new().with("ClockTime", clock.to_vec()))
                .ok_or_else(|| Fault::with_message(DeviceStatusCode::ErrInternalError, "clock out of range")),
            "SetClock" => {
                let bytes: [u8; 4] = command
                    .payload()
                    .as_bytes()
                    .and_then(|data| data.get(..4))
                    .and_then(|data| data.try_into().ok())
                    .ok_or_else(|| Fault::new(DeviceStatusCode::ErrBadPayload))?;
                let target = i64::from(u32::from_le_bytes(bytes));
                self.state().clock_offset = target - Utc::now().timestamp();
                Ok(Document::new())
            }
            "GetLockID" => Ok(Document::new().with(LOCK_ID, self.lock_id().to_vec())),
            "SetLockID" => self.set_lock_id(command.payload()),
            "GetInfo" => self.get_info(command),
            "SetInfo" => self.set_info(command),
            "GetBattery" => Ok(self
                .state()
                .battery
                .map(|bits| Document::new().with("BatteryState", bits))
                .unwrap_or_default()),
            "Blink" => {
                let pattern: [u8; 4] = command
                    .payload()
                    .as_bytes()
                    .and_then(|data| data.try_into().ok())
                    .ok_or_else(|| Fault::new(DeviceStatusCode::ErrBadPayload))?;
                self.state().blinks.push(pattern);
                Ok(Document::new())
            }
            "RecStart" => Ok(self.reboot(DeviceStatusCode::StartPending, device)),
            "RecStop" => {
                self.state().status = DeviceStatusCode::Idle;
                Ok(Document::new())
            }
            "Reset" | "SecureUpdateAll" | "LegacyAll" => {
                Ok(self.reboot(DeviceStatusCode::ResetPending, device))
            }
            "QueryWiFi" => {
                let (ssid, status) = self
                    .state()
                    .wifi
                    .clone()
                    .ok_or_else(|| Fault::new(DeviceStatusCode::ErrUnknownCommand))?;
                Ok(Document::new().with(
                    "QueryWiFiResponse",
                    Document::new()
                        .with("SSID", ssid)
                        .with("WiFiConnectionStatus", status),
                ))
            }
            "NetworkStatus" => {
                let (mac, ip, status) = self
                    .state()
                    .network
                    .ok_or_else(|| Fault::new(DeviceStatusCode::ErrUnknownCommand))?;
                Ok(Document::new().with(
                    "NetworkStatusResponse",
                    Document::new()
                        .with("MACAddress", mac.to_vec())
                        .with("IPV4Address", ip.to_vec())
                        .with("CurrentWiFiStatus", status),
                ))
            }
            other => {
                debug!(command = other, "unsupported command");
                Err(Fault::new(DeviceStatusCode::ErrUnknownCommand))
            }
        }
    }

    fn reboot(&self, status: DeviceStatusCode, device: &SimulatedHandle) -> Document {
        let mut state = self.state();
        state.status = status;
        if state.detach_on_reset {
            drop(state);
            device.set_available(false);
        }
        Document::new()
    }

    /// Device lock check: passes when unlocked or when `id` matches.
    fn check_lock(&self, id: Option<&[u8]>) -> bool {
        let current = self.lock_id();
        current == UNLOCKED || id == Some(&current[..])
    }

    fn set_lock_id(&self, payload: &Value) -> Handled {
        let body = payload
            .as_document()
            .ok_or_else(|| Fault::new(DeviceStatusCode::ErrBadPayload))?;
        let (Some(current), Some(new)) = (body.bytes("CurrentLockID"), body.bytes("NewLockID")) else {
            return Err(Fault::new(DeviceStatusCode::ErrBadPayload));
        };
        let new: [u8; 16] = new
            .try_into()
            .map_err(|_| Fault::new(DeviceStatusCode::ErrBadPayload))?;
        if !self.check_lock(Some(current)) {
            return Err(Fault::new(DeviceStatusCode::ErrBadLockId));
        }
        self.state().lock_id = new;
        Ok(Document::new())
    }

    fn get_info(&self, command: &CommandPacket) -> Handled {
        let index = command
            .payload()
            .as_uint()
            .ok_or_else(|| Fault::new(DeviceStatusCode::ErrBadPayload))?;
        let slot = self
            .state()
            .info
            .get(&index)
            .cloned()
            .ok_or_else(|| Fault::new(DeviceStatusCode::ErrBadInfoIndex))?;
        if slot.requires_lock && !self.check_lock(command.lock_id()) {
            return Err(Fault::new(DeviceStatusCode::ErrBadLockId));
        }
        Ok(Document::new().with(
            "GetInfoResponse",
            Document::new()
                .with("InfoIndex", index)
                .with("InfoPayload", slot.payload),
        ))
    }

    fn set_info(&self, command: &CommandPacket) -> Handled {
        let body = command
            .payload()
            .as_document()
            .ok_or_else(|| Fault::new(DeviceStatusCode::ErrInvalidCommand))?;
        let (Some(index), Some(payload)) = (body.uint("InfoIndex"), body.bytes("InfoPayload")) else {
            return Err(Fault::new(DeviceStatusCode::ErrInvalidCommand));
        };
        let requires_lock = self
            .state()
            .info
            .get(&index)
            .is_some_and(|slot| slot.requires_lock);
        if requires_lock && !self.check_lock(command.lock_id()) {
            return Err(Fault::new(DeviceStatusCode::ErrBadLockId));
        }
        self.insert_info(index, payload.to_vec(), requires_lock);
        Ok(Document::new())
    }
}
