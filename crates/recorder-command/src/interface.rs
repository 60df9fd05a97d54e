//! The command interface: one request/response exchange at a time.
//!
//! A [`CommandInterface`] owns the transport to one recorder. Each call to
//! [`send_command`](CommandInterface::send_command) takes the device lock,
//! assigns the next sequence index and then runs one of two exchanges:
//!
//! - **Framed** (serial): discard stale input, write the framed packet and
//!   read until a frame decodes to a response carrying the command's index.
//!   Frames failing their checksum are dropped and the wait continues
//!   within the same deadline. A full device queue resends the command
//!   under a new index.
//! - **Unframed** (file): wait until the RESPONSE file reports room in the
//!   device queue, write COMMAND, then poll RESPONSE until it carries the
//!   command's index.
//!
//! In both, a negative `DeviceStatusCode` fails the call with
//! `RecorderError::Command`, and running out the deadline fails it with
//! `RecorderError::Timeout`. Commands sent without `response` treat a
//! timeout or a vanished port as success with no response.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use recorder_core::constants::REBOOT_POLL_INTERVAL;
use recorder_core::{DeviceStatusCode, RecorderError, Result};
use recorder_protocol::frame::{self, CrcMode, FrameError};
use recorder_protocol::{
    CommandPacket, Document, EbmlCodec, FrameParser, ResponsePacket, SequenceIndex, Value,
};
use recorder_transport::{AnyTransport, Framing, Transport};
use tracing::{debug, info, trace, warn};

use crate::config::CommandConfig;
use crate::lock::{DeviceLock, DeviceLockGuard};
use crate::state::{ExchangeState, ExchangeTracker};

/// Largest single serial read.
const READ_CHUNK: usize = 1024;

/// Largest RESPONSE file accepted.
const RESPONSE_LIMIT: usize = 64 * 1024;

/// How long to wait for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// The interface's configured timeout.
    #[default]
    Default,
    /// A specific limit. `Duration::ZERO` sends without waiting.
    After(Duration),
    /// Wait indefinitely.
    Never,
}

impl Timeout {
    fn resolve(self, default: Duration) -> Option<Duration> {
        match self {
            Timeout::Default => Some(default),
            Timeout::After(limit) => Some(limit),
            Timeout::Never => None,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(limit: Duration) -> Self {
        Timeout::After(limit)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(limit: Option<Duration>) -> Self {
        limit.map_or(Timeout::Never, Timeout::After)
    }
}

/// Cooperative cancellation: polled during every wait; `true` stops it.
pub type Callback<'a> = &'a (dyn Fn() -> bool + 'a);

/// Per-call options for [`CommandInterface::send_command`].
#[derive(Clone, Copy)]
pub struct SendOptions<'a> {
    pub timeout: Timeout,
    /// Wait for, and require, a response.
    pub response: bool,
    /// RESPONSE polling interval override (file interface).
    pub interval: Option<Duration>,
    pub callback: Option<Callback<'a>>,
}

impl Default for SendOptions<'_> {
    fn default() -> Self {
        Self {
            timeout: Timeout::Default,
            response: true,
            interval: None,
            callback: None,
        }
    }
}

impl<'a> SendOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Do not require a response; timeouts become `Ok(None)`.
    #[must_use]
    pub fn no_response(mut self) -> Self {
        self.response = false;
        self
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    #[must_use]
    pub fn callback(mut self, callback: Callback<'a>) -> Self {
        self.callback = Some(callback);
        self
    }

    fn cancelled(&self) -> bool {
        self.callback.is_some_and(|callback| callback())
    }
}

impl std::fmt::Debug for SendOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendOptions")
            .field("timeout", &self.timeout)
            .field("response", &self.response)
            .field("interval", &self.interval)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Optional override for "is the device still attached?".
pub type Availability = Arc<dyn Fn() -> bool + Send + Sync>;

/// Last status reported by the device, with its message.
pub type Status = (DeviceStatusCode, Option<String>);

#[derive(Debug, Clone, Copy)]
struct Deadline(Option<Instant>);

impl Deadline {
    fn after(limit: Option<Duration>) -> Self {
        Self(limit.map(|limit| Instant::now() + limit))
    }

    fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// `max`, shortened to what is left before the deadline.
    fn slice(&self, max: Duration) -> Duration {
        match self.0 {
            Some(at) => at.saturating_duration_since(Instant::now()).min(max),
            None => max,
        }
    }
}

/// A per-process lock ID: hashes of the process ID and start time.
fn default_host_id() -> [u8; 16] {
    use std::collections::hash_map::RandomState;
    use std::hash::BuildHasher;

    let state = RandomState::new();
    let pid = std::process::id();
    let started = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut id = [0u8; 16];
    id[..8].copy_from_slice(&state.hash_one((pid, started)).to_be_bytes());
    id[8..].copy_from_slice(&state.hash_one((started, pid)).to_be_bytes());
    id
}

/// What one wait for a framed response ended with.
enum Awaited {
    Response(ResponsePacket),
    QueueFull,
    TimedOut,
    Cancelled,
    Disconnected,
}

struct Exchange<T> {
    transport: T,
    index: SequenceIndex,
    parser: FrameParser,
    tracker: ExchangeTracker,
    status: Option<Status>,
    /// Most recent RESPONSE content seen on an unframed transport.
    last_seen: Option<ResponsePacket>,
    last_command: Option<(DateTime<Utc>, CommandPacket)>,
}

impl<T: Transport> Exchange<T> {
    fn ensure_open(&mut self) -> Result<()> {
        if !self.transport.is_open() {
            self.transport.open()?;
        }
        Ok(())
    }

    fn record_status(&mut self, response: &ResponsePacket) {
        self.status = Some((
            response.status(),
            response.status_message().map(str::to_owned),
        ));
    }

    fn advance(&mut self, state: ExchangeState) -> Result<()> {
        self.tracker.transition_to(state)?;
        Ok(())
    }
}

/// Issues commands to one recorder over a [`Transport`].
pub struct CommandInterface<T: Transport = AnyTransport> {
    exchange: Mutex<Exchange<T>>,
    lock: Arc<DeviceLock>,
    config: CommandConfig,
    codec: EbmlCodec,
    wifi: bool,
    availability: Option<Availability>,
    host_id: [u8; 16],
    name: String,
}

impl<T: Transport> CommandInterface<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, CommandConfig::default())
    }

    pub fn with_config(transport: T, config: CommandConfig) -> Self {
        let lock = Arc::new(DeviceLock::with_timeout(config.lock_timeout));
        Self {
            name: transport.name().to_string(),
            exchange: Mutex::new(Exchange {
                transport,
                index: SequenceIndex::default(),
                parser: FrameParser::new(),
                tracker: ExchangeTracker::new(),
                status: None,
                last_seen: None,
                last_command: None,
            }),
            lock,
            config,
            codec: EbmlCodec::command_response(),
            wifi: false,
            availability: None,
            host_id: default_host_id(),
        }
    }

    /// Share an existing device lock (normally the owning recorder's).
    #[must_use]
    pub fn with_lock(mut self, lock: Arc<DeviceLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Declare whether the recorder has Wi-Fi hardware.
    #[must_use]
    pub fn with_wifi(mut self, wifi: bool) -> Self {
        self.wifi = wifi;
        self
    }

    /// Replace the transport's own availability check, e.g. with a check
    /// for the recorder's mounted volume.
    #[must_use]
    pub fn with_availability<F>(mut self, available: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.availability = Some(Arc::new(available));
        self
    }

    /// Identify this host with `id` when claiming the device-side lock.
    #[must_use]
    pub fn with_host_id(mut self, id: [u8; 16]) -> Self {
        self.host_id = id;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host_id(&self) -> &[u8; 16] {
        &self.host_id
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    pub fn codec(&self) -> &EbmlCodec {
        &self.codec
    }

    pub fn device_lock(&self) -> &Arc<DeviceLock> {
        &self.lock
    }

    pub fn has_wifi(&self) -> bool {
        self.wifi
    }

    fn exchange(&self) -> MutexGuard<'_, Exchange<T>> {
        self.exchange.lock()
    }

    /// Hold the device lock across several commands.
    ///
    /// # Errors
    /// `RecorderError::Busy` if the lock timeout runs out first.
    pub fn lock(&self) -> Result<DeviceLockGuard<'_>> {
        Ok(self.lock.acquire()?)
    }

    pub fn framing(&self) -> Framing {
        self.exchange().transport.framing()
    }

    /// Last device status and message, `None` until a status is known or
    /// after a command whose response was not awaited.
    pub fn status(&self) -> Option<Status> {
        self.exchange().status.clone()
    }

    /// When the last command was sent, and what it was.
    pub fn last_command(&self) -> Option<(DateTime<Utc>, CommandPacket)> {
        self.exchange().last_command.clone()
    }

    /// Sequence index of the most recent command.
    pub fn last_index(&self) -> SequenceIndex {
        self.exchange().index
    }

    pub fn exchange_state(&self) -> ExchangeState {
        self.exchange().tracker.current_state()
    }

    /// Checksum failures among recently recorded exchange transitions.
    pub fn checksum_failures(&self) -> usize {
        self.exchange().tracker.checksum_failures()
    }

    /// Run `f` with exclusive access to the transport.
    ///
    /// # Errors
    /// `RecorderError::Busy` if the device lock cannot be taken.
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let _guard = self.lock()?;
        Ok(f(&mut self.exchange().transport))
    }

    /// Whether the recorder is attached.
    pub fn is_available(&self) -> bool {
        match &self.availability {
            Some(available) => available(),
            None => self.exchange().transport.is_available(),
        }
    }

    /// Close and reopen the transport.
    ///
    /// # Errors
    /// Transport errors from reopening.
    pub fn reset_connection(&self) -> Result<()> {
        let _guard = self.lock()?;
        let mut exchange = self.exchange();
        exchange.transport.close()?;
        exchange.parser.clear();
        exchange.last_seen = None;
        exchange.transport.open()?;
        Ok(())
    }

    /// Close the transport. Closing a closed interface is a no-op.
    ///
    /// # Errors
    /// Transport errors while closing.
    pub fn close(&self) -> Result<()> {
        let _guard = self.lock()?;
        let mut exchange = self.exchange();
        if exchange.transport.is_open() {
            info!(transport = %self.name, "closing command interface");
        }
        exchange.transport.close()?;
        Ok(())
    }

    /// Send a command and (optionally) wait for its response.
    ///
    /// Returns `Ok(None)` when no response was awaited: a zero timeout, or
    /// `response: false`. A response that does arrive in the latter case
    /// still updates [`status`](Self::status) and a negative status is
    /// still an error.
    ///
    /// # Errors
    /// - `RecorderError::Busy` if the device lock times out.
    /// - `RecorderError::InvalidCommand` if the command is too large or
    ///   the response header or body is bad.
    /// - `RecorderError::Command` for a negative device status.
    /// - `RecorderError::Timeout` when no matching response arrives in time.
    /// - Transport errors, unchanged.
    pub fn send_command(
        &self,
        packet: CommandPacket,
        options: &SendOptions<'_>,
    ) -> Result<Option<ResponsePacket>> {
        let _guard = self.lock()?;
        let mut exchange = self.exchange();
        let result = match exchange.transport.framing() {
            Framing::Framed => self.exchange_framed(&mut exchange, packet, options),
            Framing::Unframed => self.exchange_unframed(&mut exchange, packet, options),
        };
        exchange.tracker.finish();
        if options.response {
            result
        } else {
            result.map(|_| None)
        }
    }

    /// Generic passthrough: send `{name: payload}` and return the response
    /// body.
    ///
    /// # Errors
    /// See [`send_command`](Self::send_command).
    pub fn send_raw(&self, name: &str, payload: impl Into<Value>) -> Result<Document> {
        let response = self.send_command(CommandPacket::new(name, payload), &SendOptions::new())?;
        Ok(response.map(ResponsePacket::into_body).unwrap_or_default())
    }

    fn crc_mode(&self) -> CrcMode {
        if self.config.ignore_crc {
            CrcMode::Ignore
        } else {
            CrcMode::Verify
        }
    }

    fn exchange_framed(
        &self,
        exchange: &mut Exchange<T>,
        mut packet: CommandPacket,
        options: &SendOptions<'_>,
    ) -> Result<Option<ResponsePacket>> {
        let limit = options.timeout.resolve(self.config.timeout);
        let deadline = Deadline::after(limit);
        let mut queue_was_full = false;

        loop {
            exchange.index = exchange.index.next();
            let index = exchange.index;
            packet.set_index(index);
            exchange.advance(ExchangeState::Sending)?;

            let framed = packet.to_frame(&self.codec, self.config.max_command_size)?;
            exchange.ensure_open()?;
            let stale = exchange.transport.discard_input()?;
            if stale > 0 {
                debug!(bytes = stale, "discarded stale input before command");
            }
            exchange.parser.clear();

            debug!(command = packet.name(), %index, "sending command");
            exchange.transport.write(&framed)?;
            exchange.last_command = Some((Utc::now(), packet.clone()));
            exchange.advance(ExchangeState::AwaitingResponse)?;

            if limit == Some(Duration::ZERO) {
                exchange.status = None;
                return Ok(None);
            }

            match self.await_framed(exchange, index, deadline, options)? {
                Awaited::Response(response) => return Ok(Some(response)),
                Awaited::QueueFull => {
                    queue_was_full = true;
                    debug!(%index, "device command queue full; resending");
                }
                Awaited::Disconnected => {
                    debug!("port closed while waiting; no response required");
                    exchange.status = None;
                    return Ok(None);
                }
                Awaited::Cancelled | Awaited::TimedOut if !options.response => {
                    debug!("ignoring timeout because no response was required");
                    exchange.status = None;
                    return Ok(None);
                }
                Awaited::Cancelled => {
                    return Err(RecorderError::timeout("Wait for command response cancelled"));
                }
                Awaited::TimedOut if queue_was_full => {
                    return Err(RecorderError::timeout(
                        "Timed out waiting for opening in command queue",
                    ));
                }
                Awaited::TimedOut => {
                    return Err(RecorderError::timeout(format!(
                        "Timed out waiting for command response ({}ms)",
                        limit.unwrap_or_default().as_millis()
                    )));
                }
            }
        }
    }

    fn await_framed(
        &self,
        exchange: &mut Exchange<T>,
        index: SequenceIndex,
        deadline: Deadline,
        options: &SendOptions<'_>,
    ) -> Result<Awaited> {
        loop {
            if options.cancelled() {
                exchange.advance(ExchangeState::TimedOut)?;
                return Ok(Awaited::Cancelled);
            }
            if deadline.expired() {
                exchange.advance(ExchangeState::TimedOut)?;
                return Ok(Awaited::TimedOut);
            }

            let data = match exchange
                .transport
                .read(READ_CHUNK, deadline.slice(self.config.read_poll))
            {
                Ok(data) => data,
                Err(err) if !options.response && err.is_disconnect() => {
                    return Ok(Awaited::Disconnected);
                }
                Err(err) => return Err(err.into()),
            };
            if data.is_empty() {
                continue;
            }
            exchange.parser.feed(&data);

            while let Some(body) = exchange.parser.next_frame() {
                let packet = match frame::decode_body(&body, self.crc_mode()) {
                    Ok(packet) => packet,
                    Err(FrameError::Checksum { carried, computed }) => {
                        debug!(
                            carried = format_args!("0x{carried:04X}"),
                            computed = format_args!("0x{computed:04X}"),
                            "dropping response with bad checksum"
                        );
                        exchange.advance(ExchangeState::ChecksumFailed)?;
                        exchange.advance(ExchangeState::AwaitingResponse)?;
                        continue;
                    }
                    Err(err) => {
                        debug!(error = %err, "dropping malformed frame");
                        continue;
                    }
                };
                trace!(data = ?packet, "received packet");

                let Some(response) = ResponsePacket::from_corbus(&packet, &self.codec)? else {
                    debug!("ignoring packet without response header");
                    continue;
                };

                let code = response.status_code();
                if code < 0 {
                    exchange.record_status(&response);
                    exchange.advance(ExchangeState::Matched)?;
                    return Err(RecorderError::command(code, response.status_message()));
                }
                if response.queue_full() {
                    return Ok(Awaited::QueueFull);
                }
                if !response.answers(index) {
                    debug!(expected = %index, got = ?response.index(), "Bad ResponseIdx");
                    continue;
                }
                exchange.record_status(&response);
                exchange.advance(ExchangeState::Matched)?;
                return Ok(Awaited::Response(response));
            }
        }
    }

    fn exchange_unframed(
        &self,
        exchange: &mut Exchange<T>,
        mut packet: CommandPacket,
        options: &SendOptions<'_>,
    ) -> Result<Option<ResponsePacket>> {
        exchange.index = exchange.index.next();
        let index = exchange.index;
        packet.set_index(index);
        exchange.advance(ExchangeState::Sending)?;

        let ebml = packet.encode(&self.codec, self.config.max_command_size)?;
        exchange.ensure_open()?;

        let limit = options.timeout.resolve(self.config.timeout);
        let deadline = Deadline::after(limit);
        let interval = options.interval.unwrap_or(self.config.poll_interval);

        // The device must have finished its queued commands first.
        let mut wait = Duration::ZERO;
        let previous = loop {
            let data = exchange.transport.read(RESPONSE_LIMIT, wait)?;
            if !data.is_empty() {
                match ResponsePacket::from_ebml(&data, &self.codec) {
                    Ok(response) => exchange.last_seen = Some(response),
                    Err(err) => warn!(error = %err, "ignoring undecodable RESPONSE"),
                }
            }
            if let Some(seen) = &exchange.last_seen
                && !seen.queue_full()
            {
                break seen.index();
            }
            if options.cancelled() || deadline.expired() {
                if !options.response {
                    debug!("ignoring queue wait timeout because no response was required");
                    return Ok(None);
                }
                let remaining = exchange.last_seen.as_ref().map_or(0, ResponsePacket::queue_depth);
                return Err(RecorderError::timeout(format!(
                    "Timed out waiting for device to complete queued commands ({remaining} remaining)"
                )));
            }
            wait = deadline.slice(interval);
        };

        debug!(command = packet.name(), %index, "writing COMMAND");
        exchange.transport.write(&ebml)?;
        exchange.last_command = Some((Utc::now(), packet.clone()));
        exchange.advance(ExchangeState::AwaitingResponse)?;

        if limit == Some(Duration::ZERO) {
            exchange.status = None;
            return Ok(None);
        }

        loop {
            if options.cancelled() || deadline.expired() {
                exchange.advance(ExchangeState::TimedOut)?;
                if !options.response {
                    debug!("ignoring timeout because no response was required");
                    exchange.status = None;
                    return Ok(None);
                }
                return Err(RecorderError::timeout(format!(
                    "Timed out waiting for command response ({}ms)",
                    limit.unwrap_or_default().as_millis()
                )));
            }

            let data = match exchange.transport.read(RESPONSE_LIMIT, deadline.slice(interval)) {
                Ok(data) => data,
                Err(err) if !options.response && err.is_disconnect() => {
                    exchange.status = None;
                    return Ok(None);
                }
                Err(err) => return Err(err.into()),
            };
            if data.is_empty() {
                continue;
            }
            let response = match ResponsePacket::from_ebml(&data, &self.codec) {
                Ok(response) => response,
                Err(err) => {
                    warn!(error = %err, "ignoring undecodable RESPONSE");
                    continue;
                }
            };
            exchange.last_seen = Some(response.clone());
            if response.index() == previous {
                continue;
            }

            let code = response.status_code();
            if code < 0 {
                exchange.record_status(&response);
                exchange.advance(ExchangeState::Matched)?;
                return Err(RecorderError::command(code, response.status_message()));
            }
            if !response.answers(index) {
                debug!(expected = %index, got = ?response.index(), "Bad ResponseIdx");
                continue;
            }
            exchange.record_status(&response);
            exchange.advance(ExchangeState::Matched)?;
            return Ok(Some(response));
        }
    }

    /// Write raw bytes to the transport outside of any exchange. Used by
    /// legacy commands that the device acts on without answering.
    pub(crate) fn write_raw(&self, data: &[u8]) -> Result<()> {
        let _guard = self.lock()?;
        let mut exchange = self.exchange();
        exchange.ensure_open()?;
        exchange.transport.write(data)?;
        exchange.status = None;
        Ok(())
    }

    /// Read the out-of-band clock, if the transport has one.
    pub(crate) fn read_clock_raw(&self) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock()?;
        let mut exchange = self.exchange();
        exchange.ensure_open()?;
        Ok(exchange.transport.read_clock()?)
    }

    pub(crate) fn write_clock_raw(&self, data: &[u8]) -> Result<bool> {
        let _guard = self.lock()?;
        let mut exchange = self.exchange();
        exchange.ensure_open()?;
        Ok(exchange.transport.write_clock(data)?)
    }

    /// Wait for the recorder to disconnect, e.g. after a reset.
    ///
    /// A zero timeout checks once. Returns `false` if the callback
    /// cancelled the wait.
    ///
    /// # Errors
    /// `RecorderError::Timeout` if the recorder is still attached at the
    /// deadline.
    pub fn await_reboot(&self, timeout: Timeout, callback: Option<Callback<'_>>) -> Result<bool> {
        self.await_availability(false, timeout, callback, "Timed out waiting for device to disconnect")
    }

    /// Wait for the recorder to reappear.
    ///
    /// # Errors
    /// `RecorderError::Timeout` if it is still missing at the deadline.
    pub fn await_remount(&self, timeout: Timeout, callback: Option<Callback<'_>>) -> Result<bool> {
        self.await_availability(true, timeout, callback, "Timed out waiting for device to remount")
    }

    pub(crate) fn await_availability(
        &self,
        wanted: bool,
        timeout: Timeout,
        callback: Option<Callback<'_>>,
        message: &str,
    ) -> Result<bool> {
        let limit = timeout.resolve(self.config.timeout);
        if limit == Some(Duration::ZERO) {
            return Ok(self.is_available() == wanted);
        }
        let deadline = Deadline::after(limit);
        loop {
            if callback.is_some_and(|callback| callback()) {
                return Ok(false);
            }
            if self.is_available() == wanted {
                return Ok(true);
            }
            if deadline.expired() {
                return Err(RecorderError::timeout(message));
            }
            thread::sleep(deadline.slice(REBOOT_POLL_INTERVAL));
        }
    }
}

impl<T: Transport> std::fmt::Debug for CommandInterface<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandInterface")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("wifi", &self.wifi)
            .finish_non_exhaustive()
    }
}
