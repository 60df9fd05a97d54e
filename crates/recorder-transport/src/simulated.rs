//! In-memory transport for testing.
//!
//! [`SimulatedTransport`] behaves like a serial port (or, in unframed mode,
//! like the COMMAND/RESPONSE file pair) without any hardware. A cloneable
//! [`SimulatedHandle`] plays the device side: it injects response bytes,
//! inspects what the host wrote, and can make the device disappear.
//!
//! Reads block on a condition variable with the same timeout semantics as a
//! real port, so deadline and retry logic can be exercised
//! deterministically.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use recorder_transport::{SimulatedTransport, Transport};
//!
//! let (mut transport, handle) = SimulatedTransport::new();
//! transport.open().unwrap();
//!
//! handle.inject(b"\x7Edata\x7E");
//! transport.write(b"cmd").unwrap();
//!
//! assert_eq!(handle.writes(), vec![b"cmd".to_vec()]);
//! assert_eq!(transport.read(64, Duration::ZERO).unwrap(), b"\x7Edata\x7E");
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{Framing, Transport};

/// Device-side reaction to a host write: bytes to send back, if any.
///
/// The responder runs without the transport's internal lock held, so it may
/// use a [`SimulatedHandle`] (for example to simulate a disconnect).
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct SimState {
    /// Framed mode: bytes waiting to be read.
    incoming: VecDeque<u8>,
    /// Unframed mode: current RESPONSE content.
    response: Vec<u8>,
    writes: Vec<Vec<u8>>,
    open: bool,
    unavailable: bool,
    refuse_open: bool,
    clock: Option<Vec<u8>>,
    responder: Option<Responder>,
}

struct Shared {
    state: Mutex<SimState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock()
    }
}

pub struct SimulatedTransport {
    shared: Arc<Shared>,
    name: String,
    framing: Framing,
    last_response: Option<Vec<u8>>,
}

impl SimulatedTransport {
    /// A serial-like (framed) simulated transport.
    pub fn new() -> (Self, SimulatedHandle) {
        Self::with_framing("simulated", Framing::Framed)
    }

    /// A file-interface-like (unframed) simulated transport.
    pub fn unframed() -> (Self, SimulatedHandle) {
        Self::with_framing("simulated-file", Framing::Unframed)
    }

    pub fn with_framing(name: impl Into<String>, framing: Framing) -> (Self, SimulatedHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(SimState::default()),
            changed: Condvar::new(),
        });
        let transport = Self {
            shared: Arc::clone(&shared),
            name: name.into(),
            framing,
            last_response: None,
        };
        (transport, SimulatedHandle { shared, framing })
    }

    fn check_usable(&self, state: &SimState) -> Result<()> {
        if !state.open {
            return Err(TransportError::not_open(self.name.clone()));
        }
        if state.unavailable {
            return Err(TransportError::disconnected(self.name.clone()));
        }
        Ok(())
    }

    fn take_ready(&mut self, state: &mut SimState, max: usize) -> Option<Vec<u8>> {
        match self.framing {
            Framing::Framed => {
                if state.incoming.is_empty() {
                    return None;
                }
                let count = max.min(state.incoming.len());
                Some(state.incoming.drain(..count).collect())
            }
            Framing::Unframed => {
                let fresh = !state.response.is_empty()
                    && self.last_response.as_deref() != Some(state.response.as_slice());
                if !fresh {
                    return None;
                }
                self.last_response = Some(state.response.clone());
                let mut data = state.response.clone();
                data.truncate(max);
                Some(data)
            }
        }
    }
}

impl std::fmt::Debug for SimulatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedTransport")
            .field("name", &self.name)
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

impl Transport for SimulatedTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn framing(&self) -> Framing {
        self.framing
    }

    fn open(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.refuse_open || state.unavailable {
            return Err(TransportError::unavailable(
                self.name.clone(),
                "simulated device not attached",
            ));
        }
        state.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.shared.lock().open = false;
        self.last_response = None;
        self.shared.changed.notify_all();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        loop {
            self.check_usable(&state)?;
            if let Some(data) = self.take_ready(&mut state, max) {
                trace!(len = data.len(), "simulated read");
                return Ok(data);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            shared.changed.wait_for(&mut state, deadline - now);
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let responder = {
            let mut state = self.shared.lock();
            self.check_usable(&state)?;
            state.writes.push(data.to_vec());
            state.responder.take()
        };
        trace!(len = data.len(), "simulated write");

        if let Some(mut responder) = responder {
            let reply = responder(data);
            let mut state = self.shared.lock();
            if state.responder.is_none() {
                state.responder = Some(responder);
            }
            if let Some(reply) = reply {
                deliver(&mut state, self.framing, &reply);
            }
            drop(state);
            self.shared.changed.notify_all();
        }
        Ok(data.len())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let state = self.shared.lock();
        self.check_usable(&state)?;
        Ok(match self.framing {
            Framing::Framed => state.incoming.len(),
            Framing::Unframed
                if self.last_response.as_deref() != Some(state.response.as_slice()) =>
            {
                state.response.len()
            }
            Framing::Unframed => 0,
        })
    }

    fn discard_input(&mut self) -> Result<usize> {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        self.check_usable(&state)?;
        Ok(match self.framing {
            Framing::Framed => {
                let count = state.incoming.len();
                state.incoming.clear();
                count
            }
            Framing::Unframed => self
                .take_ready(&mut state, usize::MAX)
                .map_or(0, |data| data.len()),
        })
    }

    fn is_available(&self) -> bool {
        !self.shared.lock().unavailable
    }

    fn read_clock(&mut self) -> Result<Option<Vec<u8>>> {
        if self.framing == Framing::Framed {
            return Ok(None);
        }
        let state = self.shared.lock();
        self.check_usable(&state)?;
        Ok(state.clock.clone())
    }

    fn write_clock(&mut self, data: &[u8]) -> Result<bool> {
        if self.framing == Framing::Framed {
            return Ok(false);
        }
        let mut state = self.shared.lock();
        self.check_usable(&state)?;
        state.clock = Some(data.to_vec());
        Ok(true)
    }
}

fn deliver(state: &mut SimState, framing: Framing, data: &[u8]) {
    match framing {
        Framing::Framed => state.incoming.extend(data.iter().copied()),
        Framing::Unframed => state.response = data.to_vec(),
    }
}

/// Device-side control of a [`SimulatedTransport`].
#[derive(Clone)]
pub struct SimulatedHandle {
    shared: Arc<Shared>,
    framing: Framing,
}

impl SimulatedHandle {
    /// Make bytes available to the host. In unframed mode this replaces the
    /// response content.
    pub fn inject(&self, data: &[u8]) {
        deliver(&mut self.shared.lock(), self.framing, data);
        self.shared.changed.notify_all();
    }

    /// Install the device-side reaction to host writes.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.shared.lock().responder = Some(Box::new(responder));
    }

    /// Answer the next host write with `reply`, once.
    pub fn preload(&self, reply: &[u8]) {
        let mut reply = Some(reply.to_vec());
        self.set_responder(move |_| reply.take());
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn clear_responder(&self) {
        self.shared.lock().responder = None;
    }

    /// Everything the host has written, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared.lock().writes.clone()
    }

    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.shared.lock().writes.last().cloned()
    }

    pub fn write_count(&self) -> usize {
        self.shared.lock().writes.len()
    }

    pub fn clear_writes(&self) {
        self.shared.lock().writes.clear();
    }

    /// Bytes injected but not yet read (framed mode).
    pub fn pending(&self) -> usize {
        self.shared.lock().incoming.len()
    }

    /// Detach (or reattach) the device. Detaching wakes blocked readers.
    pub fn set_available(&self, available: bool) {
        self.shared.lock().unavailable = !available;
        self.shared.changed.notify_all();
    }

    /// Make `open` fail while the device still counts as attached.
    pub fn refuse_open(&self, refuse: bool) {
        self.shared.lock().refuse_open = refuse;
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    pub fn set_clock(&self, data: &[u8]) {
        self.shared.lock().clock = Some(data.to_vec());
    }

    pub fn clock(&self) -> Option<Vec<u8>> {
        self.shared.lock().clock.clone()
    }
}

impl std::fmt::Debug for SimulatedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedHandle")
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn opened() -> (SimulatedTransport, SimulatedHandle) {
        let (mut transport, handle) = SimulatedTransport::new();
        transport.open().unwrap();
        (transport, handle)
    }

    #[test]
    fn test_read_times_out_empty() {
        let (mut transport, _handle) = opened();
        let start = Instant::now();
        let data = transport.read(16, Duration::from_millis(50)).unwrap();
        assert!(data.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_partial_reads() {
        let (mut transport, handle) = opened();
        handle.inject(b"abcdef");
        assert_eq!(transport.read(4, Duration::ZERO).unwrap(), b"abcd");
        assert_eq!(transport.bytes_available().unwrap(), 2);
        assert_eq!(transport.read(4, Duration::ZERO).unwrap(), b"ef");
    }

    #[test]
    fn test_read_wakes_on_inject_from_other_thread() {
        let (mut transport, handle) = opened();
        let device = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.inject(b"late");
        });
        let data = transport.read(16, Duration::from_secs(2)).unwrap();
        assert_eq!(data, b"late");
        device.join().unwrap();
    }

    #[test]
    fn test_closed_transport_errors() {
        let (mut transport, _handle) = SimulatedTransport::new();
        assert!(matches!(
            transport.write(b"x"),
            Err(TransportError::NotOpen { .. })
        ));
        transport.open().unwrap();
        transport.close().unwrap();
        assert!(matches!(
            transport.read(1, Duration::ZERO),
            Err(TransportError::NotOpen { .. })
        ));
    }

    #[test]
    fn test_refused_open_is_unavailable() {
        let (mut transport, handle) = SimulatedTransport::new();
        handle.refuse_open(true);
        assert!(matches!(
            transport.open(),
            Err(TransportError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_detached_device_is_disconnect() {
        let (mut transport, handle) = opened();
        handle.set_available(false);
        assert!(!transport.is_available());
        let err = transport.write(b"x").unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_responder_replies_to_writes() {
        let (mut transport, handle) = opened();
        handle.set_responder(|data| Some(data.iter().rev().copied().collect()));
        transport.write(b"abc").unwrap();
        assert_eq!(transport.read(16, Duration::ZERO).unwrap(), b"cba");
        assert_eq!(handle.write_count(), 1);
    }

    #[test]
    fn test_preload_answers_one_write() {
        let (mut transport, handle) = opened();
        handle.preload(b"reply");
        transport.write(b"first").unwrap();
        transport.write(b"second").unwrap();
        assert_eq!(transport.read(16, Duration::ZERO).unwrap(), b"reply");
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn test_responder_may_use_handle() {
        let (mut transport, handle) = opened();
        let device = handle.clone();
        handle.set_responder(move |_| {
            device.set_available(false);
            None
        });
        transport.write(b"reset").unwrap();
        assert!(!transport.is_available());
    }

    #[test]
    fn test_discard_input() {
        let (mut transport, handle) = opened();
        handle.inject(b"stale");
        assert_eq!(transport.discard_input().unwrap(), 5);
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn test_unframed_reads_changed_content_once() {
        let (mut transport, handle) = SimulatedTransport::unframed();
        transport.open().unwrap();
        handle.inject(b"resp-1");
        assert_eq!(transport.read(64, Duration::ZERO).unwrap(), b"resp-1");
        assert!(transport.read(64, Duration::from_millis(10)).unwrap().is_empty());
        handle.inject(b"resp-2");
        assert_eq!(transport.read(64, Duration::ZERO).unwrap(), b"resp-2");
    }

    #[test]
    fn test_clock_only_on_unframed() {
        let (mut framed, _) = opened();
        assert_eq!(framed.read_clock().unwrap(), None);

        let (mut unframed, handle) = SimulatedTransport::unframed();
        unframed.open().unwrap();
        assert!(unframed.write_clock(&[1, 2, 3, 4]).unwrap());
        assert_eq!(handle.clock(), Some(vec![1, 2, 3, 4]));
    }
}
