//! File command interface transport.
//!
//! Recorders mounted as a volume accept commands through two files:
//! writing `SYSTEM/DEV/COMMAND` submits a command and the device answers
//! by rewriting `SYSTEM/DEV/RESPONSE`. A "read" therefore polls RESPONSE
//! until its content differs from what the previous read returned.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use recorder_core::constants::{
    CLOCK_FILE, COMMAND_FILE, DEFAULT_POLL_INTERVAL, INFO_FILE, RESPONSE_FILE,
};
use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::traits::{Framing, Transport};

#[derive(Debug)]
pub struct FileTransport {
    root: PathBuf,
    name: String,
    poll_interval: Duration,
    open: bool,
    /// Content returned by the previous successful read.
    last_response: Option<Vec<u8>>,
}

impl FileTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: root.display().to_string(),
            root,
            poll_interval: DEFAULT_POLL_INTERVAL,
            open: false,
            last_response: None,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Whether a volume offers the file command interface.
    pub fn has_interface(root: &Path) -> bool {
        root.join(COMMAND_FILE).is_file()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn command_path(&self) -> PathBuf {
        self.root.join(COMMAND_FILE)
    }

    pub fn response_path(&self) -> PathBuf {
        self.root.join(RESPONSE_FILE)
    }

    pub fn clock_path(&self) -> PathBuf {
        self.root.join(CLOCK_FILE)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::not_open(self.name.clone()))
        }
    }

    /// Current RESPONSE content; a missing file reads as empty.
    fn read_response(&self) -> Result<Vec<u8>> {
        let path = self.response_path();
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(TransportError::io(path.display().to_string(), err)),
        }
    }

    fn is_new(&self, data: &[u8]) -> bool {
        !data.is_empty() && self.last_response.as_deref() != Some(data)
    }
}

impl Transport for FileTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn framing(&self) -> Framing {
        Framing::Unframed
    }

    fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        let command = self.command_path();
        match command.parent() {
            Some(dir) if dir.is_dir() => {}
            _ => {
                return Err(TransportError::unavailable(
                    self.name.clone(),
                    "volume has no SYSTEM/DEV directory",
                ));
            }
        }
        self.open = true;
        info!(root = %self.name, "opened file command interface");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        self.last_response = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            let mut data = self.read_response()?;
            if self.is_new(&data) {
                self.last_response = Some(data.clone());
                data.truncate(max);
                trace!(len = data.len(), "read RESPONSE");
                return Ok(data);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let path = self.command_path();
        fs::write(&path, data).map_err(|err| TransportError::io(path.display().to_string(), err))?;
        trace!(len = data.len(), "wrote COMMAND");
        Ok(data.len())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        self.ensure_open()?;
        let data = self.read_response()?;
        Ok(if self.is_new(&data) { data.len() } else { 0 })
    }

    fn discard_input(&mut self) -> Result<usize> {
        self.ensure_open()?;
        let data = self.read_response()?;
        if !self.is_new(&data) {
            return Ok(0);
        }
        debug!(len = data.len(), "discarding unread RESPONSE");
        let len = data.len();
        self.last_response = Some(data);
        Ok(len)
    }

    fn is_available(&self) -> bool {
        self.root.join(INFO_FILE).is_file()
    }

    fn read_clock(&mut self) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let path = self.clock_path();
        fs::read(&path)
            .map(Some)
            .map_err(|err| TransportError::io(path.display().to_string(), err))
    }

    fn write_clock(&mut self, data: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        let path = self.clock_path();
        fs::write(&path, data).map_err(|err| TransportError::io(path.display().to_string(), err))?;
        Ok(true)
    }
}
