//! Shared fixtures for the command integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use recorder_command::emulator::DeviceEmulator;
use recorder_command::{CommandConfig, CommandInterface};
use recorder_protocol::packet::{QUEUE_DEPTH, RESPONSE_INDEX, STATUS_CODE};
use recorder_protocol::{CommandPacket, Document, DocumentCodec, EbmlCodec, ResponsePacket};
use recorder_transport::{SimulatedHandle, SimulatedTransport};

pub const COMMAND: &str = "SYSTEM/DEV/COMMAND";
pub const RESPONSE: &str = "SYSTEM/DEV/RESPONSE";

/// Short deadlines so failure paths finish quickly.
pub fn quick_config() -> CommandConfig {
    CommandConfig::default()
        .with_timeout(Duration::from_millis(300))
        .with_read_poll(Duration::from_millis(5))
        .with_poll_interval(Duration::from_millis(5))
}

pub fn codec() -> EbmlCodec {
    EbmlCodec::command_response()
}

/// A framed interface answered by a fresh emulator.
pub fn emulated(emulator: &DeviceEmulator) -> (CommandInterface<SimulatedTransport>, SimulatedHandle) {
    let (transport, handle) = SimulatedTransport::new();
    emulator.attach(&handle);
    (CommandInterface::with_config(transport, quick_config()), handle)
}

/// Response body acknowledging command `index` with `status`.
pub fn ack(index: u64, status: i64) -> Document {
    Document::new()
        .with(RESPONSE_INDEX, index)
        .with(QUEUE_DEPTH, 1u64)
        .with(STATUS_CODE, status)
}

pub fn framed_reply(body: &Document) -> Vec<u8> {
    ResponsePacket::frame(body, &codec()).unwrap()
}

/// A recorder volume with an idle RESPONSE file.
pub fn recorder_volume(root: &Path) {
    fs::create_dir_all(root.join("SYSTEM/DEV")).unwrap();
    let idle = Document::new().with(QUEUE_DEPTH, 1u64).with(STATUS_CODE, 0i64);
    fs::write(root.join(RESPONSE), ResponsePacket::encode(&idle, &codec()).unwrap()).unwrap();
}

/// Firmware stand-in for a file-interface recorder: answers `count`
/// COMMAND writes by running `handler` and writing its body to RESPONSE.
pub fn spawn_file_device<F>(root: PathBuf, count: usize, handler: F) -> thread::JoinHandle<Vec<String>>
where
    F: Fn(&CommandPacket) -> Document + Send + 'static,
{
    thread::spawn(move || {
        let codec = codec();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        let mut last = Vec::new();
        while seen.len() < count && Instant::now() < deadline {
            let command = fs::read(root.join(COMMAND)).unwrap_or_default();
            if command.is_empty() || command == last {
                thread::sleep(Duration::from_millis(2));
                continue;
            }
            last = command.clone();
            let document = codec.deserialize(&command).unwrap();
            let packet = CommandPacket::from_document(document).unwrap();
            let index = packet.index().map_or(0, |index| u64::from(index.value()));
            let mut body = ack(index, 0);
            for (name, value) in handler(&packet).iter() {
                body.insert(name, value.clone());
            }
            fs::write(root.join(RESPONSE), ResponsePacket::encode(&body, &codec).unwrap()).unwrap();
            seen.push(packet.name().to_string());
        }
        seen
    })
}
