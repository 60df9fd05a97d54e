//! File transport against a device thread rewriting RESPONSE.

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use recorder_transport::{FileTransport, Transport};
use tempfile::TempDir;

const COMMAND: &str = "SYSTEM/DEV/COMMAND";
const RESPONSE: &str = "SYSTEM/DEV/RESPONSE";

/// Answer the first COMMAND with its bytes reversed.
fn spawn_device(root: PathBuf) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(command) = fs::read(root.join(COMMAND))
                && !command.is_empty()
            {
                let reply: Vec<u8> = command.iter().rev().copied().collect();
                fs::write(root.join(RESPONSE), reply).unwrap();
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    })
}

#[test]
fn test_command_then_changed_response() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("SYSTEM/DEV")).unwrap();
    fs::write(dir.path().join(RESPONSE), b"old").unwrap();

    let mut transport =
        FileTransport::new(dir.path()).with_poll_interval(Duration::from_millis(5));
    transport.open().unwrap();
    assert_eq!(transport.read(64, Duration::ZERO).unwrap(), b"old");

    let device = spawn_device(dir.path().to_path_buf());
    transport.write(b"ping").unwrap();

    let reply = transport.read(64, Duration::from_secs(5)).unwrap();
    assert_eq!(reply, b"gnip");
    device.join().unwrap();
}

#[test]
fn test_unchanged_response_times_out() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("SYSTEM/DEV")).unwrap();
    fs::write(dir.path().join(RESPONSE), b"same").unwrap();

    let mut transport =
        FileTransport::new(dir.path()).with_poll_interval(Duration::from_millis(5));
    transport.open().unwrap();
    transport.read(64, Duration::ZERO).unwrap();

    let start = Instant::now();
    assert!(transport.read(64, Duration::from_millis(40)).unwrap().is_empty());
    assert!(start.elapsed() >= Duration::from_millis(40));
}
