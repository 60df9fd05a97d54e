//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use recorder_command::BlinkPattern;
use recorder_core::DeviceSelector;
use recorder_discovery::{Recorder, Registry};
use serde::Serialize;

/// Which recorder to talk to.
#[derive(Args, Debug, Clone, Default)]
pub struct DeviceArgs {
    /// Serial number, e.g. `S0012345` or `12345`
    #[arg(short, long, conflicts_with = "chip_id")]
    pub serial: Option<String>,

    /// Unique chip ID, in hex
    #[arg(short, long)]
    pub chip_id: Option<String>,

    /// Volumes to search instead of every mount point
    #[arg(short, long = "path")]
    pub paths: Vec<PathBuf>,
}

impl DeviceArgs {
    fn paths(&self) -> Option<&[PathBuf]> {
        (!self.paths.is_empty()).then_some(self.paths.as_slice())
    }

    /// Resolve to one attached recorder.
    pub fn find(&self, registry: &Registry) -> Result<Arc<Recorder>> {
        let selector = DeviceSelector::from_args(self.serial.as_deref(), self.chip_id.as_deref())?;
        registry
            .find_device(selector, self.paths())?
            .ok_or_else(|| anyhow!("No recorder matching {selector:?} is attached"))
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Volumes to check instead of every mount point
    pub paths: Vec<PathBuf>,

    /// Accept volumes that are not FAT formatted
    #[arg(long)]
    pub loose: bool,

    /// Print JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct Listing {
    kind: String,
    serial: String,
    part_number: String,
    path: PathBuf,
}

pub fn list(registry: &Registry, args: &ListArgs) -> Result<()> {
    let paths = (!args.paths.is_empty()).then_some(args.paths.as_slice());
    let strict = registry.config().strict && !args.loose;
    let recorders = registry.scan(paths, strict)?;
    let listing: Vec<Listing> = recorders
        .iter()
        .map(|recorder| Listing {
            kind: recorder.kind().to_string(),
            serial: recorder.serial_string(),
            part_number: recorder.part_number().to_string(),
            path: recorder.path(),
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else if listing.is_empty() {
        println!("No recorders found");
    } else {
        for entry in &listing {
            println!(
                "{:<10} {:<14} {:<12} {}",
                entry.serial,
                entry.kind,
                entry.part_number,
                entry.path.display()
            );
        }
    }
    Ok(())
}

pub fn info(registry: &Registry, device: &DeviceArgs) -> Result<()> {
    let recorder = device.find(registry)?;
    let identity = recorder.identity();
    println!("Kind:          {}", recorder.kind());
    println!("Serial:        {}", recorder.serial_string());
    println!("Product:       {}", identity.product_name);
    println!("Part number:   {}", identity.part_number);
    println!("Hardware:      {}", identity.hardware_version());
    println!("Firmware:      {}", identity.firmware_version());
    if let Some(chip) = identity.chip_id {
        println!("Chip ID:       {chip:X}");
    }
    if let Some(name) = &identity.user_name {
        println!("Name:          {name}");
    }
    if let Some(date) = identity.manufactured() {
        println!("Manufactured:  {}", date.format("%Y-%m-%d"));
    }
    println!("Path:          {}", recorder.path().display());
    Ok(())
}

pub fn ping(registry: &Registry, device: &DeviceArgs, data: &str) -> Result<()> {
    let recorder = device.find(registry)?;
    let commands = recorder.command_interface()?;
    let reply = commands.ping(data.as_bytes()).context("ping failed")?;
    println!("{}", String::from_utf8_lossy(&reply));
    Ok(())
}

pub fn clock(registry: &Registry, device: &DeviceArgs, set: bool) -> Result<()> {
    let recorder = device.find(registry)?;
    let commands = recorder.command_interface()?;
    let reading = if set {
        commands.set_clock(None, true)?
    } else {
        commands.get_clock(false)?
    };
    println!("Host:   {}", reading.host.to_rfc3339());
    println!("Device: {}", reading.device.to_rfc3339());
    println!("Drift:  {:.3}s", reading.drift().num_milliseconds() as f64 / 1000.0);
    Ok(())
}

pub fn blink(registry: &Registry, device: &DeviceArgs, duration: u8) -> Result<()> {
    let recorder = device.find(registry)?;
    let pattern = BlinkPattern {
        duration,
        ..BlinkPattern::default()
    };
    recorder.command_interface()?.blink(pattern)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recorder_discovery::{DiscoveryConfig, StaticMounts};

    #[test]
    fn test_device_args_need_a_key() {
        let registry = Registry::new(DiscoveryConfig::default()).with_mount_table(StaticMounts::default());
        let err = DeviceArgs::default().find(&registry).unwrap_err();
        assert!(err.to_string().contains("serial number or chip ID"));
    }

    #[test]
    fn test_missing_device() {
        let registry = Registry::new(DiscoveryConfig::default()).with_mount_table(StaticMounts::default());
        let args = DeviceArgs {
            serial: Some("S0000042".into()),
            ..DeviceArgs::default()
        };
        let err = args.find(&registry).unwrap_err();
        assert!(err.to_string().contains("No recorder matching"));
    }
}
