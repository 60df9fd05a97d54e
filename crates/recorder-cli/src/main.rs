//! `recorder`: list and poke enDAQ-style data recorders.
//!
//! ```bash
//! recorder list
//! recorder info --serial S0012345
//! recorder clock --serial S0012345 --set
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use recorder_discovery::Registry;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{DeviceArgs, ListArgs};
use config::Settings;

#[derive(Parser, Debug)]
#[command(name = "recorder")]
#[command(about = "Discover and command enDAQ-style data recorders", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List attached recorders
    List(ListArgs),

    /// Show a recorder's identity
    Info {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Check that a recorder answers commands
    Ping {
        #[command(flatten)]
        device: DeviceArgs,

        /// Bytes to echo
        #[arg(long, default_value = "ping")]
        data: String,
    },

    /// Show the recorder clock, or set it to the host's
    Clock {
        #[command(flatten)]
        device: DeviceArgs,

        #[arg(long)]
        set: bool,
    },

    /// Blink the recorder's LEDs
    Blink {
        #[command(flatten)]
        device: DeviceArgs,

        /// Seconds to blink
        #[arg(short, long, default_value_t = 3)]
        duration: u8,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "recorder=debug" } else { "recorder=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::load(cli.config.as_deref())?;
    debug!(?settings, "loaded settings");
    let registry = Registry::new(settings.discovery)
        .with_command_config(settings.command)
        .with_serial_config(settings.serial);

    match &cli.command {
        Commands::List(args) => commands::list(&registry, args),
        Commands::Info { device } => commands::info(&registry, device),
        Commands::Ping { device, data } => commands::ping(&registry, device, data),
        Commands::Clock { device, set } => commands::clock(&registry, device, *set),
        Commands::Blink { device, duration } => commands::blink(&registry, device, *duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_clock() {
        let cli = Cli::parse_from(["recorder", "clock", "--serial", "S0012345", "--set", "-v"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Clock { device, set } => {
                assert!(set);
                assert_eq!(device.serial.as_deref(), Some("S0012345"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_serial_and_chip_conflict() {
        let parsed = Cli::try_parse_from(["recorder", "info", "--serial", "1", "--chip-id", "AB"]);
        assert!(parsed.is_err());
    }
}
