//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod bootloader;
pub(crate) mod identify;
pub(crate) mod list;
pub(crate) mod raw;
pub(crate) mod update;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use otl866::{
    DetectedDevice, DeviceFilter, Discovery, NativeDiscovery, TransportKind,
    protocol::ascii::AsciiConfig,
};

use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted by user".to_string()).into())
    } else {
        Ok(())
    }
}

/// ASCII session settings from the global flags.
pub(crate) fn ascii_config(cli: &Cli) -> AsciiConfig {
    AsciiConfig::default().with_verbose(cli.ascii_verbose)
}

/// Serial endpoint of the open firmware.
///
/// `--port` wins over the configured port; otherwise exactly one serial
/// TL866 must be attached.
pub(crate) fn serial_device(cli: &Cli, config: &Config) -> Result<DetectedDevice> {
    if let Some(port) = cli
        .port
        .as_ref()
        .or(config.connection.serial.as_ref())
    {
        debug!("Using serial port {port}");
        return Ok(DetectedDevice::serial_port(port));
    }

    let filter = DeviceFilter::tl866(TransportKind::Serial);
    let mut found: Vec<_> = NativeDiscovery::serial_devices()
        .into_iter()
        .filter(|d| filter.matches(d))
        .collect();
    match found.len() {
        0 => Err(CliError::Usage(
            "No TL866 serial port found; specify one with --port".to_string(),
        )
        .into()),
        1 => Ok(found.remove(0)),
        n => Err(CliError::Usage(format!(
            "{n} TL866 serial ports found; select one with --port"
        ))
        .into()),
    }
}

/// The one TL866 reachable over raw USB.
pub(crate) fn usb_device() -> Result<DetectedDevice> {
    NativeDiscovery
        .find_one(&DeviceFilter::tl866(TransportKind::Usb))
        .context("Failed to select a TL866 on USB")
}

/// Progress bar on stderr, hidden when quiet or not on a terminal.
pub(crate) fn progress_bar(quiet: bool, len: u64) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}
