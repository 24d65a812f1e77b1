//! Identify command implementation.

use anyhow::{Context, Result};
use console::style;
use otl866::{NativeDiscovery, Tl866Flasher};

use super::usb_device;
use crate::Cli;

/// Print the device status to stdout.
pub(crate) fn cmd_identify(cli: &Cli) -> Result<()> {
    let device = usb_device()?;
    if !cli.quiet {
        eprintln!(
            "{} Querying {}",
            style("🔌").cyan(),
            style(&device.name).cyan()
        );
    }

    let flasher = Tl866Flasher::new(NativeDiscovery);
    let status = flasher
        .identify(&device)
        .with_context(|| format!("Failed to identify {}", device.name))?;

    println!("{status}");
    Ok(())
}
