//! Bootloader command implementation.

use anyhow::{Context, Result};
use console::style;
use otl866::{NativeDiscovery, Tl866Flasher, UpdateOptions};

use super::{ascii_config, ensure_not_interrupted, serial_device};
use crate::Cli;
use crate::config::Config;

/// Reboot open firmware into the bootloader and wait for it on USB.
pub(crate) fn cmd_bootloader(cli: &Cli, config: &Config) -> Result<()> {
    let device = serial_device(cli, config)?;
    ensure_not_interrupted()?;

    if !cli.quiet {
        eprintln!(
            "{} Resetting {} into the bootloader",
            style("⏳").yellow(),
            style(&device.name).cyan()
        );
    }

    let options = UpdateOptions {
        ascii: ascii_config(cli),
        ..UpdateOptions::default()
    };
    let flasher = Tl866Flasher::new(NativeDiscovery).with_options(options);
    let found = flasher
        .reset_to_bootloader(&device)
        .with_context(|| format!("Failed to reset {} into the bootloader", device.name))?;

    if !cli.quiet {
        eprintln!(
            "{} Bootloader ready at {}",
            style("✓").green(),
            style(&found.name).cyan()
        );
    }
    Ok(())
}
