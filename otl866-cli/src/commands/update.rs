//! Firmware update command implementation.

use anyhow::{Context, Result};
use console::style;
use otl866::{
    DetectedDevice, EraseKey, FlashLayout, NativeDiscovery, PreparedImage, Tl866Flasher,
    UpdateOptions, UpdateStage, protocol::bootloader::check_image,
};
use std::path::Path;

use super::{ascii_config, ensure_not_interrupted, progress_bar, usb_device};
use crate::config::Config;
use crate::{Cli, CliError};

/// Arguments of `otl866 update`.
pub(crate) struct UpdateArgs<'a> {
    pub(crate) image: &'a Path,
    pub(crate) erase_key: Option<u8>,
    pub(crate) reset_tty: Option<&'a str>,
    pub(crate) allow_unsafe: bool,
    pub(crate) base: Option<u32>,
}

/// Settings after folding in the configuration file.
#[derive(Debug, PartialEq, Eq)]
struct Resolved {
    erase_key: EraseKey,
    layout: FlashLayout,
    safe: bool,
}

fn resolve(args: &UpdateArgs<'_>, config: &Config) -> Result<Resolved> {
    let Some(key) = args.erase_key.or(config.update.erase_key) else {
        return Err(CliError::Usage(
            "An erase key is required: pass --erase-key or set update.erase_key".to_string(),
        )
        .into());
    };

    let mut layout = FlashLayout::default();
    if let Some(base) = args.base.or(config.update.base_address) {
        layout = layout.with_base_address(base);
    }

    Ok(Resolved {
        erase_key: EraseKey(key),
        layout,
        safe: !(args.allow_unsafe || config.update.allow_unsafe),
    })
}

/// Update command implementation.
pub(crate) fn cmd_update(cli: &Cli, config: &Config, args: &UpdateArgs<'_>) -> Result<()> {
    let resolved = resolve(args, config)?;

    if !cli.quiet {
        eprintln!(
            "{} Loading image {}",
            style("📦").cyan(),
            args.image.display()
        );
    }
    let image = PreparedImage::from_file(args.image, resolved.erase_key)
        .with_context(|| format!("Failed to load image {}", args.image.display()))?
        .with_layout(resolved.layout);
    image
        .validate()
        .and_then(|()| check_image(&resolved.layout, resolved.safe, image.payload().len()))
        .with_context(|| format!("Image {} cannot be flashed", args.image.display()))?;

    if !resolved.safe && !cli.quiet {
        eprintln!(
            "{} Safe mode is off: writes below {:#x} are allowed",
            style("⚠").yellow(),
            resolved.layout.bootloader_end
        );
    }

    let device = match args.reset_tty {
        Some(tty) => DetectedDevice::serial_port(tty),
        None => usb_device()?,
    };
    ensure_not_interrupted()?;

    if !cli.quiet {
        eprintln!(
            "{} Using {} ({})",
            style("🔌").cyan(),
            style(&device.name).cyan(),
            device.transport
        );
    }

    let options = UpdateOptions {
        safe: resolved.safe,
        layout: resolved.layout,
        ascii: ascii_config(cli),
        ..UpdateOptions::default()
    };
    let flasher = Tl866Flasher::new(NativeDiscovery).with_options(options);

    let pb = progress_bar(cli.quiet, 100);
    let mut on_progress = |stage: UpdateStage, done: usize, total: usize| {
        match stage {
            UpdateStage::Write => {
                let pct = if total == 0 { 100 } else { done * 100 / total };
                pb.set_position(pct as u64);
            },
            _ => pb.set_position(0),
        }
        pb.set_message(stage.to_string());
    };

    let result = flasher.update(&device, &image, &mut on_progress);
    pb.finish_and_clear();

    let report = result.with_context(|| format!("Update of {} failed", device.name))?;
    if !cli.quiet {
        eprintln!(
            "{} Update complete: {}",
            style("✓").green(),
            report.device_status().headline()
        );
    }
    Ok(())
}
