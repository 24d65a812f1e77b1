//! Device listing.

use anyhow::Result;
use console::style;
use log::warn;
use otl866::{DetectedDevice, NativeDiscovery, device::format_device_list};

/// Every endpoint on both transports. A USB enumeration failure only drops
/// the USB half.
fn detect() -> Vec<DetectedDevice> {
    let mut devices = NativeDiscovery::serial_devices();
    match NativeDiscovery::usb_devices() {
        Ok(usb) => devices.extend(usb),
        Err(e) => warn!("USB enumeration failed: {e}"),
    }
    devices
}

fn to_json(devices: &[DetectedDevice]) -> serde_json::Value {
    devices
        .iter()
        .map(|d| {
            serde_json::json!({
                "name": d.name,
                "transport": d.transport.to_string(),
                "device": d.kind.name(),
                "known": d.is_tl866(),
                "vid": d.vid,
                "pid": d.pid,
                "location": d.location.as_ref().map(ToString::to_string),
                "product": d.product,
                "serial": d.serial,
            })
        })
        .collect()
}

/// List command implementation.
pub(crate) fn cmd_list(json: bool) -> Result<()> {
    let devices = detect();

    if json {
        println!("{}", serde_json::to_string_pretty(&to_json(&devices))?);
        return Ok(());
    }

    eprintln!("{}", style("Devices:").bold().underlined());
    if devices.is_empty() {
        eprintln!("  {}", style("(none)").dim());
        return Ok(());
    }

    for (device, line) in devices
        .iter()
        .zip(format_device_list(&devices))
    {
        let line = if device.is_tl866() {
            style(line).cyan().to_string()
        } else {
            style(line).dim().to_string()
        };
        eprintln!("  {} {line}", style("•").green());
    }

    let tl866 = devices
        .iter()
        .filter(|d| d.is_tl866())
        .count();
    eprintln!(
        "\n{} {tl866} TL866 endpoint(s)",
        style("→").green().bold()
    );
    Ok(())
}
