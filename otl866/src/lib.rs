//! # otl866
//!
//! Host-side library for TL866A/CS programmers running stock or open-tl866
//! firmware.
//!
//! A TL866 runs in one of two modes:
//!
//! - **normal**: an open-tl866 application (bitbang, at89, eprom-v, ...)
//!   enumerates as a USB serial device and speaks a line-oriented ASCII
//!   command protocol;
//! - **bootloader**: the device exposes a bulk USB interface and speaks a
//!   small binary protocol for identification and firmware updates.
//!
//! This crate provides:
//!
//! - the ASCII command engine and typed per-application command tables
//! - the bootloader protocol and report decoder
//! - device discovery over serial and USB, with reconnect polling
//! - the update orchestrator (reset, erase, chunked write, verify)
//!
//! ## Features
//!
//! - `native` (default): serial (`serialport`) and USB (`nusb`) transports
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use otl866::{
//!     NativeDiscovery,
//!     commands::{AppClient, Bitbang},
//!     device::{DeviceFilter, Discovery, TransportKind},
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let discovery = NativeDiscovery;
//!     let device = discovery.find_one(&DeviceFilter::tl866(TransportKind::Serial))?;
//!
//!     let mut bitbang = AppClient::<Bitbang, _>::open(discovery.open(&device)?)?;
//!     bitbang.invoke("vdd_voltage", &[0])?;
//!     let pins = bitbang.invoke("zif_read", &[])?;
//!     println!("ZIF: {pins:?}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod commands;
pub mod device;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). It is consulted
/// while waiting for a device to re-enumerate and right before an erase.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(feature = "native")]
pub use {
    device::NativeDiscovery,
    port::{NativePort, UsbPort},
};
pub use {
    device::{DetectedDevice, DeviceFilter, DeviceKind, Discovery, Mode, TransportKind},
    error::{Error, Recovery, Result, UpdateStage},
    image::{FirmwareImage, FirmwareSource, PreparedImage, WriteKey},
    port::{Port, SerialConfig},
    protocol::{
        AsciiClient, BootloaderClient, DeviceStatus, EraseKey, Model, Report, Response, Status,
    },
    target::{FlashLayout, Tl866Flasher, UpdateOptions},
};
