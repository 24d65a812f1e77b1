//! Wire protocols.
//!
//! - [`ascii`]: line-oriented commands of the open-tl866 applications
//! - [`zif`]: 40-bit pin mask codec used by those commands
//! - [`bootloader`]: binary frames of the bootloader
//! - [`report`]: the device report record

pub mod ascii;
pub mod bootloader;
pub mod report;
pub mod zif;

pub use {
    ascii::{AsciiClient, AsciiConfig, CommandFrame, LineMatch, Response, SessionState},
    bootloader::{BootloaderClient, BootloaderFrame, EraseKey, Opcode},
    report::{DeviceStatus, FirmwareKind, Model, Report, Status},
};
