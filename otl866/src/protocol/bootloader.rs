//! Binary protocol of the TL866 bootloader.
//!
//! Every command is a fixed little-endian record that starts with an opcode:
//!
//! ```text
//! Report  00 | 00 00 00 00                                     5 bytes
//! Reset   FF | 00 00 00                                        4 bytes
//! Erase   CC | 00 x6 | key | 00 x12                           20 bytes
//! Write   AA 00 | len u16 | addr u24 | payload           7 + len bytes
//! ```
//!
//! Report answers with up to 44 bytes (see [`Report`]). Erase answers with
//! a block whose first byte echoes the opcode once the flash is blank.
//! Write and Reset are not acknowledged.

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::report::{REPORT_SIZE, Report},
        target::layout::FlashLayout,
    },
    byteorder::{LittleEndian, WriteBytesExt},
    log::{debug, info, trace},
    std::time::Duration,
};

/// Timeout for ordinary replies and writes.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for the erase acknowledgement; a full erase is slow.
pub const ERASE_TIMEOUT: Duration = Duration::from_secs(500);

/// Size of the erase acknowledgement block.
const ERASE_REPLY_SIZE: usize = 32;

/// Largest payload a single write may carry.
pub const MAX_WRITE_LEN: usize = 0xFFFF;

/// Bootloader opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Request a device report.
    Report = 0x00,
    /// Write a chunk of encrypted flash data.
    Write = 0xAA,
    /// Erase the application region.
    Erase = 0xCC,
    /// Reboot the device.
    Reset = 0xFF,
}

/// Model-specific key the bootloader requires before erasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseKey(pub u8);

/// Bootloader command frame builder.
#[derive(Debug)]
pub struct BootloaderFrame {
    opcode: Opcode,
    data: Vec<u8>,
}

impl BootloaderFrame {
    fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            data: vec![opcode as u8],
        }
    }

    /// Build a report request.
    pub fn report() -> Self {
        let mut frame = Self::new(Opcode::Report);
        frame.data.extend_from_slice(&[0; 4]);
        frame
    }

    /// Build a reset request.
    pub fn reset() -> Self {
        let mut frame = Self::new(Opcode::Reset);
        frame.data.extend_from_slice(&[0; 3]);
        frame
    }

    /// Build an erase request.
    pub fn erase(key: EraseKey) -> Self {
        let mut frame = Self::new(Opcode::Erase);
        frame.data.extend_from_slice(&[0; 6]);
        frame.data.push(key.0);
        frame.data.extend_from_slice(&[0; 12]);
        frame
    }

    /// Build a write request.
    ///
    /// Only checks that the fields fit their wire widths; region checks
    /// belong to [`check_write`].
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn write(address: u32, payload: &[u8]) -> Result<Self> {
        if address > 0xFF_FFFF {
            return Err(Error::ValueOutOfRange {
                what: "write address",
                value: u64::from(address),
                max: 0xFF_FFFF,
            });
        }
        let len = u16::try_from(payload.len()).map_err(|_| Error::ValueOutOfRange {
            what: "write length",
            value: payload.len() as u64,
            max: MAX_WRITE_LEN as u64,
        })?;

        let mut frame = Self::new(Opcode::Write);
        frame.data.push(0x00); // opcode high byte
        frame.data.write_u16::<LittleEndian>(len).unwrap();
        frame.data.write_u24::<LittleEndian>(address).unwrap();
        frame.data.extend_from_slice(payload);
        Ok(frame)
    }

    /// Opcode of this frame.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Validate a write against the layout before anything is sent.
///
/// With `safe` set, the bootloader region and everything past the writable
/// ceiling (after projecting the encrypted length onto flash) are refused.
pub fn check_write(layout: &FlashLayout, safe: bool, address: u32, len: usize) -> Result<()> {
    if address >= layout.flash_size {
        return Err(Error::SafetyViolation(format!(
            "address {address:#x} outside flash [0, {:#x})",
            layout.flash_size
        )));
    }
    if !(1..=MAX_WRITE_LEN).contains(&len) {
        return Err(Error::SafetyViolation(format!(
            "length {len} outside [1, {MAX_WRITE_LEN:#x}]"
        )));
    }
    if safe && address < layout.bootloader_end {
        return Err(Error::SafetyViolation(format!(
            "address {address:#x} is inside the bootloader (below {:#x})",
            layout.bootloader_end
        )));
    }
    if safe && layout.exceeds_ceiling(address, len) {
        return Err(Error::SafetyViolation(format!(
            "{len} bytes at {address:#x} would pass the writable ceiling {:#x}",
            layout.writable_end
        )));
    }
    Ok(())
}

/// Validate a whole payload against the layout before the erase is sent.
///
/// Chunk addresses only grow, so the first chunk and the (possibly short)
/// last chunk bound every write in between.
pub fn check_image(layout: &FlashLayout, safe: bool, payload_len: usize) -> Result<()> {
    if payload_len == 0 {
        return Err(Error::InvalidImage("payload is empty".into()));
    }

    let last = layout.chunk_count(payload_len) - 1;
    let tail = payload_len - last * layout.chunk_size;
    check_write(
        layout,
        safe,
        layout.chunk_address(0),
        payload_len.min(layout.chunk_size),
    )?;
    check_write(layout, safe, layout.chunk_address(last), tail)
}

/// Session with a device in bootloader mode (or with firmware that answers
/// the stock-compatible report/reset commands).
pub struct BootloaderClient<P: Port> {
    port: P,
    layout: FlashLayout,
    safe: bool,
}

impl<P: Port> BootloaderClient<P> {
    /// Wrap an open port. Writes are checked in safe mode by default.
    pub fn new(port: P) -> Self {
        Self {
            port,
            layout: FlashLayout::default(),
            safe: true,
        }
    }

    /// Use a different flash layout.
    #[must_use]
    pub fn with_layout(mut self, layout: FlashLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Allow writes into the protected regions.
    #[must_use]
    pub fn with_safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    /// Active flash layout.
    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the client and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    fn send(&mut self, frame: &BootloaderFrame) -> Result<()> {
        trace!("bootloader {:?} ({} bytes)", frame.opcode(), frame.as_bytes().len());
        self.port
            .write_timeout(frame.as_bytes(), COMMAND_TIMEOUT)
    }

    /// Query the device report.
    pub fn report(&mut self) -> Result<Report> {
        self.send(&BootloaderFrame::report())?;

        let mut buf = [0u8; REPORT_SIZE];
        let n = self
            .port
            .read_timeout(&mut buf, COMMAND_TIMEOUT)?;
        if n == 0 {
            return Err(Error::timeout("report", COMMAND_TIMEOUT));
        }

        let report = Report::decode(&buf[..n]);
        debug!(
            "Report ({n} bytes): status {}, model {}, fw {}.{}, hw {}",
            report.status,
            report.model,
            report.firmware_major,
            report.firmware_minor,
            report.hardware_version
        );
        Ok(report)
    }

    /// Reboot the device.
    ///
    /// The device drops off the bus, so the session is consumed and the
    /// port closed.
    pub fn reset(mut self) -> Result<()> {
        info!("Resetting device on {}", self.port.name());
        let sent = self.send(&BootloaderFrame::reset());
        let closed = self.port.close();
        sent.and(closed)
    }

    /// Erase the application region.
    pub fn erase(&mut self, key: EraseKey) -> Result<()> {
        info!("Erasing flash");
        self.send(&BootloaderFrame::erase(key))?;

        let mut buf = [0u8; ERASE_REPLY_SIZE];
        let n = self
            .port
            .read_timeout(&mut buf, ERASE_TIMEOUT)?;
        if n == 0 {
            return Err(Error::timeout("erase acknowledgement", ERASE_TIMEOUT));
        }
        if buf[0] != Opcode::Erase as u8 {
            return Err(Error::ProtocolViolation(format!(
                "erase answered with {:#04x}, expected {:#04x}",
                buf[0],
                Opcode::Erase as u8
            )));
        }
        Ok(())
    }

    /// Write one encrypted chunk at a device address.
    ///
    /// All bounds are checked before anything touches the port.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        check_write(&self.layout, self.safe, address, data.len())?;
        let frame = BootloaderFrame::write(address, data)?;
        self.send(&frame)
    }
}
