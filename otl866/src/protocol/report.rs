//! Device report returned by the bootloader `Report` command.
//!
//! ## Layout
//!
//! ```text
//! offset  size  field
//!      0     1  (pad)
//!      1     1  status            1 = normal, 2 = bootloader
//!      2     2  (pad)
//!      4     1  firmware minor
//!      5     1  firmware major
//!      6     1  model             1 = TL866A, 2 = TL866CS
//!      7     8  device code
//!     15    24  serial number
//!     39     1  hardware version
//!     40     4  (pad)
//! ```
//!
//! The bootloader only sends the first 39 bytes and firmware older than
//! 03.2.85 sends 40. Missing bytes are treated as zero, except that an
//! absent hardware version reads as [`HW_VERSION_UNKNOWN`].

use std::fmt;

/// Full report size.
pub const REPORT_SIZE: usize = 44;

/// Offset of the hardware version byte.
const HW_VERSION_OFFSET: usize = 39;

/// Hardware version meaning "not reported": open or custom firmware.
pub const HW_VERSION_UNKNOWN: u8 = 255;

/// Device status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    /// Application firmware running.
    Normal,
    /// Bootloader running.
    Bootloader,
    /// Anything else.
    Other(u8),
}

impl From<u8> for Status {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Normal,
            2 => Self::Bootloader,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Bootloader => write!(f, "bootloader"),
            Self::Other(v) => write!(f, "unknown ({v})"),
        }
    }
}

/// Programmer model byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Model {
    /// TL866A.
    Tl866A,
    /// TL866CS.
    Tl866Cs,
    /// Unrecognized model byte.
    Unknown(u8),
}

impl From<u8> for Model {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Tl866A,
            2 => Self::Tl866Cs,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tl866A => write!(f, "TL866A"),
            // Unrecognized models get the CS suffix, as the vendor tool does.
            Self::Tl866Cs | Self::Unknown(_) => write!(f, "TL866CS"),
        }
    }
}

/// Decoded device report.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Report {
    /// Running mode.
    pub status: Status,
    /// Firmware minor version.
    pub firmware_minor: u8,
    /// Firmware major version.
    pub firmware_major: u8,
    /// Hardware model.
    pub model: Model,
    /// Device code, raw bytes.
    pub device_code: [u8; 8],
    /// Serial number, raw bytes.
    pub serial_number: [u8; 24],
    /// Hardware version, or [`HW_VERSION_UNKNOWN`].
    pub hardware_version: u8,
}

impl Report {
    /// Decode a possibly truncated report record.
    ///
    /// Bytes beyond [`REPORT_SIZE`] are ignored.
    pub fn decode(raw: &[u8]) -> Self {
        let mut buf = [0u8; REPORT_SIZE];
        let n = raw.len().min(REPORT_SIZE);
        buf[..n].copy_from_slice(&raw[..n]);

        let mut device_code = [0u8; 8];
        device_code.copy_from_slice(&buf[7..15]);
        let mut serial_number = [0u8; 24];
        serial_number.copy_from_slice(&buf[15..39]);

        let hardware_version = if raw.len() > HW_VERSION_OFFSET {
            buf[HW_VERSION_OFFSET]
        } else {
            HW_VERSION_UNKNOWN
        };

        Self {
            status: Status::from(buf[1]),
            firmware_minor: buf[4],
            firmware_major: buf[5],
            model: Model::from(buf[6]),
            device_code,
            serial_number,
            hardware_version,
        }
    }

    /// Whether the bootloader is running.
    pub fn is_bootloader(&self) -> bool {
        self.status == Status::Bootloader
    }

    /// Device code as text.
    pub fn device_code_str(&self) -> String {
        latin1(&self.device_code)
    }

    /// Serial number as text.
    pub fn serial_number_str(&self) -> String {
        latin1(&self.serial_number)
    }

    /// Classify what is running.
    pub fn firmware(&self) -> FirmwareKind {
        if self.is_bootloader() {
            FirmwareKind::Bootloader
        } else if self.hardware_version == HW_VERSION_UNKNOWN {
            FirmwareKind::Open {
                major: self.firmware_major,
                minor: self.firmware_minor,
            }
        } else {
            FirmwareKind::Stock {
                hardware: self.hardware_version,
                major: self.firmware_major,
                minor: self.firmware_minor,
            }
        }
    }

    /// Human-readable status summary.
    pub fn device_status(&self) -> DeviceStatus {
        DeviceStatus {
            model: self.model,
            firmware: self.firmware(),
            serial: self.serial_number_str(),
            device_code: self.device_code_str(),
        }
    }
}

/// Decode ISO-8859-1 text, dropping NUL padding.
fn latin1(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| char::from(b))
        .collect::<String>()
        .trim_end_matches('\0')
        .to_string()
}

/// What a report says is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FirmwareKind {
    /// The bootloader.
    Bootloader,
    /// Open firmware (no hardware version reported).
    Open {
        /// Major version.
        major: u8,
        /// Minor version.
        minor: u8,
    },
    /// Vendor firmware.
    Stock {
        /// Hardware version.
        hardware: u8,
        /// Major version.
        major: u8,
        /// Minor version.
        minor: u8,
    },
}

/// Identification as printed to users.
///
/// Renders as two lines, e.g.
///
/// ```text
/// TL866A Stock Firmware v03.2.86
/// Serial 0123456789ABCDEF, Device 12345678
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceStatus {
    /// Hardware model.
    pub model: Model,
    /// Running firmware.
    pub firmware: FirmwareKind,
    /// Serial number text.
    pub serial: String,
    /// Device code text.
    pub device_code: String,
}

impl DeviceStatus {
    /// First line: model and firmware.
    pub fn headline(&self) -> String {
        match self.firmware {
            FirmwareKind::Bootloader => format!("{} Bootloader", self.model),
            FirmwareKind::Open { major, minor } => {
                format!("{} Open Firmware v{major}.{minor}", self.model)
            },
            FirmwareKind::Stock {
                hardware,
                major,
                minor,
            } => format!(
                "{} Stock Firmware v{hardware:02}.{major}.{minor}",
                self.model
            ),
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.headline())?;
        write!(f, "Serial {}, Device {}", self.serial, self.device_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: u8, minor: u8, major: u8, model: u8) -> Vec<u8> {
        let mut raw = vec![0u8; REPORT_SIZE];
        raw[1] = status;
        raw[4] = minor;
        raw[5] = major;
        raw[6] = model;
        raw[7..15].copy_from_slice(b"DEV00001");
        raw[15..21].copy_from_slice(b"SN1234");
        raw
    }

    #[test]
    fn test_bootloader_record_is_padded() {
        let raw = record(2, 2, 3, 1);
        let report = Report::decode(&raw[..39]);

        assert_eq!(report.status, Status::Bootloader);
        assert_eq!(report.firmware_minor, 2);
        assert_eq!(report.firmware_major, 3);
        assert_eq!(report.model, Model::Tl866A);
        assert_eq!(report.hardware_version, HW_VERSION_UNKNOWN);
        assert_eq!(report.firmware(), FirmwareKind::Bootloader);
        assert_eq!(report.serial_number_str(), "SN1234");
        assert_eq!(report.device_code_str(), "DEV00001");
    }

    #[test]
    fn test_forty_byte_record_keeps_hw_version() {
        let mut raw = record(1, 86, 2, 2);
        raw[39] = 3;
        let report = Report::decode(&raw[..40]);

        assert_eq!(report.hardware_version, 3);
        assert_eq!(
            report.firmware(),
            FirmwareKind::Stock {
                hardware: 3,
                major: 2,
                minor: 86
            }
        );
    }

    #[test]
    fn test_short_records_zero_pad() {
        let report = Report::decode(&[0, 1]);
        assert_eq!(report.status, Status::Normal);
        assert_eq!(report.model, Model::Unknown(0));
        assert_eq!(report.device_code, [0; 8]);
        assert_eq!(report.hardware_version, HW_VERSION_UNKNOWN);

        let empty = Report::decode(&[]);
        assert_eq!(empty.status, Status::Other(0));
    }

    #[test]
    fn test_oversized_record_is_clipped() {
        let mut raw = record(1, 0, 1, 1);
        raw[39] = 255;
        raw.extend_from_slice(&[0xEE; 20]);
        let report = Report::decode(&raw);
        assert_eq!(report.firmware(), FirmwareKind::Open { major: 1, minor: 0 });
    }

    #[test]
    fn test_status_lines() {
        let boot = Report::decode(&record(2, 0, 0, 2)[..39]).device_status();
        assert_eq!(boot.headline(), "TL866CS Bootloader");

        let mut raw = record(1, 86, 2, 1);
        raw[39] = 3;
        let stock = Report::decode(&raw).device_status();
        assert_eq!(
            stock.to_string(),
            "TL866A Stock Firmware v03.2.86\nSerial SN1234, Device DEV00001"
        );

        raw[39] = 255;
        let open = Report::decode(&raw).device_status();
        assert_eq!(open.headline(), "TL866A Open Firmware v2.86");
    }

    #[test]
    fn test_latin1_serial() {
        let mut raw = record(1, 0, 0, 1);
        raw[15] = 0xE9;
        let report = Report::decode(&raw);
        assert!(report.serial_number_str().starts_with('é'));
    }
}
