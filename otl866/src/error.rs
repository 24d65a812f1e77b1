//! Error types for otl866.

use std::{fmt, io, time::Duration};
use thiserror::Error;

/// Result type for otl866 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Step of a firmware update at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    /// Entering bootloader mode and confirming it with a report.
    EnterBootloader,
    /// Loading and validating the firmware image.
    LoadImage,
    /// Erasing the application region.
    Erase,
    /// Writing payload chunks.
    Write,
    /// Re-reading the report after the last write.
    Verify,
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EnterBootloader => "enter bootloader",
            Self::LoadImage => "load image",
            Self::Erase => "erase",
            Self::Write => "write",
            Self::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// Outcome of the best-effort reset attempted after a failed update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// The reset command was delivered.
    ResetSent,
    /// The reset command itself failed.
    ResetFailed(String),
}

impl fmt::Display for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResetSent => f.write_str("device reset issued"),
            Self::ResetFailed(e) => write!(f, "reset also failed: {e}"),
        }
    }
}

/// Error type for otl866 operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, OS-level port errors).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// USB transport error.
    #[error("USB error: {0}")]
    Usb(String),

    /// The transport went away (cable pulled, device re-enumerated).
    #[error("Device disconnected")]
    Disconnected,

    /// No complete reply arrived in time.
    #[error("Timeout after {timeout:?} waiting for {operation}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// Deadline that expired.
        timeout: Duration,
    },

    /// The ASCII session timed out earlier and must be recovered first.
    #[error("Session is faulted after a timeout; call recover() first")]
    Faulted,

    /// The firmware answered with an explicit `ERROR:` marker.
    #[error("Device rejected '{command}': {message}")]
    DeviceError {
        /// Command line as sent.
        command: String,
        /// Terse device text.
        message: String,
    },

    /// No reply line matched the expected pattern.
    #[error("No line matching '{pattern}' in reply ({considered} lines considered)")]
    PatternNotFound {
        /// Pattern that was searched for.
        pattern: String,
        /// Number of lines looked at.
        considered: usize,
        /// Every line considered (filled in verbose mode only).
        lines: Vec<String>,
    },

    /// The device answered with something the protocol does not allow.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Command code was not exactly one character.
    #[error("Invalid command code '{0}': must be exactly one character")]
    InvalidCommand(String),

    /// A line pattern failed to compile.
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// Pattern as given.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// Wrong number or kind of arguments for an application command.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Value does not fit the wire field.
    #[error("Value {value:#x} out of range for {what} (max {max:#x})")]
    ValueOutOfRange {
        /// Field name.
        what: &'static str,
        /// Offending value.
        value: u64,
        /// Largest accepted value.
        max: u64,
    },

    /// A write would touch memory outside the allowed region.
    #[error("Refusing write: {0}")]
    SafetyViolation(String),

    /// The firmware application is not the one expected.
    #[error("Wrong firmware application: expected '{expected}', found '{actual}'")]
    IdentityMismatch {
        /// Expected application name.
        expected: String,
        /// Application name reported by the device.
        actual: String,
    },

    /// No matching device found.
    #[error("Device not found")]
    DeviceNotFound,

    /// More than one device matches and no selection was given.
    #[error("Multiple devices found ({0}); select one explicitly")]
    MultipleDevices(usize),

    /// The device did not come back within the reconnect deadline.
    #[error("Device did not reappear within {0:?}")]
    ReconnectTimeout(Duration),

    /// Something else appeared where the device was expected.
    #[error("Wrong device reconnected: expected {expected}, found {actual}")]
    WrongDeviceReconnected {
        /// Accepted identity class.
        expected: String,
        /// VID:PID that showed up.
        actual: String,
    },

    /// The ASCII reset into the bootloader did not produce a bootloader device.
    #[error("Device did not enter bootloader mode: {0}")]
    BootloaderNotReached(#[source] Box<Error>),

    /// A bootloader reset did not leave the device in bootloader mode.
    #[error("Device still not in bootloader mode after reset (status: {0})")]
    ResetVerificationFailed(String),

    /// The device did not report normal operation after an update.
    #[error("Device reports status '{0}' after update, expected normal")]
    VerifyFailed(String),

    /// The firmware image could not be used for this device.
    #[error("Invalid firmware image: {0}")]
    InvalidImage(String),

    /// The embedding application asked us to stop.
    #[error("Operation interrupted")]
    Interrupted,

    /// A firmware update failed after the bootloader session was established.
    #[error("Update failed during {stage}: {source} ({recovery})")]
    UpdateFailed {
        /// Step that failed.
        stage: UpdateStage,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
        /// What the best-effort reset did.
        recovery: Recovery,
    },

    /// Unsupported operation on this platform or device.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Shorthand for a [`Error::Timeout`].
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Whether the failure means the device is gone rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_message_names_command() {
        let err = Error::DeviceError {
            command: "V 9".to_string(),
            message: "invalid voltage".to_string(),
        };
        assert_eq!(err.to_string(), "Device rejected 'V 9': invalid voltage");
    }

    #[test]
    fn test_update_failed_reports_stage_and_recovery() {
        let err = Error::UpdateFailed {
            stage: UpdateStage::Write,
            source: Box::new(Error::Disconnected),
            recovery: Recovery::ResetFailed("Device disconnected".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("during write"));
        assert!(msg.contains("reset also failed"));
    }
}
