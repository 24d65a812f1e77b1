//! Port abstraction over the two transports a TL866 can be reached on.
//!
//! In application mode the open-tl866 firmware enumerates as a USB CDC
//! serial device and speaks the line-oriented ASCII protocol. In bootloader
//! mode the device exposes a vendor interface with one bulk endpoint pair
//! and speaks the binary bootloader protocol. Both sit behind [`Port`], so
//! the protocol layers never know which one they are talking to.
//!
//! ```text
//! +------------------+     +------------------+
//! |  AsciiClient     |     | BootloaderClient |
//! +--------+---------+     +--------+---------+
//!          |                        |
//!          v                        v
//! +--------+------------------------+---------+
//! |                 Port trait                |
//! +--------+------------------------+---------+
//!          |                        |
//!          v                        v
//! +--------+---------+     +--------+---------+
//! |    NativePort    |     |     UsbPort      |
//! |   (serialport)   |     |      (nusb)      |
//! +------------------+     +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use otl866::port::Port;
//! use std::time::Duration;
//!
//! fn ping<P: Port>(port: &mut P) -> otl866::Result<()> {
//!     port.write_timeout(b"?\n", Duration::from_millis(500))?;
//!
//!     let mut buf = [0u8; 64];
//!     let n = port.read_timeout(&mut buf, Duration::from_millis(500))?;
//!     println!("Received: {:?}", &buf[..n]);
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(feature = "native")]
pub mod usb;

use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate. The CDC device ignores it, but the OS still wants one.
    pub baud_rate: u32,
    /// Default read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(100),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration for the given port name.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// Set the default timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Duplex byte channel to a device.
///
/// Reads never block longer than the given timeout. A read that returns
/// `Ok(0)` means nothing arrived in time; a read that fails with
/// [`Error::Disconnected`](crate::Error::Disconnected) means the device is
/// gone. Implementations are responsible for telling those apart.
pub trait Port: Send {
    /// Port name/path, or a USB location string.
    fn name(&self) -> &str;

    /// Read whatever arrives within `timeout` into `buf`.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write all of `data`, failing if it cannot be delivered within `timeout`.
    fn write_timeout(&mut self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Discard anything buffered in either direction.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read_timeout(buf, timeout)
    }

    fn write_timeout(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        (**self).write_timeout(data, timeout)
    }

    fn clear_buffers(&mut self) -> Result<()> {
        (**self).clear_buffers()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

#[cfg(feature = "native")]
pub use {native::NativePort, usb::UsbPort};
