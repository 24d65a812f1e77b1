//! Native serial port implementation using the `serialport` crate.
//!
//! Used for the CDC ACM interface the open-tl866 firmware exposes in
//! application mode.

use {
    crate::{
        error::{Error, Result},
        port::{Port, SerialConfig},
    },
    log::trace,
    serialport::ClearBuffer,
    std::{
        io::{self, Read, Write},
        time::Duration,
    },
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config
                .port_name
                .clone(),
            timeout: config.timeout,
        })
    }

    /// Open a serial port with default settings.
    pub fn open_simple(port_name: &str) -> Result<Self> {
        Self::open(&SerialConfig::new(port_name))
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or(Error::Disconnected)
    }

    fn apply_timeout(&mut self, timeout: Duration) -> Result<()> {
        if timeout != self.timeout {
            self.port_mut()?
                .set_timeout(timeout)?;
            self.timeout = timeout;
        }
        Ok(())
    }
}

/// Errors that mean the tty went away rather than that it was slow.
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof
    ) || e.raw_os_error() == Some(5) // EIO after unplug on Linux
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.apply_timeout(timeout)?;
        match self
            .port_mut()?
            .read(buf)
        {
            // A zero-length read on a tty that reported readiness is EOF.
            Ok(0) => Err(Error::Disconnected),
            Ok(n) => {
                trace!("{} rx {:02X?}", self.name, &buf[..n]);
                Ok(n)
            },
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) if is_disconnect(&e) => Err(Error::Disconnected),
            Err(e) => Err(e.into()),
        }
    }

    fn write_timeout(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        self.apply_timeout(timeout)?;
        trace!("{} tx {:02X?}", self.name, data);
        let port = self.port_mut()?;
        let result = port
            .write_all(data)
            .and_then(|()| port.flush());
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                Err(Error::timeout("serial write", timeout))
            },
            Err(e) if is_disconnect(&e) => Err(Error::Disconnected),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Take ownership of the port and let it drop (close)
        self.port
            .take();
        Ok(())
    }
}
