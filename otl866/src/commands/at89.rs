//! The `at89` application: AT89C51-family parallel programmer.

use {
    super::{App, AppClient, ArgShape, CommandSpec, ReplyShape},
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::ascii::{Response, match_line},
    },
    std::{fmt, time::Duration},
};

const ADDR: ArgShape = ArgShape::Hex { digits: 4 };
const RANGE: &[ArgShape] = &[ADDR, ArgShape::Hex { digits: 4 }];

/// A blank check walks the whole array and can take around 20 s.
const BLANK_TIMEOUT: Duration = Duration::from_secs(30);

/// Erase and self-test pulse VPP for a long time.
const SLOW_TIMEOUT: Duration = Duration::from_secs(10);

/// Marker for the `at89` application.
#[derive(Debug, Clone, Copy)]
pub struct At89;

impl App for At89 {
    const NAME: &'static str = "at89";

    const COMMANDS: &'static [CommandSpec] = &[
        CommandSpec::new("read", "r", RANGE).reply(ReplyShape::HexDump),
        CommandSpec::new("write", "w", &[ADDR, ArgShape::Hex { digits: 2 }]),
        CommandSpec::new("read_sysflash", "R", RANGE).reply(ReplyShape::HexDump),
        CommandSpec::new("lock", "l", &[ArgShape::Dec { max: 4 }]),
        CommandSpec::new("erase", "e", &[]).timeout(SLOW_TIMEOUT),
        CommandSpec::new("signature", "s", &[]).reply(ReplyShape::Text),
        CommandSpec::new("signature_check", "S", &[ArgShape::Flag]).cacheable(),
        CommandSpec::new("self_test", "T", &[])
            .reply(ReplyShape::Text)
            .timeout(SLOW_TIMEOUT),
        CommandSpec::new("blank_check", "B", &[])
            .reply(ReplyShape::Text)
            .timeout(BLANK_TIMEOUT),
        CommandSpec::new("reset_vdd", "v", &[]),
        CommandSpec::new("led", "L", &[ArgShape::Flag]).cacheable(),
        CommandSpec::new("help", "?", &[]).reply(ReplyShape::Text),
        CommandSpec::new("bootloader", "b", &[]).reply(ReplyShape::NoWait),
    ];
}

/// Signature bytes read from 0x30..=0x32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Manufacturer byte.
    pub manufacturer: u8,
    /// Model byte.
    pub model: u8,
    /// Programming voltage byte.
    pub vpp: u8,
}

impl Signature {
    /// Part name for known signatures.
    pub fn name(&self) -> Option<&'static str> {
        match (self.manufacturer, self.model, self.vpp) {
            (0x01, 0x51, 0xFF) => Some("AT89C51 (19651)"),
            (0x1E, 0x51, 0xFF) => Some("AT89C51 (19052)"),
            (0x1E, 0xFF, 0x1E) => Some("AT89C51RC"),
            (0x1E, 0x52, 0xFF) => Some("AT89C52 (19652)"),
            _ => None,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(
                f,
                "unknown (0x{:02X}{:02X}{:02X})",
                self.manufacturer, self.model, self.vpp
            ),
        }
    }
}

impl<P: Port> AppClient<At89, P> {
    /// Read `len` bytes of code memory from `address`.
    pub fn read(&mut self, address: u16, len: u16) -> Result<Vec<u8>> {
        self.invoke("read", &[u64::from(address), u64::from(len)])?
            .into_bytes()
    }

    /// Read `len` bytes of system flash from `address`.
    pub fn read_sysflash(&mut self, address: u16, len: u16) -> Result<Vec<u8>> {
        self.invoke("read_sysflash", &[u64::from(address), u64::from(len)])?
            .into_bytes()
    }

    /// Program one byte.
    pub fn write(&mut self, address: u16, data: u8) -> Result<()> {
        self.invoke("write", &[u64::from(address), u64::from(data)])?;
        Ok(())
    }

    /// Chip erase.
    pub fn erase(&mut self) -> Result<()> {
        self.invoke("erase", &[])?;
        Ok(())
    }

    /// Program the lock bits. Locking may also hide the signature.
    pub fn lock(&mut self, mode: u8) -> Result<()> {
        if !(2..=4).contains(&mode) {
            return Err(Error::InvalidArguments(format!(
                "lock mode {mode} not in 2..=4"
            )));
        }
        self.invoke("lock", &[u64::from(mode)])?;
        Ok(())
    }

    /// Read the signature bytes.
    pub fn signature(&mut self) -> Result<Signature> {
        let response = self.reply_of("signature")?;
        let verbose = self.session().verbose();

        let byte = |address: &str| -> Result<u8> {
            let m = match_line(&format!(r"\({address}\).*(..)"), &response, verbose)?;
            let hex = m.group(1).unwrap_or_default();
            u8::from_str_radix(hex, 16)
                .map_err(|e| Error::ProtocolViolation(format!("signature byte '{hex}': {e}")))
        };

        Ok(Signature {
            manufacturer: byte("0x30")?,
            model: byte("0x31")?,
            vpp: byte("0x32")?,
        })
    }

    /// Enable or disable the signature check before destructive commands.
    pub fn signature_check(&mut self, enable: bool) -> Result<()> {
        self.invoke("signature_check", &[u64::from(enable)])?;
        Ok(())
    }

    /// Whether the whole array reads back as erased.
    pub fn blank_check(&mut self) -> Result<bool> {
        let response = self.reply_of("blank_check")?;
        let m = match_line(r"Result: (.*)", &response, self.session().verbose())?;
        Ok(m.group(1) == Some("blank"))
    }

    /// Power-cycle VDD.
    pub fn reset_vdd(&mut self) -> Result<()> {
        self.invoke("reset_vdd", &[])?;
        Ok(())
    }

    fn reply_of(&mut self, name: &str) -> Result<Response> {
        let body = self
            .invoke(name, &[])?
            .into_text()?;
        // Put back a line in place of the echo so line matching sees the body.
        Ok(Response::new(format!("\n{body}")))
    }
}
