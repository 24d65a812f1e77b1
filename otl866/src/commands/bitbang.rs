//! The `bitbang` application: direct control of the pin drivers.

use {
    super::{App, AppClient, ArgShape, CommandSpec, ReplyShape},
    crate::{error::Result, port::Port},
};

const ZIF: &[ArgShape] = &[ArgShape::Zif];
const FLAG: &[ArgShape] = &[ArgShape::Flag];
const LEVEL: &[ArgShape] = &[ArgShape::Enum { max: 7 }];

/// Marker for the `bitbang` application.
#[derive(Debug, Clone, Copy)]
pub struct Bitbang;

impl App for Bitbang {
    const NAME: &'static str = "bitbang";

    const COMMANDS: &'static [CommandSpec] = &[
        CommandSpec::new("vpp_enable", "E", FLAG).cacheable(),
        CommandSpec::new("vpp_voltage", "V", LEVEL).cacheable(),
        CommandSpec::new("vpp_pins", "p", ZIF).cacheable(),
        CommandSpec::new("vdd_enable", "e", FLAG).cacheable(),
        CommandSpec::new("vdd_voltage", "v", LEVEL).cacheable(),
        CommandSpec::new("vdd_pins", "d", ZIF).cacheable(),
        CommandSpec::new("gnd_pins", "g", ZIF).cacheable(),
        CommandSpec::new("zif_dir", "t", ZIF).cacheable(),
        CommandSpec::new("zif_dir_read", "T", &[]).reply(ReplyShape::Zif),
        // Inputs can change under us, so writes are always sent.
        CommandSpec::new("zif_write", "z", ZIF),
        CommandSpec::new("zif_read", "Z", &[]).reply(ReplyShape::Zif),
        CommandSpec::new("led", "L", FLAG).cacheable(),
        CommandSpec::new("pupd", "m", &[ArgShape::Flag, ArgShape::Flag]).cacheable(),
        CommandSpec::new("status", "s", &[]).reply(ReplyShape::Text),
        CommandSpec::new("init", "i", &[]).invalidates(),
        CommandSpec::new("help", "?", &[]).reply(ReplyShape::Text),
        CommandSpec::new("bootloader", "b", &[]).reply(ReplyShape::NoWait),
    ];
}

/// VPP voltage settings, by nominal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VppLevel {
    /// 9.8 V
    V9_8 = 0,
    /// 12.6 V
    V12_6 = 1,
    /// 14.0 V
    V14_0 = 2,
    /// 16.6 V
    V16_6 = 3,
    /// 14.4 V
    V14_4 = 4,
    /// 17.1 V
    V17_1 = 5,
    /// 18.5 V
    V18_5 = 6,
    /// 21.2 V
    V21_2 = 7,
}

/// VDD voltage settings, by nominal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VddLevel {
    /// 3.0 V
    V3_0 = 0,
    /// 3.5 V
    V3_5 = 1,
    /// 4.6 V
    V4_6 = 2,
    /// 5.1 V
    V5_1 = 3,
    /// 4.3 V
    V4_3 = 4,
    /// 4.8 V
    V4_8 = 5,
    /// 6.0 V
    V6_0 = 6,
    /// 6.5 V
    V6_5 = 7,
}

impl<P: Port> AppClient<Bitbang, P> {
    /// Switch the VPP driver on or off.
    pub fn vpp_enable(&mut self, on: bool) -> Result<()> {
        self.invoke("vpp_enable", &[u64::from(on)])?;
        Ok(())
    }

    /// Select the VPP voltage.
    pub fn vpp_voltage(&mut self, level: VppLevel) -> Result<()> {
        self.invoke("vpp_voltage", &[level as u64])?;
        Ok(())
    }

    /// Route VPP to the pins in `mask`.
    pub fn vpp_pins(&mut self, mask: u64) -> Result<()> {
        self.invoke("vpp_pins", &[mask])?;
        Ok(())
    }

    /// Switch the VDD driver on or off.
    pub fn vdd_enable(&mut self, on: bool) -> Result<()> {
        self.invoke("vdd_enable", &[u64::from(on)])?;
        Ok(())
    }

    /// Select the VDD voltage.
    pub fn vdd_voltage(&mut self, level: VddLevel) -> Result<()> {
        self.invoke("vdd_voltage", &[level as u64])?;
        Ok(())
    }

    /// Route VDD to the pins in `mask`.
    pub fn vdd_pins(&mut self, mask: u64) -> Result<()> {
        self.invoke("vdd_pins", &[mask])?;
        Ok(())
    }

    /// Ground the pins in `mask`.
    pub fn gnd_pins(&mut self, mask: u64) -> Result<()> {
        self.invoke("gnd_pins", &[mask])?;
        Ok(())
    }

    /// Set pin directions; a set bit tristates the pin.
    pub fn zif_dir(&mut self, mask: u64) -> Result<()> {
        self.invoke("zif_dir", &[mask])?;
        Ok(())
    }

    /// Read back pin directions.
    pub fn zif_dir_read(&mut self) -> Result<u64> {
        self.invoke("zif_dir_read", &[])?
            .into_mask()
    }

    /// Drive the output pins.
    pub fn zif_write(&mut self, mask: u64) -> Result<()> {
        self.invoke("zif_write", &[mask])?;
        Ok(())
    }

    /// Sample all pins.
    pub fn zif_read(&mut self) -> Result<u64> {
        self.invoke("zif_read", &[])?
            .into_mask()
    }

    /// Configure the pull-up/pull-down network.
    pub fn pupd(&mut self, tristate: bool, high: bool) -> Result<()> {
        self.invoke("pupd", &[u64::from(tristate), u64::from(high)])?;
        Ok(())
    }

    /// Driver status line, e.g. `Result nVPP_EN:1 nVDD_EN:1 LED:0 PUPD:Z1V0`.
    pub fn status(&mut self) -> Result<String> {
        self.invoke("status", &[])?
            .into_text()
    }

    /// Put every driver back to its power-on state.
    pub fn init(&mut self) -> Result<()> {
        self.invoke("init", &[])?;
        Ok(())
    }
}
