//! The `eprom-v` application: read-only dumper for 27-series EPROMs.

use {
    super::{App, AppClient, CommandSpec, ReplyShape},
    crate::{error::Result, port::Port},
};

/// Marker for the `eprom-v` application.
#[derive(Debug, Clone, Copy)]
pub struct EpromV;

impl App for EpromV {
    const NAME: &'static str = "eprom-v";

    const COMMANDS: &'static [CommandSpec] = &[
        // The firmware ignores any address or range and dumps 0x20 bytes from 0.
        CommandSpec::new("read", "r", &[]).reply(ReplyShape::HexDump),
        CommandSpec::new("led", "L", &[super::ArgShape::Flag]).cacheable(),
        CommandSpec::new("help", "h", &[]).reply(ReplyShape::Text),
        CommandSpec::new("bootloader", "b", &[]).reply(ReplyShape::NoWait),
    ];
}

impl<P: Port> AppClient<EpromV, P> {
    /// Dump the start of the EPROM.
    pub fn read(&mut self) -> Result<Vec<u8>> {
        self.invoke("read", &[])?
            .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        port::mock::{MockPort, banner},
        protocol::ascii::AsciiConfig,
    };
    use std::time::Duration;

    #[test]
    fn test_read_dump_on_following_line() {
        let port = MockPort::new()
            .reply(banner("eprom-v"))
            .reply(" r\r\n000 \r\n31 32 33 FF \r\nCMD> ");
        let config = AsciiConfig::default().with_timeout(Duration::from_millis(20));
        let mut eprom = AppClient::<EpromV, _>::open_with(port, config).unwrap();

        assert_eq!(eprom.read().unwrap(), vec![0x31, 0x32, 0x33, 0xFF]);
    }
}
