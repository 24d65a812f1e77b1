//! Typed command sets of the open-tl866 firmware applications.
//!
//! Each application is a table of [`CommandSpec`] rows describing the
//! command character, the shape of every argument and the shape of the
//! reply. [`AppClient`] interprets the table on top of an [`AsciiClient`],
//! so adding a command is a table edit rather than new I/O code.
//!
//! ```text
//! invoke("vpp_voltage", [3])
//!   -> lookup row  { code 'V', args [Enum max 7], reply Ack }
//!   -> format      "V 3"
//!   -> AsciiClient::send
//!   -> Output::Done
//! ```

mod at89;
mod bitbang;
mod eprom;

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::{
            ascii::{AsciiClient, AsciiConfig, Response},
            zif,
        },
    },
    log::{debug, trace},
    std::{collections::HashMap, marker::PhantomData, time::Duration},
};

pub use {
    at89::{At89, Signature},
    bitbang::{Bitbang, VddLevel, VppLevel},
    eprom::EpromV,
};

/// How one argument is validated and written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    /// `0` or `1`.
    Flag,
    /// Decimal index in `0..=max`.
    Enum {
        /// Largest accepted index.
        max: u64,
    },
    /// 40-bit ZIF pin mask.
    Zif,
    /// Zero-padded upper-case hex with a fixed digit count.
    Hex {
        /// Digits on the wire.
        digits: usize,
    },
    /// Plain decimal in `0..=max`.
    Dec {
        /// Largest accepted value.
        max: u64,
    },
}

impl ArgShape {
    /// Check `value` and render it for the wire.
    pub fn format(self, what: &'static str, value: u64) -> Result<String> {
        let max = match self {
            Self::Flag => 1,
            Self::Enum { max } | Self::Dec { max } => max,
            Self::Zif => zif::ZIF_MAX,
            Self::Hex { digits } => {
                if digits >= 16 {
                    u64::MAX
                } else {
                    (1u64 << (4 * digits)) - 1
                }
            },
        };
        if value > max {
            return Err(Error::ValueOutOfRange { what, value, max });
        }

        Ok(match self {
            Self::Zif => zif::encode(value)?,
            Self::Hex { digits } => format!("{value:0digits$X}"),
            Self::Flag | Self::Enum { .. } | Self::Dec { .. } => value.to_string(),
        })
    }
}

/// What the firmware prints in answer to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// Nothing of interest; just wait for the prompt.
    Ack,
    /// Free text, returned as the reply body.
    Text,
    /// A `Result:` line with a ZIF mask.
    Zif,
    /// An address line followed by hex bytes.
    HexDump,
    /// The device does not answer (e.g. it reboots).
    NoWait,
}

/// One row of an application's command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Name used by callers.
    pub name: &'static str,
    /// Command character.
    pub code: &'static str,
    /// Argument shapes, in order.
    pub args: &'static [ArgShape],
    /// Reply shape.
    pub reply: ReplyShape,
    /// Reply timeout override for slow commands.
    pub timeout: Option<Duration>,
    /// Repeating the last arguments is a no-op, so it may be suppressed.
    pub cacheable: bool,
    /// Resets device state; clears the suppression cache.
    pub invalidates: bool,
}

impl CommandSpec {
    /// A row with an acknowledgement-only reply and no caching.
    pub const fn new(name: &'static str, code: &'static str, args: &'static [ArgShape]) -> Self {
        Self {
            name,
            code,
            args,
            reply: ReplyShape::Ack,
            timeout: None,
            cacheable: false,
            invalidates: false,
        }
    }

    /// Set the reply shape.
    #[must_use]
    pub const fn reply(mut self, reply: ReplyShape) -> Self {
        self.reply = reply;
        self
    }

    /// Allow a longer reply.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark as safe to suppress when repeated.
    #[must_use]
    pub const fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    /// Mark as resetting device state.
    #[must_use]
    pub const fn invalidates(mut self) -> Self {
        self.invalidates = true;
        self
    }
}

/// A firmware application and its command table.
pub trait App {
    /// Name in the `open-tl866 (<name>)` banner.
    const NAME: &'static str;

    /// Command table.
    const COMMANDS: &'static [CommandSpec];

    /// Find a command by name.
    fn lookup(name: &str) -> Result<&'static CommandSpec> {
        Self::COMMANDS
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| Error::Unsupported(format!("{} has no command '{name}'", Self::NAME)))
    }
}

/// Decoded reply of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// The command completed (or was suppressed).
    Done,
    /// Reply body.
    Text(String),
    /// ZIF pin mask.
    Mask(u64),
    /// Bytes from a hex dump.
    Bytes(Vec<u8>),
}

impl Output {
    /// The mask, if this is one.
    pub fn into_mask(self) -> Result<u64> {
        match self {
            Self::Mask(mask) => Ok(mask),
            other => Err(Error::ProtocolViolation(format!("expected a mask, got {other:?}"))),
        }
    }

    /// The text, if this is text.
    pub fn into_text(self) -> Result<String> {
        match self {
            Self::Text(text) => Ok(text),
            other => Err(Error::ProtocolViolation(format!("expected text, got {other:?}"))),
        }
    }

    /// The bytes, if this is a dump.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            other => Err(Error::ProtocolViolation(format!("expected bytes, got {other:?}"))),
        }
    }
}

/// Decode a dump of the form `AAA HH HH ...`, possibly continued on the
/// following lines.
pub fn decode_hex_dump(response: &Response) -> Result<Vec<u8>> {
    let body = response.body();
    let mut lines = body.lines();

    let first = lines
        .by_ref()
        .find(|line| is_dump_header(line))
        .ok_or_else(|| Error::PatternNotFound {
            pattern: "[0-9A-F]{3} ...".to_string(),
            considered: body.lines().count(),
            lines: Vec::new(),
        })?;

    let mut bytes = Vec::new();
    push_hex_bytes(&first[3..], &mut bytes)?;
    for line in lines {
        if !line
            .split_whitespace()
            .all(is_hex_byte)
        {
            break;
        }
        push_hex_bytes(line, &mut bytes)?;
    }
    Ok(bytes)
}

fn is_dump_header(line: &str) -> bool {
    let head = line.as_bytes();
    head.len() >= 3
        && head[..3]
            .iter()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(b))
        && head
            .get(3)
            .is_none_or(|b| *b == b' ')
}

fn is_hex_byte(token: &str) -> bool {
    token.len() == 2
        && token
            .bytes()
            .all(|b| b.is_ascii_hexdigit())
}

fn push_hex_bytes(text: &str, out: &mut Vec<u8>) -> Result<()> {
    for token in text.split_whitespace() {
        if !is_hex_byte(token) {
            return Err(Error::ProtocolViolation(format!("bad byte '{token}' in dump")));
        }
        out.push(
            u8::from_str_radix(token, 16)
                .map_err(|e| Error::ProtocolViolation(format!("bad byte '{token}': {e}")))?,
        );
    }
    Ok(())
}

/// Client bound to one firmware application.
pub struct AppClient<A: App, P: Port> {
    session: AsciiClient<P>,
    // Last arguments of each cacheable command, when suppression is on.
    cache: Option<HashMap<&'static str, Vec<u64>>>,
    app: PhantomData<A>,
}

impl<A: App, P: Port> AppClient<A, P> {
    /// Open a session and check that `A` is running.
    pub fn open(port: P) -> Result<Self> {
        Self::open_with(port, AsciiConfig::default())
    }

    /// Like [`open`](Self::open) with explicit session settings.
    pub fn open_with(port: P, config: AsciiConfig) -> Result<Self> {
        let session = AsciiClient::open_with(port, Some(A::NAME), config)?;
        Ok(Self {
            session,
            cache: None,
            app: PhantomData,
        })
    }

    /// Skip cacheable commands whose arguments equal the last ones sent.
    #[must_use]
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(HashMap::new());
        self
    }

    /// Underlying ASCII session, read-only so commands keep the cache in
    /// step with the device.
    pub fn session(&self) -> &AsciiClient<P> {
        &self.session
    }

    /// Consume the client and return the ASCII session.
    pub fn into_session(self) -> AsciiClient<P> {
        self.session
    }

    /// Forget every remembered device state.
    pub fn invalidate_cache(&mut self) {
        if let Some(cache) = &mut self.cache {
            cache.clear();
        }
    }

    /// Recover a faulted session. The device state is unknown afterwards.
    pub fn recover(&mut self) -> Result<()> {
        self.invalidate_cache();
        self.session.recover()
    }

    /// Run the command `name` with numeric arguments.
    pub fn invoke(&mut self, name: &str, args: &[u64]) -> Result<Output> {
        let spec = A::lookup(name)?;
        if args.len() != spec.args.len() {
            return Err(Error::InvalidArguments(format!(
                "{} {name} takes {} argument(s), got {}",
                A::NAME,
                spec.args.len(),
                args.len()
            )));
        }

        let wire = spec
            .args
            .iter()
            .zip(args)
            .map(|(shape, &value)| shape.format(spec.name, value))
            .collect::<Result<Vec<_>>>()?;

        if spec.cacheable {
            if let Some(cache) = &self.cache {
                if cache
                    .get(spec.code)
                    .is_some_and(|last| last.as_slice() == args)
                {
                    debug!("Suppressed repeated '{}' ({name})", spec.code);
                    return Ok(Output::Done);
                }
            }
        }

        let result = self.run(spec, &wire);

        if let Some(cache) = &mut self.cache {
            match &result {
                Ok(_) if spec.invalidates => cache.clear(),
                Ok(_) if spec.cacheable => {
                    cache.insert(spec.code, args.to_vec());
                },
                Ok(_) => {},
                // What the device did with a failed command is unknown.
                Err(_) => {
                    cache.remove(spec.code);
                },
            }
        }
        result
    }

    fn run(&mut self, spec: &CommandSpec, wire: &[String]) -> Result<Output> {
        let args: Vec<&str> = wire
            .iter()
            .map(String::as_str)
            .collect();
        trace!("{} {} -> '{}' {:?}", A::NAME, spec.name, spec.code, args);

        if spec.reply == ReplyShape::NoWait {
            self.session
                .send(spec.code, &args, false)?;
            return Ok(Output::Done);
        }

        let response = match spec.timeout {
            Some(timeout) => self
                .session
                .send_timeout(spec.code, &args, true, timeout)?,
            None => self
                .session
                .send(spec.code, &args, true)?,
        }
        .ok_or_else(|| Error::ProtocolViolation(format!("no reply to '{}'", spec.code)))?;

        match spec.reply {
            ReplyShape::Ack | ReplyShape::NoWait => Ok(Output::Done),
            ReplyShape::Text => Ok(Output::Text(response.body())),
            ReplyShape::Zif => Ok(Output::Mask(self.session.result_zif(&response)?)),
            ReplyShape::HexDump => Ok(Output::Bytes(decode_hex_dump(&response)?)),
        }
    }
}

/// Command table of an application by banner name.
pub fn commands_for(app: &str) -> Option<&'static [CommandSpec]> {
    [
        (Bitbang::NAME, Bitbang::COMMANDS),
        (At89::NAME, At89::COMMANDS),
        (EpromV::NAME, EpromV::COMMANDS),
    ]
    .into_iter()
    .find(|(name, _)| *name == app)
    .map(|(_, commands)| commands)
}
