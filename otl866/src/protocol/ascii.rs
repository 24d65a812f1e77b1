//! Line-oriented ASCII command protocol spoken by open-tl866 applications.
//!
//! ## Wire Format
//!
//! ```text
//! host  -> device:  <code> SP <arg> SP <arg> ... LF
//! device -> host:   <echo> CRLF <output lines> CRLF "CMD> "
//! ```
//!
//! The code is a single character and the space after it is always sent,
//! even without arguments. A reply is everything up to the `CMD>` prompt.
//! If it contains `ERROR: ` the firmware rejected the command.
//!
//! Every application answers `?` with a banner line `open-tl866 (<app>)`
//! followed by its help text; [`AsciiClient::open`] uses that to check it
//! is talking to the application it expects.

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::zif,
    },
    log::{debug, info, trace, warn},
    regex::Regex,
    std::time::{Duration, Instant},
};

/// Prompt printed by the firmware when it is ready for the next command.
pub const PROMPT: &str = "CMD>";

/// Marker the firmware prefixes to every error line.
pub const ERROR_MARKER: &str = "ERROR: ";

/// Default time allowed for a reply to reach the prompt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Silence that must pass before stale output counts as drained.
pub const QUIESCENCE: Duration = Duration::from_millis(100);

/// Upper bound on draining a device that will not stop talking.
const DRAIN_LIMIT: Duration = Duration::from_secs(3);

/// Time allowed for a command line to be accepted by the OS.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest single read while waiting for the prompt.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Banner pattern; group 1 is the application name.
const BANNER_PATTERN: &str = r"open-tl866 \((.*)\)";

/// Wildcard application name.
pub const ANY_APP: &str = "*";

/// A single command line, validated but not yet sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    code: char,
    args: Vec<String>,
}

impl CommandFrame {
    /// Build a frame; `code` must be exactly one character.
    pub fn new<S: AsRef<str>>(code: &str, args: &[S]) -> Result<Self> {
        let mut chars = code.chars();
        let (Some(c), None) = (chars.next(), chars.next()) else {
            return Err(Error::InvalidCommand(code.to_string()));
        };
        Ok(Self {
            code: c,
            args: args
                .iter()
                .map(|a| a.as_ref().to_string())
                .collect(),
        })
    }

    /// Command character.
    pub fn code(&self) -> char {
        self.code
    }

    /// Serialized line including the trailing newline.
    pub fn encode(&self) -> String {
        format!("{} {}\n", self.code, self.args.join(" "))
    }

    /// The line as a human would type it.
    pub fn display(&self) -> String {
        self.encode()
            .trim()
            .to_string()
    }
}

/// Raw reply text up to (not including) the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    raw: String,
}

impl Response {
    /// Wrap captured reply text.
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Everything the device sent, echo included.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Trimmed lines, echo included.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.raw
            .split('\n')
            .map(str::trim)
    }

    /// Output without the echoed command line, blank lines dropped.
    pub fn body(&self) -> String {
        self.lines()
            .skip(1)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether the firmware flagged an error.
    pub fn has_error(&self) -> bool {
        self.raw
            .contains(ERROR_MARKER)
    }

    /// Reply collapsed onto one line for error messages.
    pub fn terse(&self) -> String {
        self.raw
            .trim()
            .replace('\r', "")
            .replace('\n', "; ")
    }
}

/// A line that matched a pattern, with its capture groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMatch {
    /// The trimmed line.
    pub line: String,
    groups: Vec<Option<String>>,
}

impl LineMatch {
    /// Capture group `i` (0 is the whole match).
    pub fn group(&self, i: usize) -> Option<&str> {
        self.groups
            .get(i)
            .and_then(Option::as_deref)
    }
}

/// Find the first line whose start matches `pattern`.
///
/// Lines are trimmed before matching. With `verbose` set, a miss logs and
/// returns every line that was looked at.
pub fn match_line(pattern: &str, response: &Response, verbose: bool) -> Result<LineMatch> {
    let re = Regex::new(&format!("^(?:{pattern})")).map_err(|e| Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let lines: Vec<&str> = response
        .lines()
        .collect();
    for line in &lines {
        if let Some(caps) = re.captures(line) {
            if verbose {
                info!("match: {line}");
            }
            return Ok(LineMatch {
                line: (*line).to_string(),
                groups: caps
                    .iter()
                    .map(|m| m.map(|m| m.as_str().to_string()))
                    .collect(),
            });
        }
    }

    let considered = if verbose {
        info!("No match for '{pattern}' in {} lines", lines.len());
        for line in &lines {
            info!("  {line}");
        }
        lines
            .iter()
            .map(|l| (*l).to_string())
            .collect()
    } else {
        Vec::new()
    };

    Err(Error::PatternNotFound {
        pattern: pattern.to_string(),
        considered: lines.len(),
        lines: considered,
    })
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Commands may be sent.
    Ready,
    /// A reply timed out; output may be out of step with commands.
    Faulted,
}

/// Tunables for an ASCII session.
#[derive(Debug, Clone)]
pub struct AsciiConfig {
    /// Default reply timeout.
    pub timeout: Duration,
    /// Log every command and dump unmatched replies.
    pub verbose: bool,
}

impl Default for AsciiConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            verbose: false,
        }
    }
}

impl AsciiConfig {
    /// Set the default reply timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set verbose diagnostics.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Client for one open-tl866 application over a [`Port`].
pub struct AsciiClient<P: Port> {
    port: P,
    config: AsciiConfig,
    expected_app: Option<String>,
    app: String,
    state: SessionState,
    // Bytes received after the last prompt.
    pending: Vec<u8>,
}

impl<P: Port> AsciiClient<P> {
    /// Drain stale output and check the running application.
    ///
    /// `expected_app` of `None` or `"*"` accepts any application.
    pub fn open(port: P, expected_app: Option<&str>) -> Result<Self> {
        Self::open_with(port, expected_app, AsciiConfig::default())
    }

    /// Like [`open`](Self::open) with explicit settings.
    pub fn open_with(port: P, expected_app: Option<&str>, config: AsciiConfig) -> Result<Self> {
        let expected_app = expected_app
            .filter(|app| *app != ANY_APP)
            .map(str::to_string);
        if config.verbose {
            info!("port: {}", port.name());
        }

        let mut client = Self {
            port,
            config,
            expected_app,
            app: String::new(),
            state: SessionState::Ready,
            pending: Vec::new(),
        };
        client.drain()?;
        client.assert_app()?;
        Ok(client)
    }

    /// Application name from the banner.
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether verbose diagnostics are on.
    pub fn verbose(&self) -> bool {
        self.config.verbose
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the client and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Close the underlying port.
    pub fn close(mut self) -> Result<()> {
        self.port.close()
    }

    /// Send a command with the default reply timeout.
    ///
    /// Returns `None` when `reply` is false; the firmware's output for that
    /// command is left unread.
    pub fn send(&mut self, code: &str, args: &[&str], reply: bool) -> Result<Option<Response>> {
        let timeout = self.config.timeout;
        self.send_timeout(code, args, reply, timeout)
    }

    /// Send a command, waiting up to `timeout` for the prompt.
    pub fn send_timeout(
        &mut self,
        code: &str,
        args: &[&str],
        reply: bool,
        timeout: Duration,
    ) -> Result<Option<Response>> {
        if self.state == SessionState::Faulted {
            return Err(Error::Faulted);
        }

        let frame = CommandFrame::new(code, args)?;
        if self.config.verbose {
            info!("cmd out: {}", frame.display());
        } else {
            debug!("cmd out: {}", frame.display());
        }

        let written = self
            .port
            .write_timeout(frame.encode().as_bytes(), WRITE_TIMEOUT);
        self.note_failure(written)?;

        if !reply {
            return Ok(None);
        }

        let raw = self.read_until_prompt(timeout);
        let response = Response::new(self.note_failure(raw)?);
        if self.config.verbose {
            info!("cmd ret: chars {}", response.raw().len());
        }

        if response.has_error() {
            return Err(Error::DeviceError {
                command: frame.display(),
                message: response.terse(),
            });
        }
        Ok(Some(response))
    }

    /// Send a command that must produce a reply.
    pub fn command(&mut self, code: &str, args: &[&str]) -> Result<Response> {
        self.send(code, args, true)?
            .ok_or_else(|| Error::ProtocolViolation(format!("no reply to '{code}'")))
    }

    /// [`match_line`] with this session's verbosity.
    pub fn match_line(&self, pattern: &str, response: &Response) -> Result<LineMatch> {
        match_line(pattern, response, self.config.verbose)
    }

    /// Decode the `Result:` mask line of a reply.
    pub fn result_zif(&self, response: &Response) -> Result<u64> {
        let m = self.match_line(r"Result: (.*)", response)?;
        zif::decode(m.group(1).unwrap_or_default())
    }

    /// Ask the application to reboot into the bootloader.
    ///
    /// The firmware resets immediately, so no reply is awaited.
    pub fn bootloader(&mut self) -> Result<()> {
        self.send("b", &[], false)?;
        Ok(())
    }

    /// Turn the LED on or off.
    pub fn led(&mut self, on: bool) -> Result<()> {
        self.send("L", &[if on { "1" } else { "0" }], true)?;
        Ok(())
    }

    /// Leave the faulted state: drain and re-check the application.
    pub fn recover(&mut self) -> Result<()> {
        warn!("Recovering ASCII session on {}", self.port.name());
        self.state = SessionState::Ready;
        let result = self
            .drain()
            .and_then(|()| self.assert_app());
        if result.is_err() {
            self.state = SessionState::Faulted;
        }
        result
    }

    fn note_failure<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(Error::Timeout { .. })) {
            self.state = SessionState::Faulted;
        }
        result
    }

    fn assert_app(&mut self) -> Result<()> {
        let response = self.command("?", &[])?;
        let banner = self.match_line(BANNER_PATTERN, &response)?;
        let app = banner
            .group(1)
            .unwrap_or_default()
            .to_string();

        if let Some(expected) = &self.expected_app {
            if *expected != app {
                return Err(Error::IdentityMismatch {
                    expected: expected.clone(),
                    actual: app,
                });
            }
        }

        if self.config.verbose {
            info!("App type OK: {app}");
        }
        self.app = app;
        Ok(())
    }

    /// Discard output from any command still in progress.
    fn drain(&mut self) -> Result<()> {
        self.pending.clear();
        let start = Instant::now();
        let mut buf = [0u8; 1024];
        loop {
            let n = self
                .port
                .read_timeout(&mut buf, QUIESCENCE)?;
            if n == 0 {
                break;
            }
            trace!("Discarded {n} stale bytes");
            if start.elapsed() > DRAIN_LIMIT {
                return Err(Error::timeout("stale output to stop", DRAIN_LIMIT));
            }
        }
        self.port.clear_buffers()
    }

    fn read_until_prompt(&mut self, timeout: Duration) -> Result<String> {
        let start = Instant::now();
        let mut buf = [0u8; 256];

        loop {
            if let Some(pos) = find(&self.pending, PROMPT.as_bytes()) {
                let text = String::from_utf8_lossy(&self.pending[..pos]).into_owned();
                self.pending
                    .drain(..pos + PROMPT.len());
                trace!("reply: {text:?}");
                return Ok(text);
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                debug!(
                    "No prompt after {timeout:?}; have {:?}",
                    String::from_utf8_lossy(&self.pending)
                );
                return Err(Error::timeout(format!("'{PROMPT}' prompt"), timeout));
            }

            let n = self
                .port
                .read_timeout(&mut buf, (timeout - elapsed).min(READ_SLICE))?;
            self.pending
                .extend_from_slice(&buf[..n]);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}
