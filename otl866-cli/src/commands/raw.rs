//! Raw ASCII command passthrough.

use anyhow::{Context, Result};
use log::debug;
use otl866::{
    AsciiClient, Discovery, NativeDiscovery,
    commands::{ReplyShape, commands_for},
    protocol::ascii::{ANY_APP, DEFAULT_TIMEOUT},
};
use std::time::Duration;

use super::{ascii_config, ensure_not_interrupted, serial_device};
use crate::config::Config;
use crate::{Cli, CliError};

/// Arguments of `otl866 cmd`.
pub(crate) struct RawArgs<'a> {
    pub(crate) code: &'a str,
    pub(crate) args: &'a [String],
    pub(crate) reply: bool,
    pub(crate) app: Option<&'a str>,
    pub(crate) timeout: Option<f64>,
}

/// How to wait for one command's reply.
#[derive(Debug, PartialEq)]
struct Plan {
    reply: bool,
    timeout: Duration,
}

/// Known commands of the running application supply their own timeout and
/// reply behavior; explicit flags win.
fn plan(app: &str, code: &str, reply: bool, timeout: Option<f64>) -> Result<Plan> {
    let spec = commands_for(app).and_then(|table| {
        table
            .iter()
            .find(|spec| spec.code == code)
    });

    let timeout = match timeout {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map_err(|e| CliError::Usage(format!("Invalid timeout {secs}: {e}")))?,
        None => spec
            .and_then(|s| s.timeout)
            .unwrap_or(DEFAULT_TIMEOUT),
    };
    let reply = reply && spec.is_none_or(|s| s.reply != ReplyShape::NoWait);

    Ok(Plan { reply, timeout })
}

/// Cmd command implementation.
pub(crate) fn cmd_raw(cli: &Cli, config: &Config, args: &RawArgs<'_>) -> Result<()> {
    let device = serial_device(cli, config)?;
    ensure_not_interrupted()?;

    let port = NativeDiscovery
        .open(&device)
        .with_context(|| format!("Failed to open {}", device.name))?;
    let mut client = AsciiClient::open_with(
        port,
        Some(args.app.unwrap_or(ANY_APP)),
        ascii_config(cli),
    )
    .with_context(|| format!("Failed to open a session on {}", device.name))?;

    let plan = plan(client.app(), args.code, args.reply, args.timeout)?;
    debug!(
        "Running '{}' on {} (reply: {}, timeout: {:?})",
        args.code,
        client.app(),
        plan.reply,
        plan.timeout
    );

    let argv: Vec<&str> = args
        .args
        .iter()
        .map(String::as_str)
        .collect();
    let response = client
        .send_timeout(args.code, &argv, plan.reply, plan.timeout)
        .with_context(|| format!("Command '{}' failed", args.code))?;

    if let Some(response) = response {
        let body = response.body();
        if !body.is_empty() {
            println!("{body}");
        }
    }
    client.close()?;
    Ok(())
}
