//! otl866 CLI - Command-line tool for TL866 programmers.
//!
//! ## Features
//!
//! - List programmers on serial and raw USB transports
//! - Identify the model and running firmware
//! - Reset open firmware into the bootloader
//! - Flash a prepared firmware image
//! - Send raw commands to an open-tl866 application

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl+C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl+C was pressed.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Errors raised by the CLI itself, mapped to dedicated exit codes.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Bad or missing arguments.
    #[error("{0}")]
    Usage(String),
    /// Stopped by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// otl866 - Host tool for TL866 programmers running open-tl866 firmware.
///
/// Environment variables:
///   OTL866_PORT      - Default serial port of the open firmware
///   OTL866_VERBOSE   - Log every ASCII command and dump unmatched replies
#[derive(Parser)]
#[command(name = "otl866")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/ProgHQ/open-tl866")]
struct Cli {
    /// Serial port of the open firmware (auto-detected if not specified).
    #[arg(short, long, global = true, env = "OTL866_PORT")]
    port: Option<String>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log every ASCII command and dump replies that fail to match.
    #[arg(long, global = true, env = "OTL866_VERBOSE")]
    ascii_verbose: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List programmers on serial and USB.
    List {
        /// Output the device list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show model, firmware and serial number.
    Identify,

    /// Flash a prepared (encrypted) firmware image.
    Update {
        /// Path to the encrypted image.
        image: PathBuf,

        /// Erase key of the programmer model, in hex.
        #[arg(long, value_parser = parse_hex_u8)]
        erase_key: Option<u8>,

        /// Reset open firmware on this serial port into the bootloader first.
        #[arg(long, value_name = "PORT")]
        reset_tty: Option<String>,

        /// Allow writes outside the application region.
        #[arg(long = "unsafe")]
        allow_unsafe: bool,

        /// First device address to write, in hex.
        #[arg(long, value_parser = parse_hex_u32)]
        base: Option<u32>,
    },

    /// Reboot open firmware into the bootloader.
    Bootloader,

    /// Send one raw command to an open-tl866 application.
    Cmd {
        /// Single-character command code.
        code: String,

        /// Command arguments, passed through as typed.
        args: Vec<String>,

        /// Do not wait for a reply.
        #[arg(long)]
        no_reply: bool,

        /// Refuse to talk to any application but this one.
        #[arg(long)]
        app: Option<String>,

        /// Reply timeout in seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<f64>,
    },
}

/// Parse hexadecimal value (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let s: String = s
        .chars()
        .filter(|c| *c != '_')
        .collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex value: {e}"))
}

/// Parse a hexadecimal byte.
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let value = parse_hex_u32(s)?;
    u8::try_from(value).map_err(|_| format!("Invalid hex byte: 0x{value:X} exceeds 0xFF"))
}

/// Process exit code for an error.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<otl866::Error>() {
        Some(otl866::Error::Interrupted) => 130,
        Some(otl866::Error::InvalidArguments(_)) => 2,
        _ => 1,
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "otl866 v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl+C handler: {e}");
    }
    otl866::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::List { json } => commands::list::cmd_list(*json),
        Commands::Identify => commands::identify::cmd_identify(cli),
        Commands::Update {
            image,
            erase_key,
            reset_tty,
            allow_unsafe,
            base,
        } => commands::update::cmd_update(
            cli,
            &config,
            &commands::update::UpdateArgs {
                image,
                erase_key: *erase_key,
                reset_tty: reset_tty.as_deref(),
                allow_unsafe: *allow_unsafe,
                base: *base,
            },
        ),
        Commands::Bootloader => commands::bootloader::cmd_bootloader(cli, &config),
        Commands::Cmd {
            code,
            args,
            no_reply,
            app,
            timeout,
        } => commands::raw::cmd_raw(
            cli,
            &config,
            &commands::raw::RawArgs {
                code,
                args,
                reply: !*no_reply,
                app: app.as_deref(),
                timeout: *timeout,
            },
        ),
    }
}
