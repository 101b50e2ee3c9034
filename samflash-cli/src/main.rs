//! samflash CLI - Command-line tool for flashing microcontrollers and Samsung SoCs.
//!
//! ## Features
//!
//! - Scan for bootloader and download-mode devices
//! - Flash, verify and erase raw firmware images
//! - Batch jobs from a TOML file
//! - JSON reports for scripting
//! - Environment variable support

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use log::debug;

mod commands;
mod config;
mod report;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if progress bars and colors should be used.
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Failures raised by the CLI itself rather than the library.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// The invocation or an input file cannot be used as given.
    #[error("{0}")]
    Usage(String),

    /// Nothing answered on any port.
    #[error("No device found{0}")]
    NoDevice(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::NoDevice(_) => 1,
        }
    }
}

/// Map an error to the process exit code.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

/// samflash - flash microcontrollers and Samsung SoCs over serial.
///
/// Environment variables:
///   SAMFLASH_DEVICE       - Default device (port name)
///   SAMFLASH_RETRY_COUNT  - Attempts per chunk
///   SAMFLASH_TIMEOUT_MS   - Per-call I/O timeout
#[derive(Parser)]
#[command(name = "samflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    samflash scan\n  \
    samflash flash firmware.bin --device /dev/ttyACM0\n  \
    samflash --json batch jobs.toml")]
pub(crate) struct Cli {
    /// Print a JSON report on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Attempts per firmware chunk.
    #[arg(long, global = true, env = "SAMFLASH_RETRY_COUNT")]
    pub retry_count: Option<u32>,

    /// Per-call I/O timeout in milliseconds.
    #[arg(long, global = true, env = "SAMFLASH_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List devices in bootloader or download mode.
    Scan,

    /// Erase, write and verify a firmware image.
    Flash {
        /// Raw firmware image.
        firmware: PathBuf,

        /// Device to flash (first detected device if not specified).
        #[arg(short, long, env = "SAMFLASH_DEVICE")]
        device: Option<String>,

        /// Skip read-back verification.
        #[arg(long)]
        no_verify: bool,

        /// Skip the chip erase before writing.
        #[arg(long)]
        no_erase: bool,
    },

    /// Compare device flash with a firmware image.
    Verify {
        /// Raw firmware image.
        firmware: PathBuf,

        /// Device to verify (first detected device if not specified).
        #[arg(short, long, env = "SAMFLASH_DEVICE")]
        device: Option<String>,
    },

    /// Erase the whole device.
    Erase {
        /// Device to erase (first detected device if not specified).
        #[arg(short, long, env = "SAMFLASH_DEVICE")]
        device: Option<String>,
    },

    /// Run the jobs of a TOML batch file.
    Batch {
        /// Batch file with `[[job]]` tables.
        job_file: PathBuf,
    },
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet || (cli.json && cli.verbose == 0) {
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
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    debug!(
        "samflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    match commands::run(&cli, &config) {
        Ok(report) => {
            if cli.json {
                report.print();
            }
            if report.success {
                ExitCode::SUCCESS
            } else {
                if let Some(error) = &report.error {
                    eprintln!("{} {error}", style("Error:").red().bold());
                }
                ExitCode::from(1)
            }
        },
        Err(err) => {
            if cli.json {
                report::Report::from_error(&err).print();
            }
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}
