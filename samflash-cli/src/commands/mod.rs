//! Command implementations.
//!
//! Each subcommand is implemented in its own module and returns a
//! [`Report`] describing the outcome.

pub(crate) mod batch;
pub(crate) mod flash;
pub(crate) mod scan;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use samflash::{DeviceInfo, FlashConfig, FlashManager, FlashProgress};

use crate::config::Config;
use crate::report::Report;
use crate::{Cli, CliError, Commands, use_fancy_output};

/// State shared by the commands of one invocation.
pub(crate) struct Session<'a> {
    pub cli: &'a Cli,
    pub config: &'a Config,
    pub flash_config: FlashConfig,
}

impl<'a> Session<'a> {
    pub fn new(cli: &'a Cli, config: &'a Config) -> Self {
        Self {
            cli,
            config,
            flash_config: config.flash_config(cli.retry_count, cli.timeout_ms),
        }
    }

    /// Whether human-oriented output is suppressed.
    pub fn quiet(&self) -> bool {
        self.cli.quiet || self.cli.json
    }

    /// A manager over the native serial ports, configured with `config`.
    pub fn manager(&self, config: FlashConfig) -> Result<FlashManager> {
        let mut manager = FlashManager::native();
        manager.set_config(config)?;
        Ok(manager)
    }

    /// Create a progress bar, hidden when output is not interactive.
    pub fn progress_bar(&self) -> ProgressBar {
        if self.quiet() || !use_fancy_output() {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(100);
            #[allow(clippy::unwrap_used)] // Static template string
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}",
                    )
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb
        }
    }
}

/// Dispatch the parsed command.
pub(crate) fn run(cli: &Cli, config: &Config) -> Result<Report> {
    let session = Session::new(cli, config);
    match &cli.command {
        Commands::Scan => scan::cmd_scan(&session),
        Commands::Flash {
            firmware,
            device,
            no_verify,
            no_erase,
        } => flash::cmd_flash(&session, firmware, device.as_deref(), *no_verify, *no_erase),
        Commands::Verify { firmware, device } => {
            flash::cmd_verify(&session, firmware, device.as_deref())
        },
        Commands::Erase { device } => flash::cmd_erase(&session, device.as_deref()),
        Commands::Batch { job_file } => batch::cmd_batch(&session, job_file),
    }
}

/// Connect to `wanted`, or to the first scanned device.
pub(crate) fn connect(
    session: &Session<'_>,
    manager: &mut FlashManager,
    wanted: Option<&str>,
) -> Result<DeviceInfo> {
    let id = match wanted.or_else(|| session.config.default_device()) {
        Some(id) => id.to_string(),
        None => {
            let devices = manager.scan_devices()?;
            devices
                .first()
                .map(|d| d.id.clone())
                .ok_or_else(|| CliError::NoDevice(String::new()))?
        },
    };

    manager
        .connect_device(&id)
        .with_context(|| format!("Failed to connect to {id}"))?;
    manager
        .connected_device()
        .ok_or_else(|| samflash::Error::NotConnected.into())
}

/// Feed library progress events into a progress bar.
pub(crate) fn track(pb: &ProgressBar) -> impl FnMut(&FlashProgress) + '_ {
    let mut operation = String::new();
    move |p: &FlashProgress| {
        if p.current_operation != operation {
            operation.clone_from(&p.current_operation);
            pb.set_message(operation.clone());
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        pb.set_position(p.percentage.clamp(0.0, 100.0) as u64);
    }
}
