//! Batch jobs from a TOML file.
//!
//! ```toml
//! [[job]]
//! name = "bootloader"
//! firmware = "boot.bin"
//! device_filter = "ttyACM"
//! verify = true
//! retry_count = 5
//! ```
//!
//! Relative firmware paths are resolved against the directory of the batch
//! file. Every job runs even when an earlier one fails.

use anyhow::{Context, Result};
use console::style;
use log::{info, warn};
use samflash::{DeviceInfo, FlashConfig, FlashManager};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::CliError;
use crate::commands::{Session, track};
use crate::report::Report;

/// Parsed batch file.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct BatchFile {
    #[serde(default, rename = "job")]
    pub jobs: Vec<Job>,
}

/// One flashing job.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Job {
    pub name: String,
    pub firmware: PathBuf,
    /// Substring of the device id, or a manufacturer name.
    #[serde(default)]
    pub device_filter: Option<String>,
    #[serde(default)]
    pub verify: Option<bool>,
    #[serde(default)]
    pub erase: Option<bool>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Job {
    fn flash_config(&self, base: &FlashConfig) -> FlashConfig {
        FlashConfig {
            verify_after_write: self.verify.unwrap_or(base.verify_after_write),
            erase_before_write: self.erase.unwrap_or(base.erase_before_write),
            retry_count: self.retry_count.unwrap_or(base.retry_count),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            enable_progress_reporting: base.enable_progress_reporting,
        }
    }

    fn matches(&self, device: &DeviceInfo) -> bool {
        self.device_filter.as_deref().is_none_or(|filter| {
            device.id.contains(filter) || device.manufacturer.eq_ignore_ascii_case(filter)
        })
    }
}

/// Outcome of one job.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobResult {
    pub name: String,
    pub success: bool,
    pub device: Option<String>,
    pub bytes: usize,
    pub error: Option<String>,
}

impl BatchFile {
    /// Read and parse a batch file. Malformed TOML is a usage error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file {}", path.display()))?;
        let mut batch: Self = toml::from_str(&content).map_err(|e| {
            CliError::Usage(format!("Invalid batch file {}: {e}", path.display()))
        })?;
        if batch.jobs.is_empty() {
            return Err(CliError::Usage(format!("No [[job]] entries in {}", path.display())).into());
        }

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        for job in &mut batch.jobs {
            if job.firmware.is_relative() {
                job.firmware = base.join(&job.firmware);
            }
        }
        Ok(batch)
    }
}

fn pick_device(manager: &mut FlashManager, job: &Job) -> Result<String> {
    let devices = manager.scan_devices()?;
    devices
        .iter()
        .find(|d| job.matches(d))
        .map(|d| d.id.clone())
        .ok_or_else(|| {
            let suffix = job
                .device_filter
                .as_ref()
                .map(|f| format!(" matching \"{f}\""))
                .unwrap_or_default();
            CliError::NoDevice(suffix).into()
        })
}

fn run_job(session: &Session<'_>, job: &Job) -> Result<(String, usize)> {
    let mut manager = session.manager(job.flash_config(&session.flash_config))?;
    manager
        .load_firmware_file(&job.firmware)
        .with_context(|| format!("Failed to load firmware {}", job.firmware.display()))?;
    let len = manager.firmware_len();

    let id = pick_device(&mut manager, job)?;
    manager
        .connect_device(&id)
        .with_context(|| format!("Failed to connect to {id}"))?;

    let pb = session.progress_bar();
    pb.set_message(job.name.clone());
    let result = manager.flash_firmware(&mut track(&pb));
    pb.finish_and_clear();

    if let Err(e) = manager.disconnect_device() {
        warn!("Disconnect failed: {e}");
    }
    result?;
    Ok((id, len))
}

/// Batch command implementation.
pub(crate) fn cmd_batch(session: &Session<'_>, path: &Path) -> Result<Report> {
    let batch = BatchFile::load(path)?;
    info!("Running {} batch job(s) from {}", batch.jobs.len(), path.display());

    let mut results = Vec::with_capacity(batch.jobs.len());
    for job in &batch.jobs {
        if !session.quiet() {
            eprintln!("{} Job {}", style("▶").cyan(), job.name);
        }
        let result = match run_job(session, job) {
            Ok((device, bytes)) => {
                if !session.quiet() {
                    eprintln!("{} {} flashed to {device}", style("✓").green(), job.name);
                }
                JobResult {
                    name: job.name.clone(),
                    success: true,
                    device: Some(device),
                    bytes,
                    error: None,
                }
            },
            Err(e) => {
                warn!("Job {} failed: {e:#}", job.name);
                if !session.quiet() {
                    eprintln!("{} {}: {e:#}", style("✗").red(), job.name);
                }
                JobResult {
                    name: job.name.clone(),
                    success: false,
                    device: None,
                    bytes: 0,
                    error: Some(format!("{e:#}")),
                }
            },
        };
        results.push(result);
    }

    let failed = results.iter().filter(|r| !r.success).count();
    let total = results.len();
    let data = serde_json::json!({ "jobs": results });
    let report = if failed == 0 {
        Report::success(format!("{total} job(s) completed"))
    } else {
        Report::failure(
            format!("{} of {total} job(s) completed", total - failed),
            format!("{failed} of {total} batch job(s) failed"),
        )
    };
    Ok(report.with_data(data))
}
