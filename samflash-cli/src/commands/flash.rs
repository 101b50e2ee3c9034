//! Flash, verify and erase command implementations.

use anyhow::{Context, Result};
use console::style;
use samflash::FlashManager;
use std::path::Path;

use crate::commands::{Session, connect, track};
use crate::report::Report;

fn load(session: &Session<'_>, manager: &mut FlashManager, firmware: &Path) -> Result<()> {
    manager
        .load_firmware_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;
    if !session.quiet() {
        eprintln!(
            "{} Loaded {} ({} bytes)",
            style("📦").cyan(),
            firmware.display(),
            manager.firmware_len()
        );
    }
    Ok(())
}

/// Connect, run `op` with a progress bar, then disconnect whatever happened.
fn with_device(
    session: &Session<'_>,
    manager: &mut FlashManager,
    device: Option<&str>,
    op: impl FnOnce(&mut FlashManager, &mut dyn FnMut(&samflash::FlashProgress)) -> samflash::Result<()>,
) -> Result<Report> {
    let info = connect(session, manager, device)?;
    if !session.quiet() {
        eprintln!(
            "{} Connected to {} ({}, {} strategy)",
            style("✓").green(),
            info.id,
            info.name,
            manager.strategy_name().unwrap_or("no")
        );
    }

    let pb = session.progress_bar();
    let result = op(manager, &mut track(&pb));
    if result.is_ok() {
        pb.finish_with_message("Complete");
    } else {
        pb.abandon();
    }

    if let Err(e) = manager.disconnect_device() {
        log::warn!("Disconnect failed: {e}");
    }
    result?;

    Ok(Report::success("")
        .with_devices(vec![info])
        .with_progress(manager.progress()))
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    session: &Session<'_>,
    firmware: &Path,
    device: Option<&str>,
    no_verify: bool,
    no_erase: bool,
) -> Result<Report> {
    let mut config = session.flash_config.clone();
    if no_verify {
        config = config.with_verify(false);
    }
    if no_erase {
        config = config.with_erase(false);
    }
    let mut manager = session.manager(config)?;
    load(session, &mut manager, firmware)?;

    let len = manager.firmware_len();
    let mut report = with_device(session, &mut manager, device, |m, progress| {
        m.flash_firmware(progress)
    })?;
    report.message = format!("Flashed {len} bytes");

    if !session.quiet() {
        eprintln!("\n{} {}", style("🎉").green().bold(), report.message);
    }
    Ok(report)
}

/// Verify command implementation.
pub(crate) fn cmd_verify(
    session: &Session<'_>,
    firmware: &Path,
    device: Option<&str>,
) -> Result<Report> {
    let mut manager = session.manager(session.flash_config.clone())?;
    load(session, &mut manager, firmware)?;

    let len = manager.firmware_len();
    let mut report = with_device(session, &mut manager, device, |m, progress| {
        m.verify_firmware(progress)
    })?;
    report.message = format!("Verified {len} bytes");

    if !session.quiet() {
        eprintln!("{} {}", style("✓").green(), report.message);
    }
    Ok(report)
}

/// Erase command implementation.
pub(crate) fn cmd_erase(session: &Session<'_>, device: Option<&str>) -> Result<Report> {
    let mut manager = session.manager(session.flash_config.clone())?;

    let mut report = with_device(session, &mut manager, device, |m, progress| {
        m.erase_device(progress)
    })?;
    report.message = "Device erased".to_string();

    if !session.quiet() {
        eprintln!("{} {}", style("✓").green(), report.message);
    }
    Ok(report)
}
