//! Device scan command.

use anyhow::Result;
use console::style;
use samflash::DeviceInfo;

use crate::commands::Session;
use crate::report::Report;

fn describe(device: &DeviceInfo) -> String {
    let mut line = format!("{} - {} ({})", device.id, device.name, device.manufacturer);
    if device.flash_size > 0 {
        line.push_str(&format!(", {} KiB flash", device.flash_size / 1024));
    }
    line
}

/// Scan command implementation.
pub(crate) fn cmd_scan(session: &Session<'_>) -> Result<Report> {
    let mut manager = session.manager(session.flash_config.clone())?;
    let devices = manager.scan_devices()?;

    if !session.quiet() {
        if devices.is_empty() {
            eprintln!("{} No devices found", style("⚠").yellow());
        } else {
            eprintln!("{} Found {} device(s):", style("✓").green(), devices.len());
            for device in &devices {
                eprintln!("    {} {}", style("•").dim(), describe(device));
            }
        }
    }

    Ok(Report::success(format!("Found {} device(s)", devices.len())).with_devices(devices))
}
