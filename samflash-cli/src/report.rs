//! Machine-readable command reports (`--json`).

use std::time::{SystemTime, UNIX_EPOCH};

use samflash::{DeviceInfo, FlashProgress};
use serde::Serialize;

/// Outcome of one command.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct Report {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
    pub data: Option<serde_json::Value>,
    pub devices: Vec<DeviceInfo>,
    pub progress: Option<FlashProgress>,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl Report {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            data: None,
            devices: Vec::new(),
            progress: None,
            timestamp: now(),
        }
    }

    pub fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::success(message)
        }
    }

    pub fn from_error(err: &anyhow::Error) -> Self {
        Self::failure("Command failed", format!("{err:#}"))
    }

    pub fn with_devices(mut self, devices: Vec<DeviceInfo>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_progress(mut self, progress: FlashProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn to_json(&self) -> String {
        #[allow(clippy::unwrap_used)] // Plain data with string keys cannot fail
        serde_json::to_string_pretty(self).unwrap()
    }

    /// Print to stdout.
    pub fn print(&self) {
        println!("{}", self.to_json());
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
