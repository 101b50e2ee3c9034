//! Configuration file support for samflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SAMFLASH_*)
//! 3. Local config file (./samflash.toml)
//! 4. Global config file (~/.config/samflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use samflash::FlashConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the local config file.
pub const LOCAL_CONFIG: &str = "samflash.toml";

/// Flash settings. Unset fields fall back to the library defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlashSection {
    /// Read back and compare after writing.
    pub verify_after_write: Option<bool>,
    /// Erase the chip before writing.
    pub erase_before_write: Option<bool>,
    /// Attempts per chunk.
    pub retry_count: Option<u32>,
    /// Per-call I/O timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Emit progress events.
    pub enable_progress_reporting: Option<bool>,
}

/// Device selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSection {
    /// Device used when `--device` is not given.
    pub default: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Flash settings.
    #[serde(default)]
    pub flash: FlashSection,
    /// Device settings.
    #[serde(default)]
    pub device: DeviceSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "samflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Set fields in `other` win.
    fn merge(&mut self, other: Self) {
        let flash = other.flash;
        if flash.verify_after_write.is_some() {
            self.flash.verify_after_write = flash.verify_after_write;
        }
        if flash.erase_before_write.is_some() {
            self.flash.erase_before_write = flash.erase_before_write;
        }
        if flash.retry_count.is_some() {
            self.flash.retry_count = flash.retry_count;
        }
        if flash.timeout_ms.is_some() {
            self.flash.timeout_ms = flash.timeout_ms;
        }
        if flash.enable_progress_reporting.is_some() {
            self.flash.enable_progress_reporting = flash.enable_progress_reporting;
        }

        if other.device.default.is_some() {
            self.device.default = other.device.default;
        }
    }

    /// Build the library config, applying command-line overrides.
    pub fn flash_config(&self, retry_count: Option<u32>, timeout_ms: Option<u64>) -> FlashConfig {
        let defaults = FlashConfig::default();
        let flash = &self.flash;
        FlashConfig {
            verify_after_write: flash
                .verify_after_write
                .unwrap_or(defaults.verify_after_write),
            erase_before_write: flash
                .erase_before_write
                .unwrap_or(defaults.erase_before_write),
            retry_count: retry_count
                .or(flash.retry_count)
                .unwrap_or(defaults.retry_count),
            timeout_ms: timeout_ms
                .or(flash.timeout_ms)
                .unwrap_or(defaults.timeout_ms),
            enable_progress_reporting: flash
                .enable_progress_reporting
                .unwrap_or(defaults.enable_progress_reporting),
        }
    }

    /// Device to use when none was given on the command line.
    pub fn default_device(&self) -> Option<&str> {
        self.device.default.as_deref()
    }
}
