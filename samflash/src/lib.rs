//! # samflash
//!
//! A library for flashing firmware onto microcontrollers and Samsung SoCs
//! over serial/USB links.
//!
//! This crate provides:
//!
//! - Serial transport with per-call timeouts, bulk transfer and ETA reporting
//! - Device identification by USB VID/PID and protocol probing
//! - SAM-BA style generic bootloader support
//! - Samsung download (Odin) mode support with PIT parsing
//! - Chunked write with bounded retry, read-back verification and
//!   partition-aware progress
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use samflash::FlashManager;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let mut manager = FlashManager::native();
//!         let devices = manager.scan_devices()?;
//!         let Some(device) = devices.first() else {
//!             return Ok(());
//!         };
//!
//!         manager.connect_device(&device.id)?;
//!         manager.load_firmware_file("firmware.bin")?;
//!         manager.flash_firmware(&mut |p| {
//!             println!("{}: {:.1}%", p.current_operation, p.percentage);
//!         })?;
//!         manager.disconnect_device()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod identify;
pub mod manager;
pub mod port;
pub mod protocol;
pub mod strategy;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortProvider};
pub use {
    device::{
        DeviceInfo, DeviceInterface, DeviceType, FlashProgress, FlashStatus,
        GenericSerialBootloader, MemoryDevice, SamsungDownloader,
    },
    error::{Error, Result},
    identify::{DeviceIdentifier, ProtocolFamily, SamsungDeviceDetector, SocInfo},
    manager::{FlashManager, StatusHandle},
    port::{Port, PortInfo, PortProvider, SerialConfig},
    protocol::pit::{PitEntry, PitTable},
    strategy::{
        EnhancedFlashProgress, FlashConfig, FlashStrategy, GenericStrategy, PartitionProgress,
        SamsungStrategy, select_strategy,
    },
    transport::{SerialTransport, TransferProgress},
};
