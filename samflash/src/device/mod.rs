//! Device interfaces.
//!
//! A [`DeviceInterface`] owns the connection to one endpoint and exposes
//! page-level erase, write, read and verify. The set of implementations is
//! closed: [`GenericSerialBootloader`] for SAM-BA style bootloaders,
//! [`SamsungDownloader`] for Samsung download/Odin mode, and the in-memory
//! [`MemoryDevice`].
//!
//! ```text
//! connect(id) ──> open transport ──> handshake ──> Connected
//!                                        │
//!                                        └─ failure: transport closed,
//!                                           state unchanged
//! ```

pub mod generic;
pub mod memory;
pub mod samsung;

pub use generic::GenericSerialBootloader;
pub use memory::MemoryDevice;
pub use samsung::{SamsungDownloader, SessionState};

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::identify::ProtocolFamily;
use crate::port::PortProvider;
use crate::protocol::pit::PitTable;

/// Signature reported by Samsung endpoints.
pub const SAMSUNG_SIGNATURE: &str = "samsung";

/// Signature reported by generic bootloaders.
pub const GENERIC_SIGNATURE: &str = "generic";

/// How an endpoint is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceType {
    /// ROM or flash-resident bootloader on a serial/USB CDC link.
    #[default]
    SerialBootloader,
    /// SWD/JTAG probe.
    HardwareDebugProbe,
    /// Network-attached target.
    Network,
}

/// Snapshot of a discovered or connected device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Stable identifier; the port name for serial devices.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Vendor.
    pub manufacturer: String,
    /// Transport class.
    pub device_type: DeviceType,
    /// Port path or network address.
    pub port_or_address: String,
    /// Flash size in bytes, 0 when unknown.
    pub flash_size: u64,
    /// Page size in bytes.
    pub page_size: usize,
    /// Whether this snapshot was taken while connected.
    pub is_connected: bool,
}

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlashStatus {
    /// Nothing happening.
    #[default]
    Idle,
    /// Connect in progress.
    Connecting,
    /// Device connected.
    Connected,
    /// Erase or write in progress.
    Flashing,
    /// Verify in progress.
    Verifying,
    /// Last operation succeeded.
    Complete,
    /// Last operation failed.
    Error,
    /// Device disconnected.
    Disconnected,
}

impl FlashStatus {
    /// Whether a long-running operation holds the session.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Flashing | Self::Verifying)
    }
}

impl std::fmt::Display for FlashStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Flashing => "flashing",
            Self::Verifying => "verifying",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Progress event of a device or flash operation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashProgress {
    /// Bytes processed so far.
    pub bytes_written: usize,
    /// Bytes in the whole operation.
    pub total_bytes: usize,
    /// 0.0 ..= 100.0, non-decreasing within one operation.
    pub percentage: f64,
    /// Label of the current step.
    pub current_operation: String,
    /// Status at the time of the event.
    pub status: FlashStatus,
}

impl FlashProgress {
    /// Build an event; an empty operation counts as done.
    pub fn new(
        operation: impl Into<String>,
        bytes_written: usize,
        total_bytes: usize,
        status: FlashStatus,
    ) -> Self {
        Self {
            bytes_written,
            total_bytes,
            percentage: percentage(bytes_written, total_bytes),
            current_operation: operation.into(),
            status,
        }
    }
}

impl Default for FlashProgress {
    fn default() -> Self {
        Self::new("", 0, 0, FlashStatus::Idle)
    }
}

/// `done / total` as a percentage; 100 when `total` is zero.
pub fn percentage(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        (done.min(total) as f64 / total as f64) * 100.0
    }
}

/// Connection to one flashable endpoint.
///
/// Addresses are device addresses in bytes. All operations other than
/// discovery fail with [`Error::NotConnected`] while disconnected.
pub trait DeviceInterface: Send {
    /// Protocol family of this implementation.
    fn family(&self) -> ProtocolFamily;

    /// Endpoints this interface could connect to.
    fn discover_devices(&mut self) -> Result<Vec<DeviceInfo>>;

    /// Open the endpoint and perform the handshake.
    fn connect(&mut self, device_id: &str) -> Result<()>;

    /// Send the exit command best-effort and close the endpoint.
    fn disconnect(&mut self) -> Result<()>;

    /// Whether the handshake succeeded and the endpoint is open.
    fn is_connected(&self) -> bool;

    /// Current snapshot.
    fn device_info(&self) -> DeviceInfo;

    /// Signature used to pick a flash strategy.
    fn device_signature(&self) -> Result<String>;

    /// Erase the whole flash.
    fn erase_chip(&mut self, progress: &mut dyn FnMut(&FlashProgress)) -> Result<()>;

    /// Erase the page containing `address`.
    fn erase_page(&mut self, address: u32) -> Result<()>;

    /// Write at most one page at `address`.
    fn write_page(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Read `size` bytes at `address`.
    fn read_page(&mut self, address: u32, size: usize) -> Result<Vec<u8>>;

    /// Compare flash against `expected`, starting at `start_address`.
    ///
    /// Stops at the first differing byte with
    /// [`Error::VerificationMismatch`].
    fn verify_flash(
        &mut self,
        expected: &[u8],
        start_address: u32,
        progress: &mut dyn FnMut(&FlashProgress),
    ) -> Result<()>;

    /// Page size in bytes.
    fn page_size(&self) -> usize;

    /// Apply a per-call I/O timeout.
    fn set_io_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Partition table, fetched on first use in a session.
    fn partition_table(&mut self) -> Result<Option<&PitTable>> {
        Ok(None)
    }

    /// Close a write sequence.
    fn finish_write(&mut self) -> Result<()> {
        Ok(())
    }

    /// Message of the most recent failure.
    fn last_error(&self) -> Option<&str>;

    /// Forget the last failure.
    fn clear_error(&mut self);
}

impl ProtocolFamily {
    /// Build the device interface for this family.
    pub fn create_interface(self, provider: Arc<dyn PortProvider>) -> Box<dyn DeviceInterface> {
        match self {
            Self::Generic => Box::new(GenericSerialBootloader::new(provider)),
            Self::Samsung => Box::new(SamsungDownloader::new(provider)),
        }
    }
}

/// Read `expected.len()` bytes page by page and compare.
///
/// Emits one "Verifying" event per page; a mismatch reports the absolute
/// address of the first differing byte.
pub fn verify_pages(
    device: &mut dyn DeviceInterface,
    expected: &[u8],
    start_address: u32,
    progress: &mut dyn FnMut(&FlashProgress),
) -> Result<()> {
    let page_size = device.page_size().max(1);
    let total = expected.len();
    progress(&FlashProgress::new("Verifying", 0, total, FlashStatus::Verifying));

    let mut offset = 0;
    for chunk in expected.chunks(page_size) {
        let address = page_address(start_address, offset)?;
        let actual = device.read_page(address, chunk.len())?;
        if let Some(i) = first_difference(chunk, &actual) {
            return Err(Error::VerificationMismatch {
                address: u64::from(start_address) + (offset + i) as u64,
                expected: chunk[i],
                actual: actual.get(i).copied().unwrap_or(0xFF),
            });
        }
        offset += chunk.len();
        progress(&FlashProgress::new(
            "Verifying",
            offset,
            total,
            FlashStatus::Verifying,
        ));
    }
    Ok(())
}

/// Index of the first byte where `actual` differs from (or is shorter than)
/// `expected`.
pub fn first_difference(expected: &[u8], actual: &[u8]) -> Option<usize> {
    expected
        .iter()
        .enumerate()
        .find(|&(i, b)| actual.get(i) != Some(b))
        .map(|(i, _)| i)
}

/// `base + offset` as a 32-bit device address.
pub fn page_address(base: u32, offset: usize) -> Result<u32> {
    u32::try_from(offset)
        .ok()
        .and_then(|o| base.checked_add(o))
        .ok_or_else(|| {
            Error::InvalidFirmware(format!(
                "address 0x{base:08X} + {offset} exceeds the 32-bit address space"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimProvider;

    fn connected_memory() -> MemoryDevice {
        let mut device = MemoryDevice::generic("mem0", 4096);
        device.connect("mem0").unwrap();
        device
    }

    #[test]
    fn test_progress_percentage() {
        let p = FlashProgress::new("Writing", 256, 1024, FlashStatus::Flashing);
        assert!((p.percentage - 25.0).abs() < f64::EPSILON);
        assert!((percentage(0, 0) - 100.0).abs() < f64::EPSILON);
        assert!((percentage(2048, 1024) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_status_busy() {
        assert!(FlashStatus::Flashing.is_busy());
        assert!(FlashStatus::Verifying.is_busy());
        assert!(!FlashStatus::Connected.is_busy());
        assert_eq!(FlashStatus::Complete.to_string(), "complete");
    }

    #[test]
    fn test_factory_builds_each_family() {
        let provider = SimProvider::new().into_shared();
        for family in [ProtocolFamily::Generic, ProtocolFamily::Samsung] {
            let device = family.create_interface(provider.clone());
            assert_eq!(device.family(), family);
            assert!(!device.is_connected());
            assert!(matches!(
                device.device_signature(),
                Err(Error::NotConnected)
            ));
        }
    }

    #[test]
    fn test_verify_pages_reports_absolute_address() {
        let mut device = connected_memory();
        let image: Vec<u8> = (0..600u32).map(|i| (i % 256) as u8).collect();
        for (i, chunk) in image.chunks(256).enumerate() {
            device.write_page(0x100 + (i * 256) as u32, chunk).unwrap();
        }
        device.corrupt(0x100 + 300, 0x00);

        let mut events = Vec::new();
        let err = verify_pages(&mut device, &image, 0x100, &mut |p| events.push(p.bytes_written))
            .unwrap_err();
        match err {
            Error::VerificationMismatch {
                address,
                expected,
                actual,
            } => {
                assert_eq!(address, 0x100 + 300);
                assert_eq!(expected, image[300]);
                assert_eq!(actual, 0x00);
            },
            other => panic!("unexpected error: {other}"),
        }
        // Start event plus the first page
        assert_eq!(events, vec![0, 256]);
    }

    #[test]
    fn test_verify_pages_success() {
        let mut device = connected_memory();
        device.write_page(0, &[1, 2, 3]).unwrap();
        let mut last = None;
        verify_pages(&mut device, &[1, 2, 3], 0, &mut |p| last = Some(p.clone())).unwrap();
        assert!((last.unwrap().percentage - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_first_difference() {
        assert_eq!(first_difference(b"abc", b"abc"), None);
        assert_eq!(first_difference(b"abc", b"abd"), Some(2));
        assert_eq!(first_difference(b"abc", b"a"), Some(1));
    }

    #[test]
    fn test_page_address_overflow() {
        assert_eq!(page_address(0x1000, 0x10).unwrap(), 0x1010);
        assert!(page_address(u32::MAX, 1).is_err());
    }
}
