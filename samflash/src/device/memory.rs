//! In-memory device.
//!
//! Behaves like a connected bootloader backed by a byte buffer: writes
//! persist, erased bytes read back as `0xFF`. Useful for dry runs and for
//! exercising strategies without hardware.

use std::collections::HashMap;
use std::time::Duration;

use log::debug;

use crate::device::{
    DeviceInfo, DeviceInterface, DeviceType, FlashProgress, FlashStatus, GENERIC_SIGNATURE,
    SAMSUNG_SIGNATURE, verify_pages,
};
use crate::error::{Error, Result};
use crate::identify::ProtocolFamily;
use crate::protocol::pit::PitTable;

/// Value of an erased byte.
pub const ERASED: u8 = 0xFF;

/// Byte-buffer backed [`DeviceInterface`].
#[derive(Debug)]
pub struct MemoryDevice {
    info: DeviceInfo,
    family: ProtocolFamily,
    flash: Vec<u8>,
    connected: bool,
    pit: Option<PitTable>,
    session_pit: Option<PitTable>,
    pit_requests: usize,
    write_failures: HashMap<u32, usize>,
    writes: Vec<(u32, usize)>,
    finished_writes: usize,
    io_timeout: Option<Duration>,
    last_error: Option<String>,
}

impl MemoryDevice {
    /// Create a device of `flash_size` bytes with the given page size.
    pub fn new(id: &str, family: ProtocolFamily, flash_size: usize, page_size: usize) -> Self {
        let manufacturer = match family {
            ProtocolFamily::Samsung => "Samsung",
            ProtocolFamily::Generic => "Generic",
        };
        Self {
            info: DeviceInfo {
                id: id.to_string(),
                name: format!("In-memory {family} device"),
                manufacturer: manufacturer.to_string(),
                device_type: DeviceType::SerialBootloader,
                port_or_address: id.to_string(),
                flash_size: flash_size as u64,
                page_size,
                is_connected: false,
            },
            family,
            flash: vec![ERASED; flash_size],
            connected: false,
            pit: None,
            session_pit: None,
            pit_requests: 0,
            write_failures: HashMap::new(),
            writes: Vec::new(),
            finished_writes: 0,
            io_timeout: None,
            last_error: None,
        }
    }

    /// A generic bootloader with 256-byte pages.
    pub fn generic(id: &str, flash_size: usize) -> Self {
        Self::new(id, ProtocolFamily::Generic, flash_size, 256)
    }

    /// A Samsung device with 1024-byte pages.
    pub fn samsung(id: &str, flash_size: usize) -> Self {
        Self::new(id, ProtocolFamily::Samsung, flash_size, 1024)
    }

    /// Partition table served by [`DeviceInterface::partition_table`].
    #[must_use]
    pub fn with_pit(mut self, pit: PitTable) -> Self {
        self.pit = Some(pit);
        self
    }

    /// Make the next `times` writes at `address` fail.
    pub fn fail_writes_at(&mut self, address: u32, times: usize) {
        self.write_failures.insert(address, times);
    }

    /// Overwrite one byte behind the interface's back.
    pub fn corrupt(&mut self, address: usize, value: u8) {
        if let Some(byte) = self.flash.get_mut(address) {
            *byte = value;
        }
    }

    /// Flash contents.
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// `(address, len)` of every successful page write.
    pub fn writes(&self) -> &[(u32, usize)] {
        &self.writes
    }

    /// Number of partition table fetches.
    pub fn pit_requests(&self) -> usize {
        self.pit_requests
    }

    /// Number of completed write sequences.
    pub fn finished_writes(&self) -> usize {
        self.finished_writes
    }

    /// Timeout applied through [`DeviceInterface::set_io_timeout`].
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    fn range(&self, address: u32, len: usize) -> Result<std::ops::Range<usize>> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let start = address as usize;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.flash.len())
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "range 0x{address:08X}+{len} outside {} bytes of flash",
                    self.flash.len()
                ))
            })?;
        Ok(start..end)
    }

    fn write_inner(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let range = self.range(address, data.len())?;
        if data.len() > self.info.page_size {
            return Err(Error::InvalidFirmware(format!(
                "Page size exceeds maximum ({} bytes)",
                self.info.page_size
            )));
        }
        if let Some(remaining) = self.write_failures.get_mut(&address) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Protocol(format!(
                    "simulated write failure at 0x{address:08X}"
                )));
            }
        }
        self.flash[range].copy_from_slice(data);
        self.writes.push((address, data.len()));
        Ok(())
    }
}

impl DeviceInterface for MemoryDevice {
    fn family(&self) -> ProtocolFamily {
        self.family
    }

    fn discover_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![self.device_info()])
    }

    fn connect(&mut self, device_id: &str) -> Result<()> {
        if device_id != self.info.id {
            return self.record(Err(Error::PortNotFound(device_id.to_string())));
        }
        self.connected = true;
        self.info.is_connected = true;
        self.session_pit = None;
        debug!("Memory device {device_id} connected");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        self.info.is_connected = false;
        self.session_pit = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn device_signature(&self) -> Result<String> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        Ok(match self.family {
            ProtocolFamily::Samsung => SAMSUNG_SIGNATURE,
            ProtocolFamily::Generic => GENERIC_SIGNATURE,
        }
        .to_string())
    }

    fn erase_chip(&mut self, progress: &mut dyn FnMut(&FlashProgress)) -> Result<()> {
        if !self.connected {
            return self.record(Err(Error::NotConnected));
        }
        let total = self.flash.len();
        progress(&FlashProgress::new("Erasing", 0, total, FlashStatus::Flashing));
        self.flash.fill(ERASED);
        progress(&FlashProgress::new("Erasing", total, total, FlashStatus::Flashing));
        Ok(())
    }

    fn erase_page(&mut self, address: u32) -> Result<()> {
        let page = self.info.page_size as u32;
        let start = address - address % page;
        let len = (self.flash.len().saturating_sub(start as usize)).min(page as usize);
        let result = self.range(start, len).map(|range| self.flash[range].fill(ERASED));
        self.record(result)
    }

    fn write_page(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let result = self.write_inner(address, data);
        self.record(result)
    }

    fn read_page(&mut self, address: u32, size: usize) -> Result<Vec<u8>> {
        let result = self
            .range(address, size)
            .map(|range| self.flash[range].to_vec());
        self.record(result)
    }

    fn verify_flash(
        &mut self,
        expected: &[u8],
        start_address: u32,
        progress: &mut dyn FnMut(&FlashProgress),
    ) -> Result<()> {
        let result = verify_pages(self, expected, start_address, progress);
        self.record(result)
    }

    fn page_size(&self) -> usize {
        self.info.page_size
    }

    fn set_io_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.io_timeout = Some(timeout);
        Ok(())
    }

    fn partition_table(&mut self) -> Result<Option<&PitTable>> {
        if !self.connected {
            self.last_error = Some(Error::NotConnected.to_string());
            return Err(Error::NotConnected);
        }
        if self.session_pit.is_none() {
            if let Some(pit) = &self.pit {
                self.pit_requests += 1;
                self.session_pit = Some(pit.clone());
            }
        }
        Ok(self.session_pit.as_ref())
    }

    fn finish_write(&mut self) -> Result<()> {
        if !self.connected {
            return self.record(Err(Error::NotConnected));
        }
        self.finished_writes += 1;
        Ok(())
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn clear_error(&mut self) {
        self.last_error = None;
    }
}
