//! Strategy for Samsung download-mode devices.
//!
//! Progress is broken down by the partitions of the device PIT that the
//! image overlaps. The PIT is fetched through the device, which caches it
//! for the session.

use log::debug;

use crate::device::{DeviceInfo, DeviceInterface, SAMSUNG_SIGNATURE};
use crate::error::Result;
use crate::protocol::pit::PitTable;
use crate::strategy::{
    EnhancedFlashProgress, Engine, FlashConfig, FlashStrategy, PartitionSpan, SAMSUNG_CHUNK_SIZE,
    is_samsung_device,
};

/// Name of the synthetic partition used when the PIT says nothing useful.
pub const FALLBACK_PARTITION: &str = "Samsung main";

/// Writes 1024-byte chunks with PIT-aware progress.
#[derive(Debug, Default)]
pub struct SamsungStrategy {
    engine: Engine,
}

impl SamsungStrategy {
    /// Create an uninitialized strategy.
    pub fn new() -> Self {
        Self::default()
    }

    fn spans(
        &mut self,
        device: &mut dyn DeviceInterface,
        start_address: u32,
        len: usize,
    ) -> Result<Vec<PartitionSpan>> {
        let table = device.partition_table();
        let spans = self
            .engine
            .record(table)?
            .map(|pit| partition_spans(pit, start_address, len))
            .unwrap_or_default();
        if spans.is_empty() {
            debug!("No partition overlaps the image, using \"{FALLBACK_PARTITION}\"");
            Ok(vec![PartitionSpan::whole(FALLBACK_PARTITION, len)])
        } else {
            Ok(spans)
        }
    }
}

/// Intersect the PIT partitions with `[start_address, start_address + len)`.
///
/// Offsets in the result are relative to the image.
pub fn partition_spans(pit: &PitTable, start_address: u32, len: usize) -> Vec<PartitionSpan> {
    let image_start = u64::from(start_address);
    let image_end = image_start + len as u64;

    let mut mappings = pit.map_partitions();
    mappings.sort_by_key(|m| m.start);

    mappings
        .into_iter()
        .filter_map(|m| {
            let start = m.start.max(image_start);
            let end = (m.start + m.size).min(image_end);
            (start < end).then(|| PartitionSpan {
                name: m.name,
                identifier: m.identifier,
                offset: usize::try_from(start - image_start).unwrap_or(usize::MAX),
                size: usize::try_from(end - start).unwrap_or(usize::MAX),
            })
        })
        .collect()
}

impl FlashStrategy for SamsungStrategy {
    fn name(&self) -> &'static str {
        "Samsung"
    }

    fn supported_signatures(&self) -> &'static [&'static str] {
        &[SAMSUNG_SIGNATURE]
    }

    fn is_compatible_with_device(&self, device: &DeviceInfo) -> bool {
        is_samsung_device(device)
    }

    fn initialize(&mut self, device: &mut dyn DeviceInterface, config: FlashConfig) -> Result<()> {
        self.engine.initialize(device, config)
    }

    fn cleanup(&mut self) {
        self.engine.cleanup();
    }

    fn erase_device(
        &mut self,
        device: &mut dyn DeviceInterface,
        progress: &mut dyn FnMut(&EnhancedFlashProgress),
    ) -> Result<()> {
        self.engine.erase(device, progress)
    }

    fn write_firmware(
        &mut self,
        device: &mut dyn DeviceInterface,
        firmware: &[u8],
        start_address: u32,
        progress: &mut dyn FnMut(&EnhancedFlashProgress),
    ) -> Result<()> {
        let spans = self.spans(device, start_address, firmware.len())?;
        self.engine.write(
            device,
            firmware,
            start_address,
            SAMSUNG_CHUNK_SIZE,
            spans,
            progress,
        )
    }

    fn verify_firmware(
        &mut self,
        device: &mut dyn DeviceInterface,
        firmware: &[u8],
        start_address: u32,
        progress: &mut dyn FnMut(&EnhancedFlashProgress),
    ) -> Result<()> {
        let spans = self.spans(device, start_address, firmware.len())?;
        self.engine
            .verify(device, firmware, start_address, spans, progress)
    }

    fn last_error(&self) -> Option<&str> {
        self.engine.last_error()
    }

    fn clear_error(&mut self) {
        self.engine.clear_error();
    }
}
