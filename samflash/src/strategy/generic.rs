//! Strategy for generic serial bootloaders.

use crate::device::{DeviceInfo, DeviceInterface, GENERIC_SIGNATURE};
use crate::error::Result;
use crate::strategy::{
    EnhancedFlashProgress, Engine, FlashConfig, FlashStrategy, GENERIC_CHUNK_SIZE, PartitionSpan,
    is_samsung_device,
};

/// Flat image written in 256-byte chunks as a single "main" partition.
#[derive(Debug, Default)]
pub struct GenericStrategy {
    engine: Engine,
}

impl GenericStrategy {
    /// Create an uninitialized strategy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlashStrategy for GenericStrategy {
    fn name(&self) -> &'static str {
        "Generic"
    }

    fn supported_signatures(&self) -> &'static [&'static str] {
        &[GENERIC_SIGNATURE]
    }

    fn is_compatible_with_device(&self, device: &DeviceInfo) -> bool {
        !is_samsung_device(device)
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
        let spans = vec![PartitionSpan::whole("main", firmware.len())];
        self.engine.write(
            device,
            firmware,
            start_address,
            GENERIC_CHUNK_SIZE,
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
        let spans = vec![PartitionSpan::whole("main", firmware.len())];
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
