//! Flash strategies.
//!
//! A [`FlashStrategy`] turns a firmware image into page operations on a
//! [`DeviceInterface`] and reports partition-aware progress. Both strategies
//! share the same engine (chunking, bounded per-chunk retry, event flow);
//! they differ in chunk size and in where partitions come from.
//!
//! Every operation emits a start event at 0%, one event per chunk boundary
//! and a terminal event whose status is [`FlashStatus::Complete`] or
//! [`FlashStatus::Error`].

pub mod generic;
pub mod samsung;

pub use generic::GenericStrategy;
pub use samsung::SamsungStrategy;

use std::time::Duration;

use log::{debug, info, warn};

use crate::device::{DeviceInfo, DeviceInterface, FlashProgress, FlashStatus, page_address, percentage};
use crate::error::{Error, Result};

/// Chunk size of the generic strategy.
pub const GENERIC_CHUNK_SIZE: usize = 256;

/// Chunk size of the Samsung strategy.
pub const SAMSUNG_CHUNK_SIZE: usize = 1024;

/// Options for one flashing session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FlashConfig {
    /// Read the image back after writing.
    pub verify_after_write: bool,
    /// Erase the chip before writing.
    pub erase_before_write: bool,
    /// Attempts per chunk; 0 behaves like 1.
    pub retry_count: u32,
    /// Per-call I/O timeout in milliseconds.
    pub timeout_ms: u64,
    /// Forward progress events to the caller.
    pub enable_progress_reporting: bool,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            verify_after_write: true,
            erase_before_write: true,
            retry_count: 3,
            timeout_ms: 5000,
            enable_progress_reporting: true,
        }
    }
}

impl FlashConfig {
    /// Set the per-chunk attempt count.
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the I/O timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Enable or disable verification.
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify_after_write = verify;
        self
    }

    /// Enable or disable the chip erase before writing.
    #[must_use]
    pub fn with_erase(mut self, erase: bool) -> Self {
        self.erase_before_write = erase;
        self
    }

    /// I/O timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Attempts per chunk, at least one.
    pub fn attempts(&self) -> u32 {
        self.retry_count.max(1)
    }
}

/// Progress of one partition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartitionProgress {
    /// Partition name.
    pub partition_name: String,
    /// PIT identifier, 0 for synthetic partitions.
    pub partition_id: u32,
    /// Bytes of this partition processed.
    pub bytes_written: usize,
    /// Bytes of the image inside this partition.
    pub partition_size: usize,
    /// 0.0 ..= 100.0
    pub partition_percentage: f64,
    /// Label of the current step.
    pub current_operation: String,
    /// Status of this partition.
    pub status: FlashStatus,
}

/// Strategy progress event with a per-partition breakdown.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnhancedFlashProgress {
    /// Bytes processed so far.
    pub bytes_written: usize,
    /// Bytes in the whole operation.
    pub total_bytes: usize,
    /// 0.0 ..= 100.0
    pub percentage: f64,
    /// Label of the current step.
    pub current_operation: String,
    /// Status at the time of the event.
    pub status: FlashStatus,
    /// Every partition touched by the operation, in device order.
    pub partitions: Vec<PartitionProgress>,
    /// Partition being processed.
    pub current_partition: String,
    /// Number of partitions.
    pub total_partitions: usize,
    /// Partitions fully processed.
    pub completed_partitions: usize,
}

impl EnhancedFlashProgress {
    /// Drop the partition breakdown.
    pub fn to_flash_progress(&self) -> FlashProgress {
        FlashProgress {
            bytes_written: self.bytes_written,
            total_bytes: self.total_bytes,
            percentage: self.percentage,
            current_operation: self.current_operation.clone(),
            status: self.status,
        }
    }
}

/// Part of the image that falls in one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpan {
    /// Partition name.
    pub name: String,
    /// PIT identifier, 0 for synthetic partitions.
    pub identifier: u32,
    /// Offset into the image.
    pub offset: usize,
    /// Bytes of the image in the partition.
    pub size: usize,
}

impl PartitionSpan {
    /// One span covering the whole image.
    pub fn whole(name: &str, len: usize) -> Self {
        Self {
            name: name.to_string(),
            identifier: 0,
            offset: 0,
            size: len,
        }
    }
}

/// Builds progress events for one operation.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    operation: &'static str,
    total: usize,
    spans: Vec<PartitionSpan>,
}

impl ProgressTracker {
    pub(crate) fn new(operation: &'static str, total: usize, spans: Vec<PartitionSpan>) -> Self {
        Self {
            operation,
            total,
            spans,
        }
    }

    pub(crate) fn event(&self, done: usize, status: FlashStatus) -> EnhancedFlashProgress {
        let done = done.min(self.total);
        let partitions: Vec<PartitionProgress> = self
            .spans
            .iter()
            .map(|span| {
                let written = done.saturating_sub(span.offset).min(span.size);
                let partition_status = if written == span.size {
                    FlashStatus::Complete
                } else if status == FlashStatus::Error && written > 0 {
                    FlashStatus::Error
                } else if written > 0 {
                    status
                } else {
                    FlashStatus::Idle
                };
                PartitionProgress {
                    partition_name: span.name.clone(),
                    partition_id: span.identifier,
                    bytes_written: written,
                    partition_size: span.size,
                    partition_percentage: percentage(written, span.size),
                    current_operation: self.operation.to_string(),
                    status: partition_status,
                }
            })
            .collect();

        let completed_partitions = partitions
            .iter()
            .filter(|p| p.bytes_written == p.partition_size)
            .count();
        let current_partition = partitions
            .iter()
            .find(|p| p.bytes_written < p.partition_size)
            .or(partitions.last())
            .map(|p| p.partition_name.clone())
            .unwrap_or_default();

        EnhancedFlashProgress {
            bytes_written: done,
            total_bytes: self.total,
            percentage: percentage(done, self.total),
            current_operation: self.operation.to_string(),
            status,
            total_partitions: partitions.len(),
            completed_partitions,
            current_partition,
            partitions,
        }
    }
}

/// Orchestrates erase, write and verify for one protocol family.
pub trait FlashStrategy: Send {
    /// Strategy name.
    fn name(&self) -> &'static str;

    /// Device signatures this strategy handles.
    fn supported_signatures(&self) -> &'static [&'static str];

    /// Whether this strategy can drive `device`.
    fn is_compatible_with_device(&self, device: &DeviceInfo) -> bool;

    /// Bind `config` and apply its timeout to `device`.
    fn initialize(&mut self, device: &mut dyn DeviceInterface, config: FlashConfig) -> Result<()>;

    /// Release the configuration.
    fn cleanup(&mut self);

    /// Erase the whole device.
    fn erase_device(
        &mut self,
        device: &mut dyn DeviceInterface,
        progress: &mut dyn FnMut(&EnhancedFlashProgress),
    ) -> Result<()>;

    /// Write `firmware` at `start_address` chunk by chunk.
    fn write_firmware(
        &mut self,
        device: &mut dyn DeviceInterface,
        firmware: &[u8],
        start_address: u32,
        progress: &mut dyn FnMut(&EnhancedFlashProgress),
    ) -> Result<()>;

    /// Compare device flash at `start_address` with `firmware`.
    fn verify_firmware(
        &mut self,
        device: &mut dyn DeviceInterface,
        firmware: &[u8],
        start_address: u32,
        progress: &mut dyn FnMut(&EnhancedFlashProgress),
    ) -> Result<()>;

    /// Message of the most recent failure.
    fn last_error(&self) -> Option<&str>;

    /// Forget the last failure.
    fn clear_error(&mut self);
}

/// Whether `device` belongs to the Samsung strategy.
pub fn is_samsung_device(device: &DeviceInfo) -> bool {
    device.manufacturer == "Samsung"
}

/// Pick the strategy for a device, Samsung first.
pub fn select_strategy(device: &DeviceInfo) -> Box<dyn FlashStrategy> {
    let samsung = SamsungStrategy::new();
    if samsung.is_compatible_with_device(device) {
        info!("Selected {} strategy for {}", samsung.name(), device.id);
        return Box::new(samsung);
    }
    let generic = GenericStrategy::new();
    info!("Selected {} strategy for {}", generic.name(), device.id);
    Box::new(generic)
}

/// State and operations shared by every strategy.
#[derive(Debug, Default)]
pub(crate) struct Engine {
    config: Option<FlashConfig>,
    last_error: Option<String>,
}

impl Engine {
    pub(crate) fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    pub(crate) fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub(crate) fn cleanup(&mut self) {
        self.config = None;
    }

    fn config(&self) -> Result<&FlashConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| Error::Config("flash strategy is not initialized".to_string()))
    }

    pub(crate) fn initialize(
        &mut self,
        device: &mut dyn DeviceInterface,
        config: FlashConfig,
    ) -> Result<()> {
        let result = if device.is_connected() {
            device.set_io_timeout(config.timeout()).map(|()| {
                debug!(
                    "Strategy initialized: retry {}, timeout {} ms",
                    config.retry_count, config.timeout_ms
                );
                self.config = Some(config);
            })
        } else {
            Err(Error::NotConnected)
        };
        self.record(result)
    }

    /// Run `op`, emitting the start and terminal events around it.
    fn run(
        &mut self,
        tracker: &ProgressTracker,
        working: FlashStatus,
        progress: &mut dyn FnMut(&EnhancedFlashProgress),
        op: impl FnOnce(&mut dyn FnMut(usize)) -> Result<()>,
    ) -> Result<()> {
        progress(&tracker.event(0, working));
        let mut done = 0;
        let result = op(&mut |bytes| {
            done = bytes;
            progress(&tracker.event(bytes, working));
        });
        match &result {
            Ok(()) => progress(&tracker.event(tracker.total, FlashStatus::Complete)),
            Err(_) => progress(&tracker.event(done, FlashStatus::Error)),
        }
        self.record(result)
    }

    pub(crate) fn erase(
        &mut self,
        device: &mut dyn DeviceInterface,
        progress: &mut dyn FnMut(&EnhancedFlashProgress),
    ) -> Result<()> {
        let config = self.config();
        self.record(config.map(|_| ()))?;
        let total = usize::try_from(device.device_info().flash_size).unwrap_or(usize::MAX);
        let tracker = ProgressTracker::new("Erasing", total, vec![PartitionSpan::whole("flash", total)]);

        info!("Erasing device");
        self.run(&tracker, FlashStatus::Flashing, progress, |report| {
            device.erase_chip(&mut |p: &FlashProgress| {
                if p.bytes_written > 0 {
                    report(p.bytes_written);
                }
            })
        })
    }

    pub(crate) fn write(
        &mut self,
        device: &mut dyn DeviceInterface,
        firmware: &[u8],
        start_address: u32,
        chunk_size: usize,
        spans: Vec<PartitionSpan>,
        progress: &mut dyn FnMut(&EnhancedFlashProgress),
    ) -> Result<()> {
        let attempts = self.config().map(FlashConfig::attempts);
        let attempts = self.record(attempts)?;
        let tracker = ProgressTracker::new("Writing", firmware.len(), spans);

        info!(
            "Writing {} bytes at 0x{start_address:08X} in {chunk_size}-byte chunks",
            firmware.len()
        );
        self.run(&tracker, FlashStatus::Flashing, progress, |report| {
            for (index, chunk) in firmware.chunks(chunk_size).enumerate() {
                let offset = index * chunk_size;
                let address = page_address(start_address, offset)?;
                write_chunk(device, address, offset, chunk, attempts)?;
                report(offset + chunk.len());
            }
            device.finish_write()
        })
    }

    pub(crate) fn verify(
        &mut self,
        device: &mut dyn DeviceInterface,
        firmware: &[u8],
        start_address: u32,
        spans: Vec<PartitionSpan>,
        progress: &mut dyn FnMut(&EnhancedFlashProgress),
    ) -> Result<()> {
        let config = self.config();
        self.record(config.map(|_| ()))?;
        let tracker = ProgressTracker::new("Verifying", firmware.len(), spans);

        info!("Verifying {} bytes at 0x{start_address:08X}", firmware.len());
        self.run(&tracker, FlashStatus::Verifying, progress, |report| {
            device.verify_flash(firmware, start_address, &mut |p: &FlashProgress| {
                if p.bytes_written > 0 {
                    report(p.bytes_written);
                }
            })
        })
    }
}

/// Write one chunk, retrying at the same address.
fn write_chunk(
    device: &mut dyn DeviceInterface,
    address: u32,
    offset: usize,
    chunk: &[u8],
    attempts: u32,
) -> Result<()> {
    let mut last = None;
    for attempt in 1..=attempts {
        match device.write_page(address, chunk) {
            Ok(()) => {
                if attempt > 1 {
                    info!("Chunk at offset {offset} written on attempt {attempt}");
                }
                return Ok(());
            },
            Err(e) => {
                warn!("Chunk at offset {offset} failed (attempt {attempt}/{attempts}): {e}");
                last = Some(e);
            },
        }
    }
    Err(Error::ChunkWriteFailed {
        offset,
        reason: last.map_or_else(|| "no attempt made".to_string(), |e| e.to_string()),
    })
}
