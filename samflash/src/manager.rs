//! Flash manager.
//!
//! [`FlashManager`] is the single entry point for front ends. It owns the
//! device interface, the selected strategy and the firmware buffer, and
//! publishes status, configuration, last error and the latest progress
//! through shared state that a [`StatusHandle`] can read from another
//! thread.
//!
//! ```text
//! Idle ─> Connecting ─> Connected ─> Flashing/Verifying ─> Complete | Error
//!                                                                │
//!                                         disconnect_device() ─> Disconnected
//! ```

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::device::{
    DeviceInfo, DeviceInterface, FlashProgress, FlashStatus, SAMSUNG_SIGNATURE, page_address,
};
use crate::error::{Error, Result};
use crate::identify::ProtocolFamily;
use crate::port::PortProvider;
use crate::strategy::{EnhancedFlashProgress, FlashConfig, FlashStrategy, select_strategy};

#[derive(Debug, Default)]
struct Shared {
    status: FlashStatus,
    config: FlashConfig,
    last_error: Option<String>,
    progress: FlashProgress,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only view of a manager's status, usable from any thread.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    shared: Arc<Mutex<Shared>>,
}

impl StatusHandle {
    /// Current status.
    pub fn status(&self) -> FlashStatus {
        lock(&self.shared).status
    }

    /// Latest progress event.
    pub fn progress(&self) -> FlashProgress {
        lock(&self.shared).progress.clone()
    }

    /// Message of the most recent failure.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared).last_error.clone()
    }
}

/// Top-level orchestrator: discovery, connection and flashing.
pub struct FlashManager {
    provider: Arc<dyn PortProvider>,
    device: Box<dyn DeviceInterface>,
    strategy: Option<Box<dyn FlashStrategy>>,
    firmware: Vec<u8>,
    shared: Arc<Mutex<Shared>>,
}

impl fmt::Debug for FlashManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashManager")
            .field("family", &self.device.family())
            .field("strategy", &self.strategy_name())
            .field("firmware_len", &self.firmware.len())
            .field("shared", &self.shared)
            .finish()
    }
}

impl FlashManager {
    /// Create a manager whose discovery starts with the generic interface.
    pub fn new(provider: Arc<dyn PortProvider>) -> Self {
        let device = ProtocolFamily::Generic.create_interface(Arc::clone(&provider));
        Self::with_interface(provider, device)
    }

    /// Create a manager over the platform serial ports.
    #[cfg(feature = "native")]
    pub fn native() -> Self {
        Self::new(Arc::new(crate::port::NativePortProvider))
    }

    /// Create a manager around an existing interface.
    ///
    /// `provider` is used if the connection must be rebound to another
    /// protocol family.
    pub fn with_interface(
        provider: Arc<dyn PortProvider>,
        device: Box<dyn DeviceInterface>,
    ) -> Self {
        Self {
            provider,
            device,
            strategy: None,
            firmware: Vec::new(),
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Refuse work while busy, then clear the previous failure.
    fn begin(&self, status: Option<FlashStatus>) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.status.is_busy() {
            return Err(Error::Busy(format!("device is {}", shared.status)));
        }
        shared.last_error = None;
        if let Some(status) = status {
            debug!("Status: {status}");
            shared.status = status;
            shared.progress = FlashProgress::default();
        }
        Ok(())
    }

    /// Record `result`; a failure moves to [`FlashStatus::Error`].
    fn finish<T>(&self, result: Result<T>, success: Option<FlashStatus>) -> Result<T> {
        let mut shared = lock(&self.shared);
        match &result {
            Ok(_) => {
                if let Some(status) = success {
                    shared.status = status;
                }
            },
            Err(e) => {
                warn!("{e}");
                shared.status = FlashStatus::Error;
                shared.last_error = Some(e.to_string());
            },
        }
        result
    }

    /// List devices reachable through the current interface.
    pub fn scan_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        self.begin(None)?;
        let result = self.device.discover_devices();
        if let Ok(devices) = &result {
            info!("Found {} device(s)", devices.len());
        }
        self.finish(result, None)
    }

    /// Connect to `device_id` and select a strategy for it.
    ///
    /// The current interface connects first; if the endpoint reports the
    /// Samsung signature through a non-Samsung interface, the connection is
    /// rebound to the Samsung interface.
    pub fn connect_device(&mut self, device_id: &str) -> Result<()> {
        self.begin(Some(FlashStatus::Connecting))?;
        let result = self.connect_inner(device_id);
        if result.is_err() && self.device.is_connected() {
            let _ = self.device.disconnect();
        }
        self.finish(result, Some(FlashStatus::Connected))
    }

    fn connect_inner(&mut self, device_id: &str) -> Result<()> {
        if let Some(mut strategy) = self.strategy.take() {
            strategy.cleanup();
        }
        if self.device.is_connected() {
            self.device.disconnect()?;
        }

        self.device.connect(device_id)?;
        let signature = self.device.device_signature()?;
        if signature == SAMSUNG_SIGNATURE && self.device.family() != ProtocolFamily::Samsung {
            info!("{device_id} reports a Samsung signature, switching interface");
            self.device.disconnect()?;
            let mut samsung = ProtocolFamily::Samsung.create_interface(Arc::clone(&self.provider));
            samsung.connect(device_id)?;
            self.device = samsung;
        }

        let device_info = self.device.device_info();
        let mut strategy = select_strategy(&device_info);
        let config = self.config();
        strategy.initialize(self.device.as_mut(), config)?;
        info!(
            "Connected to {} ({}, {} strategy)",
            device_info.id,
            device_info.name,
            strategy.name()
        );
        self.strategy = Some(strategy);
        Ok(())
    }

    /// Disconnect the current device.
    pub fn disconnect_device(&mut self) -> Result<()> {
        self.begin(None)?;
        if let Some(mut strategy) = self.strategy.take() {
            strategy.cleanup();
        }
        let result = self.device.disconnect();
        info!("Disconnected");
        self.finish(result, Some(FlashStatus::Disconnected))
    }

    /// Load a firmware image from disk.
    pub fn load_firmware_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.begin(None)?;
        let result = std::fs::read(path)
            .map_err(|source| Error::FileIo {
                path: path.to_path_buf(),
                source,
            })
            .and_then(|data| self.store_firmware(data));
        if result.is_ok() {
            info!("Loaded {} ({} bytes)", path.display(), self.firmware.len());
        }
        self.finish(result, None)
    }

    /// Load a firmware image from memory.
    pub fn load_firmware(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.begin(None)?;
        let result = self.store_firmware(data.into());
        self.finish(result, None)
    }

    fn store_firmware(&mut self, data: Vec<u8>) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidFirmware("firmware image is empty".to_string()));
        }
        self.firmware = data;
        Ok(())
    }

    /// Size of the loaded firmware image.
    pub fn firmware_len(&self) -> usize {
        self.firmware.len()
    }

    /// Erase (optionally), write and verify (optionally) the loaded image.
    pub fn flash_firmware(&mut self, progress: &mut dyn FnMut(&FlashProgress)) -> Result<()> {
        self.begin(Some(FlashStatus::Flashing))?;
        let result = self.flash_inner(progress);
        if result.is_ok() {
            info!("Flashing complete");
        }
        self.finish(result, Some(FlashStatus::Complete))
    }

    fn flash_inner(&mut self, progress: &mut dyn FnMut(&FlashProgress)) -> Result<()> {
        let config = self.config();
        let Self {
            device,
            strategy,
            firmware,
            shared,
            ..
        } = self;
        let strategy = strategy.as_mut().ok_or(Error::NoStrategySelected)?;
        if firmware.is_empty() {
            return Err(Error::InvalidFirmware("no firmware loaded".to_string()));
        }

        let mut sink = forward(shared, config.enable_progress_reporting, progress);
        if config.erase_before_write {
            strategy.erase_device(device.as_mut(), &mut sink)?;
        }
        strategy.write_firmware(device.as_mut(), firmware, 0, &mut sink)?;
        if config.verify_after_write {
            lock(shared).status = FlashStatus::Verifying;
            strategy.verify_firmware(device.as_mut(), firmware, 0, &mut sink)?;
        }
        Ok(())
    }

    /// Compare the device with the loaded image.
    pub fn verify_firmware(&mut self, progress: &mut dyn FnMut(&FlashProgress)) -> Result<()> {
        self.begin(Some(FlashStatus::Verifying))?;
        let config = self.config();
        let Self {
            device,
            strategy,
            firmware,
            shared,
            ..
        } = self;
        let result = match strategy.as_mut() {
            None => Err(Error::NoStrategySelected),
            Some(_) if firmware.is_empty() => {
                Err(Error::InvalidFirmware("no firmware loaded".to_string()))
            },
            Some(strategy) => {
                let mut sink = forward(shared, config.enable_progress_reporting, progress);
                strategy.verify_firmware(device.as_mut(), firmware, 0, &mut sink)
            },
        };
        self.finish(result, Some(FlashStatus::Complete))
    }

    /// Erase the whole device.
    pub fn erase_device(&mut self, progress: &mut dyn FnMut(&FlashProgress)) -> Result<()> {
        self.begin(Some(FlashStatus::Flashing))?;
        let config = self.config();
        let Self {
            device,
            strategy,
            shared,
            ..
        } = self;
        let result = match strategy.as_mut() {
            None => Err(Error::NoStrategySelected),
            Some(strategy) => {
                let mut sink = forward(shared, config.enable_progress_reporting, progress);
                strategy.erase_device(device.as_mut(), &mut sink)
            },
        };
        self.finish(result, Some(FlashStatus::Complete))
    }

    /// Read `size` bytes of device flash starting at `address`.
    pub fn read_device_flash(&mut self, address: u32, size: usize) -> Result<Vec<u8>> {
        self.begin(None)?;
        let result = self.read_inner(address, size);
        self.finish(result, None)
    }

    fn read_inner(&mut self, address: u32, size: usize) -> Result<Vec<u8>> {
        if !self.device.is_connected() {
            return Err(Error::NotConnected);
        }
        let page = self.device.page_size().max(1);
        let mut data = Vec::with_capacity(size);
        while data.len() < size {
            let len = page.min(size - data.len());
            let chunk = self
                .device
                .read_page(page_address(address, data.len())?, len)?;
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// Write `data` at `address` through the selected strategy.
    pub fn write_device_flash(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.begin(Some(FlashStatus::Flashing))?;
        let Self {
            device,
            strategy,
            shared,
            ..
        } = self;
        let result = match strategy.as_mut() {
            None => Err(Error::NoStrategySelected),
            Some(strategy) => {
                let mut discard = |_: &FlashProgress| {};
                let mut sink = forward(shared, false, &mut discard);
                strategy.write_firmware(device.as_mut(), data, address, &mut sink)
            },
        };
        self.finish(result, Some(FlashStatus::Complete))
    }

    /// Current status.
    pub fn status(&self) -> FlashStatus {
        lock(&self.shared).status
    }

    /// Cloneable handle for polling status from another thread.
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> FlashConfig {
        lock(&self.shared).config.clone()
    }

    /// Replace the configuration; a connected strategy is re-initialized.
    pub fn set_config(&mut self, config: FlashConfig) -> Result<()> {
        self.begin(None)?;
        lock(&self.shared).config = config.clone();
        let result = match self.strategy.as_mut() {
            Some(strategy) if self.device.is_connected() => {
                strategy.initialize(self.device.as_mut(), config)
            },
            _ => Ok(()),
        };
        self.finish(result, None)
    }

    /// Message of the most recent failure.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared).last_error.clone()
    }

    /// Forget the last failure, including those recorded below the manager.
    pub fn clear_error(&mut self) {
        lock(&self.shared).last_error = None;
        self.device.clear_error();
        if let Some(strategy) = self.strategy.as_mut() {
            strategy.clear_error();
        }
    }

    /// Snapshot of the connected device.
    pub fn connected_device(&self) -> Option<DeviceInfo> {
        self.device
            .is_connected()
            .then(|| self.device.device_info())
    }

    /// Name of the selected strategy.
    pub fn strategy_name(&self) -> Option<&'static str> {
        self.strategy.as_ref().map(|s| s.name())
    }

    /// Protocol family of the current interface.
    pub fn family(&self) -> ProtocolFamily {
        self.device.family()
    }

    /// Latest progress event.
    pub fn progress(&self) -> FlashProgress {
        lock(&self.shared).progress.clone()
    }

    /// Percentage of the latest progress event.
    pub fn progress_percentage(&self) -> f64 {
        lock(&self.shared).progress.percentage
    }
}

/// Downgrade strategy events, store the latest and pass them on.
fn forward<'a>(
    shared: &'a Mutex<Shared>,
    enabled: bool,
    sink: &'a mut dyn FnMut(&FlashProgress),
) -> impl FnMut(&EnhancedFlashProgress) + 'a {
    move |event| {
        let plain = event.to_flash_progress();
        lock(shared).progress = plain.clone();
        if enabled {
            sink(&plain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::identify::{EXYNOS_DOWNLOAD_MODE_PID, SAMSUNG_VID};
    use crate::port::PortInfo;
    use crate::protocol::pit::{ATTRIBUTE_WRITE, PitEntry, PitTable};
    use crate::testing::{OdinSim, SamBaSim, SimProvider, init_logger};
    use std::io::Write;

    fn memory_manager(device: MemoryDevice) -> FlashManager {
        init_logger();
        FlashManager::with_interface(SimProvider::new().into_shared(), Box::new(device))
    }

    fn connected_memory(size: usize) -> FlashManager {
        let mut manager = memory_manager(MemoryDevice::generic("mem0", size));
        manager.connect_device("mem0").unwrap();
        manager
    }

    fn pit() -> PitTable {
        let entry = |name: &str, id: u32, start: u32, blocks: u32| PitEntry {
            identifier: id,
            attributes: ATTRIBUTE_WRITE,
            block_size_or_offset: start,
            block_count_or_size: blocks,
            partition_name: name.to_string(),
            ..Default::default()
        };
        PitTable::from_entries(vec![entry("BOOT", 1, 0, 4), entry("SYSTEM", 2, 4, 28)]).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let manager = memory_manager(MemoryDevice::generic("mem0", 1024));
        assert_eq!(manager.status(), FlashStatus::Idle);
        assert!(manager.connected_device().is_none());
        assert!(manager.strategy_name().is_none());
        assert_eq!(manager.config(), FlashConfig::default());
        assert!(manager.progress_percentage().abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_missing_file() {
        let mut manager = memory_manager(MemoryDevice::generic("mem0", 1024));
        let err = manager
            .load_firmware_file("/nonexistent/firmware.bin")
            .unwrap_err();
        assert!(matches!(err, Error::FileIo { .. }));
        assert_eq!(manager.status(), FlashStatus::Error);
        assert!(
            manager
                .last_error()
                .unwrap()
                .starts_with("Failed to open firmware file")
        );
    }

    #[test]
    fn test_load_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut manager = memory_manager(MemoryDevice::generic("mem0", 1024));
        let err = manager.load_firmware_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidFirmware(_)));
        assert_eq!(manager.firmware_len(), 0);
    }

    #[test]
    fn test_new_operation_clears_previous_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4]).unwrap();

        let mut manager = memory_manager(MemoryDevice::generic("mem0", 1024));
        assert!(manager.load_firmware(Vec::new()).is_err());
        assert!(manager.last_error().is_some());

        manager.load_firmware_file(file.path()).unwrap();
        assert!(manager.last_error().is_none());
        assert_eq!(manager.firmware_len(), 4);
    }

    #[test]
    fn test_flash_requires_connection() {
        let mut manager = memory_manager(MemoryDevice::generic("mem0", 1024));
        manager.load_firmware(vec![1, 2, 3]).unwrap();
        let err = manager.flash_firmware(&mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::NoStrategySelected));
        assert_eq!(manager.status(), FlashStatus::Error);

        assert!(matches!(
            manager.erase_device(&mut |_| {}).unwrap_err(),
            Error::NoStrategySelected
        ));
        assert!(matches!(
            manager.read_device_flash(0, 4).unwrap_err(),
            Error::NotConnected
        ));
    }

    #[test]
    fn test_flash_requires_firmware() {
        let mut manager = connected_memory(1024);
        let err = manager.flash_firmware(&mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::InvalidFirmware(_)));
    }

    #[test]
    fn test_config_round_trip() {
        let mut manager = connected_memory(1024);
        let config = FlashConfig {
            verify_after_write: true,
            erase_before_write: false,
            retry_count: 3,
            timeout_ms: 5000,
            enable_progress_reporting: false,
        };
        manager.set_config(config.clone()).unwrap();
        assert_eq!(manager.config(), config);
    }

    #[test]
    fn test_flash_memory_device() {
        let mut manager = connected_memory(4096);
        assert_eq!(manager.status(), FlashStatus::Connected);
        assert_eq!(manager.strategy_name(), Some("Generic"));

        let firmware: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        manager.load_firmware(firmware.clone()).unwrap();

        let mut events = Vec::new();
        manager
            .flash_firmware(&mut |p| events.push(p.clone()))
            .unwrap();

        assert_eq!(manager.status(), FlashStatus::Complete);
        assert!((manager.progress_percentage() - 100.0).abs() < f64::EPSILON);
        assert!(events.iter().any(|e| e.current_operation == "Erasing"));
        assert!(events.iter().any(|e| e.current_operation == "Writing"));
        assert!(events.iter().any(|e| e.status == FlashStatus::Verifying));
        assert_eq!(events.last().unwrap().status, FlashStatus::Complete);

        assert_eq!(manager.read_device_flash(0, 1000).unwrap(), firmware);
    }

    #[test]
    fn test_progress_reporting_disabled() {
        let mut manager = connected_memory(1024);
        manager
            .set_config(FlashConfig {
                enable_progress_reporting: false,
                ..Default::default()
            })
            .unwrap();
        manager.load_firmware(vec![9; 300]).unwrap();

        let mut calls = 0;
        manager.flash_firmware(&mut |_| calls += 1).unwrap();
        assert_eq!(calls, 0);
        assert_eq!(manager.progress().status, FlashStatus::Complete);
    }

    #[test]
    fn test_verify_mismatch_sets_error() {
        let mut manager = connected_memory(1024);
        manager.write_device_flash(0, &[1, 2, 3, 4]).unwrap();

        manager.load_firmware(vec![1, 2, 9, 4]).unwrap();
        let err = manager.verify_firmware(&mut |_| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::VerificationMismatch {
                address: 2,
                expected: 9,
                actual: 3
            }
        ));
        assert_eq!(manager.status(), FlashStatus::Error);
        assert!(manager.last_error().is_some());

        manager.clear_error();
        assert!(manager.last_error().is_none());
    }

    #[test]
    fn test_reconnect_keeps_id() {
        let mut manager = connected_memory(1024);
        manager.disconnect_device().unwrap();
        assert_eq!(manager.status(), FlashStatus::Disconnected);
        assert!(manager.connected_device().is_none());

        manager.connect_device("mem0").unwrap();
        let device = manager.connected_device().unwrap();
        assert_eq!(device.id, "mem0");
        assert!(device.is_connected);
    }

    #[test]
    fn test_connect_unknown_device_sets_error() {
        let mut manager = memory_manager(MemoryDevice::generic("mem0", 1024));
        let err = manager.connect_device("mem1").unwrap_err();
        assert!(matches!(err, Error::PortNotFound(_)));
        assert_eq!(manager.status(), FlashStatus::Error);
        assert!(manager.strategy_name().is_none());
    }

    #[test]
    fn test_status_handle_across_threads() {
        let manager = connected_memory(1024);
        let handle = manager.status_handle();
        let status = std::thread::spawn(move || handle.status()).join().unwrap();
        assert_eq!(status, FlashStatus::Connected);
    }

    #[test]
    fn test_samsung_memory_device_uses_samsung_strategy() {
        let mut manager = memory_manager(MemoryDevice::samsung("usb0", 8192).with_pit(pit()));
        manager.connect_device("usb0").unwrap();
        assert_eq!(manager.strategy_name(), Some("Samsung"));
        assert_eq!(manager.family(), ProtocolFamily::Samsung);
    }

    #[test]
    fn test_samsung_signature_rebinds_interface() {
        const PORT: &str = "/dev/ttyACM0";
        init_logger();
        let sim = OdinSim::new(32 * 1024, &pit()).shared();
        let provider = SimProvider::new()
            .with_device(
                PortInfo::usb(PORT, SAMSUNG_VID, EXYNOS_DOWNLOAD_MODE_PID),
                sim.clone(),
            )
            .into_shared();

        let mut manager = FlashManager::new(provider);
        assert_eq!(manager.family(), ProtocolFamily::Generic);

        let devices = manager.scan_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].manufacturer, "Samsung");

        manager.connect_device(PORT).unwrap();
        assert_eq!(manager.family(), ProtocolFamily::Samsung);
        assert_eq!(manager.strategy_name(), Some("Samsung"));
        assert_eq!(manager.connected_device().unwrap().manufacturer, "Samsung");

        let firmware: Vec<u8> = (0..3000u32).map(|i| (i % 253) as u8).collect();
        manager.load_firmware(firmware.clone()).unwrap();
        manager.flash_firmware(&mut |_| {}).unwrap();

        {
            let sim = sim.lock().unwrap();
            assert_eq!(&sim.flash[..3000], firmware.as_slice());
            assert_eq!(sim.session_begins, 1);
            assert_eq!(sim.pit_requests, 1);
            assert_eq!(sim.erase_all_count, 1);
            assert_eq!(sim.parts, vec![(0, 1024), (1024, 1024), (2048, 952)]);
        }

        manager.disconnect_device().unwrap();
        assert_eq!(sim.lock().unwrap().sessions_ended, 1);
    }

    #[test]
    fn test_unknown_samsung_pid_rebinds_after_odin_probe() {
        const PORT: &str = "/dev/ttyACM3";
        init_logger();
        let sim = OdinSim::new(24 * 1024, &pit()).shared();
        let provider = SimProvider::new()
            .with_device(PortInfo::usb(PORT, SAMSUNG_VID, 0x6861), sim.clone())
            .into_shared();

        let mut manager = FlashManager::new(provider);
        let devices = manager.scan_devices().unwrap();
        assert_eq!(devices.len(), 1);

        manager.connect_device(PORT).unwrap();
        assert_eq!(manager.family(), ProtocolFamily::Samsung);
        assert_eq!(manager.strategy_name(), Some("Samsung"));
        let device = manager.connected_device().unwrap();
        assert_eq!(device.manufacturer, "Samsung");
        assert_eq!(device.flash_size, 24 * 1024);
        assert_eq!(sim.lock().unwrap().session_begins, 1);
    }

    #[test]
    fn test_generic_bootloader_end_to_end() {
        const PORT: &str = "/dev/ttyACM1";
        init_logger();
        let sim = SamBaSim::new(4096).shared();
        let provider = SimProvider::new()
            .with_device(PortInfo::usb(PORT, 0x03EB, 0x6124), sim.clone())
            .with_port(PortInfo {
                name: "/dev/ttyS0".to_string(),
                ..Default::default()
            })
            .into_shared();

        let mut manager = FlashManager::new(provider);
        let devices = manager.scan_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, PORT);

        manager.connect_device(PORT).unwrap();
        assert_eq!(manager.strategy_name(), Some("Generic"));

        let firmware = vec![0x3C; 600];
        manager.load_firmware(firmware.clone()).unwrap();
        manager.flash_firmware(&mut |_| {}).unwrap();
        assert_eq!(&sim.lock().unwrap().flash[..600], firmware.as_slice());
        assert_eq!(
            sim.lock().unwrap().write_commands(),
            vec![(0, 256), (256, 256), (512, 88)]
        );

        manager.disconnect_device().unwrap();
        assert!(sim.lock().unwrap().exited);
    }
}
