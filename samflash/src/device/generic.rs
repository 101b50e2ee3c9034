//! Generic serial bootloader (SAM-BA command set).
//!
//! Connects to any serial endpoint speaking the ASCII `#`-terminated
//! SAM-BA protocol. Endpoints whose VID/PID classify as Samsung are
//! connected in probe mode instead: the Odin handshake is performed and the
//! `"samsung"` signature reported, so the flash manager can rebind the
//! session to [`SamsungDownloader`](crate::device::SamsungDownloader).
//!
//! ## Example
//!
//! ```rust,no_run
//! use samflash::device::{DeviceInterface, GenericSerialBootloader};
//!
//! fn main() -> samflash::Result<()> {
//!     let mut device = GenericSerialBootloader::native();
//!     device.connect("/dev/ttyACM0")?;
//!     device.write_page(0x0040_0000, &[0xAA; 256])?;
//!     device.disconnect()?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::device::{
    DeviceInfo, DeviceInterface, DeviceType, FlashProgress, FlashStatus, GENERIC_SIGNATURE,
    SAMSUNG_SIGNATURE, verify_pages,
};
use crate::error::{Error, Result};
use crate::identify::{self, ProtocolFamily, detector};
use crate::port::{PortInfo, PortProvider, SerialConfig};
use crate::protocol::odin::{self, ODIN_HANDSHAKE, ODIN_RESPONSE_OK};
use crate::protocol::samba::{self, Command};
use crate::transport::SerialTransport;

/// Default baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default read/write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Hold time of each edge of the reset pulse.
const RESET_PULSE: Duration = Duration::from_millis(100);

/// SAM-BA style bootloader over a serial port.
pub struct GenericSerialBootloader {
    transport: SerialTransport,
    info: DeviceInfo,
    connected: bool,
    probe_only: bool,
    version: Option<String>,
    baud_rate: u32,
    timeout: Duration,
    reset_on_connect: bool,
    last_error: Option<String>,
}

impl GenericSerialBootloader {
    /// Create a disconnected interface over `provider`.
    pub fn new(provider: Arc<dyn PortProvider>) -> Self {
        Self {
            transport: SerialTransport::new(provider),
            info: DeviceInfo::default(),
            connected: false,
            probe_only: false,
            version: None,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            reset_on_connect: false,
            last_error: None,
        }
    }

    /// Create a disconnected interface over the platform's serial ports.
    #[cfg(feature = "native")]
    pub fn native() -> Self {
        Self::new(Arc::new(crate::port::NativePortProvider))
    }

    /// Set the baud rate used by the next connect.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Pulse DTR/RTS before the handshake.
    #[must_use]
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset_on_connect = reset;
        self
    }

    /// Bootloader version reported during the handshake.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Whether the endpoint was connected in Samsung probe mode.
    pub fn is_probe_connection(&self) -> bool {
        self.connected && self.probe_only
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    fn ensure_page_access(&self) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.probe_only {
            return Err(Error::Unsupported(
                "Samsung endpoint connected in probe mode; reconnect with the Samsung interface"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn pulse_reset(&mut self) -> Result<()> {
        debug!("Pulsing DTR/RTS reset");
        self.transport.set_dtr(false)?;
        self.transport.set_rts(true)?;
        thread::sleep(RESET_PULSE);
        self.transport.set_rts(false)?;
        thread::sleep(RESET_PULSE);
        Ok(())
    }

    fn samba_handshake(&mut self) -> Result<String> {
        self.transport.write(&Command::Normal.encode())?;
        let reply = self.transport.read(2)?;
        if !samba::is_handshake_ack(&reply) {
            return Err(Error::HandshakeFailed(format!(
                "unexpected reply to N#: {}",
                odin::hex_dump(&reply)
            )));
        }
        // Drop the rest of the line terminator
        self.transport.clear_buffers()?;

        self.transport.write(&Command::Version.encode())?;
        let line = self
            .transport
            .read_until(samba::LINE_END, samba::MAX_VERSION_LEN)?;
        samba::parse_version(&line)
            .ok_or_else(|| Error::HandshakeFailed("empty version reply".to_string()))
    }

    fn odin_probe(&mut self) -> Result<()> {
        self.transport.write(&ODIN_HANDSHAKE)?;
        let reply = self.transport.read_exact(ODIN_RESPONSE_OK.len())?;
        if reply != ODIN_RESPONSE_OK {
            return Err(Error::HandshakeFailed(format!(
                "unexpected Odin reply: {}",
                odin::hex_dump(&reply)
            )));
        }
        Ok(())
    }

    /// Run the handshake for `port` and report which family answered.
    ///
    /// Ports with a Samsung vendor ID but no known flashing PID get an Odin
    /// probe first and fall back to SAM-BA when it goes unanswered.
    fn handshake(&mut self, port: &PortInfo) -> Result<(ProtocolFamily, Option<String>)> {
        if self.reset_on_connect {
            self.pulse_reset()?;
        }
        self.transport.clear_buffers()?;
        match ProtocolFamily::classify(port) {
            ProtocolFamily::Samsung => {
                self.odin_probe()?;
                return Ok((ProtocolFamily::Samsung, None));
            },
            ProtocolFamily::Generic if ProtocolFamily::is_ambiguous(port) => {
                match self.odin_probe() {
                    Ok(()) => {
                        debug!("{} answered the Odin probe", port.name);
                        return Ok((ProtocolFamily::Samsung, None));
                    },
                    Err(e) => {
                        debug!("No Odin reply from {}: {e}", port.name);
                        // Close the probe bytes as one unknown SAM-BA command
                        self.transport.write(&[samba::TERMINATOR])?;
                        self.transport.clear_buffers()?;
                    },
                }
            },
            ProtocolFamily::Generic => {},
        }
        let version = self.samba_handshake()?;
        Ok((ProtocolFamily::Generic, Some(version)))
    }

    fn connect_inner(&mut self, device_id: &str) -> Result<()> {
        if self.connected {
            self.disconnect()?;
        }

        let port = self
            .transport
            .provider()
            .port_info(device_id)?
            .unwrap_or_else(|| PortInfo {
                name: device_id.to_string(),
                ..Default::default()
            });

        info!(
            "Connecting to {device_id} ({} handshake)",
            if ProtocolFamily::is_ambiguous(&port) {
                "probing"
            } else {
                ProtocolFamily::classify(&port).name()
            }
        );
        let config = SerialConfig::new(device_id, self.baud_rate).with_timeout(self.timeout);
        self.transport.open(config)?;

        let (family, version) = match self.handshake(&port) {
            Ok(answer) => answer,
            Err(e) => {
                self.transport.close();
                return Err(match e {
                    Error::HandshakeFailed(_) => e,
                    other => Error::HandshakeFailed(other.to_string()),
                });
            },
        };

        self.info = match family {
            ProtocolFamily::Samsung => detector::samsung_device_info(&port),
            ProtocolFamily::Generic => generic_device_info(&port, version.as_deref()),
        };
        self.info.is_connected = true;
        self.probe_only = family == ProtocolFamily::Samsung;
        self.version = version;
        self.connected = true;

        match &self.version {
            Some(v) => info!("Connected to {device_id}: {v}"),
            None => info!("Connected to {device_id} in Samsung probe mode"),
        }
        Ok(())
    }

    fn command_with_ack(&mut self, command: Command) -> Result<()> {
        self.transport.write(&command.encode())?;
        self.expect_ack(&command)
    }

    fn expect_ack(&mut self, command: &Command) -> Result<()> {
        let reply = self.transport.read_exact(samba::LINE_END.len())?;
        if samba::is_ack(&reply) {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "{command:?} not acknowledged: {}",
                odin::hex_dump(&reply)
            )))
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_page_inner(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.ensure_page_access()?;
        if data.len() > samba::PAGE_SIZE {
            return Err(Error::InvalidFirmware(format!(
                "Page size exceeds maximum ({} bytes)",
                samba::PAGE_SIZE
            )));
        }
        let command = Command::Write {
            addr: address,
            len: data.len() as u32,
        };
        trace!("Writing {} bytes at 0x{address:08X}", data.len());
        self.transport.write(&command.encode())?;
        self.transport.write(data)?;
        self.expect_ack(&command)
    }

    fn read_page_inner(&mut self, address: u32, size: usize) -> Result<Vec<u8>> {
        self.ensure_page_access()?;
        let len = u32::try_from(size)
            .map_err(|_| Error::Protocol(format!("read of {size} bytes is too large")))?;
        self.transport
            .write(&Command::Read { addr: address, len }.encode())?;
        self.transport.read_exact(size)
    }

    fn erase_chip_inner(&mut self, progress: &mut dyn FnMut(&FlashProgress)) -> Result<()> {
        self.ensure_page_access()?;
        let total = usize::try_from(self.info.flash_size).unwrap_or(usize::MAX);
        progress(&FlashProgress::new("Erasing", 0, total, FlashStatus::Flashing));
        info!("Erasing flash");
        self.command_with_ack(Command::EraseAll)?;
        progress(&FlashProgress::new("Erasing", total, total, FlashStatus::Flashing));
        Ok(())
    }
}

/// Discovery record for a generic bootloader endpoint.
pub fn generic_device_info(port: &PortInfo, version: Option<&str>) -> DeviceInfo {
    let bridge = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => identify::BridgeKind::from_vid_pid(vid, pid),
        _ => identify::BridgeKind::Unknown,
    };
    let name = match version {
        Some(v) => format!("Generic bootloader ({v})"),
        None if bridge.is_known() => format!("{} ({})", port.description(), bridge.name()),
        None => port.description().to_string(),
    };
    DeviceInfo {
        id: port.name.clone(),
        name,
        manufacturer: port
            .manufacturer
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        device_type: DeviceType::SerialBootloader,
        port_or_address: port.name.clone(),
        flash_size: samba::DEFAULT_FLASH_SIZE as u64,
        page_size: samba::PAGE_SIZE,
        is_connected: false,
    }
}

impl DeviceInterface for GenericSerialBootloader {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Generic
    }

    fn discover_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        let ports = self.transport.enumerate_ports();
        let ports = self.record(ports)?;
        let devices: Vec<DeviceInfo> = ports
            .iter()
            .filter_map(|port| match ProtocolFamily::classify(port) {
                ProtocolFamily::Samsung => Some(detector::samsung_device_info(port)),
                ProtocolFamily::Generic
                    if ProtocolFamily::is_ambiguous(port) || identify::is_generic_candidate(port) =>
                {
                    Some(generic_device_info(port, None))
                },
                ProtocolFamily::Generic => None,
            })
            .collect();
        debug!("Discovered {} of {} ports", devices.len(), ports.len());
        Ok(devices)
    }

    fn connect(&mut self, device_id: &str) -> Result<()> {
        let result = self.connect_inner(device_id);
        self.record(result)
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.connected && !self.probe_only {
            // SAM-BA does not acknowledge G#
            if let Err(e) = self.transport.write(&Command::Go { addr: 0 }.encode()) {
                warn!("Exit command failed: {e}");
            }
        }
        if self.connected {
            debug!("Disconnecting from {}", self.info.id);
        }
        self.transport.close();
        self.connected = false;
        self.probe_only = false;
        self.info.is_connected = false;
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
        Ok(if self.probe_only {
            SAMSUNG_SIGNATURE
        } else {
            GENERIC_SIGNATURE
        }
        .to_string())
    }

    fn erase_chip(&mut self, progress: &mut dyn FnMut(&FlashProgress)) -> Result<()> {
        let result = self.erase_chip_inner(progress);
        self.record(result)
    }

    fn erase_page(&mut self, address: u32) -> Result<()> {
        let result = self
            .ensure_page_access()
            .and_then(|()| self.command_with_ack(Command::ErasePage { addr: address }));
        self.record(result)
    }

    fn write_page(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let result = self.write_page_inner(address, data);
        self.record(result)
    }

    fn read_page(&mut self, address: u32, size: usize) -> Result<Vec<u8>> {
        let result = self.read_page_inner(address, size);
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
        samba::PAGE_SIZE
    }

    fn set_io_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        self.transport.set_read_timeout(timeout)?;
        self.transport.set_write_timeout(timeout)
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn clear_error(&mut self) {
        self.last_error = None;
        self.transport.clear_error();
    }
}

impl Drop for GenericSerialBootloader {
    fn drop(&mut self) {
        if self.connected {
            let _ = self.disconnect();
        }
    }
}
