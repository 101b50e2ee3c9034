//! Samsung download/Odin mode interface.
//!
//! Session flow:
//!
//! ```text
//! Idle --probe + SESSION_BEGIN--> Handshaken --PIT dump--> PitKnown
//!   PitKnown --FILE_FLASH, FILE_PART x N--> Writing --FILE_END--> PitKnown
//!   PitKnown --verify ok--> Verified
//!   any --END_SESSION--> Idle
//! ```
//!
//! Every control packet is 1024 bytes and answered by an 8-byte response
//! echoing the control type. The PIT is fetched at most once per session,
//! on the first write or the first [`DeviceInterface::partition_table`]
//! call.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::device::{
    DeviceInfo, DeviceInterface, FlashProgress, FlashStatus, SAMSUNG_SIGNATURE, verify_pages,
};
use crate::error::{Error, Result};
use crate::identify::{ProtocolFamily, detector};
use crate::port::{PortInfo, PortProvider, SerialConfig};
use crate::protocol::odin::{
    self, ControlPacket, ControlType, DATA_PACKET_LEN, DATA_PACKET_SIZE, FLASH_INFO_QUERY,
    ODIN_HANDSHAKE, ODIN_RESPONSE_OK, PIT_PART_SIZE, RESPONSE_SIZE, Response,
};
use crate::protocol::pit::PitTable;
use crate::transport::SerialTransport;

/// Default baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default read/write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Largest PIT accepted from a device.
const MAX_PIT_SIZE: usize = 1024 * 1024;

/// Position in the download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    Idle,
    /// Session begun, PIT not fetched.
    Handshaken,
    /// PIT fetched.
    PitKnown,
    /// Inside a write sequence.
    Writing,
    /// Last verify succeeded.
    Verified,
}

/// Samsung download mode device.
pub struct SamsungDownloader {
    transport: SerialTransport,
    info: DeviceInfo,
    state: SessionState,
    pit: Option<PitTable>,
    pit_requests: usize,
    part_index: u32,
    sequence_bytes: u64,
    device_type: Option<u32>,
    baud_rate: u32,
    timeout: Duration,
    last_error: Option<String>,
}

impl SamsungDownloader {
    /// Create a disconnected interface over `provider`.
    pub fn new(provider: Arc<dyn PortProvider>) -> Self {
        Self {
            transport: SerialTransport::new(provider),
            info: DeviceInfo::default(),
            state: SessionState::Idle,
            pit: None,
            pit_requests: 0,
            part_index: 0,
            sequence_bytes: 0,
            device_type: None,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
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

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of PIT transfers performed by this interface.
    pub fn pit_requests(&self) -> usize {
        self.pit_requests
    }

    /// Storage type reported at session start.
    pub fn storage_type(&self) -> Option<u32> {
        self.device_type
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    fn ensure_session(&self) -> Result<()> {
        if self.state == SessionState::Idle {
            Err(Error::NotConnected)
        } else {
            Ok(())
        }
    }

    /// Send a control packet and return the response data word.
    fn control(&mut self, packet: ControlPacket) -> Result<u32> {
        trace!(
            "Control {:?}/{} args {:?}",
            packet.control, packet.request, packet.args
        );
        self.transport.write(&packet.build())?;
        self.response(packet.control)
    }

    fn response(&mut self, control: ControlType) -> Result<u32> {
        let raw = self.transport.read_exact(RESPONSE_SIZE)?;
        Response::parse(&raw)
            .ok_or_else(|| Error::Protocol(format!("short response: {}", odin::hex_dump(&raw))))?
            .expect(control)
    }

    /// Probe, begin the session and ask for the real flash size.
    fn handshake(&mut self) -> Result<Option<u64>> {
        self.transport.clear_buffers()?;
        self.transport.write(&ODIN_HANDSHAKE)?;
        let reply = self.transport.read_exact(ODIN_RESPONSE_OK.len())?;
        if reply != ODIN_RESPONSE_OK {
            return Err(Error::HandshakeFailed(format!(
                "unexpected Odin reply: {}",
                odin::hex_dump(&reply)
            )));
        }
        let version = self.control(ControlPacket::begin_session())?;
        debug!("Session begun, protocol version {version}");
        self.device_type = Some(self.control(ControlPacket::device_type())?);
        Ok(self.query_flash_size())
    }

    fn query_flash_size(&mut self) -> Option<u64> {
        let reply = self
            .transport
            .write(&FLASH_INFO_QUERY)
            .and_then(|_| detector::read_query_reply(&mut self.transport, &FLASH_INFO_QUERY));
        let size = match &reply {
            Ok(reply) => odin::parse_query_reply(&FLASH_INFO_QUERY, reply)
                .and_then(detector::parse_flash_size)
                .filter(|&size| size > 0),
            Err(e) => {
                debug!("Flash info query unanswered: {e}");
                None
            },
        };
        if size.is_none() {
            // Drop whatever is left of a partial reply
            if let Err(e) = self.transport.clear_buffers() {
                warn!("Could not clear buffers: {e}");
            }
        }
        size
    }

    fn connect_inner(&mut self, device_id: &str) -> Result<()> {
        if self.state != SessionState::Idle {
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

        info!("Connecting to Samsung device on {device_id}");
        let config = SerialConfig::new(device_id, self.baud_rate).with_timeout(self.timeout);
        self.transport.open(config)?;

        let flash_size = match self.handshake() {
            Ok(size) => size,
            Err(e) => {
                self.transport.close();
                return Err(match e {
                    Error::HandshakeFailed(_) => e,
                    other => Error::HandshakeFailed(other.to_string()),
                });
            },
        };

        self.info = detector::samsung_device_info(&port);
        if let Some(size) = flash_size {
            debug!("Device reports {size} bytes of flash");
            self.info.flash_size = size;
        }
        self.info.is_connected = true;
        self.state = SessionState::Handshaken;
        self.pit = None;
        self.part_index = 0;
        self.sequence_bytes = 0;
        info!("Samsung session open on {device_id}");
        Ok(())
    }

    fn fetch_pit(&mut self) -> Result<PitTable> {
        let size = self.control(ControlPacket::pit_dump())? as usize;
        if size > MAX_PIT_SIZE {
            return Err(Error::Pit(format!("implausible PIT size {size}")));
        }
        self.pit_requests += 1;
        if size == 0 {
            self.control(ControlPacket::pit_end())?;
            return Ok(PitTable::default());
        }

        let mut data = Vec::with_capacity(size);
        let mut index = 0u32;
        while data.len() < size {
            let part = PIT_PART_SIZE.min(size - data.len());
            self.transport
                .write(&ControlPacket::pit_part(index).build())?;
            data.extend(self.transport.read_exact(part)?);
            index += 1;
        }
        self.control(ControlPacket::pit_end())?;
        debug!("Received PIT: {size} bytes in {index} parts");
        PitTable::parse(&data)
    }

    fn ensure_pit(&mut self) -> Result<()> {
        self.ensure_session()?;
        if self.pit.is_none() {
            let pit = self.fetch_pit()?;
            info!("Partition table: {} entries", pit.len());
            self.pit = Some(pit);
            if self.state == SessionState::Handshaken {
                self.state = SessionState::PitKnown;
            }
        }
        Ok(())
    }

    fn write_page_inner(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.ensure_session()?;
        if data.len() > DATA_PACKET_SIZE {
            return Err(Error::InvalidFirmware(format!(
                "Page size exceeds maximum ({DATA_PACKET_SIZE} bytes)"
            )));
        }
        self.ensure_pit()?;

        if self.state != SessionState::Writing {
            self.control(ControlPacket::file_begin())?;
            self.state = SessionState::Writing;
            self.part_index = 0;
            self.sequence_bytes = 0;
        }

        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        let index = self.part_index;
        self.control(ControlPacket::file_part(address, len, index))?;
        self.transport.write(&odin::data_packet(data))?;
        let acked = self.response(ControlType::FileTransfer)?;
        if acked != index {
            return Err(Error::Protocol(format!(
                "part {index} at 0x{address:08X} answered with {acked}"
            )));
        }
        self.part_index += 1;
        self.sequence_bytes += u64::from(len);
        Ok(())
    }

    fn finish_write_inner(&mut self) -> Result<()> {
        self.ensure_session()?;
        if self.state == SessionState::Writing {
            let total = u32::try_from(self.sequence_bytes).unwrap_or(u32::MAX);
            self.control(ControlPacket::file_end(total))?;
            debug!("Write sequence closed: {} parts, {total} bytes", self.part_index);
            self.state = SessionState::PitKnown;
        }
        Ok(())
    }

    fn read_page_inner(&mut self, address: u32, size: usize) -> Result<Vec<u8>> {
        self.ensure_session()?;
        self.finish_write_inner()?;
        let len = u32::try_from(size)
            .map_err(|_| Error::Protocol(format!("read of {size} bytes is too large")))?;
        let announced = self.control(ControlPacket::file_dump(address, len))?;
        if announced != len {
            return Err(Error::Protocol(format!(
                "dump of {len} bytes at 0x{address:08X} announced {announced}"
            )));
        }
        self.transport.read_exact(size)
    }

    fn erase_chip_inner(&mut self, progress: &mut dyn FnMut(&FlashProgress)) -> Result<()> {
        self.ensure_session()?;
        self.finish_write_inner()?;
        let total = usize::try_from(self.info.flash_size).unwrap_or(usize::MAX);
        progress(&FlashProgress::new("Erasing", 0, total, FlashStatus::Flashing));
        info!("Erasing all user partitions");
        self.control(ControlPacket::erase_all())?;
        progress(&FlashProgress::new("Erasing", total, total, FlashStatus::Flashing));
        Ok(())
    }

    fn erase_page_inner(&mut self, address: u32) -> Result<()> {
        self.ensure_session()?;
        self.finish_write_inner()?;
        self.control(ControlPacket::file_erase(address, DATA_PACKET_LEN))?;
        Ok(())
    }
}

impl DeviceInterface for SamsungDownloader {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Samsung
    }

    fn discover_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        let ports = self.transport.enumerate_ports();
        let ports = self.record(ports)?;
        Ok(ports
            .iter()
            .filter(|p| ProtocolFamily::classify(p) == ProtocolFamily::Samsung)
            .map(detector::samsung_device_info)
            .collect())
    }

    fn connect(&mut self, device_id: &str) -> Result<()> {
        let result = self.connect_inner(device_id);
        self.record(result)
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            if let Err(e) = self.finish_write_inner() {
                warn!("Closing write sequence failed: {e}");
            }
            if let Err(e) = self.control(ControlPacket::end_session()) {
                warn!("End session not acknowledged: {e}");
            }
            debug!("Disconnecting from {}", self.info.id);
        }
        self.transport.close();
        self.state = SessionState::Idle;
        self.pit = None;
        self.info.is_connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state != SessionState::Idle
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn device_signature(&self) -> Result<String> {
        self.ensure_session()?;
        Ok(SAMSUNG_SIGNATURE.to_string())
    }

    fn erase_chip(&mut self, progress: &mut dyn FnMut(&FlashProgress)) -> Result<()> {
        let result = self.erase_chip_inner(progress);
        self.record(result)
    }

    fn erase_page(&mut self, address: u32) -> Result<()> {
        let result = self.erase_page_inner(address);
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
        if result.is_ok() {
            self.state = SessionState::Verified;
        }
        self.record(result)
    }

    fn page_size(&self) -> usize {
        DATA_PACKET_SIZE
    }

    fn set_io_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        self.transport.set_read_timeout(timeout)?;
        self.transport.set_write_timeout(timeout)
    }

    fn partition_table(&mut self) -> Result<Option<&PitTable>> {
        let result = self.ensure_pit();
        self.record(result)?;
        Ok(self.pit.as_ref())
    }

    fn finish_write(&mut self) -> Result<()> {
        let result = self.finish_write_inner();
        self.record(result)
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn clear_error(&mut self) {
        self.last_error = None;
        self.transport.clear_error();
    }
}

impl Drop for SamsungDownloader {
    fn drop(&mut self) {
        if self.state != SessionState::Idle {
            let _ = self.disconnect();
        }
    }
}
