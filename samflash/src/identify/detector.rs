//! Samsung endpoint probing.
//!
//! Every probe opens the port, performs one exchange and closes it again;
//! the detector never keeps an endpoint open between calls.

use std::sync::Arc;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};

use crate::device::{DeviceInfo, DeviceType, SAMSUNG_SIGNATURE};
use crate::error::Result;
use crate::identify::{self, FlashLayoutEntry, ProtocolFamily, SupportedProtocol, UsbMode};
use crate::port::{PortInfo, PortProvider, SerialConfig};
use crate::protocol::odin::{
    self, BOOTLOADER_VERSION_QUERY, CHIP_ID_QUERY, DOWNLOAD_MODE_HANDSHAKE, DOWNLOAD_RESPONSE_OK,
    FLASH_INFO_QUERY, MAX_QUERY_PAYLOAD, ODIN_HANDSHAKE, ODIN_RESPONSE_OK, SECURITY_VERSION_QUERY,
};
use crate::transport::SerialTransport;

/// Baud rate used for probing.
pub const PROBE_BAUD_RATE: u32 = 115200;

/// Default per-exchange timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Everything a probed Samsung endpoint told us about itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceIdentifier {
    /// Signature used for strategy selection.
    pub device_signature: String,
    /// Bootloader version string.
    pub bootloader_version: Option<String>,
    /// Chip identifier string.
    pub chip_id: Option<String>,
    /// Security (rollback) version string.
    pub security_version: Option<String>,
    /// Flash size reported by the device, in bytes.
    pub flash_size: Option<u64>,
    /// Endpoint answered the download-mode handshake.
    pub download_mode_available: bool,
    /// Endpoint answered the Odin handshake.
    pub odin_mode_available: bool,
}

/// Probes Samsung endpoints for their flashing protocols.
pub struct SamsungDeviceDetector {
    provider: Arc<dyn PortProvider>,
    timeout: Duration,
    last_error: Option<String>,
}

impl SamsungDeviceDetector {
    /// Create a detector over `provider`.
    pub fn new(provider: Arc<dyn PortProvider>) -> Self {
        Self {
            provider,
            timeout: PROBE_TIMEOUT,
            last_error: None,
        }
    }

    /// Create a detector over the platform's serial ports.
    #[cfg(feature = "native")]
    pub fn native() -> Self {
        Self::new(Arc::new(crate::port::NativePortProvider))
    }

    /// Set the per-exchange timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Diagnostic of the last failed probe or query.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Forget the last failure.
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    fn fail<T>(&mut self, message: String) -> Option<T> {
        debug!("{message}");
        self.last_error = Some(message);
        None
    }

    /// Open `port`, send `command`, read the reply with `read`, close.
    fn exchange(
        &mut self,
        port: &str,
        command: &[u8],
        read: impl FnOnce(&mut SerialTransport) -> Result<Vec<u8>>,
    ) -> Option<Vec<u8>> {
        let mut transport = SerialTransport::new(Arc::clone(&self.provider));
        let config = SerialConfig::new(port, PROBE_BAUD_RATE).with_timeout(self.timeout);

        let result = transport
            .open(config)
            .and_then(|()| transport.clear_buffers())
            .and_then(|()| transport.write(command))
            .and_then(|_| read(&mut transport));
        transport.close();

        match result {
            Ok(reply) => Some(reply),
            Err(e) => self.fail(format!(
                "{port}: no reply to {}: {e}",
                odin::hex_dump(command)
            )),
        }
    }

    fn handshake(&mut self, port: &str, command: &[u8], expected: &[u8]) -> bool {
        let Some(reply) = self.exchange(port, command, |t| t.read_exact(expected.len())) else {
            return false;
        };
        if reply == expected {
            true
        } else {
            self.fail::<()>(format!(
                "{port}: unexpected handshake reply: {}",
                odin::hex_dump(&reply)
            ));
            false
        }
    }

    /// Send the Odin handshake and check for `OKAY`.
    pub fn test_odin_protocol(&mut self, port: &str) -> bool {
        self.handshake(port, &ODIN_HANDSHAKE, &ODIN_RESPONSE_OK)
    }

    /// Send the download-mode handshake and check for `READY`.
    pub fn test_download_mode(&mut self, port: &str) -> bool {
        self.handshake(port, &DOWNLOAD_MODE_HANDSHAKE, &DOWNLOAD_RESPONSE_OK)
    }

    /// Protocols the endpoint answered, Odin first.
    pub fn detect_supported_protocols(&mut self, port: &str) -> Vec<SupportedProtocol> {
        let mut protocols = Vec::new();
        if self.test_odin_protocol(port) {
            protocols.push(SupportedProtocol::Odin);
        }
        if self.test_download_mode(port) {
            protocols.push(SupportedProtocol::Download);
        }
        protocols
    }

    /// Run a query and return its payload.
    fn query(&mut self, port: &str, command: [u8; 4]) -> Option<Vec<u8>> {
        let reply = self.exchange(port, &command, |t| read_query_reply(t, &command))?;

        match odin::parse_query_reply(&command, &reply) {
            Some(payload) => Some(payload.to_vec()),
            None => self.fail(format!(
                "{port}: malformed reply to {}: {}",
                odin::hex_dump(&command),
                odin::hex_dump(&reply)
            )),
        }
    }

    fn query_string(&mut self, port: &str, command: [u8; 4]) -> Option<String> {
        let payload = self.query(port, command)?;
        match parse_ascii(&payload) {
            Some(text) => Some(text),
            None => self.fail(format!(
                "{port}: empty or non-ASCII payload: {}",
                odin::hex_dump(&payload)
            )),
        }
    }

    /// Chip identifier.
    pub fn get_chip_id(&mut self, port: &str) -> Option<String> {
        self.query_string(port, CHIP_ID_QUERY)
    }

    /// Bootloader version.
    pub fn get_bootloader_version(&mut self, port: &str) -> Option<String> {
        self.query_string(port, BOOTLOADER_VERSION_QUERY)
    }

    /// Security (rollback protection) version.
    pub fn get_security_version(&mut self, port: &str) -> Option<String> {
        self.query_string(port, SECURITY_VERSION_QUERY)
    }

    /// Flash size in bytes.
    pub fn get_flash_size(&mut self, port: &str) -> Option<u64> {
        let payload = self.query(port, FLASH_INFO_QUERY)?;
        match parse_flash_size(&payload) {
            Some(size) => Some(size),
            None => self.fail(format!(
                "{port}: short flash info payload: {}",
                odin::hex_dump(&payload)
            )),
        }
    }

    /// Probe the endpoint and collect everything it reports.
    ///
    /// Returns `None` when neither handshake succeeds.
    pub fn identify(&mut self, port: &str) -> Option<DeviceIdentifier> {
        let odin_mode_available = self.test_odin_protocol(port);
        let download_mode_available = self.test_download_mode(port);
        if !odin_mode_available && !download_mode_available {
            return self.fail(format!("{port}: no Samsung protocol answered"));
        }

        let identifier = DeviceIdentifier {
            device_signature: SAMSUNG_SIGNATURE.to_string(),
            chip_id: self.get_chip_id(port),
            bootloader_version: self.get_bootloader_version(port),
            security_version: self.get_security_version(port),
            flash_size: self.get_flash_size(port),
            download_mode_available,
            odin_mode_available,
        };
        info!(
            "{port}: Samsung device, chip {}, bootloader {}",
            identifier.chip_id.as_deref().unwrap_or("unknown"),
            identifier.bootloader_version.as_deref().unwrap_or("unknown")
        );
        Some(identifier)
    }

    /// Endpoints in a known Samsung flashing mode.
    pub fn scan_for_samsung_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        let ports = self.provider.list_ports()?;
        Ok(ports
            .iter()
            .filter(|p| ProtocolFamily::classify(p) == ProtocolFamily::Samsung)
            .map(samsung_device_info)
            .collect())
    }

    /// Endpoints with a Samsung vendor ID but no known flashing mode.
    pub fn scan_for_locked_samsung_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        let ports = self.provider.list_ports()?;
        Ok(ports
            .iter()
            .filter(|p| match (p.vid, p.pid) {
                (Some(vid), Some(pid)) => {
                    let mode = UsbMode::of(vid, pid);
                    mode.samsung && !mode.is_bootloader()
                },
                _ => false,
            })
            .map(|p| DeviceInfo {
                name: format!("{} (locked)", p.description()),
                ..samsung_device_info(p)
            })
            .collect())
    }

    /// Known flash layout by name.
    pub fn flash_layout(&self, name: &str) -> Option<&'static [FlashLayoutEntry]> {
        identify::flash_layout(name)
    }
}

/// Discovery record for a Samsung endpoint, seeded from the SoC table.
pub fn samsung_device_info(port: &PortInfo) -> DeviceInfo {
    let soc = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => identify::soc_info(vid, pid),
        _ => None,
    };
    DeviceInfo {
        id: port.name.clone(),
        name: soc.map_or_else(
            || format!("Samsung device ({})", port.description()),
            |s| format!("Samsung {}", s.board_name),
        ),
        manufacturer: "Samsung".to_string(),
        device_type: DeviceType::SerialBootloader,
        port_or_address: port.name.clone(),
        flash_size: soc.map_or(0, |s| s.default_flash_size),
        page_size: soc.map_or(odin::DATA_PACKET_SIZE, |s| s.default_page_size),
        is_connected: false,
    }
}

/// Read the reply to a query already sent on `transport`: the command
/// echo, a u32 LE length and, when the header is sane, the payload.
pub(crate) fn read_query_reply(transport: &mut SerialTransport, command: &[u8; 4]) -> Result<Vec<u8>> {
    let mut reply = transport.read_exact(8)?;
    let len = LittleEndian::read_u32(&reply[4..8]) as usize;
    if reply[..4] == command[..] && len <= MAX_QUERY_PAYLOAD {
        reply.extend(transport.read_exact(len)?);
    }
    Ok(reply)
}

/// Flash size in bytes from a flash info payload.
pub(crate) fn parse_flash_size(payload: &[u8]) -> Option<u64> {
    payload
        .get(..4)
        .map(|b| u64::from(LittleEndian::read_u32(b)))
}

fn parse_ascii(payload: &[u8]) -> Option<String> {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    let text = std::str::from_utf8(&payload[..end]).ok()?.trim();
    if text.is_empty() || !text.is_ascii() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identify::{EXYNOS_ODIN_MODE_PID, SAMSUNG_VID};
    use crate::protocol::pit::PitTable;
    use crate::testing::{FAST_TIMEOUT, OdinSim, SamBaSim, Scripted, SimProvider};
    use std::sync::Mutex;

    const PORT: &str = "/dev/ttyACM0";

    fn detector_for(sim: OdinSim) -> (SamsungDeviceDetector, Arc<Mutex<OdinSim>>, Arc<SimProvider>) {
        let sim = sim.shared();
        let provider = Arc::new(
            SimProvider::new()
                .with_device(PortInfo::usb(PORT, SAMSUNG_VID, EXYNOS_ODIN_MODE_PID), sim.clone()),
        );
        let detector = SamsungDeviceDetector::new(provider.clone()).with_timeout(FAST_TIMEOUT);
        (detector, sim, provider)
    }

    fn odin() -> OdinSim {
        OdinSim::new(4096, &PitTable::default())
    }

    #[test]
    fn test_probes_answer_and_close() {
        let (mut detector, _, provider) = detector_for(odin());
        assert!(detector.test_odin_protocol(PORT));
        assert!(detector.test_download_mode(PORT));
        assert_eq!(
            detector.detect_supported_protocols(PORT),
            vec![SupportedProtocol::Odin, SupportedProtocol::Download]
        );
        assert_eq!(provider.open_count(), 4);
        assert_eq!(detector.last_error(), None);
    }

    #[test]
    fn test_probe_of_silent_port_fails() {
        let mut sim = odin();
        sim.silent = true;
        let (mut detector, _, _) = detector_for(sim);
        assert!(!detector.test_odin_protocol(PORT));
        assert!(detector.last_error().is_some());
        assert!(detector.identify(PORT).is_none());
    }

    #[test]
    fn test_probe_of_samba_device_fails() {
        let sim = SamBaSim::new(1024).shared();
        let provider = SimProvider::new()
            .with_device(PortInfo::usb(PORT, 0x03EB, 0x6124), sim)
            .into_shared();
        let mut detector = SamsungDeviceDetector::new(provider).with_timeout(FAST_TIMEOUT);
        assert!(!detector.test_odin_protocol(PORT));
    }

    #[test]
    fn test_queries() {
        let (mut detector, _, _) = detector_for(odin());
        assert_eq!(detector.get_chip_id(PORT).as_deref(), Some("EXYNOS9820"));
        assert_eq!(
            detector.get_bootloader_version(PORT).as_deref(),
            Some("G973FXXU9FUCD")
        );
        assert_eq!(detector.get_security_version(PORT).as_deref(), Some("9"));
        assert_eq!(detector.get_flash_size(PORT), Some(4096));
    }

    #[test]
    fn test_empty_payload_records_hex() {
        let mut sim = odin();
        sim.chip_id.clear();
        let (mut detector, _, _) = detector_for(sim);
        assert_eq!(detector.get_chip_id(PORT), None);
        assert!(detector.last_error().unwrap().contains("empty"));
    }

    #[test]
    fn test_malformed_reply_records_hex() {
        // Wrong echo followed by a zero length
        let device = Arc::new(Mutex::new(Scripted::replying(&[&[
            0x99, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]])));
        let provider = SimProvider::new()
            .with_device(PortInfo::usb(PORT, SAMSUNG_VID, EXYNOS_ODIN_MODE_PID), device)
            .into_shared();
        let mut detector = SamsungDeviceDetector::new(provider).with_timeout(FAST_TIMEOUT);

        assert_eq!(detector.get_bootloader_version(PORT), None);
        let err = detector.last_error().unwrap();
        assert!(err.contains("malformed"), "{err}");
        assert!(err.contains("99 00 00 00"), "{err}");
    }

    #[test]
    fn test_identify() {
        let (mut detector, _, _) = detector_for(odin());
        let id = detector.identify(PORT).unwrap();
        assert_eq!(id.device_signature, "samsung");
        assert!(id.odin_mode_available);
        assert_eq!(id.chip_id.as_deref(), Some("EXYNOS9820"));
        assert_eq!(id.flash_size, Some(4096));
    }

    #[test]
    fn test_scans() {
        let provider = SimProvider::new()
            .with_port(PortInfo::usb("/dev/ttyACM0", SAMSUNG_VID, EXYNOS_ODIN_MODE_PID))
            .with_port(PortInfo::usb("/dev/ttyACM1", SAMSUNG_VID, 0x6863).with_product("Galaxy"))
            .with_port(PortInfo::usb("/dev/ttyACM2", 0x03EB, 0x6124))
            .into_shared();
        let mut detector = SamsungDeviceDetector::new(provider);

        let found = detector.scan_for_samsung_devices().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "/dev/ttyACM0");
        assert_eq!(found[0].manufacturer, "Samsung");
        assert_eq!(found[0].page_size, 1024);

        let locked = detector.scan_for_locked_samsung_devices().unwrap();
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].id, "/dev/ttyACM1");
        assert!(locked[0].name.contains("locked"));

        assert!(detector.flash_layout("exynos").is_some());
    }

    #[test]
    fn test_parse_ascii() {
        assert_eq!(parse_ascii(b"ABC\0\0").as_deref(), Some("ABC"));
        assert_eq!(parse_ascii(b" v2 ").as_deref(), Some("v2"));
        assert_eq!(parse_ascii(b"\0"), None);
        assert_eq!(parse_ascii(&[0xC3, 0xA9]), None);
    }

    #[test]
    fn test_parse_flash_size() {
        assert_eq!(parse_flash_size(&[0x00, 0x80, 0x00, 0x00]), Some(0x8000));
        assert_eq!(parse_flash_size(&[0x00, 0x00, 0x00, 0x10, 0xFF]), Some(0x1000_0000));
        assert_eq!(parse_flash_size(&[0x01, 0x02]), None);
    }
}
