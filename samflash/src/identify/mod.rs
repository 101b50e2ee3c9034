//! Device identification.
//!
//! Maps USB VID/PID pairs and port descriptors onto a [`ProtocolFamily`] and
//! static SoC records, and probes Samsung endpoints for the download and Odin
//! protocols (see [`SamsungDeviceDetector`]).

pub mod detector;

pub use detector::{DeviceIdentifier, SamsungDeviceDetector};

use crate::port::PortInfo;

/// Samsung Electronics USB vendor ID.
pub const SAMSUNG_VID: u16 = 0x04E8;
/// Samsung Semiconductor USB vendor ID.
pub const SAMSUNG_SEMICONDUCTOR_VID: u16 = 0x144D;

/// Exynos download mode.
pub const EXYNOS_DOWNLOAD_MODE_PID: u16 = 0x1234;
/// Exynos Odin mode.
pub const EXYNOS_ODIN_MODE_PID: u16 = 0x6860;
/// Snapdragon download mode.
pub const SNAPDRAGON_DOWNLOAD_MODE_PID: u16 = 0x685D;
/// MediaTek preloader.
pub const MEDIATEK_PRELOADER_PID: u16 = 0x0003;

/// Protocol family an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ProtocolFamily {
    /// SAM-BA style microcontroller bootloader.
    #[default]
    Generic,
    /// Samsung download/Odin mode.
    Samsung,
}

impl ProtocolFamily {
    /// Classify a port by its USB identity.
    pub fn classify(port: &PortInfo) -> Self {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) if UsbMode::of(vid, pid).is_bootloader() => Self::Samsung,
            _ => Self::Generic,
        }
    }

    /// Samsung vendor ID without a known flashing PID. Only a probe can
    /// tell which protocol such a port speaks.
    pub fn is_ambiguous(port: &PortInfo) -> bool {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => {
                let mode = UsbMode::of(vid, pid);
                mode.samsung && !mode.is_bootloader()
            },
            _ => false,
        }
    }

    /// Family a device signature belongs to.
    pub fn from_signature(signature: &str) -> Self {
        if signature == crate::device::SAMSUNG_SIGNATURE {
            Self::Samsung
        } else {
            Self::Generic
        }
    }

    /// Short lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Samsung => "samsung",
        }
    }
}

impl std::fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Flashing protocol a SoC exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedProtocol {
    /// SAM-BA command set.
    SamBa,
    /// Odin control/data packets.
    Odin,
    /// Samsung download mode.
    Download,
}

impl SupportedProtocol {
    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SamBa => "sam-ba",
            Self::Odin => "odin",
            Self::Download => "download",
        }
    }
}

/// USB mode classification of a VID/PID pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsbMode {
    /// Vendor is Samsung or Samsung Semiconductor.
    pub samsung: bool,
    /// Download mode (Exynos, Snapdragon, MediaTek preloader).
    pub download: bool,
    /// Odin mode.
    pub odin: bool,
}

impl UsbMode {
    /// Classify a VID/PID pair.
    pub fn of(vid: u16, pid: u16) -> Self {
        let samsung = is_samsung_vid_pid(vid, pid);
        Self {
            samsung,
            download: samsung && is_download_mode(vid, pid),
            odin: samsung && is_odin_mode(vid, pid),
        }
    }

    /// Either flashing mode.
    pub fn is_bootloader(&self) -> bool {
        self.download || self.odin
    }
}

/// Whether the vendor ID belongs to Samsung.
pub fn is_samsung_vid_pid(vid: u16, _pid: u16) -> bool {
    vid == SAMSUNG_VID || vid == SAMSUNG_SEMICONDUCTOR_VID
}

/// Whether the pair is a Samsung download mode.
pub fn is_download_mode(vid: u16, pid: u16) -> bool {
    is_samsung_vid_pid(vid, pid)
        && matches!(
            pid,
            EXYNOS_DOWNLOAD_MODE_PID | SNAPDRAGON_DOWNLOAD_MODE_PID | MEDIATEK_PRELOADER_PID
        )
}

/// Whether the pair is Samsung Odin mode.
pub fn is_odin_mode(vid: u16, pid: u16) -> bool {
    is_samsung_vid_pid(vid, pid) && pid == EXYNOS_ODIN_MODE_PID
}

/// Whether the pair is any Samsung flashing mode.
pub fn is_bootloader_mode(vid: u16, pid: u16) -> bool {
    is_download_mode(vid, pid) || is_odin_mode(vid, pid)
}

/// One region of a known flash layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLayoutEntry {
    /// Partition name.
    pub name: &'static str,
    /// Byte offset.
    pub start_address: u64,
    /// Byte size.
    pub size: u64,
    /// Partition type label.
    pub partition_type: &'static str,
    /// Must not be overwritten casually.
    pub is_critical: bool,
}

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

macro_rules! region {
    ($name:literal, $start:expr, $size:expr, $kind:literal, $critical:literal) => {
        FlashLayoutEntry {
            name: $name,
            start_address: $start,
            size: $size,
            partition_type: $kind,
            is_critical: $critical,
        }
    };
}

const EXYNOS_LAYOUT: &[FlashLayoutEntry] = &[
    region!("BOOTLOADER", 0, 4 * MIB, "bootloader", true),
    region!("EFS", 4 * MIB, 20 * MIB, "data", true),
    region!("BOOT", 24 * MIB, 64 * MIB, "kernel", false),
    region!("RECOVERY", 88 * MIB, 72 * MIB, "kernel", false),
    region!("SYSTEM", 160 * MIB, 6 * GIB, "filesystem", false),
];

const SNAPDRAGON_LAYOUT: &[FlashLayoutEntry] = &[
    region!("XBL", 0, 4 * MIB, "bootloader", true),
    region!("ABL", 4 * MIB, 4 * MIB, "bootloader", true),
    region!("BOOT", 8 * MIB, 96 * MIB, "kernel", false),
    region!("RECOVERY", 104 * MIB, 96 * MIB, "kernel", false),
    region!("SYSTEM", 200 * MIB, 6 * GIB, "filesystem", false),
];

const MEDIATEK_LAYOUT: &[FlashLayoutEntry] = &[
    region!("PRELOADER", 0, 512 * 1024, "bootloader", true),
    region!("LK", MIB, 2 * MIB, "bootloader", true),
    region!("BOOT", 3 * MIB, 32 * MIB, "kernel", false),
    region!("SYSTEM", 35 * MIB, 4 * GIB, "filesystem", false),
];

/// Named flash layouts.
pub const FLASH_LAYOUTS: &[(&str, &[FlashLayoutEntry])] = &[
    ("exynos", EXYNOS_LAYOUT),
    ("snapdragon", SNAPDRAGON_LAYOUT),
    ("mediatek", MEDIATEK_LAYOUT),
];

/// Look up a named flash layout.
pub fn flash_layout(name: &str) -> Option<&'static [FlashLayoutEntry]> {
    FLASH_LAYOUTS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, layout)| *layout)
}

/// Static record of a known SoC in a flashing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocInfo {
    /// USB vendor ID.
    pub vid: u16,
    /// USB product ID.
    pub pid: u16,
    /// SoC family name.
    pub soc_name: &'static str,
    /// Board or product line.
    pub board_name: &'static str,
    /// Vendor name.
    pub manufacturer: &'static str,
    /// Flash size until the device reports its own.
    pub default_flash_size: u64,
    /// Page size of the download protocol.
    pub default_page_size: usize,
    /// Name of the entry in [`FLASH_LAYOUTS`].
    pub flash_layout: &'static str,
    /// Protocols to try, most specific first.
    pub supported_protocols: &'static [SupportedProtocol],
}

const SAMSUNG_PROTOCOLS: &[SupportedProtocol] =
    &[SupportedProtocol::Odin, SupportedProtocol::Download];

/// Known SoCs, keyed by (vid, pid).
pub const SOC_TABLE: &[SocInfo] = &[
    SocInfo {
        vid: SAMSUNG_VID,
        pid: EXYNOS_DOWNLOAD_MODE_PID,
        soc_name: "Exynos",
        board_name: "Galaxy (Exynos) download mode",
        manufacturer: "Samsung",
        default_flash_size: 64 * GIB,
        default_page_size: 1024,
        flash_layout: "exynos",
        supported_protocols: SAMSUNG_PROTOCOLS,
    },
    SocInfo {
        vid: SAMSUNG_VID,
        pid: EXYNOS_ODIN_MODE_PID,
        soc_name: "Exynos",
        board_name: "Galaxy (Exynos) Odin mode",
        manufacturer: "Samsung",
        default_flash_size: 64 * GIB,
        default_page_size: 1024,
        flash_layout: "exynos",
        supported_protocols: &[SupportedProtocol::Odin],
    },
    SocInfo {
        vid: SAMSUNG_VID,
        pid: SNAPDRAGON_DOWNLOAD_MODE_PID,
        soc_name: "Snapdragon",
        board_name: "Galaxy (Snapdragon) download mode",
        manufacturer: "Samsung",
        default_flash_size: 128 * GIB,
        default_page_size: 1024,
        flash_layout: "snapdragon",
        supported_protocols: SAMSUNG_PROTOCOLS,
    },
    SocInfo {
        vid: SAMSUNG_VID,
        pid: MEDIATEK_PRELOADER_PID,
        soc_name: "MediaTek",
        board_name: "Galaxy (MediaTek) preloader",
        manufacturer: "Samsung",
        default_flash_size: 32 * GIB,
        default_page_size: 1024,
        flash_layout: "mediatek",
        supported_protocols: &[SupportedProtocol::Download],
    },
    SocInfo {
        vid: SAMSUNG_SEMICONDUCTOR_VID,
        pid: EXYNOS_DOWNLOAD_MODE_PID,
        soc_name: "Exynos",
        board_name: "Exynos reference board",
        manufacturer: "Samsung",
        default_flash_size: 16 * GIB,
        default_page_size: 1024,
        flash_layout: "exynos",
        supported_protocols: SAMSUNG_PROTOCOLS,
    },
];

/// Look up a known SoC.
pub fn soc_info(vid: u16, pid: u16) -> Option<&'static SocInfo> {
    SOC_TABLE.iter().find(|s| s.vid == vid && s.pid == pid)
}

/// Known USB bridge kinds behind generic bootloaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Microchip/Atmel SAM-BA ROM bootloader.
    SamBa,
    /// Unknown device.
    Unknown,
}

const KNOWN_BRIDGES: &[(u16, &[u16], BridgeKind)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        BridgeKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], BridgeKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        BridgeKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], BridgeKind::Prolific),
    (0x03EB, &[], BridgeKind::SamBa),
];

const KNOWN_MANUFACTURERS: &[&str] = &["FTDI", "Microchip", "Atmel"];
const KNOWN_PRODUCTS: &[&str] = &["USB Serial"];

impl BridgeKind {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, kind) in KNOWN_BRIDGES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *kind;
            }
        }
        Self::Unknown
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::SamBa => "SAM-BA",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a recognised kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Whether a port looks like a generic bootloader candidate.
pub fn is_generic_candidate(port: &PortInfo) -> bool {
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        if BridgeKind::from_vid_pid(vid, pid).is_known() {
            return true;
        }
    }
    let manufacturer = port.manufacturer.as_deref().unwrap_or_default();
    let product = port.product.as_deref().unwrap_or_default();
    KNOWN_MANUFACTURERS.iter().any(|m| manufacturer.contains(m))
        || KNOWN_PRODUCTS.iter().any(|p| product.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_mode_classification() {
        let mode = UsbMode::of(SAMSUNG_VID, EXYNOS_ODIN_MODE_PID);
        assert!(mode.samsung && mode.odin && !mode.download);

        let mode = UsbMode::of(SAMSUNG_VID, SNAPDRAGON_DOWNLOAD_MODE_PID);
        assert!(mode.download && mode.is_bootloader());

        // Samsung vendor, unknown product: not a flashing mode
        let mode = UsbMode::of(SAMSUNG_VID, 0x6863);
        assert!(mode.samsung && !mode.is_bootloader());

        let mode = UsbMode::of(0x03EB, 0x6124);
        assert_eq!(mode, UsbMode::default());
    }

    #[test]
    fn test_classify_port() {
        let samsung = PortInfo::usb("/dev/ttyACM0", SAMSUNG_VID, EXYNOS_DOWNLOAD_MODE_PID);
        assert_eq!(ProtocolFamily::classify(&samsung), ProtocolFamily::Samsung);

        let semi = PortInfo::usb("/dev/ttyACM1", SAMSUNG_SEMICONDUCTOR_VID, MEDIATEK_PRELOADER_PID);
        assert_eq!(ProtocolFamily::classify(&semi), ProtocolFamily::Samsung);

        let atmel = PortInfo::usb("/dev/ttyACM2", 0x03EB, 0x6124);
        assert_eq!(ProtocolFamily::classify(&atmel), ProtocolFamily::Generic);

        let plain = PortInfo {
            name: "/dev/ttyS0".into(),
            ..Default::default()
        };
        assert_eq!(ProtocolFamily::classify(&plain), ProtocolFamily::Generic);
    }

    #[test]
    fn test_ambiguous_ports() {
        let unknown = PortInfo::usb("/dev/ttyACM0", SAMSUNG_VID, 0x6861);
        assert!(ProtocolFamily::is_ambiguous(&unknown));
        assert_eq!(ProtocolFamily::classify(&unknown), ProtocolFamily::Generic);

        let odin = PortInfo::usb("/dev/ttyACM1", SAMSUNG_VID, EXYNOS_ODIN_MODE_PID);
        assert!(!ProtocolFamily::is_ambiguous(&odin));
        assert!(!ProtocolFamily::is_ambiguous(&PortInfo::usb("/dev/ttyACM2", 0x03EB, 0x6124)));
        assert!(!ProtocolFamily::is_ambiguous(&PortInfo::default()));
    }

    #[test]
    fn test_soc_table_lookup() {
        let soc = soc_info(SAMSUNG_VID, EXYNOS_ODIN_MODE_PID).unwrap();
        assert_eq!(soc.soc_name, "Exynos");
        assert_eq!(soc.manufacturer, "Samsung");
        assert!(flash_layout(soc.flash_layout).is_some());
        assert!(soc_info(0x1234, 0x5678).is_none());

        // Every table entry is a flashing mode with a resolvable layout
        for soc in SOC_TABLE {
            assert!(is_bootloader_mode(soc.vid, soc.pid), "{soc:?}");
            assert!(flash_layout(soc.flash_layout).is_some(), "{soc:?}");
        }
    }

    #[test]
    fn test_flash_layouts_are_ordered_and_disjoint() {
        for (name, layout) in FLASH_LAYOUTS {
            for pair in layout.windows(2) {
                assert!(
                    pair[0].start_address + pair[0].size <= pair[1].start_address,
                    "{name}: {} overlaps {}",
                    pair[0].name,
                    pair[1].name
                );
            }
        }
        assert_eq!(flash_layout("EXYNOS").map(<[_]>::len), Some(5));
        assert!(flash_layout("unknown").is_none());
    }

    #[test]
    fn test_bridge_kind_from_vid_pid() {
        assert_eq!(BridgeKind::from_vid_pid(0x1A86, 0x7523), BridgeKind::Ch340);
        assert_eq!(BridgeKind::from_vid_pid(0x10C4, 0xEA60), BridgeKind::Cp210x);
        assert_eq!(BridgeKind::from_vid_pid(0x03EB, 0x6124), BridgeKind::SamBa);
        assert_eq!(BridgeKind::from_vid_pid(0x1A86, 0x0001), BridgeKind::Unknown);
        assert_eq!(BridgeKind::SamBa.name(), "SAM-BA");
    }

    #[test]
    fn test_generic_candidate_by_strings() {
        let port = PortInfo {
            name: "/dev/ttyUSB3".into(),
            manufacturer: Some("Microchip Technology Inc.".into()),
            ..Default::default()
        };
        assert!(is_generic_candidate(&port));

        let port = PortInfo {
            name: "COM7".into(),
            product: Some("USB Serial Device".into()),
            ..Default::default()
        };
        assert!(is_generic_candidate(&port));

        let port = PortInfo {
            name: "/dev/ttyS0".into(),
            ..Default::default()
        };
        assert!(!is_generic_candidate(&port));
    }

    #[test]
    fn test_family_from_signature() {
        assert_eq!(ProtocolFamily::from_signature("samsung"), ProtocolFamily::Samsung);
        assert_eq!(ProtocolFamily::from_signature("Samsung"), ProtocolFamily::Generic);
        assert_eq!(ProtocolFamily::from_signature("generic"), ProtocolFamily::Generic);
        assert_eq!(ProtocolFamily::Samsung.to_string(), "samsung");
    }
}
