//! Samsung download (Odin) protocol framing.
//!
//! Two layers share the wire:
//!
//! - **Probe frames** are 4-byte commands used before a session exists, both
//!   to detect the protocol and to query chip details. Query replies echo the
//!   command, then carry a little-endian `u32` payload length and the payload.
//! - **Control packets** drive a session. Each is exactly
//!   [`CONTROL_PACKET_SIZE`] bytes:
//!
//! ```text
//! +--------------+-----------+------------------+-----------+
//! | control type |  request  |  args (6 x u32)  |  padding  |
//! +--------------+-----------+------------------+-----------+
//! |   u32 LE     |  u32 LE   |      u32 LE      |   zeros   |
//! +--------------+-----------+------------------+-----------+
//! ```
//!
//! Every control packet is answered by an 8-byte [`Response`]
//! `{control type echo, data}`.

use {
    crate::error::{Error, Result},
    byteorder::{ByteOrder, LittleEndian, WriteBytesExt},
};

/// Size of a control packet.
pub const CONTROL_PACKET_SIZE: usize = 1024;

/// Size of a response packet.
pub const RESPONSE_SIZE: usize = 8;

/// Size of a file data packet; also the Samsung page size.
pub const DATA_PACKET_SIZE: usize = 1024;

/// [`DATA_PACKET_SIZE`] as a control packet argument.
pub const DATA_PACKET_LEN: u32 = 1024;

const _: () = assert!(DATA_PACKET_LEN as usize == DATA_PACKET_SIZE);

/// PIT bytes delivered per part request.
pub const PIT_PART_SIZE: usize = 500;

/// Maximum number of argument words in a control packet.
pub const MAX_ARGS: usize = 6;

/// Odin handshake probe.
pub const ODIN_HANDSHAKE: [u8; 4] = [0x18, 0x00, 0x00, 0x00];
/// Download-mode handshake probe.
pub const DOWNLOAD_MODE_HANDSHAKE: [u8; 4] = [0x02, 0x00, 0x00, 0x00];
/// Chip ID query.
pub const CHIP_ID_QUERY: [u8; 4] = [0x16, 0x00, 0x00, 0x00];
/// Bootloader version query.
pub const BOOTLOADER_VERSION_QUERY: [u8; 4] = [0x17, 0x00, 0x00, 0x00];
/// Security (anti-rollback) version query.
pub const SECURITY_VERSION_QUERY: [u8; 4] = [0x19, 0x00, 0x00, 0x00];
/// Flash info query.
pub const FLASH_INFO_QUERY: [u8; 4] = [0x1A, 0x00, 0x00, 0x00];

/// Reply to [`ODIN_HANDSHAKE`] from a device in Odin mode.
pub const ODIN_RESPONSE_OK: [u8; 8] = [0x18, 0x00, 0x00, 0x00, b'O', b'K', b'A', b'Y'];
/// Reply to [`DOWNLOAD_MODE_HANDSHAKE`] from a device in download mode.
pub const DOWNLOAD_RESPONSE_OK: [u8; 9] = [0x02, 0x00, 0x00, 0x00, b'R', b'E', b'A', b'D', b'Y'];

/// Longest query payload accepted.
pub const MAX_QUERY_PAYLOAD: usize = 256;

/// Control packet family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ControlType {
    /// Session management.
    Session = 0x64,
    /// Partition information table transfer.
    PitFile = 0x65,
    /// Firmware data transfer.
    FileTransfer = 0x66,
    /// Session teardown.
    EndSession = 0x67,
}

impl ControlType {
    /// Decode a control type word.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x64 => Some(Self::Session),
            0x65 => Some(Self::PitFile),
            0x66 => Some(Self::FileTransfer),
            0x67 => Some(Self::EndSession),
            _ => None,
        }
    }
}

/// Requests under [`ControlType::Session`].
pub mod session {
    /// Begin a session; response data is the protocol version.
    pub const BEGIN: u32 = 0;
    /// Query the device type.
    pub const DEVICE_TYPE: u32 = 1;
    /// Announce the total bytes about to be sent.
    pub const TOTAL_BYTES: u32 = 2;
    /// Negotiate the file part size.
    pub const FILE_PART_SIZE: u32 = 5;
    /// Erase all user flash.
    pub const ERASE_ALL: u32 = 7;
}

/// Requests under [`ControlType::PitFile`].
pub mod pit_request {
    /// Upload a new PIT (unused; we never repartition).
    pub const FLASH: u32 = 0;
    /// Ask for the PIT; response data is its size in bytes.
    pub const DUMP: u32 = 1;
    /// Fetch one [`PIT_PART_SIZE`](super::PIT_PART_SIZE) part by index.
    pub const PART: u32 = 2;
    /// End the PIT transfer.
    pub const END_TRANSFER: u32 = 3;
}

/// Requests under [`ControlType::FileTransfer`].
pub mod file_request {
    /// Begin a write sequence.
    pub const FLASH: u32 = 0;
    /// Read back `len` bytes at `addr`.
    pub const DUMP: u32 = 1;
    /// Announce one data packet: `addr, len, index`.
    pub const PART: u32 = 2;
    /// End a write sequence: `total bytes`.
    pub const END: u32 = 3;
    /// Erase `len` bytes at `addr`.
    pub const ERASE: u32 = 4;
}

/// Requests under [`ControlType::EndSession`].
pub mod end_session {
    /// Close the session.
    pub const END: u32 = 0;
    /// Close the session and reboot.
    pub const REBOOT: u32 = 1;
}

/// Session control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPacket {
    /// Packet family.
    pub control: ControlType,
    /// Request within the family.
    pub request: u32,
    /// Request arguments, zero when unused.
    pub args: [u32; MAX_ARGS],
}

impl ControlPacket {
    /// Create a packet without arguments.
    pub fn new(control: ControlType, request: u32) -> Self {
        Self {
            control,
            request,
            args: [0; MAX_ARGS],
        }
    }

    fn with_args(mut self, args: &[u32]) -> Self {
        for (slot, value) in self.args.iter_mut().zip(args) {
            *slot = *value;
        }
        self
    }

    /// Begin a session.
    pub fn begin_session() -> Self {
        Self::new(ControlType::Session, session::BEGIN)
    }

    /// Query the device type.
    pub fn device_type() -> Self {
        Self::new(ControlType::Session, session::DEVICE_TYPE)
    }

    /// Erase all user flash.
    pub fn erase_all() -> Self {
        Self::new(ControlType::Session, session::ERASE_ALL)
    }

    /// Request the PIT size.
    pub fn pit_dump() -> Self {
        Self::new(ControlType::PitFile, pit_request::DUMP)
    }

    /// Request one PIT part.
    pub fn pit_part(index: u32) -> Self {
        Self::new(ControlType::PitFile, pit_request::PART).with_args(&[index])
    }

    /// End the PIT transfer.
    pub fn pit_end() -> Self {
        Self::new(ControlType::PitFile, pit_request::END_TRANSFER)
    }

    /// Begin a write sequence.
    pub fn file_begin() -> Self {
        Self::new(ControlType::FileTransfer, file_request::FLASH)
    }

    /// Announce a data packet.
    pub fn file_part(addr: u32, len: u32, index: u32) -> Self {
        Self::new(ControlType::FileTransfer, file_request::PART).with_args(&[addr, len, index])
    }

    /// Request a read-back.
    pub fn file_dump(addr: u32, len: u32) -> Self {
        Self::new(ControlType::FileTransfer, file_request::DUMP).with_args(&[addr, len])
    }

    /// Erase a flash range.
    pub fn file_erase(addr: u32, len: u32) -> Self {
        Self::new(ControlType::FileTransfer, file_request::ERASE).with_args(&[addr, len])
    }

    /// End a write sequence.
    pub fn file_end(total_bytes: u32) -> Self {
        Self::new(ControlType::FileTransfer, file_request::END).with_args(&[total_bytes])
    }

    /// Close the session.
    pub fn end_session() -> Self {
        Self::new(ControlType::EndSession, end_session::END)
    }

    /// Build the padded wire representation.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CONTROL_PACKET_SIZE);
        buf.write_u32::<LittleEndian>(self.control as u32)
            .unwrap();
        buf.write_u32::<LittleEndian>(self.request)
            .unwrap();
        for arg in self.args {
            buf.write_u32::<LittleEndian>(arg)
                .unwrap();
        }
        buf.resize(CONTROL_PACKET_SIZE, 0);
        buf
    }

    /// Parse a control packet.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < CONTROL_PACKET_SIZE {
            return None;
        }
        let control = ControlType::from_u32(LittleEndian::read_u32(&data[0..4]))?;
        let request = LittleEndian::read_u32(&data[4..8]);
        let mut args = [0u32; MAX_ARGS];
        for (i, arg) in args.iter_mut().enumerate() {
            let at = 8 + i * 4;
            *arg = LittleEndian::read_u32(&data[at..at + 4]);
        }
        Some(Self {
            control,
            request,
            args,
        })
    }
}

/// Response to a control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    /// Echoed control type word.
    pub control: u32,
    /// Request-specific data.
    pub data: u32,
}

impl Response {
    /// Build a response (device side).
    pub fn build(control: ControlType, data: u32) -> [u8; RESPONSE_SIZE] {
        let mut buf = [0u8; RESPONSE_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], control as u32);
        LittleEndian::write_u32(&mut buf[4..8], data);
        buf
    }

    /// Parse a response.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < RESPONSE_SIZE {
            return None;
        }
        Some(Self {
            control: LittleEndian::read_u32(&data[0..4]),
            data: LittleEndian::read_u32(&data[4..8]),
        })
    }

    /// Check the echoed control type and return the data word.
    pub fn expect(self, control: ControlType) -> Result<u32> {
        if self.control == control as u32 {
            Ok(self.data)
        } else {
            Err(Error::Protocol(format!(
                "expected {control:?} response (0x{:02X}), got 0x{:08X}",
                control as u32, self.control
            )))
        }
    }
}

/// Pad a firmware chunk to a full data packet.
pub fn data_packet(chunk: &[u8]) -> Vec<u8> {
    let mut packet = chunk.to_vec();
    packet.resize(DATA_PACKET_SIZE.max(chunk.len()), 0);
    packet
}

/// Build a reply to a probe query (device side).
#[allow(clippy::cast_possible_truncation)]
pub fn build_query_reply(command: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut reply = command.to_vec();
    let mut len = [0u8; 4];
    // Query payloads are bounded by MAX_QUERY_PAYLOAD
    LittleEndian::write_u32(&mut len, payload.len() as u32);
    reply.extend_from_slice(&len);
    reply.extend_from_slice(payload);
    reply
}

/// Split a probe query reply into its payload.
///
/// Returns `None` when the echo is wrong, the length field is missing or
/// the payload is shorter than announced.
pub fn parse_query_reply<'a>(command: &[u8; 4], reply: &'a [u8]) -> Option<&'a [u8]> {
    if reply.len() < 8 || reply[..4] != command[..] {
        return None;
    }
    let len = LittleEndian::read_u32(&reply[4..8]) as usize;
    if len > MAX_QUERY_PAYLOAD {
        return None;
    }
    reply.get(8..8 + len)
}

/// Render bytes as space separated hex for diagnostics.
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
