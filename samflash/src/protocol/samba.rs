//! SAM-BA style command set for generic serial bootloaders.
//!
//! Commands are ASCII, terminated by `#`. Addresses and lengths are eight
//! upper-case hex digits:
//!
//! ```text
//! N#                      enter binary mode, device answers "\n\r"
//! V#                      version string terminated by "\n\r"
//! S{addr},{len}#<data>    write len bytes, device answers "\n\r"
//! R{addr},{len}#          device sends len raw bytes
//! E{addr}#                erase the page at addr, device answers "\n\r"
//! X#                      erase the whole flash, device answers "\n\r"
//! G{addr}#                jump to addr (leave the bootloader)
//! ```

/// Command terminator.
pub const TERMINATOR: u8 = b'#';

/// Acknowledgement / line terminator sent by the device.
pub const LINE_END: &[u8] = b"\n\r";

/// Page size of generic bootloader devices.
pub const PAGE_SIZE: usize = 256;

/// Flash size assumed until the device reports otherwise.
pub const DEFAULT_FLASH_SIZE: usize = 1024 * 1024;

/// Longest version string we wait for.
pub const MAX_VERSION_LEN: usize = 128;

/// Bootloader command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Switch to binary (non-terminal) mode; doubles as the handshake.
    Normal,
    /// Query the bootloader version.
    Version,
    /// Write `len` bytes at `addr`; the data follows the command.
    Write {
        /// Flash address.
        addr: u32,
        /// Byte count.
        len: u32,
    },
    /// Read `len` bytes from `addr`.
    Read {
        /// Flash address.
        addr: u32,
        /// Byte count.
        len: u32,
    },
    /// Erase the page containing `addr`.
    ErasePage {
        /// Flash address.
        addr: u32,
    },
    /// Erase the whole flash.
    EraseAll,
    /// Jump to `addr`, leaving the bootloader.
    Go {
        /// Entry address.
        addr: u32,
    },
}

impl Command {
    /// Encode the command, including the terminator.
    pub fn encode(&self) -> Vec<u8> {
        let text = match self {
            Self::Normal => "N#".to_string(),
            Self::Version => "V#".to_string(),
            Self::Write { addr, len } => format!("S{addr:08X},{len:08X}#"),
            Self::Read { addr, len } => format!("R{addr:08X},{len:08X}#"),
            Self::ErasePage { addr } => format!("E{addr:08X}#"),
            Self::EraseAll => "X#".to_string(),
            Self::Go { addr } => format!("G{addr:08X}#"),
        };
        text.into_bytes()
    }

    /// Parse a command frame (terminator included).
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let (&last, body) = frame.split_last()?;
        if last != TERMINATOR {
            return None;
        }
        let (&op, args) = body.split_first()?;
        let args = std::str::from_utf8(args).ok()?;

        match op {
            b'N' if args.is_empty() => Some(Self::Normal),
            b'V' if args.is_empty() => Some(Self::Version),
            b'X' if args.is_empty() => Some(Self::EraseAll),
            b'S' | b'R' => {
                let (addr, len) = args.split_once(',')?;
                let addr = parse_hex(addr)?;
                let len = parse_hex(len)?;
                Some(if op == b'S' {
                    Self::Write { addr, len }
                } else {
                    Self::Read { addr, len }
                })
            },
            b'E' => Some(Self::ErasePage {
                addr: parse_hex(args)?,
            }),
            b'G' => Some(Self::Go {
                addr: parse_hex(args)?,
            }),
            _ => None,
        }
    }
}

fn parse_hex(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 8 {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

/// Whether a reply to [`Command::Normal`] is a valid handshake.
pub fn is_handshake_ack(response: &[u8]) -> bool {
    matches!(response.first(), Some(b'\n' | b'\r'))
}

/// Whether a reply is the plain acknowledgement.
pub fn is_ack(response: &[u8]) -> bool {
    response == LINE_END
}

/// Extract the version string from a reply to [`Command::Version`].
pub fn parse_version(response: &[u8]) -> Option<String> {
    let body = response.strip_suffix(LINE_END).unwrap_or(response);
    let version = String::from_utf8_lossy(body).trim().to_string();
    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}
