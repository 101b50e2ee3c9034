//! Partition Information Table (PIT) parsing.
//!
//! ## Layout
//!
//! ```text
//! Header (28 bytes)
//! +------------+-------------+-----------------------+
//! |   Magic    | Entry count |  Reserved (20 bytes)  |
//! +------------+-------------+-----------------------+
//! | 0x12349876 |   u32 LE    |                       |
//! +------------+-------------+-----------------------+
//!
//! Entry (132 bytes, repeated `entry count` times)
//! +-------------------------------------------------+
//! | binary_type          u32 LE                     |
//! | device_type          u32 LE                     |
//! | identifier           u32 LE                     |
//! | attributes           u32 LE                     |
//! | update_attributes    u32 LE                     |
//! | block_size_or_offset u32 LE  (start, blocks)    |
//! | block_count_or_size  u32 LE  (length, blocks)   |
//! | file_offset          u32 LE                     |
//! | file_size            u32 LE                     |
//! | partition_name       [u8; 32] NUL terminated    |
//! | flash_filename       [u8; 32] NUL terminated    |
//! | fota_filename        [u8; 32] NUL terminated    |
//! +-------------------------------------------------+
//! ```

use {
    crate::error::{Error, Result},
    byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt},
    std::io::{Cursor, Read},
};

/// PIT magic number.
pub const PIT_MAGIC: u32 = 0x12349876;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 28;

/// Entry size in bytes.
pub const ENTRY_SIZE: usize = 132;

/// Size of each string field in an entry.
pub const NAME_SIZE: usize = 32;

/// Size of one device-native block.
pub const BLOCK_SIZE: u64 = 512;

/// Upper bound on entries; real tables hold a few dozen.
pub const MAX_ENTRIES: usize = 512;

/// Partition may be written by the host.
pub const ATTRIBUTE_WRITE: u32 = 0x01;

/// Partition is an STL (sector translation) volume.
pub const ATTRIBUTE_STL: u32 = 0x02;

/// A single PIT entry, in device order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PitEntry {
    /// Processor the image belongs to (0 = AP, 1 = CP).
    pub binary_type: u32,
    /// Storage device type.
    pub device_type: u32,
    /// Partition identifier.
    pub identifier: u32,
    /// Attribute flags ([`ATTRIBUTE_WRITE`], [`ATTRIBUTE_STL`]).
    pub attributes: u32,
    /// Update attribute flags.
    pub update_attributes: u32,
    /// Start offset, in blocks.
    pub block_size_or_offset: u32,
    /// Length, in blocks.
    pub block_count_or_size: u32,
    /// Offset into the flash file.
    pub file_offset: u32,
    /// Size of the flash file.
    pub file_size: u32,
    /// Partition name.
    pub partition_name: String,
    /// File normally flashed to this partition.
    pub flash_filename: String,
    /// FOTA file name.
    pub fota_filename: String,
}

impl PitEntry {
    /// Entries the host may write are the ones that must never overlap.
    pub fn is_critical(&self) -> bool {
        self.attributes & ATTRIBUTE_WRITE != 0
    }

    /// Start address in bytes.
    pub fn start_address(&self) -> u64 {
        u64::from(self.block_size_or_offset) * BLOCK_SIZE
    }

    /// Length in bytes.
    pub fn size_bytes(&self) -> u64 {
        u64::from(self.block_count_or_size) * BLOCK_SIZE
    }

    fn end_address(&self) -> u64 {
        self.start_address() + self.size_bytes()
    }

    fn overlaps(&self, other: &Self) -> bool {
        self.size_bytes() > 0
            && other.size_bytes() > 0
            && self.start_address() < other.end_address()
            && other.start_address() < self.end_address()
    }

    fn read_from(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        Ok(Self {
            binary_type: cursor.read_u32::<LittleEndian>()?,
            device_type: cursor.read_u32::<LittleEndian>()?,
            identifier: cursor.read_u32::<LittleEndian>()?,
            attributes: cursor.read_u32::<LittleEndian>()?,
            update_attributes: cursor.read_u32::<LittleEndian>()?,
            block_size_or_offset: cursor.read_u32::<LittleEndian>()?,
            block_count_or_size: cursor.read_u32::<LittleEndian>()?,
            file_offset: cursor.read_u32::<LittleEndian>()?,
            file_size: cursor.read_u32::<LittleEndian>()?,
            partition_name: read_name(cursor)?,
            flash_filename: read_name(cursor)?,
            fota_filename: read_name(cursor)?,
        })
    }

    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    fn write_to(&self, buf: &mut Vec<u8>) {
        for word in [
            self.binary_type,
            self.device_type,
            self.identifier,
            self.attributes,
            self.update_attributes,
            self.block_size_or_offset,
            self.block_count_or_size,
            self.file_offset,
            self.file_size,
        ] {
            buf.write_u32::<LittleEndian>(word)
                .unwrap();
        }
        for name in [&self.partition_name, &self.flash_filename, &self.fota_filename] {
            let mut field = [0u8; NAME_SIZE];
            let bytes = name.as_bytes();
            let n = bytes.len().min(NAME_SIZE - 1);
            field[..n].copy_from_slice(&bytes[..n]);
            buf.extend_from_slice(&field);
        }
    }
}

fn read_name(cursor: &mut Cursor<&[u8]>) -> std::io::Result<String> {
    let mut field = [0u8; NAME_SIZE];
    cursor.read_exact(&mut field)?;
    let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
    Ok(String::from_utf8_lossy(&field[..end]).into_owned())
}

/// A partition resolved to byte addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartitionMapping {
    /// Partition name.
    pub name: String,
    /// PIT identifier.
    pub identifier: u32,
    /// Start address in bytes.
    pub start: u64,
    /// Length in bytes.
    pub size: u64,
}

impl PartitionMapping {
    /// Whether `addr` falls inside this partition.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.start + self.size
    }
}

/// Parsed partition table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PitTable {
    entries: Vec<PitEntry>,
}

impl PitTable {
    /// Build a table from entries, validating critical overlaps.
    pub fn from_entries(entries: Vec<PitEntry>) -> Result<Self> {
        for (i, a) in entries.iter().enumerate() {
            for b in entries.iter().skip(i + 1) {
                if a.is_critical() && b.is_critical() && a.overlaps(b) {
                    return Err(Error::Pit(format!(
                        "partitions '{}' and '{}' overlap",
                        a.partition_name, b.partition_name
                    )));
                }
            }
        }
        Ok(Self { entries })
    }

    /// Parse a PIT image as returned by the device.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Pit(format!(
                "header truncated: {} of {HEADER_SIZE} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != PIT_MAGIC {
            return Err(Error::Pit(format!(
                "bad magic 0x{magic:08X}, expected 0x{PIT_MAGIC:08X}"
            )));
        }
        let count = cursor.read_u32::<LittleEndian>()? as usize;
        if count > MAX_ENTRIES {
            return Err(Error::Pit(format!("implausible entry count {count}")));
        }
        let needed = HEADER_SIZE + count * ENTRY_SIZE;
        if data.len() < needed {
            return Err(Error::Pit(format!(
                "{count} entries need {needed} bytes, got {}",
                data.len()
            )));
        }

        cursor.set_position(HEADER_SIZE as u64);
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(PitEntry::read_from(&mut cursor)?);
        }

        Self::from_entries(entries)
    }

    /// Serialize the table (used to seed simulated devices and fixtures).
    #[allow(clippy::unwrap_used, clippy::cast_possible_truncation)] // Writing to Vec<u8> cannot fail
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.entries.len() * ENTRY_SIZE);
        buf.write_u32::<LittleEndian>(PIT_MAGIC)
            .unwrap();
        // Bounded by MAX_ENTRIES
        buf.write_u32::<LittleEndian>(self.entries.len() as u32)
            .unwrap();
        buf.resize(HEADER_SIZE, 0);
        for entry in &self.entries {
            entry.write_to(&mut buf);
        }
        buf
    }

    /// Entries in device order.
    pub fn entries(&self) -> &[PitEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the device reported no layout.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find an entry by partition name.
    pub fn find(&self, name: &str) -> Option<&PitEntry> {
        self.entries
            .iter()
            .find(|e| e.partition_name == name)
    }

    /// Resolve entries with a non-zero size to byte ranges, in device order.
    pub fn map_partitions(&self) -> Vec<PartitionMapping> {
        self.entries
            .iter()
            .filter(|e| e.size_bytes() > 0)
            .map(|e| PartitionMapping {
                name: e.partition_name.clone(),
                identifier: e.identifier,
                start: e.start_address(),
                size: e.size_bytes(),
            })
            .collect()
    }
}
