//! NTFS on-disk structures and constants
//!
//! Fixed layouts of the boot sector, the file record header, attribute
//! headers and the few attribute values the reader decodes.

use crate::error::{MftError, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

// ============================================================================
// Constants
// ============================================================================

/// "FILE" read as a little-endian u32
pub const MFT_RECORD_SIGNATURE: u32 = 0x454C4946;

pub const ATTRIBUTE_END_MARKER: u32 = 0xFFFFFFFF;

/// Update sequence stride. Fixups always protect 512-byte blocks,
/// independent of the physical sector size.
pub const SECTOR_SIZE: u32 = 512;

pub const NTFS_OEM_ID: &[u8; 8] = b"NTFS    ";

/// Record number of the root directory
pub const ROOT_RECORD_NUMBER: u64 = 5;

/// Low 48 bits of a file reference; the high 16 hold the sequence number
pub const FILE_REFERENCE_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

const RECORD_IN_USE: u16 = 0x0001;
const RECORD_IS_DIRECTORY: u16 = 0x0002;

// ============================================================================
// Attribute Types
// ============================================================================

/// Attribute type codes the reader acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AttributeType {
    StandardInformation = 0x10,
    AttributeList = 0x20,
    FileName = 0x30,
    Data = 0x80,
    IndexAllocation = 0xA0,
    Bitmap = 0xB0,
    ReparsePoint = 0xC0,
}

impl AttributeType {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0x10 => Self::StandardInformation,
            0x20 => Self::AttributeList,
            0x30 => Self::FileName,
            0x80 => Self::Data,
            0xA0 => Self::IndexAllocation,
            0xB0 => Self::Bitmap,
            0xC0 => Self::ReparsePoint,
            _ => return None,
        })
    }
}

// ============================================================================
// Filename Namespace
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilenameNamespace {
    Posix,
    Win32,
    Dos,
    Win32AndDos,
}

impl FilenameNamespace {
    pub fn from_u8(value: u8) -> Option<Self> {
        [Self::Posix, Self::Win32, Self::Dos, Self::Win32AndDos]
            .get(value as usize)
            .copied()
    }

    /// Preference when a record carries several names:
    /// Win32, then Win32+DOS, then POSIX, then DOS
    pub fn rank(&self) -> u8 {
        match self {
            Self::Win32 => 3,
            Self::Win32AndDos => 2,
            Self::Posix => 1,
            Self::Dos => 0,
        }
    }
}

// ============================================================================
// Volume Geometry (decoded boot sector)
// ============================================================================

/// Volume geometry decoded from the NTFS boot sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeGeometry {
    /// Bytes per sector (offset 0x0B, typically 512)
    pub bytes_per_sector: u32,
    /// Sectors per cluster (offset 0x0D)
    pub sectors_per_cluster: u32,
    /// Total sectors on volume (offset 0x28)
    pub total_sectors: u64,
    /// MFT starting cluster number / LCN (offset 0x30)
    pub mft_start_lcn: u64,
    /// MFT mirror starting cluster number (offset 0x38)
    pub mft_mirror_start_lcn: u64,
    /// Clusters per file record as stored on disk (offset 0x40, signed)
    pub clusters_per_file_record: i8,
    /// Clusters per index record as stored on disk (offset 0x44, signed)
    pub clusters_per_index_record: i8,
    /// Volume serial number (offset 0x48)
    pub volume_serial_number: u64,
    pub bytes_per_cluster: u32,
    pub bytes_per_file_record: u32,
    pub bytes_per_index_record: u32,
}

impl VolumeGeometry {
    /// Decode the first sector of a volume.
    ///
    /// `volume` only names the volume in errors.
    pub fn from_boot_sector(data: &[u8], volume: &str) -> Result<Self> {
        let not_ntfs = || MftError::NotNtfsVolume(volume.to_string());

        if data.len() < 0x50 || &data[0x03..0x0B] != NTFS_OEM_ID {
            return Err(not_ntfs());
        }

        let mut cursor = Cursor::new(&data[0x0B..]);
        let bytes_per_sector = cursor.read_u16::<LittleEndian>().map_err(|_| not_ntfs())? as u32;
        let sectors_per_cluster = decode_size_exponent(data[0x0D], 1).ok_or_else(not_ntfs)?;

        cursor.set_position(0x28 - 0x0B);
        let total_sectors = cursor.read_u64::<LittleEndian>().map_err(|_| not_ntfs())?;
        let mft_start_lcn = cursor.read_u64::<LittleEndian>().map_err(|_| not_ntfs())?;
        let mft_mirror_start_lcn = cursor.read_u64::<LittleEndian>().map_err(|_| not_ntfs())?;
        let clusters_per_file_record = data[0x40] as i8;
        let clusters_per_index_record = data[0x44] as i8;
        cursor.set_position(0x48 - 0x0B);
        let volume_serial_number = cursor.read_u64::<LittleEndian>().map_err(|_| not_ntfs())?;

        if bytes_per_sector < 256 || !bytes_per_sector.is_power_of_two() {
            return Err(not_ntfs());
        }
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(not_ntfs());
        }

        let bytes_per_cluster = bytes_per_sector
            .checked_mul(sectors_per_cluster)
            .ok_or_else(not_ntfs)?;
        let bytes_per_file_record =
            decode_size_exponent(clusters_per_file_record as u8, bytes_per_cluster)
                .ok_or_else(not_ntfs)?;
        let bytes_per_index_record =
            decode_size_exponent(clusters_per_index_record as u8, bytes_per_cluster)
                .unwrap_or(0);

        if bytes_per_file_record < SECTOR_SIZE
            || !bytes_per_file_record.is_power_of_two()
            || bytes_per_file_record > 64 * 1024
        {
            return Err(not_ntfs());
        }
        // Record 0 must be addressable
        mft_start_lcn
            .checked_mul(bytes_per_cluster as u64)
            .and_then(|offset| offset.checked_add(bytes_per_file_record as u64))
            .ok_or_else(not_ntfs)?;

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            mft_start_lcn,
            mft_mirror_start_lcn,
            clusters_per_file_record,
            clusters_per_index_record,
            volume_serial_number,
            bytes_per_cluster,
            bytes_per_file_record,
            bytes_per_index_record,
        })
    }

    /// Byte offset of the MFT on disk
    pub fn mft_byte_offset(&self) -> u64 {
        self.mft_start_lcn
            .saturating_mul(self.bytes_per_cluster as u64)
    }

    /// Total volume size in bytes
    pub fn volume_size(&self) -> u64 {
        self.total_sectors
            .saturating_mul(self.bytes_per_sector as u64)
    }
}

/// Decode a boot sector size byte.
///
/// Values 0x01..=0x7F are a multiple of `unit`; values 0x80..=0xFF encode
/// a size of 2^(256 - value) bytes.
fn decode_size_exponent(value: u8, unit: u32) -> Option<u32> {
    match value {
        0 => None,
        1..=0x7F => (value as u32).checked_mul(unit),
        _ => {
            let shift = 256 - value as u32;
            if shift >= 32 {
                None
            } else {
                Some(1u32 << shift)
            }
        }
    }
}

// ============================================================================
// File Record Header
// ============================================================================

/// Fields of the 48-byte file record header used by the reader
#[derive(Debug, Clone, Copy, Default)]
pub struct MftRecordHeader {
    pub signature: u32,
    pub update_sequence_offset: u16,
    /// Entries in the update sequence array, the sequence number included
    pub update_sequence_size: u16,
    pub first_attribute_offset: u16,
    pub flags: u16,
    pub base_record_reference: u64,
}

impl MftRecordHeader {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let header = data.get(..48)?;
        Some(Self {
            signature: LittleEndian::read_u32(&header[0x00..]),
            update_sequence_offset: LittleEndian::read_u16(&header[0x04..]),
            update_sequence_size: LittleEndian::read_u16(&header[0x06..]),
            first_attribute_offset: LittleEndian::read_u16(&header[0x14..]),
            flags: LittleEndian::read_u16(&header[0x16..]),
            base_record_reference: LittleEndian::read_u64(&header[0x20..]),
        })
    }

    /// Signature is "FILE"
    pub fn is_valid(&self) -> bool {
        self.signature == MFT_RECORD_SIGNATURE
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & RECORD_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & RECORD_IS_DIRECTORY != 0
    }

    /// Extension records point at their base record; base records hold 0.
    /// The full reference counts: the extensions of record 0 store only a
    /// sequence number in the upper 16 bits.
    pub fn is_base_record(&self) -> bool {
        self.base_record_reference == 0
    }
}

// ============================================================================
// Attribute Headers
// ============================================================================

/// Common 16-byte prefix of every attribute
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeHeader {
    pub attribute_type: u32,
    pub length: u32,
    pub non_resident: bool,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
}

impl AttributeHeader {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let header = data.get(..16)?;
        Some(Self {
            attribute_type: LittleEndian::read_u32(&header[0..]),
            length: LittleEndian::read_u32(&header[4..]),
            non_resident: header[8] != 0,
            name_length: header[9],
            name_offset: LittleEndian::read_u16(&header[10..]),
            flags: LittleEndian::read_u16(&header[12..]),
        })
    }

    /// Attribute name; unnamed attributes give an empty string
    pub fn name(&self, attr_data: &[u8]) -> Option<String> {
        if self.name_length == 0 {
            return Some(String::new());
        }
        let start = self.name_offset as usize;
        let end = start + self.name_length as usize * 2;
        attr_data.get(start..end).map(decode_utf16le)
    }
}

/// Value location of a resident attribute
#[derive(Debug, Clone, Copy)]
pub struct ResidentAttributeHeader {
    pub value_length: u32,
    pub value_offset: u16,
}

impl ResidentAttributeHeader {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.get(8) != Some(&0) {
            return None;
        }
        let fields = data.get(16..22)?;
        Some(Self {
            value_length: LittleEndian::read_u32(&fields[0..]),
            value_offset: LittleEndian::read_u16(&fields[4..]),
        })
    }

    pub fn value<'a>(&self, attr_data: &'a [u8]) -> Option<&'a [u8]> {
        let start = self.value_offset as usize;
        let end = start.checked_add(self.value_length as usize)?;
        attr_data.get(start..end)
    }
}

/// VCN range, run list location and sizes of a non-resident attribute
#[derive(Debug, Clone, Copy)]
pub struct NonResidentAttributeHeader {
    pub lowest_vcn: u64,
    pub data_runs_offset: u16,
    pub allocated_size: u64,
    pub data_size: u64,
}

impl NonResidentAttributeHeader {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.get(8).copied().unwrap_or(0) == 0 {
            return None;
        }
        let fields = data.get(..64)?;
        Some(Self {
            lowest_vcn: LittleEndian::read_u64(&fields[0x10..]),
            data_runs_offset: LittleEndian::read_u16(&fields[0x20..]),
            allocated_size: LittleEndian::read_u64(&fields[0x28..]),
            data_size: LittleEndian::read_u64(&fields[0x30..]),
        })
    }
}

// ============================================================================
// Attribute Values
// ============================================================================

/// $STANDARD_INFORMATION: FILETIME stamps and DOS attribute flags
#[derive(Debug, Clone, Default)]
pub struct StandardInformation {
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_modification_time: u64,
    pub access_time: u64,
    pub file_attributes: u32,
}

impl StandardInformation {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data.get(..36)?);
        Some(Self {
            creation_time: cursor.read_u64::<LittleEndian>().ok()?,
            modification_time: cursor.read_u64::<LittleEndian>().ok()?,
            mft_modification_time: cursor.read_u64::<LittleEndian>().ok()?,
            access_time: cursor.read_u64::<LittleEndian>().ok()?,
            file_attributes: cursor.read_u32::<LittleEndian>().ok()?,
        })
    }
}

/// $FILE_NAME: parent reference and one name of the file
#[derive(Debug, Clone)]
pub struct FileNameAttribute {
    pub parent_reference: u64,
    pub file_attributes: u32,
    pub namespace: FilenameNamespace,
    pub name: String,
}

impl FileNameAttribute {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let fixed = data.get(..66)?;
        let name_length = fixed[64] as usize;
        Some(Self {
            parent_reference: LittleEndian::read_u64(&fixed[0..]),
            file_attributes: LittleEndian::read_u32(&fixed[56..]),
            namespace: FilenameNamespace::from_u8(fixed[65])?,
            name: decode_utf16le(data.get(66..66 + name_length * 2)?),
        })
    }

    pub fn parent_record_number(&self) -> u64 {
        self.parent_reference & FILE_REFERENCE_MASK
    }
}

/// One $ATTRIBUTE_LIST entry: where a piece of an attribute is stored
#[derive(Debug, Clone)]
pub struct AttributeListEntry {
    pub attribute_type: u32,
    pub starting_vcn: u64,
    pub mft_reference: u64,
    pub name: String,
}

impl AttributeListEntry {
    /// Parse one entry and return it with its length
    pub fn from_bytes(data: &[u8]) -> Option<(Self, usize)> {
        let fixed = data.get(..26)?;
        let entry_length = LittleEndian::read_u16(&fixed[4..]) as usize;
        if entry_length < 26 || entry_length > data.len() {
            return None;
        }

        let name_length = fixed[6] as usize;
        let name_offset = fixed[7] as usize;
        let name = match name_length {
            0 => String::new(),
            n => decode_utf16le(data.get(name_offset..name_offset + n * 2)?),
        };

        let entry = Self {
            attribute_type: LittleEndian::read_u32(&fixed[0..]),
            starting_vcn: LittleEndian::read_u64(&fixed[8..]),
            mft_reference: LittleEndian::read_u64(&fixed[16..]),
            name,
        };
        Some((entry, entry_length))
    }

    /// Record holding this piece
    pub fn record_number(&self) -> u64 {
        self.mft_reference & FILE_REFERENCE_MASK
    }
}

/// Entries of an attribute list value; stops at the first malformed entry
pub fn parse_attribute_list(data: &[u8]) -> Vec<AttributeListEntry> {
    let mut entries = Vec::new();
    let mut rest = data;
    while let Some((entry, length)) = AttributeListEntry::from_bytes(rest) {
        entries.push(entry);
        rest = &rest[length..];
    }
    entries
}

// ============================================================================
// Helpers
// ============================================================================

/// Decode UTF-16LE, replacing unpaired surrogates
pub fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// FILETIME (100 ns ticks since 1601) to UTC; `None` before 1970
pub fn filetime_to_datetime(filetime: u64) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::{TimeZone, Utc};
    const UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;

    let ticks = filetime.checked_sub(UNIX_EPOCH_TICKS)?;
    Utc.timestamp_opt((ticks / 10_000_000) as i64, (ticks % 10_000_000) as u32 * 100)
        .single()
}

// ============================================================================
// File Attributes
// ============================================================================

/// DOS attribute flags of $STANDARD_INFORMATION and $FILE_NAME
pub mod file_attributes {
    pub const HIDDEN: u32 = 0x0002;
    pub const SYSTEM: u32 = 0x0004;
    pub const DIRECTORY: u32 = 0x0010;
    pub const ARCHIVE: u32 = 0x0020;
    pub const REPARSE_POINT: u32 = 0x0400;
}
