//! MFT record processing
//!
//! Validates one fixed-size file record, applies the update sequence fixup
//! and extracts names, parents, flags, sizes and streams from its attributes.

use crate::config::RetrieveMode;
use crate::error::{MftError, Result};
use crate::ntfs::data_run::{decode_runs, Fragment};
use crate::ntfs::structs::*;
use serde::Serialize;
use std::fmt;

// ============================================================================
// Parsed Record Types
// ============================================================================

/// Attribute type of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StreamKind {
    Data,
    Bitmap,
    IndexAllocation,
    ReparsePoint,
    AttributeList,
    Other(u32),
}

impl StreamKind {
    pub fn from_type_code(code: u32) -> Self {
        match AttributeType::from_u32(code) {
            Some(AttributeType::Data) => Self::Data,
            Some(AttributeType::Bitmap) => Self::Bitmap,
            Some(AttributeType::IndexAllocation) => Self::IndexAllocation,
            Some(AttributeType::ReparsePoint) => Self::ReparsePoint,
            Some(AttributeType::AttributeList) => Self::AttributeList,
            _ => Self::Other(code),
        }
    }

    pub fn type_code(&self) -> u32 {
        match self {
            Self::Data => AttributeType::Data as u32,
            Self::Bitmap => AttributeType::Bitmap as u32,
            Self::IndexAllocation => AttributeType::IndexAllocation as u32,
            Self::ReparsePoint => AttributeType::ReparsePoint as u32,
            Self::AttributeList => AttributeType::AttributeList as u32,
            Self::Other(code) => *code,
        }
    }
}

/// $STANDARD_INFORMATION timestamps (FILETIME)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StandardTimes {
    pub created: u64,
    pub modified: u64,
    pub mft_changed: u64,
    pub accessed: u64,
}

/// One stream found in a record, name not yet interned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStream {
    pub kind: StreamKind,
    pub name: String,
    pub resident: bool,
    /// Logical size in bytes
    pub size: u64,
    /// Allocated size in bytes as declared by the attribute header
    pub allocated_size: u64,
    /// Clusters backed by disk space
    pub clusters: u64,
    /// VCN of the first fragment
    pub start_vcn: u64,
    pub fragments: Vec<Fragment>,
}

/// Location of an $ATTRIBUTE_LIST value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeListData {
    Resident(Vec<u8>),
    NonResident { size: u64, fragments: Vec<Fragment> },
}

/// Everything extracted from one base record
#[derive(Debug, Clone, Default)]
pub struct ParsedRecord {
    pub inode: u64,
    pub flags: u32,
    pub parent: u64,
    pub name: String,
    pub size: u64,
    pub times: Option<StandardTimes>,
    pub streams: Vec<ParsedStream>,
    pub attribute_list: Option<AttributeListData>,
}

/// Why a bitmap-live slot did not produce a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Record header clears the in-use flag
    NotInUse,
    /// Record belongs to another base record
    ExtensionRecord,
    /// Signature is not "FILE"
    BadSignature,
    Corrupt(String),
    ParentCycle,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotInUse => write!(f, "not in use"),
            SkipReason::ExtensionRecord => write!(f, "extension record"),
            SkipReason::BadSignature => write!(f, "bad signature"),
            SkipReason::Corrupt(reason) => write!(f, "corrupt: {}", reason),
            SkipReason::ParentCycle => write!(f, "cyclic parent chain"),
        }
    }
}

/// Result of processing one record buffer
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Parsed(ParsedRecord),
    Skipped(SkipReason),
}

// ============================================================================
// Fixup
// ============================================================================

/// Apply the update sequence array to repair sector boundaries.
///
/// NTFS stores the last 2 bytes of each 512-byte block in the update
/// sequence array and replaces them with a sequence number on write.
pub fn apply_fixup(inode: u64, data: &mut [u8], header: &MftRecordHeader) -> Result<()> {
    let sector_size = SECTOR_SIZE as usize;
    let usa_offset = header.update_sequence_offset as usize;
    let usa_count = header.update_sequence_size as usize;

    if usa_count < 2
        || usa_offset + usa_count * 2 > data.len()
        || (usa_count - 1) * sector_size > data.len()
    {
        return Err(MftError::FixupVerificationFailed(inode));
    }

    let seq = [data[usa_offset], data[usa_offset + 1]];

    // Verify every block before touching any of them
    for i in 1..usa_count {
        let sector_end = i * sector_size - 2;
        if data[sector_end..sector_end + 2] != seq {
            return Err(MftError::FixupVerificationFailed(inode));
        }
    }

    for i in 1..usa_count {
        let sector_end = i * sector_size - 2;
        let fixup_offset = usa_offset + i * 2;
        data[sector_end] = data[fixup_offset];
        data[sector_end + 1] = data[fixup_offset + 1];
    }

    Ok(())
}

/// Validate the signature of a raw record and apply its fixup
pub fn fixup_record(inode: u64, data: &mut [u8]) -> Result<MftRecordHeader> {
    let header = MftRecordHeader::from_bytes(data).ok_or_else(|| {
        MftError::CorruptMetadata(format!("record {} shorter than its header", inode))
    })?;
    if !header.is_valid() {
        return Err(MftError::CorruptMetadata(format!(
            "record {} has no FILE signature",
            inode
        )));
    }
    apply_fixup(inode, data, &header)?;
    Ok(header)
}

// ============================================================================
// Record Processor
// ============================================================================

/// Parses MFT records according to a retrieval mode
#[derive(Debug, Clone, Copy)]
pub struct RecordProcessor {
    mode: RetrieveMode,
}

impl RecordProcessor {
    pub fn new(mode: RetrieveMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> RetrieveMode {
        self.mode
    }

    /// Process a raw (not yet fixed up) base record.
    ///
    /// Records that are not "FILE", not in use, or extension records are
    /// reported as skipped; damaged records are errors.
    pub fn process(&self, inode: u64, data: &mut [u8]) -> Result<RecordOutcome> {
        let header = match self.validate(inode, data)? {
            Ok(header) => header,
            Err(reason) => return Ok(RecordOutcome::Skipped(reason)),
        };

        if !header.is_base_record() {
            return Ok(RecordOutcome::Skipped(SkipReason::ExtensionRecord));
        }

        let mut record = ParsedRecord {
            inode,
            ..Default::default()
        };
        self.parse_attributes(inode, data, &header, &mut record)?;

        if header.is_directory() {
            record.flags |= file_attributes::DIRECTORY;
        }

        Ok(RecordOutcome::Parsed(record))
    }

    /// Process an extension record and return only its streams.
    /// Used to follow the MFT's own attribute list.
    pub fn process_extension(&self, inode: u64, data: &mut [u8]) -> Result<Vec<ParsedStream>> {
        let header = match self.validate(inode, data)? {
            Ok(header) => header,
            Err(reason) => {
                return Err(MftError::CorruptMetadata(format!(
                    "extension record {} unusable: {}",
                    inode, reason
                )))
            }
        };

        let mut record = ParsedRecord {
            inode,
            ..Default::default()
        };
        self.parse_attributes(inode, data, &header, &mut record)?;
        Ok(record.streams)
    }

    /// Find the value of a resident attribute in an already fixed-up record
    pub fn resident_value(
        &self,
        inode: u64,
        data: &[u8],
        kind: StreamKind,
        name: &str,
    ) -> Result<Option<Vec<u8>>> {
        let header = MftRecordHeader::from_bytes(data).ok_or_else(|| {
            MftError::CorruptMetadata(format!("record {} header truncated", inode))
        })?;

        let mut found = None;
        walk_attributes(inode, data, &header, |offset, attr_header, attr_data| {
            if found.is_some()
                || attr_header.non_resident
                || attr_header.attribute_type != kind.type_code()
            {
                return Ok(());
            }
            let attr_name = attribute_name(inode, offset, attr_header, attr_data)?;
            if attr_name == name {
                found = Some(resident_slice(inode, offset, attr_data)?.to_vec());
            }
            Ok(())
        })?;
        Ok(found)
    }

    /// Check signature and in-use flag, then apply the fixup
    fn validate(
        &self,
        inode: u64,
        data: &mut [u8],
    ) -> Result<std::result::Result<MftRecordHeader, SkipReason>> {
        let header = match MftRecordHeader::from_bytes(data) {
            Some(header) => header,
            None => {
                return Err(MftError::CorruptMetadata(format!(
                    "record {} shorter than its header",
                    inode
                )))
            }
        };

        if !header.is_valid() {
            return Ok(Err(SkipReason::BadSignature));
        }
        if !header.is_in_use() {
            return Ok(Err(SkipReason::NotInUse));
        }

        apply_fixup(inode, data, &header)?;
        Ok(Ok(header))
    }

    /// Dispatch every attribute of a fixed-up record
    fn parse_attributes(
        &self,
        inode: u64,
        data: &[u8],
        header: &MftRecordHeader,
        record: &mut ParsedRecord,
    ) -> Result<()> {
        let mut best_name: Option<FileNameAttribute> = None;
        let mut standard_flags: Option<u32> = None;

        walk_attributes(inode, data, header, |offset, attr_header, attr_data| {
            match AttributeType::from_u32(attr_header.attribute_type) {
                Some(AttributeType::StandardInformation) if !attr_header.non_resident => {
                    let value = resident_slice(inode, offset, attr_data)?;
                    let info = StandardInformation::from_bytes(value).ok_or_else(|| {
                        invalid(inode, offset, "$STANDARD_INFORMATION too short")
                    })?;
                    standard_flags = Some(info.file_attributes);
                    if self.mode.contains(RetrieveMode::STANDARD_INFO) {
                        record.times = Some(StandardTimes {
                            created: info.creation_time,
                            modified: info.modification_time,
                            mft_changed: info.mft_modification_time,
                            accessed: info.access_time,
                        });
                    }
                }
                Some(AttributeType::FileName) if !attr_header.non_resident => {
                    let value = resident_slice(inode, offset, attr_data)?;
                    let file_name = FileNameAttribute::from_bytes(value)
                        .ok_or_else(|| invalid(inode, offset, "malformed $FILE_NAME"))?;
                    let better = match &best_name {
                        None => true,
                        Some(current) => file_name.namespace.rank() > current.namespace.rank(),
                    };
                    if better {
                        best_name = Some(file_name);
                    }
                }
                Some(AttributeType::AttributeList) => {
                    record.attribute_list = Some(if attr_header.non_resident {
                        let nr = non_resident_header(inode, offset, attr_data)?;
                        let runs = decode_runs(runs_slice(inode, offset, &nr, attr_data)?, 0)?;
                        AttributeListData::NonResident {
                            size: nr.data_size,
                            fragments: runs.fragments,
                        }
                    } else {
                        AttributeListData::Resident(resident_slice(inode, offset, attr_data)?.to_vec())
                    });
                }
                Some(AttributeType::Data) => {
                    self.parse_data(inode, offset, attr_header, attr_data, record)?;
                }
                _ => {
                    if attr_header.non_resident && self.mode.keeps_streams() {
                        let stream = self.non_resident_stream(inode, offset, attr_header, attr_data)?;
                        merge_stream(&mut record.streams, stream);
                    }
                }
            }
            Ok(())
        })?;

        if let Some(file_name) = best_name {
            record.parent = file_name.parent_record_number();
            record.flags = standard_flags.unwrap_or(file_name.file_attributes);
            record.name = file_name.name;
        } else if let Some(flags) = standard_flags {
            record.flags = flags;
        }

        Ok(())
    }

    /// Handle a $DATA attribute (primary or alternate stream)
    fn parse_data(
        &self,
        inode: u64,
        offset: usize,
        attr_header: &AttributeHeader,
        attr_data: &[u8],
        record: &mut ParsedRecord,
    ) -> Result<()> {
        let name = attribute_name(inode, offset, attr_header, attr_data)?;

        if attr_header.non_resident {
            let nr = non_resident_header(inode, offset, attr_data)?;
            if name.is_empty() && nr.lowest_vcn == 0 {
                record.size = nr.data_size;
            }
            if self.mode.keeps_streams() {
                let stream = self.non_resident_stream(inode, offset, attr_header, attr_data)?;
                merge_stream(&mut record.streams, stream);
            }
        } else {
            let value = resident_slice(inode, offset, attr_data)?;
            if name.is_empty() {
                record.size = value.len() as u64;
            }
            if self.mode.contains(RetrieveMode::STREAMS) {
                record.streams.push(ParsedStream {
                    kind: StreamKind::Data,
                    name,
                    resident: true,
                    size: value.len() as u64,
                    allocated_size: 0,
                    clusters: 0,
                    start_vcn: 0,
                    fragments: Vec::new(),
                });
            }
        }

        Ok(())
    }

    /// Build a stream from a non-resident attribute, decoding its runs
    fn non_resident_stream(
        &self,
        inode: u64,
        offset: usize,
        attr_header: &AttributeHeader,
        attr_data: &[u8],
    ) -> Result<ParsedStream> {
        let nr = non_resident_header(inode, offset, attr_data)?;
        let name = attribute_name(inode, offset, attr_header, attr_data)?;
        let runs = decode_runs(runs_slice(inode, offset, &nr, attr_data)?, nr.lowest_vcn)?;

        Ok(ParsedStream {
            kind: StreamKind::from_type_code(attr_header.attribute_type),
            name,
            resident: false,
            size: nr.data_size,
            allocated_size: nr.allocated_size,
            clusters: runs.allocated_clusters,
            start_vcn: nr.lowest_vcn,
            fragments: if self.mode.contains(RetrieveMode::FRAGMENTS) {
                runs.fragments
            } else {
                Vec::new()
            },
        })
    }
}

/// Append a stream, folding it into an earlier piece of the same attribute.
///
/// Pieces may arrive in any order.
pub fn merge_stream(streams: &mut Vec<ParsedStream>, piece: ParsedStream) {
    let existing = streams
        .iter_mut()
        .find(|s| !s.resident && s.kind == piece.kind && s.name == piece.name);

    match existing {
        Some(stream) => {
            if piece.start_vcn == 0 {
                stream.size = piece.size;
                stream.allocated_size = piece.allocated_size;
            }
            // Fragments only carry their end VCN, so keep them in VCN order
            let at = stream
                .fragments
                .partition_point(|f| f.next_vcn <= piece.start_vcn);
            stream.fragments.splice(at..at, piece.fragments);
            stream.start_vcn = stream.start_vcn.min(piece.start_vcn);
            stream.clusters += piece.clusters;
        }
        None => streams.push(piece),
    }
}

// ============================================================================
// Attribute Walking
// ============================================================================

/// Call `visit` with (offset, header, bytes) for every attribute in a record
fn walk_attributes<F>(inode: u64, data: &[u8], header: &MftRecordHeader, mut visit: F) -> Result<()>
where
    F: FnMut(usize, &AttributeHeader, &[u8]) -> Result<()>,
{
    let mut offset = header.first_attribute_offset as usize;
    if offset < 24 || offset >= data.len() {
        return Err(invalid(inode, offset, "first attribute offset out of range"));
    }

    loop {
        let type_bytes = data
            .get(offset..offset + 4)
            .ok_or_else(|| invalid(inode, offset, "attribute list not terminated"))?;
        if u32::from_le_bytes([type_bytes[0], type_bytes[1], type_bytes[2], type_bytes[3]])
            == ATTRIBUTE_END_MARKER
        {
            break;
        }

        let attr_header = data
            .get(offset..)
            .and_then(AttributeHeader::from_bytes)
            .ok_or_else(|| invalid(inode, offset, "attribute header truncated"))?;

        let length = attr_header.length as usize;
        if length < 16 {
            return Err(invalid(inode, offset, &format!("attribute length {} too small", length)));
        }
        let end = offset + length;
        if end > data.len() {
            return Err(invalid(
                inode,
                offset,
                &format!("attribute length {} exceeds record", length),
            ));
        }

        visit(offset, &attr_header, &data[offset..end])?;
        offset = end;
    }

    Ok(())
}

fn invalid(inode: u64, offset: usize, reason: &str) -> MftError {
    MftError::InvalidAttribute {
        inode,
        offset,
        reason: reason.to_string(),
    }
}

fn attribute_name(
    inode: u64,
    offset: usize,
    attr_header: &AttributeHeader,
    attr_data: &[u8],
) -> Result<String> {
    attr_header
        .name(attr_data)
        .ok_or_else(|| invalid(inode, offset, "attribute name out of bounds"))
}

fn resident_slice(inode: u64, offset: usize, attr_data: &[u8]) -> Result<&[u8]> {
    ResidentAttributeHeader::from_bytes(attr_data)
        .and_then(|h| h.value(attr_data))
        .ok_or_else(|| invalid(inode, offset, "resident value out of bounds"))
}

fn non_resident_header(
    inode: u64,
    offset: usize,
    attr_data: &[u8],
) -> Result<NonResidentAttributeHeader> {
    NonResidentAttributeHeader::from_bytes(attr_data)
        .ok_or_else(|| invalid(inode, offset, "non-resident header truncated"))
}

fn runs_slice<'a>(
    inode: u64,
    offset: usize,
    nr: &NonResidentAttributeHeader,
    attr_data: &'a [u8],
) -> Result<&'a [u8]> {
    attr_data
        .get(nr.data_runs_offset as usize..)
        .ok_or_else(|| invalid(inode, offset, "data run offset out of bounds"))
}
