//! MFT reader: builds the Node Table for one volume
//!
//! `MftReader::open` reads the boot sector, bootstraps the MFT from its own
//! record 0, loads the allocation bitmap and then walks every live record in
//! chunks. The resulting table is immutable; queries borrow from it.

use crate::config::{ReaderOptions, RetrieveMode};
use crate::error::{MftError, Result};
use crate::node_table::NodeTable;
use crate::ntfs::bitmap::MftBitmap;
use crate::ntfs::chunk::{build_extents, read_stream_range, ChunkReader, Extent, VirtualRuns};
use crate::ntfs::mft::{
    fixup_record, merge_stream, AttributeListData, ParsedRecord, ParsedStream, RecordOutcome,
    RecordProcessor, SkipReason, StreamKind,
};
use crate::ntfs::structs::{parse_attribute_list, AttributeListEntry, AttributeType, VolumeGeometry};
use crate::ntfs::volume::{open_volume, Volume, VolumeSource};
use crate::query::{self, NodeView};
use parking_lot::Mutex;
use serde::Serialize;

/// Inodes between two progress callbacks
const PROGRESS_INTERVAL: u64 = 4096;

/// A bitmap-live slot that did not become a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub inode: u64,
    pub reason: SkipReason,
}

/// Statistics of one table build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Slots visited: min(bitmap bits, MFT data size / record size)
    pub max_inodes: u64,
    /// Live slots whose record was read and processed
    pub records_scanned: u64,
    pub nodes: u64,
    pub skipped: u64,
    /// Bytes read from the volume while building the table
    pub bytes_read: u64,
    /// End of the furthest MFT chunk read, relative to the $MFT data stream
    pub last_stream_offset: u64,
    /// Declared size of the $MFT data stream
    pub data_stream_size: u64,
}

/// Node table of one NTFS volume plus the volume handle it was read from
pub struct MftReader {
    volume: Mutex<Option<Volume>>,
    geometry: VolumeGeometry,
    table: NodeTable,
    skipped: Vec<SkippedRecord>,
    stats: ScanStats,
    mft_extents: Vec<Extent>,
    options: ReaderOptions,
}

impl std::fmt::Debug for MftReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MftReader")
            .field("geometry", &self.geometry)
            .field("stats", &self.stats)
            .field("open", &self.volume.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl MftReader {
    /// Open a volume (`C:`, `\\.\C:`, an image path) with default options
    pub fn open(volume: &str) -> Result<Self> {
        Self::open_with(volume, ReaderOptions::default())
    }

    pub fn open_with(volume: &str, options: ReaderOptions) -> Result<Self> {
        let volume = open_volume(volume)?;
        Self::build(volume, options, &mut |_, _| {})
    }

    /// Build from any block source; `name` only appears in errors
    pub fn open_source(
        name: &str,
        source: impl VolumeSource + 'static,
        options: ReaderOptions,
    ) -> Result<Self> {
        Self::build(Volume::new(name, source), options, &mut |_, _| {})
    }

    /// Like [`MftReader::open_source`], calling `progress(inode, max_inodes)`
    /// periodically during the record walk
    pub fn open_source_with_progress(
        name: &str,
        source: impl VolumeSource + 'static,
        options: ReaderOptions,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<Self> {
        Self::build(Volume::new(name, source), options, &mut progress)
    }

    /// Open an already constructed volume
    pub fn open_volume_with_progress(
        volume: Volume,
        options: ReaderOptions,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<Self> {
        Self::build(volume, options, &mut progress)
    }

    fn build(
        mut volume: Volume,
        options: ReaderOptions,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<Self> {
        let mut boot = [0u8; 512];
        volume.read_exact_at(0, &mut boot)?;
        let geometry = VolumeGeometry::from_boot_sector(&boot, volume.name())?;

        let cluster_size = geometry.bytes_per_cluster as u64;
        let record_size = geometry.bytes_per_file_record as usize;

        // Record 0 describes the MFT itself; any failure here is fatal
        let mut record0 = vec![0u8; record_size];
        volume.read_exact_at(geometry.mft_byte_offset(), &mut record0)?;
        let bootstrap = RecordProcessor::new(RetrieveMode::ALL);
        let mut mft_record = match bootstrap.process(0, &mut record0)? {
            RecordOutcome::Parsed(record) => record,
            RecordOutcome::Skipped(reason) => {
                return Err(MftError::CorruptMetadata(format!(
                    "MFT record 0 unusable: {}",
                    reason
                )))
            }
        };

        if mft_record.attribute_list.is_some() {
            follow_attribute_list(&mut volume, &bootstrap, &mut mft_record, &geometry)?;
        }

        let data = find_stream(&mft_record, StreamKind::Data)
            .filter(|s| !s.resident)
            .ok_or_else(|| {
                MftError::CorruptMetadata("MFT has no non-resident $DATA stream".to_string())
            })?;
        let data_size = data.size;
        let mft_extents = build_extents(&data.fragments, data.start_vcn);

        let mut chunks = ChunkReader::new(
            mft_extents.clone(),
            cluster_size,
            record_size,
            data_size,
            options.io_buffer_size,
        );

        let bitmap = match find_stream(&mft_record, StreamKind::Bitmap) {
            Some(stream) if !stream.resident => {
                MftBitmap::read(&mut volume, stream, cluster_size, chunks.record_count())?
            }
            _ => {
                let bits = bootstrap
                    .resident_value(0, &record0, StreamKind::Bitmap, "")?
                    .ok_or_else(|| {
                        MftError::CorruptMetadata("MFT has no $BITMAP attribute".to_string())
                    })?;
                MftBitmap::from_bytes(bits, chunks.record_count())
            }
        };

        let max_inodes = bitmap.max_inodes();
        let processor = RecordProcessor::new(options.mode);
        let mut table = NodeTable::new(max_inodes, options.mode, options.path_separator);
        let mut skipped = Vec::new();
        let mut records_scanned = 0;

        for inode in 1..max_inodes {
            if inode % PROGRESS_INTERVAL == 0 {
                progress(inode, max_inodes);
            }
            if !bitmap.is_set(inode) {
                continue;
            }
            if !chunks.ensure(&mut volume, inode)? {
                break;
            }
            let record = chunks.record_mut(inode).ok_or_else(|| {
                MftError::CorruptMetadata(format!("record {} missing from loaded chunk", inode))
            })?;
            records_scanned += 1;

            match processor.process(inode, record) {
                Ok(RecordOutcome::Parsed(parsed)) => table.insert(parsed),
                Ok(RecordOutcome::Skipped(reason)) => skipped.push(SkippedRecord { inode, reason }),
                Err(e) if e.is_corruption() => skipped.push(SkippedRecord {
                    inode,
                    reason: SkipReason::Corrupt(e.to_string()),
                }),
                Err(e) => return Err(e),
            }
        }
        progress(max_inodes, max_inodes);

        for inode in table.find_cycles() {
            table.remove(inode);
            skipped.push(SkippedRecord {
                inode,
                reason: SkipReason::ParentCycle,
            });
        }
        skipped.sort_by_key(|s| s.inode);

        let stats = ScanStats {
            max_inodes,
            records_scanned,
            nodes: table.len() as u64,
            skipped: skipped.len() as u64,
            bytes_read: volume.bytes_read(),
            last_stream_offset: chunks.last_stream_offset(),
            data_stream_size: data_size,
        };

        Ok(Self {
            volume: Mutex::new(Some(volume)),
            geometry,
            table,
            skipped,
            stats,
            mft_extents,
            options,
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Every live node whose full path starts with `prefix` (case-insensitive)
    pub fn nodes_under(&self, prefix: &str) -> Result<Vec<NodeView<'_>>> {
        query::nodes_under(&self.table, prefix)
    }

    pub fn node(&self, inode: u64) -> Option<NodeView<'_>> {
        NodeView::new(&self.table, inode)
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn table(&self) -> &NodeTable {
        &self.table
    }

    pub fn skipped(&self) -> &[SkippedRecord] {
        &self.skipped
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn mode(&self) -> RetrieveMode {
        self.options.mode
    }

    // ========================================================================
    // Volume Handle
    // ========================================================================

    /// Release the volume handle. Calling it again does nothing.
    pub fn close(&self) {
        self.volume.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.volume.lock().is_none()
    }

    /// Read the content of stream `index` of node `inode`.
    ///
    /// Non-resident streams need their fragments, i.e. a reader opened with
    /// `RetrieveMode::FRAGMENTS`. Virtual runs read as zeros. Compressed
    /// streams are returned as stored.
    pub fn read_stream(&self, inode: u64, index: usize) -> Result<Vec<u8>> {
        self.table.get(inode).ok_or(MftError::NodeNotFound(inode))?;
        let stream = self
            .table
            .streams(inode)
            .get(index)
            .ok_or(MftError::StreamNotFound { inode, index })?;

        let mut guard = self.volume.lock();
        let volume = guard.as_mut().ok_or(MftError::VolumeClosed)?;
        let cluster_size = self.geometry.bytes_per_cluster as u64;

        if stream.resident {
            let record_size = self.geometry.bytes_per_file_record as usize;
            let mut record = vec![0u8; record_size];
            read_stream_range(
                volume,
                &self.mft_extents,
                cluster_size,
                inode * record_size as u64,
                &mut record,
                VirtualRuns::Rejected,
            )?;
            fixup_record(inode, &mut record)?;
            let name = self.table.name(stream.name_index);
            return RecordProcessor::new(self.options.mode)
                .resident_value(inode, &record, stream.kind, name)?
                .ok_or(MftError::StreamNotFound { inode, index });
        }

        if stream.fragments.is_empty() && stream.size > 0 {
            return Err(MftError::Config(format!(
                "fragments of record {} were not retrieved; open with RetrieveMode::FRAGMENTS",
                inode
            )));
        }

        let size = usize::try_from(stream.size).map_err(|_| {
            MftError::CorruptMetadata(format!("stream size {} too large", stream.size))
        })?;
        let extents = build_extents(&stream.fragments, stream.start_vcn);
        let mapped = extents
            .last()
            .map(|e| e.end_vcn().saturating_mul(cluster_size))
            .unwrap_or(0)
            .min(size as u64) as usize;

        let mut content = vec![0u8; size];
        read_stream_range(
            volume,
            &extents,
            cluster_size,
            0,
            &mut content[..mapped],
            VirtualRuns::Zeroed,
        )?;
        Ok(content)
    }
}

fn find_stream(record: &ParsedRecord, kind: StreamKind) -> Option<&ParsedStream> {
    record
        .streams
        .iter()
        .find(|s| s.kind == kind && s.name.is_empty())
}

/// Entries of the MFT's attribute list held in extension records.
///
/// $DATA pieces come first in VCN order: each extension record is reached
/// through the $DATA runs merged before it.
fn mft_extension_entries(list: &[u8]) -> Vec<AttributeListEntry> {
    let mut entries: Vec<_> = parse_attribute_list(list)
        .into_iter()
        .filter(|e| {
            e.name.is_empty()
                && e.record_number() != 0
                && (e.attribute_type == AttributeType::Data as u32
                    || e.attribute_type == AttributeType::Bitmap as u32)
        })
        .collect();
    entries.sort_by_key(|e| (e.attribute_type != AttributeType::Data as u32, e.starting_vcn));
    entries
}

/// Collect $DATA and $BITMAP pieces of the MFT stored in extension records
fn follow_attribute_list(
    volume: &mut Volume,
    processor: &RecordProcessor,
    mft_record: &mut ParsedRecord,
    geometry: &VolumeGeometry,
) -> Result<()> {
    let cluster_size = geometry.bytes_per_cluster as u64;
    let record_size = geometry.bytes_per_file_record as usize;

    let list = match mft_record.attribute_list.take() {
        Some(AttributeListData::Resident(bytes)) => bytes,
        Some(AttributeListData::NonResident { size, fragments }) => {
            let size = usize::try_from(size).map_err(|_| {
                MftError::CorruptMetadata(format!("attribute list size {} too large", size))
            })?;
            let mut bytes = vec![0u8; size];
            read_stream_range(
                volume,
                &build_extents(&fragments, 0),
                cluster_size,
                0,
                &mut bytes,
                VirtualRuns::Rejected,
            )?;
            bytes
        }
        None => return Ok(()),
    };

    let mut visited = Vec::new();
    for entry in mft_extension_entries(&list) {
        let ext = entry.record_number();
        if visited.contains(&ext) {
            continue;
        }
        visited.push(ext);

        // Extension records are reached through the $DATA runs known so far
        let data = find_stream(mft_record, StreamKind::Data).ok_or_else(|| {
            MftError::CorruptMetadata("MFT record 0 has no $DATA runs".to_string())
        })?;
        let extents = build_extents(&data.fragments, data.start_vcn);

        let offset = ext.checked_mul(record_size as u64).ok_or_else(|| {
            MftError::CorruptMetadata(format!("MFT extension record {} out of range", ext))
        })?;
        let mut record = vec![0u8; record_size];
        read_stream_range(
            volume,
            &extents,
            cluster_size,
            offset,
            &mut record,
            VirtualRuns::Rejected,
        )?;

        for stream in processor.process_extension(ext, &mut record)? {
            if stream.name.is_empty()
                && !stream.resident
                && matches!(stream.kind, StreamKind::Data | StreamKind::Bitmap)
            {
                merge_stream(&mut mft_record.streams, stream);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(type_code: u32, starting_vcn: u64, record: u64) -> Vec<u8> {
        let mut entry = vec![0u8; 32];
        entry[0..4].copy_from_slice(&type_code.to_le_bytes());
        entry[4..6].copy_from_slice(&32u16.to_le_bytes());
        entry[7] = 0x1A;
        entry[8..16].copy_from_slice(&starting_vcn.to_le_bytes());
        entry[16..24].copy_from_slice(&(record | 1 << 48).to_le_bytes());
        entry
    }

    #[test]
    fn test_mft_extension_entries_order() {
        let bitmap = AttributeType::Bitmap as u32;
        let data = AttributeType::Data as u32;
        let list = [
            entry(AttributeType::StandardInformation as u32, 0, 0),
            entry(data, 0, 0),
            entry(bitmap, 0, 20),
            entry(data, 8, 21),
            entry(data, 4, 22),
        ]
        .concat();

        let order: Vec<_> = mft_extension_entries(&list)
            .iter()
            .map(|e| (e.attribute_type, e.starting_vcn, e.record_number()))
            .collect();
        assert_eq!(order, vec![(data, 4, 22), (data, 8, 21), (bitmap, 0, 20)]);
    }
}
