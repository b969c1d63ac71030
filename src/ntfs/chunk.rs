//! Chunked reads of non-resident streams
//!
//! Translates stream offsets to disk offsets through a fragment list and
//! reads the MFT in blocks of whole records instead of one record at a time.

use crate::error::{MftError, Result};
use crate::ntfs::data_run::{extents, Fragment, VIRTUAL_LCN};
use crate::ntfs::volume::Volume;

/// Contiguous run of clusters of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// Starting virtual cluster number
    pub vcn: u64,
    /// Logical cluster number on disk, or `VIRTUAL_LCN`
    pub lcn: u64,
    /// Number of clusters
    pub cluster_count: u64,
}

impl Extent {
    pub fn is_virtual(&self) -> bool {
        self.lcn == VIRTUAL_LCN
    }

    fn contains(&self, vcn: u64) -> bool {
        vcn >= self.vcn && vcn - self.vcn < self.cluster_count
    }

    /// First VCN past the extent, saturating on corrupt run lists
    pub fn end_vcn(&self) -> u64 {
        self.vcn.saturating_add(self.cluster_count)
    }
}

/// Index of the extent mapping `vcn`. Tries `hint` and its successor before
/// a binary search over the VCN-ordered list.
fn find_extent(extents: &[Extent], vcn: u64, hint: usize) -> Option<usize> {
    for index in [hint, hint + 1] {
        if extents.get(index).is_some_and(|e| e.contains(vcn)) {
            return Some(index);
        }
    }
    let index = extents.partition_point(|e| e.end_vcn() <= vcn);
    extents
        .get(index)
        .filter(|e| e.contains(vcn))
        .map(|_| index)
}

/// Build extents from a fragment list starting at `start_vcn`
pub fn build_extents(fragments: &[Fragment], start_vcn: u64) -> Vec<Extent> {
    extents(fragments, start_vcn)
        .map(|(vcn, lcn, cluster_count)| Extent {
            vcn,
            lcn,
            cluster_count,
        })
        .collect()
}

/// How to treat ranges covered by virtual runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualRuns {
    /// Sparse data reads as zeros
    Zeroed,
    /// Metadata streams must be fully allocated
    Rejected,
}

/// Fill `buffer` from `offset` bytes into a non-resident stream
pub fn read_stream_range(
    volume: &mut Volume,
    extents: &[Extent],
    cluster_size: u64,
    offset: u64,
    buffer: &mut [u8],
    virtual_runs: VirtualRuns,
) -> Result<()> {
    let mut cursor = 0;
    read_extents(volume, extents, cluster_size, offset, buffer, virtual_runs, &mut cursor)
}

/// [`read_stream_range`] resuming the extent search at `cursor`, which is
/// left at the last extent used
fn read_extents(
    volume: &mut Volume,
    extents: &[Extent],
    cluster_size: u64,
    offset: u64,
    buffer: &mut [u8],
    virtual_runs: VirtualRuns,
    cursor: &mut usize,
) -> Result<()> {
    let mut done = 0usize;

    while done < buffer.len() {
        let pos = offset.checked_add(done as u64).ok_or_else(|| {
            MftError::CorruptMetadata(format!("stream offset {} + {} overflows", offset, done))
        })?;
        let vcn = pos / cluster_size;
        *cursor = find_extent(extents, vcn, *cursor).ok_or_else(|| {
            MftError::CorruptMetadata(format!("stream offset {} is not mapped by any run", pos))
        })?;
        let extent = &extents[*cursor];

        let left_in_extent = (extent.end_vcn() - vcn)
            .saturating_mul(cluster_size)
            .saturating_sub(pos % cluster_size);
        let n = usize::try_from(left_in_extent)
            .unwrap_or(usize::MAX)
            .min(buffer.len() - done);
        let target = &mut buffer[done..done + n];

        if extent.is_virtual() {
            match virtual_runs {
                VirtualRuns::Zeroed => target.fill(0),
                VirtualRuns::Rejected => {
                    return Err(MftError::CorruptMetadata(format!(
                        "stream offset {} falls in a virtual run",
                        pos
                    )))
                }
            }
        } else {
            let disk_offset = extent
                .lcn
                .checked_add(vcn - extent.vcn)
                .and_then(|cluster| cluster.checked_mul(cluster_size))
                .and_then(|o| o.checked_add(pos % cluster_size))
                .ok_or_else(|| {
                    MftError::CorruptMetadata(format!("run LCN {} out of range", extent.lcn))
                })?;
            volume.read_exact_at(disk_offset, target)?;
        }

        done += n;
    }

    Ok(())
}

/// Block reader over the MFT's $DATA stream.
///
/// Keeps the window of records loaded by the last read; a request outside
/// the window loads a new block starting at the requested record.
pub struct ChunkReader {
    extents: Vec<Extent>,
    cluster_size: u64,
    record_size: usize,
    record_count: u64,
    records_per_chunk: u64,
    buffer: Vec<u8>,
    first: u64,
    loaded: u64,
    last_stream_offset: u64,
    /// Extent of the last chunk read
    cursor: usize,
}

impl ChunkReader {
    /// `io_buffer_size` bounds one read; a chunk always holds at least one record
    pub fn new(
        extents: Vec<Extent>,
        cluster_size: u64,
        record_size: usize,
        data_size: u64,
        io_buffer_size: usize,
    ) -> Self {
        let mapped_bytes = extents
            .last()
            .map(|e| e.end_vcn().saturating_mul(cluster_size))
            .unwrap_or(0);
        let record_count = data_size.min(mapped_bytes) / record_size as u64;

        Self {
            extents,
            cluster_size,
            record_size,
            record_count,
            records_per_chunk: (io_buffer_size / record_size).max(1) as u64,
            buffer: Vec::new(),
            first: 0,
            loaded: 0,
            last_stream_offset: 0,
            cursor: 0,
        }
    }

    /// Records covered by both the data size and the fragment list
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// End of the furthest chunk read so far, relative to the stream start
    pub fn last_stream_offset(&self) -> u64 {
        self.last_stream_offset
    }

    /// Make sure record `inode` is loaded.
    ///
    /// Returns `false` once the fragment list or the data size is exhausted
    /// before `inode`.
    pub fn ensure(&mut self, volume: &mut Volume, inode: u64) -> Result<bool> {
        if inode >= self.first && inode < self.first + self.loaded {
            return Ok(true);
        }
        if inode >= self.record_count {
            return Ok(false);
        }

        let count = self.records_per_chunk.min(self.record_count - inode);
        let offset = inode * self.record_size as u64;
        self.loaded = 0;
        self.buffer.resize(count as usize * self.record_size, 0);

        read_extents(
            volume,
            &self.extents,
            self.cluster_size,
            offset,
            &mut self.buffer,
            VirtualRuns::Rejected,
            &mut self.cursor,
        )?;

        self.first = inode;
        self.loaded = count;
        self.last_stream_offset = self
            .last_stream_offset
            .max(offset + self.buffer.len() as u64);
        Ok(true)
    }

    /// Raw bytes of a record loaded by [`ChunkReader::ensure`]
    pub fn record_mut(&mut self, inode: u64) -> Option<&mut [u8]> {
        if inode < self.first || inode >= self.first + self.loaded {
            return None;
        }
        let start = (inode - self.first) as usize * self.record_size;
        self.buffer.get_mut(start..start + self.record_size)
    }
}
