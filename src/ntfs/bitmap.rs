//! $MFT::$BITMAP processing
//!
//! One bit per file record, set when the slot is allocated. The number of
//! slots worth visiting is bounded by both the bitmap and the MFT data size.

use crate::error::{MftError, Result};
use crate::ntfs::chunk::{build_extents, read_stream_range, VirtualRuns};
use crate::ntfs::mft::ParsedStream;
use crate::ntfs::volume::Volume;

/// Allocation bitmap of the MFT
#[derive(Debug, Clone, Default)]
pub struct MftBitmap {
    bits: Vec<u8>,
    max_inodes: u64,
}

impl MftBitmap {
    /// Wrap raw bitmap bytes; `record_count` is the MFT data size in records
    pub fn from_bytes(bits: Vec<u8>, record_count: u64) -> Self {
        let max_inodes = (bits.len() as u64 * 8).min(record_count);
        Self { bits, max_inodes }
    }

    /// Read a non-resident $BITMAP stream, truncated to its data size
    pub fn read(
        volume: &mut Volume,
        stream: &ParsedStream,
        cluster_size: u64,
        record_count: u64,
    ) -> Result<Self> {
        if stream.resident {
            return Err(MftError::CorruptMetadata(
                "MFT bitmap stream has no run list".to_string(),
            ));
        }

        let size = usize::try_from(stream.size).map_err(|_| {
            MftError::CorruptMetadata(format!("MFT bitmap size {} too large", stream.size))
        })?;
        let extents = build_extents(&stream.fragments, stream.start_vcn);
        let mut bits = vec![0u8; size];
        read_stream_range(
            volume,
            &extents,
            cluster_size,
            0,
            &mut bits,
            VirtualRuns::Rejected,
        )?;

        Ok(Self::from_bytes(bits, record_count))
    }

    /// Slots to visit: min(bitmap bits, records in the MFT data stream)
    pub fn max_inodes(&self) -> u64 {
        self.max_inodes
    }

    pub fn is_set(&self, inode: u64) -> bool {
        if inode >= self.max_inodes {
            return false;
        }
        self.bits[(inode / 8) as usize] & (1 << (inode % 8)) != 0
    }

    /// Number of allocated slots below `max_inodes`
    pub fn count_set(&self) -> u64 {
        (0..self.max_inodes).filter(|i| self.is_set(*i)).count() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntfs::data_run::Fragment;
    use crate::ntfs::mft::StreamKind;
    use crate::ntfs::volume::ImageSource;
    use std::io::Cursor;

    #[test]
    fn test_bits() {
        let bitmap = MftBitmap::from_bytes(vec![0b0010_0001, 0x80], 64);
        assert_eq!(bitmap.max_inodes(), 16);
        assert!(bitmap.is_set(0));
        assert!(!bitmap.is_set(1));
        assert!(bitmap.is_set(5));
        assert!(bitmap.is_set(15));
        assert!(!bitmap.is_set(16));
        assert_eq!(bitmap.count_set(), 3);
    }

    #[test]
    fn test_bounded_by_data_size() {
        // Bitmap claims slot 12, MFT data only holds 10 records
        let bitmap = MftBitmap::from_bytes(vec![0xFF, 0xFF], 10);
        assert_eq!(bitmap.max_inodes(), 10);
        assert!(!bitmap.is_set(12));
        assert_eq!(bitmap.count_set(), 10);
    }

    #[test]
    fn test_read_non_resident() {
        let mut image = vec![0u8; 4 * 512];
        image[1024] = 0x0F;
        image[1025] = 0xAA;
        let mut volume = Volume::new("mem", ImageSource::new(Cursor::new(image)));
        let stream = ParsedStream {
            kind: StreamKind::Bitmap,
            name: String::new(),
            resident: false,
            size: 1,
            allocated_size: 512,
            clusters: 1,
            start_vcn: 0,
            fragments: vec![Fragment { lcn: 2, next_vcn: 1 }],
        };
        let bitmap = MftBitmap::read(&mut volume, &stream, 512, 100).unwrap();
        // Truncated to one byte
        assert_eq!(bitmap.max_inodes(), 8);
        assert_eq!(bitmap.count_set(), 4);
    }
}
