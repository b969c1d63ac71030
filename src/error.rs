//! Error types for mftindex
//!
//! Volume access, boot sector and metadata corruption errors for MFT reading.

use thiserror::Error;

/// Main error type for mftindex operations
#[derive(Error, Debug)]
pub enum MftError {
    #[error("Failed to access volume '{0}': {1}")]
    VolumeAccess(String, std::io::Error),

    #[error("Volume '{0}' is not an NTFS filesystem")]
    NotNtfsVolume(String),

    #[error("MFT fixup verification failed at record {0}")]
    FixupVerificationFailed(u64),

    #[error("Invalid attribute in record {inode} at offset {offset}: {reason}")]
    InvalidAttribute {
        inode: u64,
        offset: usize,
        reason: String,
    },

    #[error("Data run at offset {offset} overruns its {len}-byte buffer")]
    DataRunOverrun { offset: usize, len: usize },

    #[error("Corrupt metadata: {0}")]
    CorruptMetadata(String),

    #[error("Record {0} has a cyclic parent chain")]
    ParentCycle(u64),

    #[error("Volume handle has been closed")]
    VolumeClosed,

    #[error("Record {0} is not a live node")]
    NodeNotFound(u64),

    #[error("Record {inode} has no stream at index {index}")]
    StreamNotFound { inode: u64, index: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for mftindex operations
pub type Result<T> = std::result::Result<T, MftError>;

impl MftError {
    /// Build the error reported when an absolute read returns fewer bytes than requested
    pub fn short_read(volume: &str, offset: u64, expected: usize, got: usize) -> Self {
        MftError::VolumeAccess(
            volume.to_string(),
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "short read at offset {}: expected {} bytes, got {}",
                    offset, expected, got
                ),
            ),
        )
    }

    /// Check if this error describes damaged on-disk metadata.
    ///
    /// Corruption inside a regular record only skips that record; I/O and
    /// volume errors abort the scan.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            MftError::FixupVerificationFailed(_)
                | MftError::InvalidAttribute { .. }
                | MftError::DataRunOverrun { .. }
                | MftError::CorruptMetadata(_)
                | MftError::ParentCycle(_)
        )
    }

    /// Check if this error comes from the volume itself (open, read, short read)
    pub fn is_volume_access(&self) -> bool {
        matches!(self, MftError::VolumeAccess(_, _))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_read_is_volume_access() {
        let err = MftError::short_read("img", 4096, 1024, 10);
        assert!(err.is_volume_access());
        assert!(!err.is_corruption());
        assert!(err.to_string().contains("short read at offset 4096"));
    }

    #[test]
    fn test_corruption_classification() {
        assert!(MftError::FixupVerificationFailed(7).is_corruption());
        assert!(MftError::DataRunOverrun { offset: 3, len: 2 }.is_corruption());
        assert!(MftError::ParentCycle(9).is_corruption());
        assert!(!MftError::VolumeClosed.is_corruption());
        assert!(!MftError::NotNtfsVolume("x".into()).is_corruption());
    }
}
