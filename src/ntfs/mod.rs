//! NTFS filesystem support
//!
//! This module provides the on-disk side of MFT reading:
//! - Raw volume access (devices, images, in-memory buffers)
//! - Boot sector and MFT record parsing with fixup verification
//! - Data run decoding and chunked stream reads
//! - The MFT allocation bitmap

pub mod bitmap;
pub mod chunk;
pub mod data_run;
pub mod mft;
pub mod structs;
pub mod volume;
#[cfg(windows)]
pub mod winapi;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use bitmap::MftBitmap;
pub use chunk::{ChunkReader, Extent};
pub use data_run::{decode_runs, Fragment, VIRTUAL_LCN};
pub use mft::{
    ParsedRecord, ParsedStream, RecordOutcome, RecordProcessor, SkipReason, StandardTimes,
    StreamKind,
};
pub use structs::{file_attributes, VolumeGeometry};
pub use volume::{open_volume, ImageSource, Volume, VolumeSource};
