//! Data run decoding for non-resident attributes
//!
//! A run list is a sequence of headers, each packing the byte width of a
//! cluster count (low nibble) and of a signed LCN delta (high nibble),
//! terminated by a zero header. A run without an LCN delta is virtual
//! (sparse or compressed placeholder) and occupies no clusters on disk.

use crate::error::{MftError, Result};
use serde::Serialize;

/// LCN sentinel marking a virtual fragment
pub const VIRTUAL_LCN: u64 = u64::MAX;

/// One contiguous run of an attribute.
///
/// A fragment starts at the previous fragment's `next_vcn` (or at the
/// attribute's lowest VCN for the first one) and ends before `next_vcn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Fragment {
    /// First logical cluster, or [`VIRTUAL_LCN`]
    pub lcn: u64,
    /// VCN following the last cluster of this run
    pub next_vcn: u64,
}

impl Fragment {
    pub fn is_virtual(&self) -> bool {
        self.lcn == VIRTUAL_LCN
    }
}

/// Result of decoding one run list
#[derive(Debug, Clone, Default)]
pub struct DecodedRuns {
    pub fragments: Vec<Fragment>,
    /// Clusters backed by disk space (virtual runs excluded)
    pub allocated_clusters: u64,
    /// VCN following the last decoded run
    pub next_vcn: u64,
}

/// Decode a run list whose first run starts at `starting_vcn`.
pub fn decode_runs(data: &[u8], starting_vcn: u64) -> Result<DecodedRuns> {
    let mut decoded = DecodedRuns {
        next_vcn: starting_vcn,
        ..Default::default()
    };
    let mut pos = 0;
    let mut current_lcn: i64 = 0;

    while pos < data.len() {
        let header = data[pos];
        if header == 0 {
            break; // End marker
        }

        let length_bytes = (header & 0x0F) as usize;
        let offset_bytes = ((header >> 4) & 0x0F) as usize;

        if length_bytes == 0 || length_bytes > 8 || offset_bytes > 8 {
            return Err(MftError::CorruptMetadata(format!(
                "invalid data run header 0x{:02X} at offset {}",
                header, pos
            )));
        }

        if pos + 1 + length_bytes + offset_bytes > data.len() {
            return Err(MftError::DataRunOverrun {
                offset: pos,
                len: data.len(),
            });
        }
        pos += 1;

        let cluster_count = read_unsigned(&data[pos..pos + length_bytes]);
        pos += length_bytes;
        if cluster_count == 0 {
            return Err(MftError::CorruptMetadata(format!(
                "zero-length data run at offset {}",
                pos - length_bytes - 1
            )));
        }

        let next_vcn = decoded.next_vcn.checked_add(cluster_count).ok_or_else(|| {
            MftError::CorruptMetadata("data run VCN overflow".to_string())
        })?;

        let lcn = if offset_bytes == 0 {
            VIRTUAL_LCN
        } else {
            let delta = read_signed(&data[pos..pos + offset_bytes]);
            pos += offset_bytes;
            current_lcn = current_lcn
                .checked_add(delta)
                .filter(|lcn| *lcn >= 0)
                .ok_or_else(|| {
                    MftError::CorruptMetadata(format!(
                        "data run points before the start of the volume (delta {})",
                        delta
                    ))
                })?;
            decoded.allocated_clusters += cluster_count;
            current_lcn as u64
        };

        decoded.fragments.push(Fragment { lcn, next_vcn });
        decoded.next_vcn = next_vcn;
    }

    Ok(decoded)
}

/// Iterate fragments as `(start_vcn, lcn, cluster_count)` triples
pub fn extents(
    fragments: &[Fragment],
    starting_vcn: u64,
) -> impl Iterator<Item = (u64, u64, u64)> + '_ {
    fragments.iter().scan(starting_vcn, |vcn, fragment| {
        let start = *vcn;
        *vcn = fragment.next_vcn;
        Some((start, fragment.lcn, fragment.next_vcn.saturating_sub(start)))
    })
}

fn read_unsigned(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (*b as u64) << (i * 8))
}

fn read_signed(bytes: &[u8]) -> i64 {
    let mut value = read_unsigned(bytes);
    let width = bytes.len();
    // Sign extend if high bit is set
    if width < 8 && bytes[width - 1] & 0x80 != 0 {
        value |= u64::MAX << (width * 8);
    }
    value as i64
}
