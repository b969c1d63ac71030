//! Synthetic NTFS images for integration tests.
//!
//! Geometry: 512 B/sector, 8 sectors/cluster (4096 B clusters), 1024 B
//! records, MFT of 32 records at cluster 4, MFT bitmap at cluster 12.
//! The scenario volume holds the root (5), `dir1` (24) and `dir1\a.txt`
//! (25, 10 resident bytes).

#![allow(dead_code)]

use mftindex::{ImageSource, MftReader, ReaderOptions, RetrieveMode};
use std::io::Cursor;

pub const SECTOR: u64 = 512;
pub const CLUSTER: u64 = 4096;
pub const RECORD: usize = 1024;
pub const MFT_RECORDS: u64 = 32;

const USA_OFFSET: usize = 0x30;
const USA_COUNT: usize = RECORD / 512 + 1;
const FIRST_ATTRIBUTE: usize = 0x38;
const SEQUENCE: [u8; 2] = [0x2A, 0x00];

const IN_USE: u16 = 0x0001;
const IS_DIRECTORY: u16 = 0x0002;

pub const STANDARD_INFORMATION: u32 = 0x10;
pub const ATTRIBUTE_LIST: u32 = 0x20;
pub const FILE_NAME: u32 = 0x30;
pub const DATA: u32 = 0x80;
pub const BITMAP: u32 = 0xB0;

pub const FILETIME_2020: u64 = 132_223_104_000_000_000;

// ============================================================================
// Record Builder
// ============================================================================

/// One file record, update sequence applied on `build`
pub struct Record {
    flags: u16,
    base_record: u64,
    attributes: Vec<Vec<u8>>,
}

impl Record {
    pub fn file(parent: u64, name: &str) -> Self {
        Self {
            flags: IN_USE,
            base_record: 0,
            attributes: Vec::new(),
        }
        .standard_information(0x20)
        .file_name(parent, name, 1)
    }

    pub fn directory(parent: u64, name: &str) -> Self {
        Self {
            flags: IN_USE | IS_DIRECTORY,
            base_record: 0,
            attributes: Vec::new(),
        }
        .standard_information(0x10)
        .file_name(parent, name, 3)
    }

    /// Extension of `base`; the reference carries sequence number 1
    pub fn extension_of(base: u64) -> Self {
        Self {
            flags: IN_USE,
            base_record: base | 1 << 48,
            attributes: Vec::new(),
        }
    }

    pub fn standard_information(self, file_attributes: u32) -> Self {
        let mut value = vec![0u8; 72];
        for i in 0..4 {
            value[i * 8..i * 8 + 8].copy_from_slice(&FILETIME_2020.to_le_bytes());
        }
        value[32..36].copy_from_slice(&file_attributes.to_le_bytes());
        self.resident(STANDARD_INFORMATION, "", &value)
    }

    pub fn file_name(self, parent: u64, name: &str, namespace: u8) -> Self {
        let units: Vec<u16> = name.encode_utf16().collect();
        let mut value = vec![0u8; 66 + units.len() * 2];
        value[0..8].copy_from_slice(&(parent | 1 << 48).to_le_bytes());
        value[64] = units.len() as u8;
        value[65] = namespace;
        for (i, unit) in units.iter().enumerate() {
            value[66 + i * 2..68 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        self.resident(FILE_NAME, "", &value)
    }

    pub fn resident(mut self, type_code: u32, name: &str, value: &[u8]) -> Self {
        let name_units: Vec<u16> = name.encode_utf16().collect();
        let value_offset = align8(0x18 + name_units.len() * 2);
        let length = align8(value_offset + value.len());

        let mut attr = vec![0u8; length];
        header(&mut attr, type_code, length, false, &name_units, 0x18);
        attr[16..20].copy_from_slice(&(value.len() as u32).to_le_bytes());
        attr[20..22].copy_from_slice(&(value_offset as u16).to_le_bytes());
        attr[value_offset..value_offset + value.len()].copy_from_slice(value);
        self.attributes.push(attr);
        self
    }

    /// Non-resident attribute covering `lowest_vcn..=highest_vcn`
    pub fn non_resident(
        mut self,
        type_code: u32,
        name: &str,
        runs: &[u8],
        vcns: (u64, u64),
        data_size: u64,
        allocated_size: u64,
    ) -> Self {
        let name_units: Vec<u16> = name.encode_utf16().collect();
        let runs_offset = align8(0x40 + name_units.len() * 2);
        let length = align8(runs_offset + runs.len() + 1);

        let mut attr = vec![0u8; length];
        header(&mut attr, type_code, length, true, &name_units, 0x40);
        attr[16..24].copy_from_slice(&vcns.0.to_le_bytes());
        attr[24..32].copy_from_slice(&vcns.1.to_le_bytes());
        attr[32..34].copy_from_slice(&(runs_offset as u16).to_le_bytes());
        attr[40..48].copy_from_slice(&allocated_size.to_le_bytes());
        attr[48..56].copy_from_slice(&data_size.to_le_bytes());
        attr[56..64].copy_from_slice(&data_size.to_le_bytes());
        attr[runs_offset..runs_offset + runs.len()].copy_from_slice(runs);
        self.attributes.push(attr);
        self
    }

    pub fn build(self, inode: u64) -> Vec<u8> {
        let mut data = vec![0u8; RECORD];
        data[0..4].copy_from_slice(b"FILE");
        data[4..6].copy_from_slice(&(USA_OFFSET as u16).to_le_bytes());
        data[6..8].copy_from_slice(&(USA_COUNT as u16).to_le_bytes());
        data[16..18].copy_from_slice(&1u16.to_le_bytes());
        data[18..20].copy_from_slice(&1u16.to_le_bytes());
        data[20..22].copy_from_slice(&(FIRST_ATTRIBUTE as u16).to_le_bytes());
        data[22..24].copy_from_slice(&self.flags.to_le_bytes());
        data[28..32].copy_from_slice(&(RECORD as u32).to_le_bytes());
        data[32..40].copy_from_slice(&self.base_record.to_le_bytes());
        data[40..42].copy_from_slice(&(self.attributes.len() as u16).to_le_bytes());
        data[44..48].copy_from_slice(&(inode as u32).to_le_bytes());

        let mut offset = FIRST_ATTRIBUTE;
        for (id, attr) in self.attributes.iter().enumerate() {
            data[offset..offset + attr.len()].copy_from_slice(attr);
            data[offset + 14..offset + 16].copy_from_slice(&(id as u16).to_le_bytes());
            offset += attr.len();
        }
        data[offset..offset + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        data[24..28].copy_from_slice(&((offset + 8) as u32).to_le_bytes());

        data[USA_OFFSET..USA_OFFSET + 2].copy_from_slice(&SEQUENCE);
        for i in 1..USA_COUNT {
            let tail = i * 512 - 2;
            let slot = USA_OFFSET + i * 2;
            data[slot] = data[tail];
            data[slot + 1] = data[tail + 1];
            data[tail..tail + 2].copy_from_slice(&SEQUENCE);
        }
        data
    }
}

fn header(
    attr: &mut [u8],
    type_code: u32,
    length: usize,
    non_resident: bool,
    name_units: &[u16],
    name_offset: usize,
) {
    attr[0..4].copy_from_slice(&type_code.to_le_bytes());
    attr[4..8].copy_from_slice(&(length as u32).to_le_bytes());
    attr[8] = non_resident as u8;
    attr[9] = name_units.len() as u8;
    attr[10..12].copy_from_slice(&(name_offset as u16).to_le_bytes());
    for (i, unit) in name_units.iter().enumerate() {
        let at = name_offset + i * 2;
        attr[at..at + 2].copy_from_slice(&unit.to_le_bytes());
    }
}

fn align8(value: usize) -> usize {
    (value + 7) & !7
}

/// Encode `(lcn, clusters)` runs with 1-byte lengths and 2-byte deltas.
/// `None` as LCN encodes a virtual run.
pub fn encode_runs(runs: &[(Option<u64>, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut previous = 0i64;
    for (lcn, clusters) in runs {
        match lcn {
            Some(lcn) => {
                let delta = *lcn as i64 - previous;
                previous = *lcn as i64;
                out.push(0x21);
                out.push(*clusters as u8);
                out.extend_from_slice(&(delta as i16).to_le_bytes());
            }
            None => {
                out.push(0x01);
                out.push(*clusters as u8);
            }
        }
    }
    out.push(0);
    out
}

/// One 32-byte $ATTRIBUTE_LIST entry for an unnamed attribute
pub fn attribute_list_entry(type_code: u32, starting_vcn: u64, record: u64) -> Vec<u8> {
    let mut entry = vec![0u8; 32];
    entry[0..4].copy_from_slice(&type_code.to_le_bytes());
    entry[4..6].copy_from_slice(&32u16.to_le_bytes());
    entry[7] = 0x1A;
    entry[8..16].copy_from_slice(&starting_vcn.to_le_bytes());
    entry[16..24].copy_from_slice(&(record | 1 << 48).to_le_bytes());
    entry
}

// ============================================================================
// Image Builder
// ============================================================================

/// Builds a whole volume image around an MFT
pub struct ImageBuilder {
    pub clusters: u64,
    /// Where the MFT's data lives, as `(lcn, clusters)` in VCN order
    pub mft_runs: Vec<(u64, u64)>,
    /// Declared size of the MFT's $DATA
    pub mft_data_size: u64,
    pub bitmap_lcn: u64,
    pub bitmap: Vec<u8>,
    /// Split the MFT's $DATA: second run described by this extension record
    pub mft_extension: Option<u64>,
    records: Vec<(u64, Vec<u8>)>,
    writes: Vec<(u64, Vec<u8>)>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            clusters: 32,
            mft_runs: vec![(4, 8)],
            mft_data_size: MFT_RECORDS * RECORD as u64,
            bitmap_lcn: 12,
            bitmap: vec![0u8; 8],
            mft_extension: None,
            records: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Add a record and mark it live in the bitmap
    pub fn record(mut self, inode: u64, record: Record) -> Self {
        self.bitmap[(inode / 8) as usize] |= 1 << (inode % 8);
        self.records.push((inode, record.build(inode)));
        self
    }

    /// Add a raw record image without touching the bitmap
    pub fn raw_record(mut self, inode: u64, data: Vec<u8>) -> Self {
        self.records.push((inode, data));
        self
    }

    pub fn write(mut self, offset: u64, bytes: &[u8]) -> Self {
        self.writes.push((offset, bytes.to_vec()));
        self
    }

    /// Volume offset of record `inode`
    pub fn record_offset(&self, inode: u64) -> u64 {
        let stream_offset = inode * RECORD as u64;
        let mut vcn_start = 0;
        for (lcn, clusters) in &self.mft_runs {
            let run_bytes = clusters * CLUSTER;
            if stream_offset < vcn_start + run_bytes {
                return lcn * CLUSTER + (stream_offset - vcn_start);
            }
            vcn_start += run_bytes;
        }
        panic!("record {} is outside the MFT runs", inode);
    }

    fn mft_records(&self) -> Vec<(u64, Vec<u8>)> {
        let bitmap_runs = encode_runs(&[(Some(self.bitmap_lcn), 1)]);
        let bitmap_size = self.bitmap.len() as u64;
        let total_clusters: u64 = self.mft_runs.iter().map(|r| r.1).sum();

        let base = Record {
            flags: IN_USE,
            base_record: 0,
            attributes: Vec::new(),
        }
        .standard_information(0x06);

        match self.mft_extension {
            None => {
                let runs: Vec<_> = self.mft_runs.iter().map(|(l, c)| (Some(*l), *c)).collect();
                let record0 = base
                    .file_name(5, "$MFT", 3)
                    .non_resident(
                        DATA,
                        "",
                        &encode_runs(&runs),
                        (0, total_clusters - 1),
                        self.mft_data_size,
                        total_clusters * CLUSTER,
                    )
                    .non_resident(BITMAP, "", &bitmap_runs, (0, 0), bitmap_size, CLUSTER);
                vec![(0, record0.build(0))]
            }
            Some(ext) => {
                let (first_lcn, first_clusters) = self.mft_runs[0];
                let (second_lcn, second_clusters) = self.mft_runs[1];
                let mut list = Vec::new();
                list.extend(attribute_list_entry(STANDARD_INFORMATION, 0, 0));
                list.extend(attribute_list_entry(FILE_NAME, 0, 0));
                list.extend(attribute_list_entry(DATA, 0, 0));
                list.extend(attribute_list_entry(DATA, first_clusters, ext));
                list.extend(attribute_list_entry(BITMAP, 0, 0));

                let record0 = base
                    .resident(ATTRIBUTE_LIST, "", &list)
                    .file_name(5, "$MFT", 3)
                    .non_resident(
                        DATA,
                        "",
                        &encode_runs(&[(Some(first_lcn), first_clusters)]),
                        (0, first_clusters - 1),
                        self.mft_data_size,
                        total_clusters * CLUSTER,
                    )
                    .non_resident(BITMAP, "", &bitmap_runs, (0, 0), bitmap_size, CLUSTER);
                let extension = Record::extension_of(0).non_resident(
                    DATA,
                    "",
                    &encode_runs(&[(Some(second_lcn), second_clusters)]),
                    (first_clusters, total_clusters - 1),
                    0,
                    0,
                );
                vec![(0, record0.build(0)), (ext, extension.build(ext))]
            }
        }
    }

    pub fn build(mut self) -> Vec<u8> {
        self.bitmap[0] |= 1;
        if let Some(ext) = self.mft_extension {
            self.bitmap[(ext / 8) as usize] |= 1 << (ext % 8);
        }

        let mut image = vec![0u8; (self.clusters * CLUSTER) as usize];

        // Boot sector
        image[0] = 0xEB;
        image[1] = 0x52;
        image[2] = 0x90;
        image[3..11].copy_from_slice(b"NTFS    ");
        image[0x0B..0x0D].copy_from_slice(&(SECTOR as u16).to_le_bytes());
        image[0x0D] = (CLUSTER / SECTOR) as u8;
        image[0x28..0x30].copy_from_slice(&(self.clusters * CLUSTER / SECTOR).to_le_bytes());
        image[0x30..0x38].copy_from_slice(&self.mft_runs[0].0.to_le_bytes());
        image[0x38..0x40].copy_from_slice(&2u64.to_le_bytes());
        image[0x40] = (-10i8) as u8;
        image[0x44] = 1;
        image[0x48..0x50].copy_from_slice(&0x0123_4567_89AB_CDEFu64.to_le_bytes());
        image[510] = 0x55;
        image[511] = 0xAA;

        let bitmap_at = (self.bitmap_lcn * CLUSTER) as usize;
        image[bitmap_at..bitmap_at + self.bitmap.len()].copy_from_slice(&self.bitmap);

        let mut records = self.mft_records();
        records.append(&mut self.records);
        for (inode, data) in records {
            let at = self.record_offset(inode) as usize;
            image[at..at + data.len()].copy_from_slice(&data);
        }

        for (offset, bytes) in &self.writes {
            let at = *offset as usize;
            image[at..at + bytes.len()].copy_from_slice(bytes);
        }

        image
    }
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub const FILE_CONTENT: &[u8] = b"0123456789";

/// Root, `dir1` and `dir1\a.txt`
pub fn scenario() -> ImageBuilder {
    ImageBuilder::new()
        .record(5, Record::directory(5, "."))
        .record(24, Record::directory(5, "dir1"))
        .record(25, Record::file(24, "a.txt").resident(DATA, "", FILE_CONTENT))
}

/// Scenario plus a two-cluster file at LCN 13 and a half-sparse file at LCN 15
pub fn with_streams() -> ImageBuilder {
    let big: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let tail = vec![0xEEu8; CLUSTER as usize];
    scenario()
        .record(
            26,
            Record::file(24, "big.bin")
                .resident(DATA, "Zone.Identifier", b"[ZoneTransfer]")
                .non_resident(DATA, "", &encode_runs(&[(Some(13), 2)]), (0, 1), 5000, 2 * CLUSTER),
        )
        .record(
            27,
            Record::file(5, "sparse.bin").non_resident(
                DATA,
                "",
                &encode_runs(&[(Some(15), 1), (None, 1)]),
                (0, 1),
                2 * CLUSTER,
                2 * CLUSTER,
            ),
        )
        .write(13 * CLUSTER, &big)
        .write(15 * CLUSTER, &tail)
}

pub fn open(image: Vec<u8>, mode: RetrieveMode) -> MftReader {
    let options = ReaderOptions::default().with_mode(mode);
    MftReader::open_source("synthetic", ImageSource::new(Cursor::new(image)), options)
        .expect("synthetic image should open")
}

/// `(inode, path, size)` of every live node, sorted by inode
pub fn snapshot(reader: &MftReader) -> Vec<(u64, String, u64)> {
    let mut nodes: Vec<_> = reader
        .nodes_under("")
        .unwrap()
        .iter()
        .map(|n| (n.inode(), n.full_path().unwrap().to_string(), n.size()))
        .collect();
    nodes.sort();
    nodes
}
