//! Builders for synthetic MFT records used by unit tests

use crate::ntfs::structs::*;

pub const RECORD_SIZE: usize = 1024;

const USA_OFFSET: usize = 0x30;
const USA_COUNT: usize = RECORD_SIZE / SECTOR_SIZE as usize + 1;
const FIRST_ATTRIBUTE: usize = 0x38;
const SEQUENCE: [u8; 2] = [0x01, 0x00];
const IN_USE: u16 = 0x0001;
const IS_DIRECTORY: u16 = 0x0002;

/// Builds one 1024-byte file record, fixup applied on `build`
pub struct RecordBuilder {
    inode: u64,
    flags: u16,
    base_record: u64,
    attributes: Vec<Vec<u8>>,
}

impl RecordBuilder {
    pub fn new(inode: u64) -> Self {
        Self {
            inode,
            flags: IN_USE,
            base_record: 0,
            attributes: Vec::new(),
        }
    }

    pub fn directory(mut self) -> Self {
        self.flags |= IS_DIRECTORY;
        self
    }

    pub fn not_in_use(mut self) -> Self {
        self.flags &= !IN_USE;
        self
    }

    /// Mark as an extension of `base`, sequence number 1
    pub fn base_record(mut self, base: u64) -> Self {
        self.base_record = base | 1 << 48;
        self
    }

    pub fn standard_information(self, file_attributes: u32, time: u64) -> Self {
        let mut value = vec![0u8; 72];
        for i in 0..4 {
            value[i * 8..i * 8 + 8].copy_from_slice(&(time + i as u64).to_le_bytes());
        }
        value[32..36].copy_from_slice(&file_attributes.to_le_bytes());
        self.resident(AttributeType::StandardInformation as u32, "", &value)
    }

    pub fn file_name(self, parent: u64, name: &str, namespace: FilenameNamespace) -> Self {
        let units: Vec<u16> = name.encode_utf16().collect();
        let mut value = vec![0u8; 66 + units.len() * 2];
        // Sequence number 1 in the upper 16 bits
        value[0..8].copy_from_slice(&(parent | 1 << 48).to_le_bytes());
        value[64] = units.len() as u8;
        value[65] = namespace as u8;
        for (i, unit) in units.iter().enumerate() {
            value[66 + i * 2..68 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        self.resident(AttributeType::FileName as u32, "", &value)
    }

    pub fn resident_data(self, name: &str, value: &[u8]) -> Self {
        self.resident(AttributeType::Data as u32, name, value)
    }

    pub fn resident(mut self, type_code: u32, name: &str, value: &[u8]) -> Self {
        let name_units: Vec<u16> = name.encode_utf16().collect();
        let name_offset = 0x18;
        let value_offset = align8(name_offset + name_units.len() * 2);
        let length = align8(value_offset + value.len());

        let mut attr = vec![0u8; length];
        write_common(&mut attr, type_code, length, false, &name_units, name_offset);
        attr[16..20].copy_from_slice(&(value.len() as u32).to_le_bytes());
        attr[20..22].copy_from_slice(&(value_offset as u16).to_le_bytes());
        attr[value_offset..value_offset + value.len()].copy_from_slice(value);
        self.attributes.push(attr);
        self
    }

    /// Non-resident attribute covering VCNs `0..vcn_count`
    pub fn non_resident(
        mut self,
        name: &str,
        type_code: u32,
        runs: &[u8],
        vcn_count: u64,
        data_size: u64,
        allocated_size: u64,
    ) -> Self {
        let name_units: Vec<u16> = name.encode_utf16().collect();
        let name_offset = 0x40;
        let runs_offset = align8(name_offset + name_units.len() * 2);
        let length = align8(runs_offset + runs.len() + 1);

        let mut attr = vec![0u8; length];
        write_common(&mut attr, type_code, length, true, &name_units, name_offset);
        attr[24..32].copy_from_slice(&vcn_count.saturating_sub(1).to_le_bytes());
        attr[32..34].copy_from_slice(&(runs_offset as u16).to_le_bytes());
        attr[40..48].copy_from_slice(&allocated_size.to_le_bytes());
        attr[48..56].copy_from_slice(&data_size.to_le_bytes());
        attr[56..64].copy_from_slice(&data_size.to_le_bytes());
        attr[runs_offset..runs_offset + runs.len()].copy_from_slice(runs);
        self.attributes.push(attr);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut data = vec![0u8; RECORD_SIZE];
        data[0..4].copy_from_slice(b"FILE");
        data[4..6].copy_from_slice(&(USA_OFFSET as u16).to_le_bytes());
        data[6..8].copy_from_slice(&(USA_COUNT as u16).to_le_bytes());
        data[16..18].copy_from_slice(&1u16.to_le_bytes());
        data[18..20].copy_from_slice(&1u16.to_le_bytes());
        data[20..22].copy_from_slice(&(FIRST_ATTRIBUTE as u16).to_le_bytes());
        data[22..24].copy_from_slice(&self.flags.to_le_bytes());
        data[28..32].copy_from_slice(&(RECORD_SIZE as u32).to_le_bytes());
        data[32..40].copy_from_slice(&self.base_record.to_le_bytes());
        data[40..42].copy_from_slice(&(self.attributes.len() as u16).to_le_bytes());
        data[44..48].copy_from_slice(&(self.inode as u32).to_le_bytes());

        let mut offset = FIRST_ATTRIBUTE;
        for (id, attr) in self.attributes.iter().enumerate() {
            data[offset..offset + attr.len()].copy_from_slice(attr);
            data[offset + 14..offset + 16].copy_from_slice(&(id as u16).to_le_bytes());
            offset += attr.len();
        }
        data[offset..offset + 4].copy_from_slice(&ATTRIBUTE_END_MARKER.to_le_bytes());
        data[24..28].copy_from_slice(&((offset + 8) as u32).to_le_bytes());

        protect(&mut data);
        data
    }
}

/// Move each 512-byte block tail into the update sequence array
pub fn protect(data: &mut [u8]) {
    data[USA_OFFSET..USA_OFFSET + 2].copy_from_slice(&SEQUENCE);
    for i in 1..USA_COUNT {
        let tail = i * SECTOR_SIZE as usize - 2;
        let slot = USA_OFFSET + i * 2;
        data[slot] = data[tail];
        data[slot + 1] = data[tail + 1];
        data[tail..tail + 2].copy_from_slice(&SEQUENCE);
    }
}

fn write_common(
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
