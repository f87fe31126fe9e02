//! Query Information Records
//!
//! Every read-style service answers with an information-class record: a
//! fixed header followed by variable-length fields (names, class, data) at
//! offsets the header announces. Callers pass a buffer of whatever size they
//! guessed, so all records go through one marshaling rule:
//!
//! 1. Compute the full record length R.
//! 2. Buffer smaller than the header: `BufferTooSmall`, nothing written.
//! 3. Otherwise write the header, then each field in order. The first field
//!    that does not fit is cut at the end of the buffer, the status becomes
//!    `BufferOverflow` and later fields are skipped.
//! 4. R is reported in every case.
//!
//! Layouts are little-endian, matching the `KEY_*_INFORMATION` and
//! `KEY_VALUE_*_INFORMATION` structures.

use alloc::string::String;
use alloc::vec::Vec;

use super::cell::CellIndex;
use super::hive::CmHive;
use super::status::CmStatus;
use super::value::cm_encode_name;

/// Alignment of data in `KEY_VALUE_FULL_INFORMATION` and of items in a
/// multiple-value query
pub const CM_DATA_ALIGNMENT: usize = 8;

pub const KEY_BASIC_INFORMATION_SIZE: usize = 16;
pub const KEY_NODE_INFORMATION_SIZE: usize = 24;
pub const KEY_FULL_INFORMATION_SIZE: usize = 44;
pub const KEY_NAME_INFORMATION_SIZE: usize = 4;
pub const KEY_CACHED_INFORMATION_SIZE: usize = 36;

pub const KEY_VALUE_BASIC_INFORMATION_SIZE: usize = 12;
pub const KEY_VALUE_FULL_INFORMATION_SIZE: usize = 20;
pub const KEY_VALUE_PARTIAL_INFORMATION_SIZE: usize = 12;
pub const KEY_VALUE_PARTIAL_INFORMATION_ALIGN64_SIZE: usize = 8;

/// Outcome of a marshaled query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marshaled {
    /// `Success`, `BufferOverflow` or `BufferTooSmall`
    pub status: CmStatus,
    /// Full record length, whatever was written
    pub result_length: u32,
}

/// One variable-length field of a record
#[derive(Debug, Clone, Copy)]
pub struct RecordField<'a> {
    pub offset: usize,
    pub data: &'a [u8],
}

#[inline]
fn round_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

#[inline]
fn clamp_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Write a record into `buffer` following the truncation rule above
///
/// `fields` must be in ascending offset order, none overlapping the header.
pub fn cm_marshal_record(buffer: &mut [u8], header: &[u8], fields: &[RecordField<'_>]) -> Marshaled {
    let required = fields
        .iter()
        .map(|f| f.offset + f.data.len())
        .fold(header.len(), usize::max);
    let result_length = clamp_u32(required);

    if buffer.len() < header.len() {
        return Marshaled {
            status: CmStatus::BufferTooSmall,
            result_length,
        };
    }
    buffer[..header.len()].copy_from_slice(header);

    let mut cursor = header.len();
    for field in fields {
        // Padding between fields reads as zero
        let pad_end = field.offset.min(buffer.len());
        if cursor < pad_end {
            buffer[cursor..pad_end].fill(0);
        }

        let end = field.offset + field.data.len();
        if buffer.len() < end {
            if buffer.len() > field.offset {
                let available = buffer.len() - field.offset;
                buffer[field.offset..].copy_from_slice(&field.data[..available]);
            }
            return Marshaled {
                status: CmStatus::BufferOverflow,
                result_length,
            };
        }

        buffer[field.offset..end].copy_from_slice(field.data);
        cursor = end;
    }

    Marshaled {
        status: CmStatus::Success,
        result_length,
    }
}

/// Little-endian header builder
struct Header {
    bytes: Vec<u8>,
}

impl Header {
    fn with_capacity(size: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(size),
        }
    }

    fn u32(mut self, value: u32) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn u64(mut self, value: u64) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

// ============================================================================
// Key Information
// ============================================================================

/// KEY_INFORMATION_CLASS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum KeyInformationClass {
    Basic = 0,
    Node = 1,
    Full = 2,
    Name = 3,
    Cached = 4,
    Flags = 5,
    Virtualization = 6,
    HandleTags = 7,
}

impl TryFrom<u32> for KeyInformationClass {
    type Error = CmStatus;

    fn try_from(value: u32) -> Result<Self, CmStatus> {
        Ok(match value {
            0 => Self::Basic,
            1 => Self::Node,
            2 => Self::Full,
            3 => Self::Name,
            4 => Self::Cached,
            5 => Self::Flags,
            6 => Self::Virtualization,
            7 => Self::HandleTags,
            _ => return Err(CmStatus::InvalidInfoClass),
        })
    }
}

/// Build a key record for `cell`
///
/// `title_index` is 0 for queries and the ordinal for enumerations;
/// `name_info` is what `KeyNameInformation` reports.
pub fn cm_query_key_info(
    hive: &CmHive,
    cell: CellIndex,
    class: KeyInformationClass,
    title_index: u32,
    name_info: &str,
    buffer: &mut [u8],
) -> Result<Marshaled, CmStatus> {
    let node = hive.key_node(cell)?;

    let marshaled = match class {
        KeyInformationClass::Basic => {
            let name = cm_encode_name(&node.name);
            let header = Header::with_capacity(KEY_BASIC_INFORMATION_SIZE)
                .u64(node.last_write_time)
                .u32(title_index)
                .u32(name.len() as u32)
                .finish();
            cm_marshal_record(
                buffer,
                &header,
                &[RecordField {
                    offset: KEY_BASIC_INFORMATION_SIZE,
                    data: &name,
                }],
            )
        }
        KeyInformationClass::Node => {
            let name = cm_encode_name(&node.name);
            let class_name = hive.class_name(cell)?;
            let class_offset = KEY_NODE_INFORMATION_SIZE + name.len();
            let header = Header::with_capacity(KEY_NODE_INFORMATION_SIZE)
                .u64(node.last_write_time)
                .u32(title_index)
                .u32(class_offset as u32)
                .u32(class_name.len() as u32)
                .u32(name.len() as u32)
                .finish();
            cm_marshal_record(
                buffer,
                &header,
                &[
                    RecordField {
                        offset: KEY_NODE_INFORMATION_SIZE,
                        data: &name,
                    },
                    RecordField {
                        offset: class_offset,
                        data: class_name,
                    },
                ],
            )
        }
        KeyInformationClass::Full => {
            let class_name = hive.class_name(cell)?;
            let header = Header::with_capacity(KEY_FULL_INFORMATION_SIZE)
                .u64(node.last_write_time)
                .u32(title_index)
                .u32(KEY_FULL_INFORMATION_SIZE as u32)
                .u32(class_name.len() as u32)
                .u32(hive.subkey_count(cell)?)
                .u32(hive.max_name_length(cell)?)
                .u32(hive.max_class_length(cell)?)
                .u32(node.value_count)
                .u32(hive.max_value_name_length(cell)?)
                .u32(hive.max_value_data_length(cell)?)
                .finish();
            cm_marshal_record(
                buffer,
                &header,
                &[RecordField {
                    offset: KEY_FULL_INFORMATION_SIZE,
                    data: class_name,
                }],
            )
        }
        KeyInformationClass::Name => {
            let name = cm_encode_name(name_info);
            let header = Header::with_capacity(KEY_NAME_INFORMATION_SIZE)
                .u32(name.len() as u32)
                .finish();
            cm_marshal_record(
                buffer,
                &header,
                &[RecordField {
                    offset: KEY_NAME_INFORMATION_SIZE,
                    data: &name,
                }],
            )
        }
        KeyInformationClass::Cached => {
            let header = Header::with_capacity(KEY_CACHED_INFORMATION_SIZE)
                .u64(node.last_write_time)
                .u32(title_index)
                .u32(hive.subkey_count(cell)?)
                .u32(hive.max_name_length(cell)?)
                .u32(node.value_count)
                .u32(hive.max_value_name_length(cell)?)
                .u32(hive.max_value_data_length(cell)?)
                .u32(node.name_length())
                .finish();
            cm_marshal_record(buffer, &header, &[])
        }
        KeyInformationClass::Flags | KeyInformationClass::Virtualization | KeyInformationClass::HandleTags => {
            return Err(CmStatus::NotImplemented);
        }
    };

    Ok(marshaled)
}

// ============================================================================
// Value Information
// ============================================================================

/// KEY_VALUE_INFORMATION_CLASS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum KeyValueInformationClass {
    Basic = 0,
    Full = 1,
    Partial = 2,
    FullAlign64 = 3,
    PartialAlign64 = 4,
}

impl TryFrom<u32> for KeyValueInformationClass {
    type Error = CmStatus;

    fn try_from(value: u32) -> Result<Self, CmStatus> {
        Ok(match value {
            0 => Self::Basic,
            1 => Self::Full,
            2 => Self::Partial,
            3 => Self::FullAlign64,
            4 => Self::PartialAlign64,
            _ => return Err(CmStatus::InvalidInfoClass),
        })
    }
}

/// Build a value record for `value_cell`
pub fn cm_query_value_info(
    hive: &CmHive,
    value_cell: CellIndex,
    class: KeyValueInformationClass,
    title_index: u32,
    buffer: &mut [u8],
) -> Result<Marshaled, CmStatus> {
    let value = hive.key_value(value_cell)?;
    let data = hive.value_data(value)?;

    let marshaled = match class {
        KeyValueInformationClass::Basic => {
            let name = cm_encode_name(&value.name);
            let header = Header::with_capacity(KEY_VALUE_BASIC_INFORMATION_SIZE)
                .u32(title_index)
                .u32(value.value_type)
                .u32(name.len() as u32)
                .finish();
            cm_marshal_record(
                buffer,
                &header,
                &[RecordField {
                    offset: KEY_VALUE_BASIC_INFORMATION_SIZE,
                    data: &name,
                }],
            )
        }
        KeyValueInformationClass::Full | KeyValueInformationClass::FullAlign64 => {
            let name = cm_encode_name(&value.name);
            let data_offset = round_up(KEY_VALUE_FULL_INFORMATION_SIZE + name.len(), CM_DATA_ALIGNMENT);
            let header = Header::with_capacity(KEY_VALUE_FULL_INFORMATION_SIZE)
                .u32(title_index)
                .u32(value.value_type)
                .u32(data_offset as u32)
                .u32(data.len() as u32)
                .u32(name.len() as u32)
                .finish();
            cm_marshal_record(
                buffer,
                &header,
                &[
                    RecordField {
                        offset: KEY_VALUE_FULL_INFORMATION_SIZE,
                        data: &name,
                    },
                    RecordField {
                        offset: data_offset,
                        data,
                    },
                ],
            )
        }
        KeyValueInformationClass::Partial => {
            let header = Header::with_capacity(KEY_VALUE_PARTIAL_INFORMATION_SIZE)
                .u32(title_index)
                .u32(value.value_type)
                .u32(data.len() as u32)
                .finish();
            cm_marshal_record(
                buffer,
                &header,
                &[RecordField {
                    offset: KEY_VALUE_PARTIAL_INFORMATION_SIZE,
                    data,
                }],
            )
        }
        KeyValueInformationClass::PartialAlign64 => {
            let header = Header::with_capacity(KEY_VALUE_PARTIAL_INFORMATION_ALIGN64_SIZE)
                .u32(value.value_type)
                .u32(data.len() as u32)
                .finish();
            cm_marshal_record(
                buffer,
                &header,
                &[RecordField {
                    offset: KEY_VALUE_PARTIAL_INFORMATION_ALIGN64_SIZE,
                    data,
                }],
            )
        }
    };

    Ok(marshaled)
}

// ============================================================================
// Multiple Value Query
// ============================================================================

/// KEY_VALUE_ENTRY: the caller fills `name`, the query fills the rest
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyValueEntry {
    pub name: String,
    pub data_length: u32,
    pub data_offset: u32,
    pub value_type: u32,
}

impl KeyValueEntry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Pack the data of several values into one buffer
///
/// Items are 8-byte aligned. Items that fit are copied even when a later
/// one does not; the status is then `BufferTooSmall` and the result length
/// is the size the whole set needs.
pub fn cm_query_multiple_values(
    hive: &CmHive,
    cell: CellIndex,
    entries: &mut [KeyValueEntry],
    buffer: &mut [u8],
) -> Result<Marshaled, CmStatus> {
    let mut status = CmStatus::Success;
    let mut offset = 0usize;

    for entry in entries.iter_mut() {
        let (_, value_cell) = hive.find_value(cell, &entry.name)?;
        let value = hive.key_value(value_cell)?;
        let data = hive.value_data(value)?;

        let aligned = round_up(offset, CM_DATA_ALIGNMENT);
        entry.value_type = value.value_type;
        entry.data_length = data.len() as u32;
        entry.data_offset = clamp_u32(aligned);

        let end = aligned + data.len();
        if end <= buffer.len() {
            buffer[offset..aligned].fill(0);
            buffer[aligned..end].copy_from_slice(data);
        } else {
            status = CmStatus::BufferTooSmall;
        }
        offset = end;
    }

    Ok(Marshaled {
        status,
        result_length: clamp_u32(offset),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cm::config::CmConfig;
    use crate::cm::hive::{CreateOptions, HiveFlags};
    use crate::cm::value::RegType;
    use alloc::vec;

    fn read_u32(buffer: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(buffer[offset..offset + 4].try_into().unwrap())
    }

    fn sample() -> (CmHive, CellIndex) {
        let config = CmConfig::new().with_clock(|| 0x01D9_0000_0000_0000);
        let mut hive = CmHive::new(0, "SOFTWARE", HiveFlags::empty(), &config).unwrap();
        let root = hive.root();
        let key = hive.create_key(root, "Vendor", Some("VendorClass"), CreateOptions::empty()).unwrap();
        hive.create_key(key, "Sub", None, CreateOptions::empty()).unwrap();
        hive.set_value(key, "Path", RegType::Sz as u32, &[b'C', 0, b':', 0, 0, 0]).unwrap();
        hive.set_value(key, "Blob", RegType::Binary as u32, &[0x5A; 13]).unwrap();
        (hive, key)
    }

    /// Check the truncation rule at every buffer size around the record
    fn assert_truncation_protocol(mut query: impl FnMut(&mut [u8]) -> Marshaled, header: usize) {
        let mut full = vec![0u8; 512];
        let reference = query(&mut full);
        assert_eq!(reference.status, CmStatus::Success);
        let required = reference.result_length as usize;

        for size in 0..=required + 4 {
            let mut buffer = vec![0xEEu8; size];
            let result = query(&mut buffer);
            assert_eq!(result.result_length as usize, required, "size {}", size);

            if size < header {
                assert_eq!(result.status, CmStatus::BufferTooSmall);
                assert!(buffer.iter().all(|&b| b == 0xEE), "size {} wrote", size);
            } else if size < required {
                assert_eq!(result.status, CmStatus::BufferOverflow, "size {}", size);
                assert_eq!(buffer[..], full[..size], "size {}", size);
            } else {
                assert_eq!(result.status, CmStatus::Success, "size {}", size);
                assert_eq!(buffer[..required], full[..required]);
            }
        }
    }

    #[test]
    fn test_marshal_record_rules() {
        let header = [1u8, 2, 3, 4];
        let fields = [
            RecordField { offset: 4, data: b"ab" },
            RecordField { offset: 8, data: b"cdef" },
        ];

        let mut small = [0xFFu8; 3];
        let result = cm_marshal_record(&mut small, &header, &fields);
        assert_eq!(result, Marshaled { status: CmStatus::BufferTooSmall, result_length: 12 });
        assert_eq!(small, [0xFF; 3]);

        let mut partial = [0xFFu8; 10];
        let result = cm_marshal_record(&mut partial, &header, &fields);
        assert_eq!(result.status, CmStatus::BufferOverflow);
        assert_eq!(partial, [1, 2, 3, 4, b'a', b'b', 0, 0, b'c', b'd']);

        let mut exact = [0xFFu8; 12];
        let result = cm_marshal_record(&mut exact, &header, &fields);
        assert_eq!(result.status, CmStatus::Success);
        assert_eq!(&exact[8..], b"cdef");
    }

    #[test]
    fn test_key_basic_layout() {
        let (hive, key) = sample();
        let mut buffer = [0u8; 64];
        let result = cm_query_key_info(&hive, key, KeyInformationClass::Basic, 3, "", &mut buffer).unwrap();

        assert_eq!(result.result_length, 16 + 12);
        assert_eq!(u64::from_le_bytes(buffer[0..8].try_into().unwrap()), 0x01D9_0000_0000_0000);
        assert_eq!(read_u32(&buffer, 8), 3);
        assert_eq!(read_u32(&buffer, 12), 12);
        assert_eq!(&buffer[16..28], cm_encode_name("Vendor").as_slice());
    }

    #[test]
    fn test_key_node_layout() {
        let (hive, key) = sample();
        let mut buffer = [0u8; 128];
        let result = cm_query_key_info(&hive, key, KeyInformationClass::Node, 0, "", &mut buffer).unwrap();

        let class = cm_encode_name("VendorClass");
        assert_eq!(result.result_length as usize, 24 + 12 + class.len());
        assert_eq!(read_u32(&buffer, 12), 36);
        assert_eq!(read_u32(&buffer, 16), class.len() as u32);
        assert_eq!(read_u32(&buffer, 20), 12);
        assert_eq!(&buffer[36..36 + class.len()], class.as_slice());
    }

    #[test]
    fn test_key_full_and_cached() {
        let (hive, key) = sample();
        let mut buffer = [0u8; 128];

        let full = cm_query_key_info(&hive, key, KeyInformationClass::Full, 0, "", &mut buffer).unwrap();
        assert_eq!(full.result_length, 44 + 22);
        assert_eq!(read_u32(&buffer, 12), 44);
        assert_eq!(read_u32(&buffer, 20), 1); // SubKeys
        assert_eq!(read_u32(&buffer, 24), 6); // MaxNameLen
        assert_eq!(read_u32(&buffer, 32), 2); // Values
        assert_eq!(read_u32(&buffer, 36), 8); // MaxValueNameLen
        assert_eq!(read_u32(&buffer, 40), 13); // MaxValueDataLen

        let cached = cm_query_key_info(&hive, key, KeyInformationClass::Cached, 0, "", &mut buffer).unwrap();
        assert_eq!(cached.result_length, 36);
        assert_eq!(read_u32(&buffer, 12), 1);
        assert_eq!(read_u32(&buffer, 32), 12);
    }

    #[test]
    fn test_key_name_and_unsupported() {
        let (hive, key) = sample();
        let mut buffer = [0u8; 128];
        let path = "\\SOFTWARE\\Vendor";

        let result = cm_query_key_info(&hive, key, KeyInformationClass::Name, 0, path, &mut buffer).unwrap();
        assert_eq!(result.result_length as usize, 4 + path.len() * 2);
        assert_eq!(read_u32(&buffer, 0) as usize, path.len() * 2);

        assert_eq!(
            cm_query_key_info(&hive, key, KeyInformationClass::Flags, 0, path, &mut buffer),
            Err(CmStatus::NotImplemented)
        );
        assert_eq!(KeyInformationClass::try_from(9), Err(CmStatus::InvalidInfoClass));
    }

    #[test]
    fn test_value_full_layout() {
        let (hive, key) = sample();
        let (ordinal, blob) = hive.find_value(key, "Blob").unwrap();
        let mut buffer = [0xEEu8; 64];
        let result = cm_query_value_info(&hive, blob, KeyValueInformationClass::Full, ordinal, &mut buffer).unwrap();

        // 20 + 8 name bytes, data aligned to 32
        assert_eq!(result.result_length, 32 + 13);
        assert_eq!(read_u32(&buffer, 0), 1);
        assert_eq!(read_u32(&buffer, 4), RegType::Binary as u32);
        assert_eq!(read_u32(&buffer, 8), 32);
        assert_eq!(read_u32(&buffer, 12), 13);
        assert_eq!(read_u32(&buffer, 16), 8);
        assert_eq!(&buffer[28..32], &[0; 4]);
        assert_eq!(&buffer[32..45], &[0x5A; 13]);
    }

    #[test]
    fn test_value_partial_layouts() {
        let (hive, key) = sample();
        let (_, path) = hive.find_value(key, "Path").unwrap();
        let mut buffer = [0u8; 32];

        let partial = cm_query_value_info(&hive, path, KeyValueInformationClass::Partial, 0, &mut buffer).unwrap();
        assert_eq!(partial.result_length, 12 + 6);
        assert_eq!(read_u32(&buffer, 8), 6);

        let aligned = cm_query_value_info(&hive, path, KeyValueInformationClass::PartialAlign64, 0, &mut buffer).unwrap();
        assert_eq!(aligned.result_length, 8 + 6);
        assert_eq!(read_u32(&buffer, 0), RegType::Sz as u32);
        assert_eq!(&buffer[8..14], &[b'C', 0, b':', 0, 0, 0]);
    }

    #[test]
    fn test_truncation_protocol_for_every_class() {
        let (hive, key) = sample();
        let (_, blob) = hive.find_value(key, "Blob").unwrap();

        for (class, header) in [
            (KeyInformationClass::Basic, 16),
            (KeyInformationClass::Node, 24),
            (KeyInformationClass::Full, 44),
            (KeyInformationClass::Name, 4),
            (KeyInformationClass::Cached, 36),
        ] {
            assert_truncation_protocol(
                |buf| cm_query_key_info(&hive, key, class, 0, "\\SOFTWARE\\Vendor", buf).unwrap(),
                header,
            );
        }

        for (class, header) in [
            (KeyValueInformationClass::Basic, 12),
            (KeyValueInformationClass::Full, 20),
            (KeyValueInformationClass::Partial, 12),
            (KeyValueInformationClass::FullAlign64, 20),
            (KeyValueInformationClass::PartialAlign64, 8),
        ] {
            assert_truncation_protocol(|buf| cm_query_value_info(&hive, blob, class, 0, buf).unwrap(), header);
        }
    }

    #[test]
    fn test_multiple_values() {
        let (hive, key) = sample();
        let mut entries = [KeyValueEntry::new("Path"), KeyValueEntry::new("blob")];
        let mut buffer = [0xEEu8; 32];

        let result = cm_query_multiple_values(&hive, key, &mut entries, &mut buffer).unwrap();
        assert_eq!(result, Marshaled { status: CmStatus::Success, result_length: 8 + 13 });
        assert_eq!(entries[0].data_offset, 0);
        assert_eq!(entries[1].data_offset, 8);
        assert_eq!(entries[1].value_type, RegType::Binary as u32);
        assert_eq!(&buffer[6..8], &[0, 0]);
        assert_eq!(&buffer[8..21], &[0x5A; 13]);

        // Exactly the needed size pads and copies everything
        let mut exact = [0xEEu8; 21];
        let result = cm_query_multiple_values(&hive, key, &mut entries, &mut exact).unwrap();
        assert_eq!(result.status, CmStatus::Success);
        assert_eq!(&exact[6..8], &[0, 0]);
        assert_eq!(&exact[8..], &[0x5A; 13]);

        let mut small = [0u8; 10];
        let result = cm_query_multiple_values(&hive, key, &mut entries, &mut small).unwrap();
        assert_eq!(result, Marshaled { status: CmStatus::BufferTooSmall, result_length: 21 });
        assert_eq!(&small[..6], &[b'C', 0, b':', 0, 0, 0]);

        let mut missing = [KeyValueEntry::new("Nope")];
        assert_eq!(
            cm_query_multiple_values(&hive, key, &mut missing, &mut buffer),
            Err(CmStatus::ValueNotFound)
        );
    }
}
