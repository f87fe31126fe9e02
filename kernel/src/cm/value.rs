//! Registry Values
//!
//! A value entry stores its name, its type tag and a combined size field.
//! Bit 31 of the size (`REG_DATA_IN_OFFSET`) says where the data lives:
//!
//! - set: the data sits inside the entry's native-word data slot
//! - clear: the slot holds the index of a separate data cell
//!
//! Data of up to `CM_INLINE_DATA_MAX` bytes is always stored inline; anything
//! longer always gets its own cell.

use alloc::string::String;
use alloc::vec::Vec;
use core::mem::size_of;

use super::cell::{CellIndex, HCELL_NIL};
use super::index::cm_name_size;

/// Data is stored in the entry itself
pub const REG_DATA_IN_OFFSET: u32 = 0x8000_0000;

/// Size bits of the combined size field
pub const REG_DATA_SIZE_MASK: u32 = 0x7FFF_FFFF;

/// Largest inline value (one native word)
pub const CM_INLINE_DATA_MAX: usize = size_of::<usize>();

/// Fixed part of an on-disk value entry (CM_KEY_VALUE up to the name)
pub const CM_KEY_VALUE_FIXED_SIZE: u32 = 0x14;

/// Value name that turns its key into a symbolic link
pub const CM_SYMBOLIC_LINK_VALUE_NAME: &str = "SymbolicLinkValue";

/// Registry value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum RegType {
    /// No type
    #[default]
    None = 0,
    /// Null-terminated string
    Sz = 1,
    /// Expandable string (with %VARIABLE% references)
    ExpandSz = 2,
    /// Binary data
    Binary = 3,
    /// 32-bit little-endian integer
    Dword = 4,
    /// 32-bit big-endian integer
    DwordBigEndian = 5,
    /// Symbolic link (Unicode string)
    Link = 6,
    /// Array of null-terminated strings
    MultiSz = 7,
    ResourceList = 8,
    FullResourceDescriptor = 9,
    ResourceRequirementsList = 10,
    /// 64-bit little-endian integer
    Qword = 11,
}

impl RegType {
    /// Create from raw value; unknown tags have no variant but are still
    /// stored verbatim in value entries
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Sz),
            2 => Some(Self::ExpandSz),
            3 => Some(Self::Binary),
            4 => Some(Self::Dword),
            5 => Some(Self::DwordBigEndian),
            6 => Some(Self::Link),
            7 => Some(Self::MultiSz),
            8 => Some(Self::ResourceList),
            9 => Some(Self::FullResourceDescriptor),
            10 => Some(Self::ResourceRequirementsList),
            11 => Some(Self::Qword),
            _ => None,
        }
    }
}

impl From<RegType> for u32 {
    fn from(value: RegType) -> Self {
        value as u32
    }
}

/// Value entry (CM_KEY_VALUE)
#[derive(Debug, Clone)]
pub struct CmKeyValue {
    pub name: String,
    /// Raw type tag, REG_* or anything else the caller chose
    pub value_type: u32,
    /// Data length, with `REG_DATA_IN_OFFSET` for inline data
    pub data_size: u32,
    /// Inline data, or the data cell index in the first four bytes
    data_slot: [u8; CM_INLINE_DATA_MAX],
}

impl CmKeyValue {
    pub fn new(name: String, value_type: u32) -> Self {
        Self {
            name,
            value_type,
            data_size: REG_DATA_IN_OFFSET,
            data_slot: [0; CM_INLINE_DATA_MAX],
        }
    }

    #[inline]
    pub fn is_inline(&self) -> bool {
        self.data_size & REG_DATA_IN_OFFSET != 0
    }

    /// Data length in bytes
    #[inline]
    pub fn data_length(&self) -> u32 {
        self.data_size & REG_DATA_SIZE_MASK
    }

    /// Name size in bytes (UTF-16)
    #[inline]
    pub fn name_length(&self) -> u32 {
        cm_name_size(&self.name)
    }

    /// Separate data cell, or HCELL_NIL for inline data
    pub fn data_cell(&self) -> CellIndex {
        if self.is_inline() {
            return HCELL_NIL;
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data_slot[..4]);
        CellIndex::from_raw(u32::from_le_bytes(raw))
    }

    /// Inline data, empty when the data lives in its own cell
    pub fn inline_data(&self) -> &[u8] {
        if self.is_inline() {
            &self.data_slot[..self.data_length() as usize]
        } else {
            &[]
        }
    }

    /// Store data inline; `data` must fit in the slot
    pub fn set_inline(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= CM_INLINE_DATA_MAX);
        self.data_slot = [0; CM_INLINE_DATA_MAX];
        self.data_slot[..data.len()].copy_from_slice(data);
        self.data_size = REG_DATA_IN_OFFSET | data.len() as u32;
    }

    /// Point at a separate data cell holding `length` bytes
    pub fn set_indirect(&mut self, cell: CellIndex, length: u32) {
        self.data_slot = [0; CM_INLINE_DATA_MAX];
        self.data_slot[..4].copy_from_slice(&cell.raw().to_le_bytes());
        self.data_size = length & REG_DATA_SIZE_MASK;
    }

    pub fn cell_size(&self) -> u32 {
        CM_KEY_VALUE_FIXED_SIZE + self.name_length()
    }
}

/// Encode a string as NUL-terminated UTF-16LE (REG_SZ layout)
pub fn cm_encode_string(s: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity((s.len() + 1) * 2);
    for unit in s.encode_utf16().chain(core::iter::once(0)) {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

/// UTF-16LE bytes of a name without terminator (UNICODE_STRING buffer)
pub fn cm_encode_name(s: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(s.len() * 2);
    for unit in s.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

/// Decode UTF-16LE bytes, replacing unpaired surrogates
pub fn cm_decode_name(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
