//! Subkey Indices and Name Hashing
//!
//! Each key keeps one subkey index per storage class. An index is an "lh"
//! list: every entry pairs a child cell with the hash of the child's name,
//! so lookups compare hashes before touching the child node.
//!
//! Names compare case-insensitively, as NT upcases both sides before
//! comparing. New entries are appended, so an entry's position is its
//! enumeration ordinal within the class.

use alloc::vec::Vec;

use super::cell::CellIndex;

/// Multiplier of the "lh" name hash
pub const CM_HASH_MULTIPLIER: u32 = 37;

/// Path separator
pub const OBJ_NAME_PATH_SEPARATOR: char = '\\';

/// Upcase one UTF-16 unit (RtlUpcaseUnicodeChar)
///
/// Units whose uppercase form is not a single BMP character are left as is.
pub fn cm_upcase_char(unit: u16) -> u16 {
    if unit < 0x80 {
        return (unit as u8).to_ascii_uppercase() as u16;
    }

    let Some(ch) = char::from_u32(unit as u32) else {
        return unit;
    };

    let mut upper = ch.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) if (u as u32) <= 0xFFFF => u as u32 as u16,
        _ => unit,
    }
}

/// "lh" hash of a key name: `hash = hash * 37 + upcase(unit)`
pub fn cm_compute_name_hash(name: &str) -> u32 {
    name.encode_utf16()
        .fold(0u32, |hash, unit| {
            hash.wrapping_mul(CM_HASH_MULTIPLIER).wrapping_add(cm_upcase_char(unit) as u32)
        })
}

/// Case-insensitive name comparison
pub fn cm_names_equal(a: &str, b: &str) -> bool {
    let mut left = a.encode_utf16();
    let mut right = b.encode_utf16();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if cm_upcase_char(x) == cm_upcase_char(y) => {}
            _ => return false,
        }
    }
}

/// Size of a name in bytes on the wire (UTF-16)
#[inline]
pub fn cm_name_size(name: &str) -> u32 {
    (name.encode_utf16().count() * 2) as u32
}

/// Name length in UTF-16 units
#[inline]
pub fn cm_name_units(name: &str) -> usize {
    name.encode_utf16().count()
}

/// Index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmIndexEntry {
    pub cell: CellIndex,
    pub hash_key: u32,
}

/// Subkey index ("lh" list)
#[derive(Debug, Clone, Default)]
pub struct CmSubkeyIndex {
    entries: Vec<CmIndexEntry>,
}

impl CmSubkeyIndex {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Child at an ordinal
    pub fn get(&self, ordinal: usize) -> Option<CellIndex> {
        self.entries.get(ordinal).map(|e| e.cell)
    }

    /// Append a child
    pub fn insert(&mut self, cell: CellIndex, name: &str) {
        self.entries.push(CmIndexEntry {
            cell,
            hash_key: cm_compute_name_hash(name),
        });
    }

    /// Remove a child; later ordinals shift down by one
    pub fn remove(&mut self, cell: CellIndex) -> bool {
        match self.entries.iter().position(|e| e.cell == cell) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Children whose name hash matches `name`
    pub fn candidates(&self, name: &str) -> impl Iterator<Item = CellIndex> + '_ {
        let hash = cm_compute_name_hash(name);
        self.entries
            .iter()
            .filter(move |e| e.hash_key == hash)
            .map(|e| e.cell)
    }

    pub fn iter(&self) -> impl Iterator<Item = CellIndex> + '_ {
        self.entries.iter().map(|e| e.cell)
    }

    /// Signature + count, then (cell, hash) pairs
    pub fn cell_size(&self) -> u32 {
        4 + 8 * self.entries.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cm::cell::HStorageType;

    #[test]
    fn test_hash_is_case_insensitive() {
        assert_eq!(cm_compute_name_hash("Software"), cm_compute_name_hash("SOFTWARE"));
        assert_ne!(cm_compute_name_hash("Software"), cm_compute_name_hash("System"));
        assert_eq!(cm_compute_name_hash("AB"), 'A' as u32 * 37 + 'B' as u32);
    }

    #[test]
    fn test_names_equal() {
        assert!(cm_names_equal("ControlSet001", "controlset001"));
        assert!(cm_names_equal("Straße", "STRAßE"));
        assert!(cm_names_equal("ÄÖÜ", "äöü"));
        assert!(!cm_names_equal("Key", "Keys"));
        assert!(!cm_names_equal("Key", "Kez"));
    }

    #[test]
    fn test_name_size_counts_utf16() {
        assert_eq!(cm_name_size("Key"), 6);
        assert_eq!(cm_name_size("\u{1F600}"), 4);
        assert_eq!(cm_name_units("\u{1F600}"), 2);
    }

    #[test]
    fn test_insert_remove_keeps_order() {
        let a = CellIndex::new(HStorageType::Stable, 1);
        let b = CellIndex::new(HStorageType::Stable, 2);
        let c = CellIndex::new(HStorageType::Stable, 3);

        let mut index = CmSubkeyIndex::new();
        index.insert(a, "A");
        index.insert(b, "B");
        index.insert(c, "C");
        assert_eq!(index.get(1), Some(b));
        assert_eq!(index.cell_size(), 28);

        assert!(index.remove(b));
        assert!(!index.remove(b));
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(1), Some(c));
        assert_eq!(index.get(2), None);
    }

    #[test]
    fn test_candidates_filter_by_hash() {
        let a = CellIndex::new(HStorageType::Stable, 1);
        let b = CellIndex::new(HStorageType::Stable, 2);

        let mut index = CmSubkeyIndex::new();
        index.insert(a, "Alpha");
        index.insert(b, "Beta");

        let found: Vec<_> = index.candidates("ALPHA").collect();
        assert_eq!(found, [a]);
        assert_eq!(index.candidates("Gamma").count(), 0);
    }
}
