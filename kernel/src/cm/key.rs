//! Registry Key Structures
//!
//! A key node is the directory entry of the registry. It never holds its
//! children or values directly; it points at cells that do:
//!
//! ```text
//! CmKeyNode
//! ├── subkey_lists[Stable]   ─► CmSubkeyIndex ─► CmKeyNode ...
//! ├── subkey_lists[Volatile] ─► CmSubkeyIndex ─► CmKeyNode ...
//! ├── value_list             ─► [CellIndex] ─► CmKeyValue ─► data
//! ├── class                  ─► UTF-16LE class name
//! └── security               ─► CmKeySecurity (shared, ref counted)
//! ```

use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;

use super::cell::{CellIndex, HStorageType, HCELL_NIL, HTYPE_COUNT};
use super::index::cm_name_size;

/// Fixed part of an on-disk key node (CM_KEY_NODE up to the name)
pub const CM_KEY_NODE_FIXED_SIZE: u32 = 0x4C;

/// Fixed part of an on-disk security cell (CM_KEY_SECURITY)
pub const CM_KEY_SECURITY_FIXED_SIZE: u32 = 0x14;

bitflags! {
    /// Key node flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyNodeFlags: u16 {
        /// Node lives in volatile storage
        const VOLATILE = 0x0001;
        /// Root of a hive
        const HIVE_ENTRY = 0x0004;
        /// Cannot be deleted
        const NO_DELETE = 0x0008;
        /// Symbolic link
        const LINK = 0x0010;
        /// Deleted; torn down when the last handle-object goes away
        const MARKED_FOR_DELETE = 0x8000;
    }
}

/// Registry key node
#[derive(Debug, Clone)]
pub struct CmKeyNode {
    pub name: String,
    /// FILETIME of the last change to this key
    pub last_write_time: u64,
    pub flags: KeyNodeFlags,
    /// Parent node, HCELL_NIL for a hive root
    pub parent: CellIndex,
    /// Subkey count per storage class
    pub subkey_counts: [u32; HTYPE_COUNT],
    /// Subkey index cell per storage class
    pub subkey_lists: [CellIndex; HTYPE_COUNT],
    pub value_count: u32,
    pub value_list: CellIndex,
    pub security: CellIndex,
    pub class: CellIndex,
    /// Class name size in bytes
    pub class_length: u16,
}

impl CmKeyNode {
    pub fn new(name: String, parent: CellIndex, flags: KeyNodeFlags, last_write_time: u64) -> Self {
        Self {
            name,
            last_write_time,
            flags,
            parent,
            subkey_counts: [0; HTYPE_COUNT],
            subkey_lists: [HCELL_NIL; HTYPE_COUNT],
            value_count: 0,
            value_list: HCELL_NIL,
            security: HCELL_NIL,
            class: HCELL_NIL,
            class_length: 0,
        }
    }

    /// Name size in bytes (UTF-16)
    #[inline]
    pub fn name_length(&self) -> u32 {
        cm_name_size(&self.name)
    }

    #[inline]
    pub fn is_marked_for_delete(&self) -> bool {
        self.flags.contains(KeyNodeFlags::MARKED_FOR_DELETE)
    }

    #[inline]
    pub fn is_volatile(&self) -> bool {
        self.flags.contains(KeyNodeFlags::VOLATILE)
    }

    /// Subkeys in both storage classes
    #[inline]
    pub fn total_subkeys(&self) -> u32 {
        self.subkey_counts.iter().sum()
    }

    /// Subkey count for one storage class
    #[inline]
    pub fn subkey_count(&self, storage: HStorageType) -> u32 {
        self.subkey_counts[storage.index()]
    }

    pub fn cell_size(&self) -> u32 {
        CM_KEY_NODE_FIXED_SIZE + self.name_length()
    }
}

/// Security cell shared by every key that carries the same descriptor
#[derive(Debug, Clone, Default)]
pub struct CmKeySecurity {
    pub ref_count: u32,
    /// Self-relative security descriptor, opaque here
    pub descriptor: Vec<u8>,
}

impl CmKeySecurity {
    pub fn new(descriptor: Vec<u8>) -> Self {
        Self {
            ref_count: 1,
            descriptor,
        }
    }

    pub fn cell_size(&self) -> u32 {
        CM_KEY_SECURITY_FIXED_SIZE + self.descriptor.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_new_node_is_empty() {
        let node = CmKeyNode::new("Select".to_string(), HCELL_NIL, KeyNodeFlags::empty(), 42);

        assert_eq!(node.name_length(), 12);
        assert_eq!(node.total_subkeys(), 0);
        assert!(node.value_list.is_nil());
        assert!(node.class.is_nil());
        assert_eq!(node.last_write_time, 42);
        assert_eq!(node.cell_size(), CM_KEY_NODE_FIXED_SIZE + 12);
    }

    #[test]
    fn test_flags() {
        let mut node = CmKeyNode::new("Tmp".to_string(), HCELL_NIL, KeyNodeFlags::VOLATILE, 0);
        assert!(node.is_volatile());
        assert!(!node.is_marked_for_delete());

        node.flags |= KeyNodeFlags::MARKED_FOR_DELETE;
        assert!(node.is_marked_for_delete());
    }
}
