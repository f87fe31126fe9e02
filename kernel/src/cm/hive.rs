//! Registry Hives
//!
//! A hive is a self-contained tree of cells with one root key. Everything
//! the registry persists lives in stable cells; keys created with
//! `CreateOptions::VOLATILE` and everything under them live in volatile
//! cells and vanish with the hive.
//!
//! This module holds the tree algorithms (create, delete-mark, teardown,
//! lookup, enumeration, values) and the `HiveBackingStore` seam used to
//! load, save and flush hives.
//!
//! Nothing here locks: callers hold the registry tree lock, shared for the
//! `&self` routines and exclusive for the `&mut self` ones.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use super::cell::{cm_cell_size, CellData, CellIndex, CellMap, HStorageType, HCELL_NIL};
use super::config::CmConfig;
use super::index::{cm_name_units, cm_names_equal, CmSubkeyIndex, OBJ_NAME_PATH_SEPARATOR};
use super::key::{CmKeyNode, CmKeySecurity, KeyNodeFlags};
use super::status::CmStatus;
use super::value::{
    cm_decode_name,
    cm_encode_name,
    CmKeyValue,
    RegType,
    CM_INLINE_DATA_MAX,
    CM_SYMBOLIC_LINK_VALUE_NAME,
    REG_DATA_SIZE_MASK,
};

/// Hive identifier within a hive set
pub type HiveId = u16;

/// Self-relative descriptor given to every new hive root: revision 1,
/// SE_SELF_RELATIVE, no owner, group or ACLs
pub const CM_DEFAULT_SECURITY_DESCRIPTOR: [u8; 20] = [
    0x01, 0x00, 0x00, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

bitflags! {
    /// Hive flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HiveFlags: u32 {
        /// Memory only; flushing is a no-op
        const VOLATILE = 0x0001;
    }
}

bitflags! {
    /// Key creation options (REG_OPTION_*)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CreateOptions: u32 {
        const VOLATILE = 0x0001;
        const CREATE_LINK = 0x0002;
    }
}

// ============================================================================
// Hive Images
// ============================================================================

/// Persisted form of a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSnapshot {
    pub name: String,
    pub value_type: u32,
    pub data: Vec<u8>,
}

/// Persisted form of a key and its stable subtree
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeySnapshot {
    pub name: String,
    pub class: Option<String>,
    pub last_write_time: u64,
    pub values: Vec<ValueSnapshot>,
    pub subkeys: Vec<KeySnapshot>,
}

impl KeySnapshot {
    /// Direct subkey by name
    pub fn subkey(&self, name: &str) -> Option<&KeySnapshot> {
        self.subkeys.iter().find(|k| cm_names_equal(&k.name, name))
    }

    pub fn value(&self, name: &str) -> Option<&ValueSnapshot> {
        self.values.iter().find(|v| cm_names_equal(&v.name, name))
    }
}

// ============================================================================
// Hive
// ============================================================================

/// Registry hive
#[derive(Debug, Clone)]
pub struct CmHive {
    id: HiveId,
    name: String,
    flags: HiveFlags,
    cells: CellMap,
    root: CellIndex,
    /// Bumped by every mutation
    sequence: u64,
    clock: fn() -> u64,
    max_key_name_length: usize,
    max_value_name_length: usize,
}

impl CmHive {
    /// Create an empty hive with a root key named after the hive
    pub fn new(id: HiveId, name: &str, flags: HiveFlags, config: &CmConfig) -> Result<Self, CmStatus> {
        if name.is_empty() || name.contains(OBJ_NAME_PATH_SEPARATOR) {
            return Err(CmStatus::InvalidParameter);
        }

        let mut cells = CellMap::new(config.max_cells_per_storage);
        let (storage, mut root_flags) = if flags.contains(HiveFlags::VOLATILE) {
            (HStorageType::Volatile, KeyNodeFlags::VOLATILE)
        } else {
            (HStorageType::Stable, KeyNodeFlags::empty())
        };
        root_flags |= KeyNodeFlags::HIVE_ENTRY | KeyNodeFlags::NO_DELETE;

        let security = cells.allocate(
            storage,
            CellData::KeySecurity(CmKeySecurity::new(CM_DEFAULT_SECURITY_DESCRIPTOR.to_vec())),
        )?;

        let mut node = CmKeyNode::new(name.to_string(), HCELL_NIL, root_flags, (config.clock)());
        node.security = security;
        let root = cells.allocate(storage, CellData::KeyNode(node))?;

        log::debug!("[CM] Hive {} '{}' created, root {:#x}", id, name, root.raw());

        Ok(Self {
            id,
            name: name.to_string(),
            flags,
            cells,
            root,
            sequence: 0,
            clock: config.clock,
            max_key_name_length: config.max_key_name_length,
            max_value_name_length: config.max_value_name_length,
        })
    }

    /// Rebuild a hive from a persisted image
    pub fn from_snapshot(
        id: HiveId,
        name: &str,
        flags: HiveFlags,
        image: &KeySnapshot,
        config: &CmConfig,
    ) -> Result<Self, CmStatus> {
        let mut hive = Self::new(id, name, flags, config)?;
        let root = hive.root;
        hive.restore(root, image)?;
        hive.cells.clear_dirty();
        hive.sequence = 0;
        Ok(hive)
    }

    fn restore(&mut self, cell: CellIndex, image: &KeySnapshot) -> Result<(), CmStatus> {
        let options = if self.is_volatile() {
            CreateOptions::VOLATILE
        } else {
            CreateOptions::empty()
        };

        for value in &image.values {
            self.set_value(cell, &value.name, value.value_type, &value.data)?;
        }
        for subkey in &image.subkeys {
            let child = self.create_key(cell, &subkey.name, subkey.class.as_deref(), options)?;
            self.restore(child, subkey)?;
        }
        self.key_node_mut(cell)?.last_write_time = image.last_write_time;
        Ok(())
    }

    #[inline]
    pub fn id(&self) -> HiveId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn flags(&self) -> HiveFlags {
        self.flags
    }

    #[inline]
    pub fn root(&self) -> CellIndex {
        self.root
    }

    #[inline]
    pub fn is_volatile(&self) -> bool {
        self.flags.contains(HiveFlags::VOLATILE)
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[inline]
    pub fn cells(&self) -> &CellMap {
        &self.cells
    }

    /// Stable cells changed since the last flush
    pub fn dirty_cells(&self) -> Vec<CellIndex> {
        self.cells.dirty_cells()
    }

    /// Forget dirty state after the backing store accepted a flush
    pub fn clear_dirty(&mut self) {
        self.cells.clear_dirty();
    }

    #[inline]
    fn mark_dirty(&mut self, cell: CellIndex) {
        self.cells.mark_dirty(cell);
    }

    #[inline]
    fn now(&self) -> u64 {
        (self.clock)()
    }

    // ------------------------------------------------------------------------
    // Typed cell access
    // ------------------------------------------------------------------------

    pub fn key_node(&self, cell: CellIndex) -> Result<&CmKeyNode, CmStatus> {
        match self.cells.get(cell) {
            Some(CellData::KeyNode(node)) => Ok(node),
            _ => Err(CmStatus::RegistryCorrupt),
        }
    }

    fn key_node_mut(&mut self, cell: CellIndex) -> Result<&mut CmKeyNode, CmStatus> {
        match self.cells.get_mut(cell) {
            Some(CellData::KeyNode(node)) => Ok(node),
            _ => Err(CmStatus::RegistryCorrupt),
        }
    }

    pub fn key_value(&self, cell: CellIndex) -> Result<&CmKeyValue, CmStatus> {
        match self.cells.get(cell) {
            Some(CellData::KeyValue(value)) => Ok(value),
            _ => Err(CmStatus::RegistryCorrupt),
        }
    }

    fn key_value_mut(&mut self, cell: CellIndex) -> Result<&mut CmKeyValue, CmStatus> {
        match self.cells.get_mut(cell) {
            Some(CellData::KeyValue(value)) => Ok(value),
            _ => Err(CmStatus::RegistryCorrupt),
        }
    }

    fn subkey_index(&self, cell: CellIndex) -> Result<&CmSubkeyIndex, CmStatus> {
        match self.cells.get(cell) {
            Some(CellData::SubkeyIndex(index)) => Ok(index),
            _ => Err(CmStatus::RegistryCorrupt),
        }
    }

    fn subkey_index_mut(&mut self, cell: CellIndex) -> Result<&mut CmSubkeyIndex, CmStatus> {
        match self.cells.get_mut(cell) {
            Some(CellData::SubkeyIndex(index)) => Ok(index),
            _ => Err(CmStatus::RegistryCorrupt),
        }
    }

    /// Value cells of a key in insertion order
    pub fn value_cells(&self, cell: CellIndex) -> Result<&[CellIndex], CmStatus> {
        let list = self.key_node(cell)?.value_list;
        if list.is_nil() {
            return Ok(&[]);
        }
        match self.cells.get(list) {
            Some(CellData::ValueList(values)) => Ok(values),
            _ => Err(CmStatus::RegistryCorrupt),
        }
    }

    /// Entries of one storage class's subkey index
    pub fn subkey_cells(&self, cell: CellIndex, storage: HStorageType) -> Result<Vec<CellIndex>, CmStatus> {
        let list = self.key_node(cell)?.subkey_lists[storage.index()];
        if list.is_nil() {
            return Ok(Vec::new());
        }
        Ok(self.subkey_index(list)?.iter().collect())
    }

    /// All subkeys, stable before volatile
    pub fn all_subkeys(&self, cell: CellIndex) -> Result<Vec<CellIndex>, CmStatus> {
        let mut subkeys = self.subkey_cells(cell, HStorageType::Stable)?;
        subkeys.extend(self.subkey_cells(cell, HStorageType::Volatile)?);
        Ok(subkeys)
    }

    /// Value data, wherever it is stored
    pub fn value_data<'a>(&'a self, value: &'a CmKeyValue) -> Result<&'a [u8], CmStatus> {
        if value.is_inline() {
            return Ok(value.inline_data());
        }
        match self.cells.get(value.data_cell()) {
            Some(CellData::Data(bytes)) => {
                let len = (value.data_length() as usize).min(bytes.len());
                Ok(&bytes[..len])
            }
            _ => Err(CmStatus::RegistryCorrupt),
        }
    }

    /// Class name bytes (UTF-16LE), empty if the key has none
    pub fn class_name(&self, cell: CellIndex) -> Result<&[u8], CmStatus> {
        let node = self.key_node(cell)?;
        if node.class.is_nil() {
            return Ok(&[]);
        }
        match self.cells.get(node.class) {
            Some(CellData::Data(bytes)) => {
                let len = (node.class_length as usize).min(bytes.len());
                Ok(&bytes[..len])
            }
            _ => Err(CmStatus::RegistryCorrupt),
        }
    }

    /// Path of a key from the hive root, `\HIVE\A\B`
    pub fn key_path(&self, cell: CellIndex) -> Result<String, CmStatus> {
        let mut names = Vec::new();
        let mut current = cell;
        while !current.is_nil() {
            let node = self.key_node(current)?;
            names.push(node.name.as_str());
            current = node.parent;
        }

        let mut path = String::new();
        for name in names.iter().rev() {
            path.push(OBJ_NAME_PATH_SEPARATOR);
            path.push_str(name);
        }
        Ok(path)
    }

    // ------------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------------

    /// Find a direct subkey by name in either storage class
    pub fn find_subkey(&self, parent: CellIndex, name: &str) -> Result<Option<CellIndex>, CmStatus> {
        let node = self.key_node(parent)?;
        for list in node.subkey_lists {
            if list.is_nil() {
                continue;
            }
            for candidate in self.subkey_index(list)?.candidates(name) {
                if cm_names_equal(&self.key_node(candidate)?.name, name) {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }

    /// Check that a resolved key may be opened
    pub fn check_open(&self, cell: CellIndex) -> Result<(), CmStatus> {
        if self.key_node(cell)?.is_marked_for_delete() {
            return Err(CmStatus::MarkedForDeletion);
        }
        Ok(())
    }

    fn validate_key_name(&self, name: &str) -> Result<(), CmStatus> {
        if name.is_empty() {
            return Err(CmStatus::InvalidParameter);
        }
        if name.contains(OBJ_NAME_PATH_SEPARATOR) {
            return Err(CmStatus::PathHasSeparators);
        }
        if cm_name_units(name) > self.max_key_name_length {
            return Err(CmStatus::InvalidParameter);
        }
        Ok(())
    }

    /// Create a subkey (CmiAddSubKey)
    ///
    /// `name` must be a single path component. The new key shares its
    /// parent's security cell.
    pub fn create_key(
        &mut self,
        parent: CellIndex,
        name: &str,
        class: Option<&str>,
        options: CreateOptions,
    ) -> Result<CellIndex, CmStatus> {
        self.validate_key_name(name)?;

        let parent_node = self.key_node(parent)?;
        if parent_node.is_marked_for_delete() {
            return Err(CmStatus::MarkedForDeletion);
        }

        let storage = if options.contains(CreateOptions::VOLATILE) {
            HStorageType::Volatile
        } else {
            HStorageType::Stable
        };
        if storage == HStorageType::Stable && parent_node.is_volatile() {
            return Err(CmStatus::ChildMustBeVolatile);
        }
        let security = parent_node.security;

        if self.find_subkey(parent, name)?.is_some() {
            return Err(CmStatus::NameConflict);
        }

        let mut flags = KeyNodeFlags::empty();
        if storage == HStorageType::Volatile {
            flags |= KeyNodeFlags::VOLATILE;
        }
        if options.contains(CreateOptions::CREATE_LINK) {
            flags |= KeyNodeFlags::LINK;
        }

        let (class_cell, class_length) = match class {
            Some(class) if !class.is_empty() => {
                let bytes = cm_encode_name(class);
                let length = u16::try_from(bytes.len()).map_err(|_| CmStatus::InvalidParameter)?;
                (self.cells.allocate(storage, CellData::Data(bytes))?, length)
            }
            _ => (HCELL_NIL, 0),
        };

        let now = self.now();
        let mut node = CmKeyNode::new(name.to_string(), parent, flags, now);
        node.class = class_cell;
        node.class_length = class_length;
        node.security = security;

        let cell = match self.cells.allocate(storage, CellData::KeyNode(node)) {
            Ok(cell) => cell,
            Err(status) => {
                self.cells.free(class_cell);
                return Err(status);
            }
        };

        if let Err(status) = self.link_subkey(parent, cell, name, storage, now) {
            self.cells.free(cell);
            self.cells.free(class_cell);
            return Err(status);
        }

        if let Some(CellData::KeySecurity(sd)) = self.cells.get_mut(security) {
            sd.ref_count += 1;
            self.mark_dirty(security);
        }

        self.sequence += 1;
        log::debug!("[CM] Created key '{}' at {:#x} in hive {}", name, cell.raw(), self.id);
        Ok(cell)
    }

    fn link_subkey(
        &mut self,
        parent: CellIndex,
        child: CellIndex,
        name: &str,
        storage: HStorageType,
        now: u64,
    ) -> Result<(), CmStatus> {
        let slot = storage.index();
        let list = self.key_node(parent)?.subkey_lists[slot];

        let list = if list.is_nil() {
            let mut index = CmSubkeyIndex::new();
            index.insert(child, name);
            self.cells.allocate(storage, CellData::SubkeyIndex(index))?
        } else {
            self.subkey_index_mut(list)?.insert(child, name);
            self.cells.reallocate(list)?;
            list
        };

        let node = self.key_node_mut(parent)?;
        node.subkey_lists[slot] = list;
        node.subkey_counts[slot] += 1;
        node.last_write_time = now;
        self.mark_dirty(parent);
        Ok(())
    }

    fn unlink_subkey(&mut self, parent: CellIndex, child: CellIndex, now: u64) -> Result<(), CmStatus> {
        let slot = child.storage().index();
        let list = self.key_node(parent)?.subkey_lists[slot];

        let index = self.subkey_index_mut(list)?;
        if !index.remove(child) {
            return Err(CmStatus::RegistryCorrupt);
        }
        let now_empty = index.is_empty();
        if now_empty {
            self.cells.free(list);
        } else {
            self.mark_dirty(list);
        }

        let node = self.key_node_mut(parent)?;
        node.subkey_counts[slot] = node.subkey_counts[slot].saturating_sub(1);
        if now_empty {
            node.subkey_lists[slot] = HCELL_NIL;
        }
        node.last_write_time = now;
        self.mark_dirty(parent);
        Ok(())
    }

    /// Mark a key for deletion
    ///
    /// The key stays linked and readable until `teardown`, which the owner
    /// of the last handle-object reference triggers.
    pub fn mark_for_delete(&mut self, cell: CellIndex) -> Result<(), CmStatus> {
        let node = self.key_node(cell)?;
        if node.is_marked_for_delete() {
            return Err(CmStatus::MarkedForDeletion);
        }
        if node.flags.intersects(KeyNodeFlags::HIVE_ENTRY | KeyNodeFlags::NO_DELETE) {
            return Err(CmStatus::AccessDenied);
        }
        if node.total_subkeys() != 0 {
            return Err(CmStatus::HasSubkeys);
        }

        self.key_node_mut(cell)?.flags |= KeyNodeFlags::MARKED_FOR_DELETE;
        self.sequence += 1;
        Ok(())
    }

    /// Unlink and free a marked key (CmiRemoveSubKey)
    pub fn teardown(&mut self, cell: CellIndex) -> Result<(), CmStatus> {
        let node = self.key_node(cell)?;
        if !node.is_marked_for_delete() {
            log::warn!("[CM] Refusing teardown of live key {:#x}", cell.raw());
            return Err(CmStatus::AccessDenied);
        }
        if node.total_subkeys() != 0 {
            log::warn!("[CM] Refusing teardown of key {:#x} with subkeys", cell.raw());
            return Err(CmStatus::HasSubkeys);
        }
        let (parent, value_list, class, security) = (node.parent, node.value_list, node.class, node.security);

        if !parent.is_nil() {
            let now = self.now();
            self.unlink_subkey(parent, cell, now)?;
        }

        if let Some(CellData::ValueList(values)) = self.cells.free(value_list) {
            for value in values {
                self.free_value(value);
            }
        }
        self.cells.free(class);
        self.release_security(security);
        self.cells.free(cell);

        self.sequence += 1;
        log::debug!("[CM] Tore down key {:#x} in hive {}", cell.raw(), self.id);
        Ok(())
    }

    fn release_security(&mut self, security: CellIndex) {
        let remaining = match self.cells.get_mut(security) {
            Some(CellData::KeySecurity(sd)) => {
                sd.ref_count = sd.ref_count.saturating_sub(1);
                sd.ref_count
            }
            _ => return,
        };
        if remaining == 0 {
            self.cells.free(security);
        } else {
            self.mark_dirty(security);
        }
    }

    /// Subkey at an ordinal: stable `[0, n)`, then volatile `[n, n + m)`
    pub fn enumerate_subkey(&self, cell: CellIndex, ordinal: u32) -> Result<CellIndex, CmStatus> {
        let node = self.key_node(cell)?;
        let stable = node.subkey_count(HStorageType::Stable);
        let (storage, local) = if ordinal < stable {
            (HStorageType::Stable, ordinal)
        } else {
            (HStorageType::Volatile, ordinal - stable)
        };

        let list = node.subkey_lists[storage.index()];
        if list.is_nil() {
            return Err(CmStatus::NoMoreEntries);
        }
        self.subkey_index(list)?
            .get(local as usize)
            .ok_or(CmStatus::NoMoreEntries)
    }

    /// Overwrite the last write time (KeyWriteTimeInformation)
    pub fn set_write_time(&mut self, cell: CellIndex, time: u64) -> Result<(), CmStatus> {
        let node = self.key_node_mut(cell)?;
        if node.is_marked_for_delete() {
            return Err(CmStatus::MarkedForDeletion);
        }
        node.last_write_time = time;
        self.mark_dirty(cell);
        self.sequence += 1;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------------

    /// Find a value by name, returning its ordinal and cell
    pub fn find_value(&self, cell: CellIndex, name: &str) -> Result<(u32, CellIndex), CmStatus> {
        for (ordinal, &value_cell) in self.value_cells(cell)?.iter().enumerate() {
            if cm_names_equal(&self.key_value(value_cell)?.name, name) {
                return Ok((ordinal as u32, value_cell));
            }
        }
        Err(CmStatus::ValueNotFound)
    }

    pub fn enumerate_value(&self, cell: CellIndex, ordinal: u32) -> Result<CellIndex, CmStatus> {
        self.value_cells(cell)?
            .get(ordinal as usize)
            .copied()
            .ok_or(CmStatus::NoMoreEntries)
    }

    /// Create or replace a value
    ///
    /// Data of up to `CM_INLINE_DATA_MAX` bytes goes inline; longer data
    /// goes to a data cell in the key's storage class. A previous data cell
    /// is freed before a new one is allocated, or reused when large enough.
    pub fn set_value(&mut self, cell: CellIndex, name: &str, value_type: u32, data: &[u8]) -> Result<(), CmStatus> {
        if cm_name_units(name) > self.max_value_name_length || data.len() > REG_DATA_SIZE_MASK as usize {
            return Err(CmStatus::InvalidParameter);
        }
        if self.key_node(cell)?.is_marked_for_delete() {
            return Err(CmStatus::MarkedForDeletion);
        }

        let storage = cell.storage();
        match self.find_value(cell, name) {
            Ok((_, value_cell)) => self.update_value(value_cell, value_type, data, storage)?,
            Err(CmStatus::ValueNotFound) => self.add_value(cell, name, value_type, data, storage)?,
            Err(status) => return Err(status),
        }

        let now = self.now();
        let node = self.key_node_mut(cell)?;
        if value_type == RegType::Link as u32 && cm_names_equal(name, CM_SYMBOLIC_LINK_VALUE_NAME) {
            node.flags |= KeyNodeFlags::LINK;
        }
        node.last_write_time = now;
        self.mark_dirty(cell);
        self.sequence += 1;
        Ok(())
    }

    fn update_value(
        &mut self,
        value_cell: CellIndex,
        value_type: u32,
        data: &[u8],
        storage: HStorageType,
    ) -> Result<(), CmStatus> {
        let old = self.key_value(value_cell)?.data_cell();
        let length = data.len() as u32;

        if data.len() <= CM_INLINE_DATA_MAX {
            self.cells.free(old);
            let value = self.key_value_mut(value_cell)?;
            value.value_type = value_type;
            value.set_inline(data);
        } else if !old.is_nil() && self.cells.size_of(old).unwrap_or(0) >= cm_cell_size(length) {
            match self.cells.get_mut(old) {
                Some(CellData::Data(bytes)) => {
                    bytes.clear();
                    bytes.extend_from_slice(data);
                }
                _ => return Err(CmStatus::RegistryCorrupt),
            }
            self.mark_dirty(old);
            let value = self.key_value_mut(value_cell)?;
            value.value_type = value_type;
            value.set_indirect(old, length);
        } else {
            if !old.is_nil() {
                self.cells.free(old);
                self.key_value_mut(value_cell)?.set_inline(&[]);
                self.mark_dirty(value_cell);
            }
            let new = self.cells.allocate(storage, CellData::Data(data.to_vec()))?;
            let value = self.key_value_mut(value_cell)?;
            value.value_type = value_type;
            value.set_indirect(new, length);
        }

        self.mark_dirty(value_cell);
        Ok(())
    }

    fn add_value(
        &mut self,
        cell: CellIndex,
        name: &str,
        value_type: u32,
        data: &[u8],
        storage: HStorageType,
    ) -> Result<(), CmStatus> {
        let mut value = CmKeyValue::new(name.to_string(), value_type);
        let data_cell = if data.len() > CM_INLINE_DATA_MAX {
            let data_cell = self.cells.allocate(storage, CellData::Data(data.to_vec()))?;
            value.set_indirect(data_cell, data.len() as u32);
            data_cell
        } else {
            value.set_inline(data);
            HCELL_NIL
        };

        let value_cell = match self.cells.allocate(storage, CellData::KeyValue(value)) {
            Ok(value_cell) => value_cell,
            Err(status) => {
                self.cells.free(data_cell);
                return Err(status);
            }
        };

        let list = self.key_node(cell)?.value_list;
        let list = if list.is_nil() {
            self.cells.allocate(storage, CellData::ValueList(vec![value_cell]))
        } else {
            match self.cells.get_mut(list) {
                Some(CellData::ValueList(values)) => {
                    values.push(value_cell);
                    self.cells.reallocate(list).map(|_| list)
                }
                _ => Err(CmStatus::RegistryCorrupt),
            }
        };
        let list = match list {
            Ok(list) => list,
            Err(status) => {
                self.cells.free(value_cell);
                self.cells.free(data_cell);
                return Err(status);
            }
        };

        let node = self.key_node_mut(cell)?;
        node.value_list = list;
        node.value_count += 1;
        Ok(())
    }

    fn free_value(&mut self, value_cell: CellIndex) {
        if let Some(CellData::KeyValue(value)) = self.cells.free(value_cell) {
            self.cells.free(value.data_cell());
        }
    }

    /// Delete a value and its data cell
    pub fn delete_value(&mut self, cell: CellIndex, name: &str) -> Result<(), CmStatus> {
        let node = self.key_node(cell)?;
        if node.is_marked_for_delete() {
            return Err(CmStatus::MarkedForDeletion);
        }
        let list = node.value_list;
        let (ordinal, value_cell) = self.find_value(cell, name)?;

        let remaining = match self.cells.get_mut(list) {
            Some(CellData::ValueList(values)) => {
                values.remove(ordinal as usize);
                values.len()
            }
            _ => return Err(CmStatus::RegistryCorrupt),
        };
        self.free_value(value_cell);
        if remaining == 0 {
            self.cells.free(list);
        } else {
            self.mark_dirty(list);
        }

        let now = self.now();
        let node = self.key_node_mut(cell)?;
        if remaining == 0 {
            node.value_list = HCELL_NIL;
        }
        node.value_count = node.value_count.saturating_sub(1);
        node.last_write_time = now;
        self.mark_dirty(cell);
        self.sequence += 1;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------------

    /// Subkeys in both storage classes
    pub fn subkey_count(&self, cell: CellIndex) -> Result<u32, CmStatus> {
        Ok(self.key_node(cell)?.total_subkeys())
    }

    /// Longest subkey name in bytes
    pub fn max_name_length(&self, cell: CellIndex) -> Result<u32, CmStatus> {
        let mut max = 0;
        for subkey in self.all_subkeys(cell)? {
            max = max.max(self.key_node(subkey)?.name_length());
        }
        Ok(max)
    }

    /// Longest subkey class name in bytes
    pub fn max_class_length(&self, cell: CellIndex) -> Result<u32, CmStatus> {
        let mut max = 0;
        for subkey in self.all_subkeys(cell)? {
            max = max.max(self.key_node(subkey)?.class_length as u32);
        }
        Ok(max)
    }

    /// Longest value name in bytes
    pub fn max_value_name_length(&self, cell: CellIndex) -> Result<u32, CmStatus> {
        let mut max = 0;
        for &value in self.value_cells(cell)? {
            max = max.max(self.key_value(value)?.name_length());
        }
        Ok(max)
    }

    /// Largest value data in bytes
    pub fn max_value_data_length(&self, cell: CellIndex) -> Result<u32, CmStatus> {
        let mut max = 0;
        for &value in self.value_cells(cell)? {
            max = max.max(self.key_value(value)?.data_length());
        }
        Ok(max)
    }

    // ------------------------------------------------------------------------
    // Images
    // ------------------------------------------------------------------------

    /// Image of a key and its stable, live subtree
    pub fn snapshot(&self, cell: CellIndex) -> Result<KeySnapshot, CmStatus> {
        let node = self.key_node(cell)?;
        let class = self.class_name(cell)?;

        let mut values = Vec::with_capacity(node.value_count as usize);
        for &value_cell in self.value_cells(cell)? {
            let value = self.key_value(value_cell)?;
            values.push(ValueSnapshot {
                name: value.name.clone(),
                value_type: value.value_type,
                data: self.value_data(value)?.to_vec(),
            });
        }

        let mut subkeys = Vec::new();
        for subkey in self.subkey_cells(cell, HStorageType::Stable)? {
            if self.key_node(subkey)?.is_marked_for_delete() {
                continue;
            }
            subkeys.push(self.snapshot(subkey)?);
        }

        Ok(KeySnapshot {
            name: node.name.clone(),
            class: (!class.is_empty()).then(|| cm_decode_name(class)),
            last_write_time: node.last_write_time,
            values,
            subkeys,
        })
    }
}

// ============================================================================
// Hive Set
// ============================================================================

/// All loaded hives, guarded as one unit by the registry tree lock
///
/// Identifiers are slot indices and are never reused after an unload, so
/// a stale `KeyId` cannot name a node in a different hive.
#[derive(Debug, Default)]
pub struct HiveSet {
    hives: Vec<Option<CmHive>>,
}

impl HiveSet {
    pub const fn new() -> Self {
        Self { hives: Vec::new() }
    }

    /// Identifier the next inserted hive must carry
    pub fn next_id(&self) -> Result<HiveId, CmStatus> {
        HiveId::try_from(self.hives.len()).map_err(|_| CmStatus::OutOfMemory)
    }

    pub fn insert(&mut self, hive: CmHive) -> Result<HiveId, CmStatus> {
        let id = self.next_id()?;
        if hive.id() != id {
            return Err(CmStatus::InvalidParameter);
        }
        if self.find_by_name(hive.name()).is_some() {
            return Err(CmStatus::NameConflict);
        }
        self.hives.push(Some(hive));
        Ok(id)
    }

    /// Take a hive out of the set; its identifier stays retired
    pub fn remove(&mut self, id: HiveId) -> Option<CmHive> {
        self.hives.get_mut(id as usize).and_then(Option::take)
    }

    pub fn get(&self, id: HiveId) -> Option<&CmHive> {
        self.hives.get(id as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: HiveId) -> Option<&mut CmHive> {
        self.hives.get_mut(id as usize).and_then(Option::as_mut)
    }

    /// Hive by name, case-insensitive
    pub fn find_by_name(&self, name: &str) -> Option<HiveId> {
        self.iter().find(|h| cm_names_equal(h.name(), name)).map(|h| h.id())
    }

    /// Loaded hives
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &CmHive> {
        self.hives.iter().flatten()
    }
}

// ============================================================================
// Backing Store
// ============================================================================

/// Hive persistence
///
/// Called without the tree lock held by the mutating operation; `flush_hive`
/// runs under a lock of its own so the image it sees is consistent.
pub trait HiveBackingStore: Send + Sync {
    /// Persisted image for a hive name, if there is one
    fn load_hive(&self, name: &str) -> Result<Option<KeySnapshot>, CmStatus>;

    /// Write a key's subtree as a standalone image (NtSaveKey)
    fn save_hive(&self, target: &str, image: KeySnapshot) -> Result<(), CmStatus>;

    /// Write a hive's dirty cells (HvSyncHive)
    fn flush_hive(&self, hive: &CmHive, dirty: &[CellIndex]) -> Result<(), CmStatus>;
}

/// One accepted flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushRecord {
    pub hive: String,
    pub dirty_cells: usize,
    pub sequence: u64,
}

/// Backing store that keeps images in memory
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    images: Mutex<BTreeMap<String, KeySnapshot>>,
    flushes: Mutex<Vec<FlushRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn image_key(name: &str) -> String {
        name.to_uppercase()
    }

    /// Seed an image for a later `load_hive`
    pub fn insert_image(&self, name: &str, image: KeySnapshot) {
        self.images.lock().insert(Self::image_key(name), image);
    }

    pub fn image(&self, name: &str) -> Option<KeySnapshot> {
        self.images.lock().get(&Self::image_key(name)).cloned()
    }

    pub fn flushes(&self) -> Vec<FlushRecord> {
        self.flushes.lock().clone()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.lock().len()
    }

    /// Make every save and flush fail with `IoError`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    fn check_writable(&self) -> Result<(), CmStatus> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(CmStatus::IoError);
        }
        Ok(())
    }
}

impl HiveBackingStore for MemoryBackingStore {
    fn load_hive(&self, name: &str) -> Result<Option<KeySnapshot>, CmStatus> {
        Ok(self.image(name))
    }

    fn save_hive(&self, target: &str, image: KeySnapshot) -> Result<(), CmStatus> {
        self.check_writable()?;
        self.insert_image(target, image);
        Ok(())
    }

    fn flush_hive(&self, hive: &CmHive, dirty: &[CellIndex]) -> Result<(), CmStatus> {
        self.check_writable()?;
        let image = hive.snapshot(hive.root())?;
        self.insert_image(hive.name(), image);
        self.flushes.lock().push(FlushRecord {
            hive: hive.name().to_string(),
            dirty_cells: dirty.len(),
            sequence: hive.sequence(),
        });
        Ok(())
    }
}
