//! Registry Cell Storage
//!
//! In NT's registry, cells are the fundamental storage units within a hive.
//! A cell can contain:
//! - Key nodes (directories)
//! - Value entries and value lists
//! - Security descriptors
//! - Subkey indices
//! - Raw value data
//!
//! # Cell Indices
//! A cell index encodes the storage class in bit 31 (stable or volatile)
//! and a slot number in the rest. Slots never move, so an index stays valid
//! until the cell is freed.
//!
//! ```text
//!  31  30                                    0
//! ┌───┬──────────────────────────────────────┐
//! │ T │ slot                                 │
//! └───┴──────────────────────────────────────┘
//!   T = 0 stable (persisted), 1 volatile (memory only)
//! ```
//!
//! Each storage class is an arena of slots with an allocation bitmap and,
//! for stable storage, a dirty bitmap consumed by the next flush.

use alloc::vec::Vec;

use super::index::CmSubkeyIndex;
use super::key::{CmKeyNode, CmKeySecurity};
use super::status::CmStatus;
use super::value::CmKeyValue;

/// Storage class bit
pub const HCELL_TYPE_MASK: u32 = 0x8000_0000;

/// Slot bits
pub const HCELL_INDEX_MASK: u32 = 0x7FFF_FFFF;

/// Invalid cell index
pub const HCELL_NIL: CellIndex = CellIndex(0xFFFF_FFFF);

/// Cell header size (the size field in front of every cell)
pub const CELL_HEADER_SIZE: u32 = 4;

/// Cell sizes are multiples of this
pub const CELL_ALIGNMENT: u32 = 8;

/// Storage classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum HStorageType {
    /// Persisted with the hive
    Stable = 0,
    /// Memory only, lost on unload
    Volatile = 1,
}

/// Number of storage classes
pub const HTYPE_COUNT: usize = 2;

impl HStorageType {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Cell index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellIndex(u32);

impl CellIndex {
    pub const fn new(storage: HStorageType, slot: u32) -> Self {
        let type_bit = match storage {
            HStorageType::Stable => 0,
            HStorageType::Volatile => HCELL_TYPE_MASK,
        };
        Self(type_bit | (slot & HCELL_INDEX_MASK))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_nil(self) -> bool {
        self.0 == HCELL_NIL.0
    }

    #[inline]
    pub fn storage(self) -> HStorageType {
        if self.0 & HCELL_TYPE_MASK != 0 {
            HStorageType::Volatile
        } else {
            HStorageType::Stable
        }
    }

    #[inline]
    pub fn slot(self) -> usize {
        (self.0 & HCELL_INDEX_MASK) as usize
    }
}

/// Cell types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CmCellType {
    /// Key node cell
    KeyNode = 1,
    /// Key value cell
    KeyValue = 2,
    /// Key security cell
    KeySecurity = 3,
    /// Subkey index cell
    SubkeyIndex = 4,
    /// Value list cell
    ValueList = 5,
    /// Value data or class name
    Data = 6,
}

/// Cell payload
#[derive(Debug, Clone)]
pub enum CellData {
    KeyNode(CmKeyNode),
    KeyValue(CmKeyValue),
    KeySecurity(CmKeySecurity),
    SubkeyIndex(CmSubkeyIndex),
    ValueList(Vec<CellIndex>),
    Data(Vec<u8>),
}

impl CellData {
    pub fn cell_type(&self) -> CmCellType {
        match self {
            CellData::KeyNode(_) => CmCellType::KeyNode,
            CellData::KeyValue(_) => CmCellType::KeyValue,
            CellData::KeySecurity(_) => CmCellType::KeySecurity,
            CellData::SubkeyIndex(_) => CmCellType::SubkeyIndex,
            CellData::ValueList(_) => CmCellType::ValueList,
            CellData::Data(_) => CmCellType::Data,
        }
    }

    /// On-disk payload size of this cell's contents
    pub fn payload_size(&self) -> u32 {
        match self {
            CellData::KeyNode(node) => node.cell_size(),
            CellData::KeyValue(value) => value.cell_size(),
            CellData::KeySecurity(security) => security.cell_size(),
            CellData::SubkeyIndex(index) => index.cell_size(),
            CellData::ValueList(list) => (list.len() * 4) as u32,
            CellData::Data(data) => data.len() as u32,
        }
    }
}

/// Size of a cell that holds `payload` bytes (header included, rounded up)
#[inline]
pub fn cm_cell_size(payload: u32) -> u32 {
    (payload.saturating_add(CELL_HEADER_SIZE)).div_ceil(CELL_ALIGNMENT) * CELL_ALIGNMENT
}

/// An allocated cell
#[derive(Debug, Clone)]
pub struct CmCell {
    /// Allocated size, header included
    pub size: u32,
    pub data: CellData,
}

// ============================================================================
// Per-class Storage
// ============================================================================

#[derive(Debug, Clone, Default)]
struct CellStorage {
    cells: Vec<Option<CmCell>>,
    /// Bit set = slot allocated
    allocation_bitmap: Vec<u64>,
    /// Bit set = slot changed since the last flush
    dirty_bitmap: Vec<u64>,
    allocated_count: u32,
}

impl CellStorage {
    fn find_free_slot(&self) -> Option<usize> {
        for (word_idx, word) in self.allocation_bitmap.iter().enumerate() {
            if *word != u64::MAX {
                let slot = word_idx * 64 + (!*word).trailing_zeros() as usize;
                if slot < self.cells.len() {
                    return Some(slot);
                }
            }
        }
        None
    }

    fn grow(&mut self) -> usize {
        let slot = self.cells.len();
        self.cells.push(None);
        if slot / 64 >= self.allocation_bitmap.len() {
            self.allocation_bitmap.push(0);
            self.dirty_bitmap.push(0);
        }
        slot
    }

    fn set_bit(bitmap: &mut [u64], slot: usize) {
        bitmap[slot / 64] |= 1u64 << (slot % 64);
    }

    fn clear_bit(bitmap: &mut [u64], slot: usize) {
        bitmap[slot / 64] &= !(1u64 << (slot % 64));
    }

    fn test_bit(bitmap: &[u64], slot: usize) -> bool {
        bitmap
            .get(slot / 64)
            .map(|word| word & (1u64 << (slot % 64)) != 0)
            .unwrap_or(false)
    }
}

/// Cell map statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellMapStats {
    pub stable_cells: u32,
    pub volatile_cells: u32,
    pub dirty_cells: u32,
}

// ============================================================================
// Cell Map per Hive
// ============================================================================

/// Cell map for a hive: one arena per storage class
#[derive(Debug, Clone)]
pub struct CellMap {
    storage: [CellStorage; HTYPE_COUNT],
    max_cells_per_storage: usize,
}

impl CellMap {
    pub fn new(max_cells_per_storage: usize) -> Self {
        Self {
            storage: [CellStorage::default(), CellStorage::default()],
            max_cells_per_storage: max_cells_per_storage.min(HCELL_INDEX_MASK as usize),
        }
    }

    /// Allocate a cell (HvAllocateCell)
    ///
    /// New stable cells start dirty.
    pub fn allocate(&mut self, storage_type: HStorageType, data: CellData) -> Result<CellIndex, CmStatus> {
        let max = self.max_cells_per_storage;
        let storage = &mut self.storage[storage_type.index()];

        let slot = match storage.find_free_slot() {
            Some(slot) => slot,
            None if storage.cells.len() < max => storage.grow(),
            None => return Err(CmStatus::OutOfMemory),
        };

        let size = cm_cell_size(data.payload_size());
        storage.cells[slot] = Some(CmCell { size, data });
        CellStorage::set_bit(&mut storage.allocation_bitmap, slot);
        storage.allocated_count += 1;

        let cell = CellIndex::new(storage_type, slot as u32);
        self.mark_dirty(cell);
        Ok(cell)
    }

    /// Free a cell (HvFreeCell), returning its payload
    pub fn free(&mut self, cell: CellIndex) -> Option<CellData> {
        if cell.is_nil() {
            return None;
        }

        let slot = cell.slot();
        let storage = &mut self.storage[cell.storage().index()];
        let freed = storage.cells.get_mut(slot)?.take()?;

        CellStorage::clear_bit(&mut storage.allocation_bitmap, slot);
        storage.allocated_count -= 1;
        self.mark_dirty(cell);
        Some(freed.data)
    }

    /// Get a cell by index (HvGetCell)
    pub fn get(&self, cell: CellIndex) -> Option<&CellData> {
        if cell.is_nil() {
            return None;
        }
        self.storage[cell.storage().index()]
            .cells
            .get(cell.slot())?
            .as_ref()
            .map(|c| &c.data)
    }

    /// Get a mutable cell by index
    ///
    /// Callers that change persisted state must also `mark_dirty`.
    pub fn get_mut(&mut self, cell: CellIndex) -> Option<&mut CellData> {
        if cell.is_nil() {
            return None;
        }
        self.storage[cell.storage().index()]
            .cells
            .get_mut(cell.slot())?
            .as_mut()
            .map(|c| &mut c.data)
    }

    /// Allocated size of a cell, header included (HvGetCellSize)
    pub fn size_of(&self, cell: CellIndex) -> Option<u32> {
        if cell.is_nil() {
            return None;
        }
        self.storage[cell.storage().index()]
            .cells
            .get(cell.slot())?
            .as_ref()
            .map(|c| c.size)
    }

    /// Grow a cell so it can hold its current payload (HvReallocateCell)
    ///
    /// Slots never move, so the index stays the same.
    pub fn reallocate(&mut self, cell: CellIndex) -> Result<(), CmStatus> {
        if cell.is_nil() {
            return Err(CmStatus::RegistryCorrupt);
        }
        let entry = self.storage[cell.storage().index()]
            .cells
            .get_mut(cell.slot())
            .and_then(Option::as_mut)
            .ok_or(CmStatus::RegistryCorrupt)?;

        let needed = cm_cell_size(entry.data.payload_size());
        if needed > entry.size {
            entry.size = needed;
        }
        self.mark_dirty(cell);
        Ok(())
    }

    /// Mark a cell dirty (HvMarkCellDirty)
    ///
    /// Volatile cells are never written, so only stable cells are tracked.
    /// Returns true if the cell is now dirty.
    pub fn mark_dirty(&mut self, cell: CellIndex) -> bool {
        if cell.is_nil() || cell.storage() == HStorageType::Volatile {
            return false;
        }

        let storage = &mut self.storage[HStorageType::Stable.index()];
        let slot = cell.slot();
        if slot >= storage.cells.len() {
            return false;
        }
        CellStorage::set_bit(&mut storage.dirty_bitmap, slot);
        true
    }

    pub fn is_dirty(&self, cell: CellIndex) -> bool {
        !cell.is_nil()
            && cell.storage() == HStorageType::Stable
            && CellStorage::test_bit(&self.storage[HStorageType::Stable.index()].dirty_bitmap, cell.slot())
    }

    /// Stable cells changed since the last flush, in slot order
    pub fn dirty_cells(&self) -> Vec<CellIndex> {
        let storage = &self.storage[HStorageType::Stable.index()];
        let mut dirty = Vec::new();
        for (word_idx, &word) in storage.dirty_bitmap.iter().enumerate() {
            let mut bits = word;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                dirty.push(CellIndex::new(HStorageType::Stable, (word_idx * 64 + bit) as u32));
                bits &= bits - 1;
            }
        }
        dirty
    }

    pub fn dirty_count(&self) -> u32 {
        self.storage[HStorageType::Stable.index()]
            .dirty_bitmap
            .iter()
            .map(|w| w.count_ones())
            .sum()
    }

    /// Forget dirty state after a successful flush
    pub fn clear_dirty(&mut self) {
        for word in self.storage[HStorageType::Stable.index()].dirty_bitmap.iter_mut() {
            *word = 0;
        }
    }

    /// Allocated cells in one storage class
    pub fn allocated_count(&self, storage_type: HStorageType) -> u32 {
        self.storage[storage_type.index()].allocated_count
    }

    pub fn stats(&self) -> CellMapStats {
        CellMapStats {
            stable_cells: self.allocated_count(HStorageType::Stable),
            volatile_cells: self.allocated_count(HStorageType::Volatile),
            dirty_cells: self.dirty_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_cell_index_encoding() {
        let stable = CellIndex::new(HStorageType::Stable, 5);
        let volatile = CellIndex::new(HStorageType::Volatile, 5);

        assert_eq!(stable.raw(), 5);
        assert_eq!(volatile.raw(), 0x8000_0005);
        assert_eq!(volatile.storage(), HStorageType::Volatile);
        assert_eq!(volatile.slot(), 5);
        assert!(HCELL_NIL.is_nil());
        assert!(!stable.is_nil());
    }

    #[test]
    fn test_cell_size_rounding() {
        assert_eq!(cm_cell_size(0), 8);
        assert_eq!(cm_cell_size(4), 8);
        assert_eq!(cm_cell_size(5), 16);
        assert_eq!(cm_cell_size(9), 16);
        assert_eq!(cm_cell_size(13), 24);
    }

    #[test]
    fn test_allocate_and_free_reuses_slots() {
        let mut map = CellMap::new(16);
        let a = map.allocate(HStorageType::Stable, CellData::Data(vec![1; 9])).unwrap();
        let b = map.allocate(HStorageType::Stable, CellData::Data(vec![2; 3])).unwrap();

        assert_ne!(a, b);
        assert_eq!(map.size_of(a), Some(16));
        assert_eq!(map.size_of(b), Some(8));
        assert_eq!(map.allocated_count(HStorageType::Stable), 2);

        assert!(matches!(map.free(a), Some(CellData::Data(d)) if d.len() == 9));
        assert!(map.get(a).is_none());
        assert!(map.free(a).is_none());

        let c = map.allocate(HStorageType::Stable, CellData::Data(vec![3])).unwrap();
        assert_eq!(c, a);
        assert_eq!(map.allocated_count(HStorageType::Stable), 2);
    }

    #[test]
    fn test_storage_classes_are_separate() {
        let mut map = CellMap::new(16);
        let s = map.allocate(HStorageType::Stable, CellData::Data(vec![0])).unwrap();
        let v = map.allocate(HStorageType::Volatile, CellData::Data(vec![1])).unwrap();

        assert_eq!(s.slot(), v.slot());
        assert_ne!(s, v);
        assert_eq!(map.stats().stable_cells, 1);
        assert_eq!(map.stats().volatile_cells, 1);
    }

    #[test]
    fn test_dirty_tracking_is_stable_only() {
        let mut map = CellMap::new(16);
        let s = map.allocate(HStorageType::Stable, CellData::Data(vec![0])).unwrap();
        let v = map.allocate(HStorageType::Volatile, CellData::Data(vec![1])).unwrap();

        assert!(map.is_dirty(s));
        assert!(!map.is_dirty(v));
        assert!(!map.mark_dirty(v));
        assert_eq!(map.dirty_cells(), vec![s]);

        map.clear_dirty();
        assert_eq!(map.dirty_count(), 0);
        assert!(map.mark_dirty(s));
        assert_eq!(map.dirty_count(), 1);
    }

    #[test]
    fn test_limit_reports_out_of_memory() {
        let mut map = CellMap::new(2);
        map.allocate(HStorageType::Volatile, CellData::Data(vec![])).unwrap();
        map.allocate(HStorageType::Volatile, CellData::Data(vec![])).unwrap();
        assert_eq!(
            map.allocate(HStorageType::Volatile, CellData::Data(vec![])).unwrap_err(),
            CmStatus::OutOfMemory
        );
        assert!(map.allocate(HStorageType::Stable, CellData::Data(vec![])).is_ok());
    }

    #[test]
    fn test_reallocate_grows() {
        let mut map = CellMap::new(4);
        let list = map.allocate(HStorageType::Stable, CellData::ValueList(vec![HCELL_NIL])).unwrap();
        assert_eq!(map.size_of(list), Some(8));

        if let Some(CellData::ValueList(entries)) = map.get_mut(list) {
            entries.extend([HCELL_NIL; 4]);
        }
        map.reallocate(list).unwrap();
        assert_eq!(map.size_of(list), Some(24));
        assert_eq!(map.reallocate(HCELL_NIL), Err(CmStatus::RegistryCorrupt));
    }
}
