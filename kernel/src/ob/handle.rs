//! Handle Table Implementation
//!
//! Maps handles (small integers) to object bodies. Each entry owns one
//! strong reference to its object and the access mask granted at open
//! time; closing the handle hands that reference back to the caller.
//!
//! # Handle Format
//! Handles are multiples of 4 (so bits 0-1 are always 0). Handle 0 is never
//! issued.

use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use spin::Mutex;

/// Handle type (unsigned 32-bit, like Windows HANDLE)
pub type Handle = u32;

/// Invalid handle value
pub const INVALID_HANDLE_VALUE: Handle = 0xFFFF_FFFF;

/// Null handle
pub const NULL_HANDLE: Handle = 0;

/// Handle increment (handles are multiples of 4)
pub const HANDLE_INCREMENT: Handle = 4;

/// Default table capacity
pub const DEFAULT_MAX_HANDLES: usize = 4096;

bitflags! {
    /// Access rights (ACCESS_MASK)
    ///
    /// Standard rights in the high word, registry key rights in the low
    /// word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMask: u32 {
        const KEY_QUERY_VALUE = 0x0001;
        const KEY_SET_VALUE = 0x0002;
        const KEY_CREATE_SUB_KEY = 0x0004;
        const KEY_ENUMERATE_SUB_KEYS = 0x0008;
        const KEY_NOTIFY = 0x0010;
        const KEY_CREATE_LINK = 0x0020;

        const DELETE = 0x0001_0000;
        const READ_CONTROL = 0x0002_0000;
        const WRITE_DAC = 0x0004_0000;
        const WRITE_OWNER = 0x0008_0000;

        const KEY_READ = Self::READ_CONTROL.bits()
            | Self::KEY_QUERY_VALUE.bits()
            | Self::KEY_ENUMERATE_SUB_KEYS.bits()
            | Self::KEY_NOTIFY.bits();
        const KEY_WRITE = Self::READ_CONTROL.bits()
            | Self::KEY_SET_VALUE.bits()
            | Self::KEY_CREATE_SUB_KEY.bits();
        const KEY_ALL_ACCESS = 0x000F_003F;
    }
}

/// Handle table failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObStatus {
    /// Handle is null, out of range or closed
    InvalidHandle,
    /// Granted access does not cover the desired access
    AccessDenied,
    /// No free entries
    TableFull,
}

/// Handle table entry
struct HandleTableEntry<T> {
    /// Object body (one strong reference per handle)
    object: Arc<T>,
    /// Granted access mask
    access_mask: AccessMask,
}

struct HandleTableInner<T> {
    entries: Vec<Option<HandleTableEntry<T>>>,
    /// Next handle hint (for faster allocation)
    next_index_hint: usize,
    /// Number of handles in use
    handle_count: usize,
}

/// Handle table
pub struct HandleTable<T> {
    inner: Mutex<HandleTableInner<T>>,
    max_handles: usize,
}

impl<T> HandleTable<T> {
    /// Create a new empty handle table
    pub const fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_HANDLES)
    }

    pub const fn with_capacity(max_handles: usize) -> Self {
        Self {
            inner: Mutex::new(HandleTableInner {
                entries: Vec::new(),
                next_index_hint: 1,
                handle_count: 0,
            }),
            max_handles,
        }
    }

    /// Convert handle to entry index
    #[inline]
    fn handle_to_index(handle: Handle) -> Option<usize> {
        if handle == NULL_HANDLE || handle == INVALID_HANDLE_VALUE || handle % HANDLE_INCREMENT != 0 {
            return None;
        }
        Some((handle / HANDLE_INCREMENT) as usize)
    }

    /// Convert entry index to handle
    #[inline]
    fn index_to_handle(index: usize) -> Handle {
        (index as Handle) * HANDLE_INCREMENT
    }

    /// Allocate a new handle for an object (ObInsertObject)
    ///
    /// The table takes ownership of `object`; the handle's granted access
    /// is `access_mask`.
    pub fn create_handle(&self, object: Arc<T>, access_mask: AccessMask) -> Result<Handle, ObStatus> {
        let mut inner = self.inner.lock();

        // Search from the hint to the end, then wrap to the start. Index 0
        // is reserved for the null handle.
        let len = inner.entries.len();
        let start = inner.next_index_hint.max(1);
        let free = (start..len)
            .chain(1..start.min(len))
            .find(|&i| inner.entries[i].is_none());

        let index = match free {
            Some(i) => i,
            None => {
                let next = len.max(1);
                if next >= self.max_handles {
                    return Err(ObStatus::TableFull);
                }
                inner.entries.resize_with(next + 1, || None);
                next
            }
        };

        inner.entries[index] = Some(HandleTableEntry { object, access_mask });
        inner.next_index_hint = index + 1;
        inner.handle_count += 1;

        Ok(Self::index_to_handle(index))
    }

    /// Look up an object by handle (ObReferenceObjectByHandle)
    ///
    /// Returns a new strong reference; the caller dereferences by dropping
    /// it.
    pub fn reference_by_handle(&self, handle: Handle, desired_access: AccessMask) -> Result<Arc<T>, ObStatus> {
        let index = Self::handle_to_index(handle).ok_or(ObStatus::InvalidHandle)?;
        let inner = self.inner.lock();

        let entry = inner
            .entries
            .get(index)
            .and_then(|e| e.as_ref())
            .ok_or(ObStatus::InvalidHandle)?;

        if !entry.access_mask.contains(desired_access) {
            return Err(ObStatus::AccessDenied);
        }

        Ok(entry.object.clone())
    }

    /// Close a handle
    ///
    /// Returns the reference the handle held. Dropping it outside the table
    /// lock is the caller's business.
    pub fn close_handle(&self, handle: Handle) -> Result<Arc<T>, ObStatus> {
        let index = Self::handle_to_index(handle).ok_or(ObStatus::InvalidHandle)?;
        let mut inner = self.inner.lock();

        let entry = inner
            .entries
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(ObStatus::InvalidHandle)?;

        inner.handle_count -= 1;
        if index < inner.next_index_hint {
            inner.next_index_hint = index;
        }

        Ok(entry.object)
    }

    /// Get number of handles in table
    #[inline]
    pub fn count(&self) -> usize {
        self.inner.lock().handle_count
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_multiples_of_four() {
        let table = HandleTable::new();
        let a = table.create_handle(Arc::new(1u32), AccessMask::KEY_READ).unwrap();
        let b = table.create_handle(Arc::new(2u32), AccessMask::KEY_READ).unwrap();

        assert_ne!(a, NULL_HANDLE);
        assert_eq!(a % HANDLE_INCREMENT, 0);
        assert_eq!(b % HANDLE_INCREMENT, 0);
        assert_ne!(a, b);
        assert_eq!(table.count(), 2);
    }

    #[test]
    fn test_access_check() {
        let table = HandleTable::new();
        let h = table.create_handle(Arc::new(7u32), AccessMask::KEY_READ).unwrap();

        assert_eq!(*table.reference_by_handle(h, AccessMask::KEY_QUERY_VALUE).unwrap(), 7);
        assert_eq!(
            table.reference_by_handle(h, AccessMask::KEY_SET_VALUE).unwrap_err(),
            ObStatus::AccessDenied
        );
        assert_eq!(
            table.reference_by_handle(h, AccessMask::KEY_QUERY_VALUE | AccessMask::DELETE).unwrap_err(),
            ObStatus::AccessDenied
        );
    }

    #[test]
    fn test_close_returns_reference() {
        let table = HandleTable::new();
        let object = Arc::new(5u32);
        let h = table.create_handle(object.clone(), AccessMask::KEY_ALL_ACCESS).unwrap();
        assert_eq!(Arc::strong_count(&object), 2);

        let released = table.close_handle(h).unwrap();
        assert!(Arc::ptr_eq(&released, &object));
        drop(released);
        assert_eq!(Arc::strong_count(&object), 1);

        assert_eq!(table.close_handle(h).unwrap_err(), ObStatus::InvalidHandle);
        assert_eq!(
            table.reference_by_handle(h, AccessMask::empty()).unwrap_err(),
            ObStatus::InvalidHandle
        );
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn test_invalid_handles() {
        let table: HandleTable<u32> = HandleTable::new();
        for h in [NULL_HANDLE, INVALID_HANDLE_VALUE, 3, 400] {
            assert_eq!(
                table.reference_by_handle(h, AccessMask::empty()).unwrap_err(),
                ObStatus::InvalidHandle
            );
        }
    }

    #[test]
    fn test_table_full_and_reuse() {
        let table = HandleTable::with_capacity(3);
        let a = table.create_handle(Arc::new(1u32), AccessMask::KEY_READ).unwrap();
        let _b = table.create_handle(Arc::new(2u32), AccessMask::KEY_READ).unwrap();
        assert_eq!(
            table.create_handle(Arc::new(3u32), AccessMask::KEY_READ).unwrap_err(),
            ObStatus::TableFull
        );

        table.close_handle(a).unwrap();
        let c = table.create_handle(Arc::new(4u32), AccessMask::KEY_READ).unwrap();
        assert_eq!(c, a);
    }
}
