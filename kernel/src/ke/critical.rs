//! Critical Regions (KeEnterCriticalRegion)
//!
//! A thread inside a critical region has normal kernel APC delivery
//! disabled, so it cannot be suspended while it owns a lock that the rest
//! of the system needs. NT tracks this per thread in
//! `KTHREAD::KernelApcDisable`; here the count lives next to the lock it
//! protects, which is the only thing the configuration manager needs.
//!
//! # Usage
//! ```
//! use ntcm::ke::KeCriticalRegion;
//!
//! let region = KeCriticalRegion::new();
//! {
//!     let _guard = region.enter();
//!     assert!(region.is_active());
//! }
//! assert!(!region.is_active());
//! ```

use core::sync::atomic::{AtomicI32, Ordering};

/// Kernel APC disable count shared by every holder of one lock
///
/// Equivalent to the `KernelApcDisable` field of a KTHREAD, negative while
/// any holder is inside the region (NT counts down on enter).
#[repr(C)]
pub struct KeCriticalRegion {
    kernel_apc_disable: AtomicI32,
}

impl KeCriticalRegion {
    pub const fn new() -> Self {
        Self {
            kernel_apc_disable: AtomicI32::new(0),
        }
    }

    /// Enter the region; leaving happens when the guard drops
    pub fn enter(&self) -> CriticalRegion<'_> {
        self.kernel_apc_disable.fetch_sub(1, Ordering::AcqRel);
        CriticalRegion { region: self }
    }

    /// Number of holders currently inside the region
    pub fn depth(&self) -> u32 {
        self.kernel_apc_disable.load(Ordering::Acquire).unsigned_abs()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.kernel_apc_disable.load(Ordering::Acquire) != 0
    }

    fn leave(&self) {
        let old = self.kernel_apc_disable.fetch_add(1, Ordering::AcqRel);
        debug_assert!(old < 0, "critical region left more often than entered");
    }
}

impl Default for KeCriticalRegion {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one critical-region entry
pub struct CriticalRegion<'a> {
    region: &'a KeCriticalRegion,
}

impl<'a> Drop for CriticalRegion<'a> {
    fn drop(&mut self) {
        self.region.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_entries() {
        let region = KeCriticalRegion::new();

        let outer = region.enter();
        let inner = region.enter();
        assert_eq!(region.depth(), 2);

        drop(inner);
        assert_eq!(region.depth(), 1);
        assert!(region.is_active());

        drop(outer);
        assert_eq!(region.depth(), 0);
        assert!(!region.is_active());
    }
}
