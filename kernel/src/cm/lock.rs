//! Registry Tree Lock
//!
//! One reader/writer lock covers every loaded hive. Shared for queries and
//! enumeration, exclusive for anything that changes a cell. Holding either
//! side also holds a critical region, the `KeEnterCriticalRegion` +
//! `ExAcquireResource*Lite` pairing the NT registry uses.
//!
//! Callbacks and backing-store flushes never run under this lock.

use core::ops::{Deref, DerefMut};
use spin::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::hive::HiveSet;
use crate::ke::{CriticalRegion, KeCriticalRegion};

/// Registry tree lock (CmpRegistryLock)
pub struct CmTreeLock {
    hives: RwLock<HiveSet>,
    region: KeCriticalRegion,
}

/// Shared hold of the tree lock
pub struct CmSharedGuard<'a> {
    // Declaration order is drop order: the lock is released before the
    // critical region is left.
    guard: RwLockReadGuard<'a, HiveSet>,
    _region: CriticalRegion<'a>,
}

/// Exclusive hold of the tree lock
pub struct CmExclusiveGuard<'a> {
    guard: RwLockWriteGuard<'a, HiveSet>,
    _region: CriticalRegion<'a>,
}

impl CmTreeLock {
    pub const fn new(hives: HiveSet) -> Self {
        Self {
            hives: RwLock::new(hives),
            region: KeCriticalRegion::new(),
        }
    }

    /// Acquire shared (CmpLockRegistry)
    pub fn read(&self) -> CmSharedGuard<'_> {
        let region = self.region.enter();
        CmSharedGuard {
            guard: self.hives.read(),
            _region: region,
        }
    }

    /// Acquire exclusive (CmpLockRegistryExclusive)
    pub fn write(&self) -> CmExclusiveGuard<'_> {
        let region = self.region.enter();
        CmExclusiveGuard {
            guard: self.hives.write(),
            _region: region,
        }
    }

    /// Holders currently inside the lock's critical region
    pub fn holders(&self) -> u32 {
        self.region.depth()
    }
}

impl<'a> Deref for CmSharedGuard<'a> {
    type Target = HiveSet;

    fn deref(&self) -> &HiveSet {
        &self.guard
    }
}

impl<'a> Deref for CmExclusiveGuard<'a> {
    type Target = HiveSet;

    fn deref(&self) -> &HiveSet {
        &self.guard
    }
}

impl<'a> DerefMut for CmExclusiveGuard<'a> {
    fn deref_mut(&mut self) -> &mut HiveSet {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_guards_hold_critical_region() {
        let lock = CmTreeLock::new(HiveSet::new());
        assert_eq!(lock.holders(), 0);

        {
            let a = lock.read();
            let b = lock.read();
            assert_eq!(lock.holders(), 2);
            assert!(a.is_empty() && b.is_empty());
        }
        assert_eq!(lock.holders(), 0);

        {
            let _w = lock.write();
            assert_eq!(lock.holders(), 1);
        }
        assert_eq!(lock.holders(), 0);
    }

    #[test]
    fn test_exclusive_excludes_readers() {
        let lock = Arc::new(CmTreeLock::new(HiveSet::new()));
        let writer = lock.write();

        let reader = {
            let lock = lock.clone();
            thread::spawn(move || lock.read().len())
        };

        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!reader.is_finished());
        drop(writer);
        assert_eq!(reader.join().unwrap(), 0);
    }
}
