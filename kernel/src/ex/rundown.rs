//! Rundown Protection (EX_RUNDOWN_REF)
//!
//! Rundown protection lets a teardown path wait for every in-flight user of
//! an object to finish, while refusing new users from the moment teardown
//! starts. The registry callback list uses one per registration: the
//! notifier holds a reference for the duration of a callback invocation and
//! unregister waits for the count to drain before freeing the entry.
//!
//! # States
//!
//! - Bit 0: Rundown active (new acquires fail)
//! - Bits 1+: Count of outstanding references
//!
//! ```text
//!        acquire ok           begin_rundown          count reaches 0
//! Open ─────────────► Open ───────────────► Draining ───────────────► RanDown
//!   ▲   release         │                     │ acquire fails
//!   └───────────────────┘                     ▼
//! ```

use core::sync::atomic::{AtomicUsize, Ordering};

/// Rundown has started; acquisitions fail
const EX_RUNDOWN_ACTIVE: usize = 0x1;

/// One outstanding reference
const EX_RUNDOWN_COUNT_INC: usize = 0x2;

/// Rundown reference
///
/// Equivalent to NT's EX_RUNDOWN_REF.
#[repr(C)]
pub struct ExRundownRef {
    count: AtomicUsize,
}

impl ExRundownRef {
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
        }
    }

    /// Take a reference unless rundown has started (ExAcquireRundownProtection)
    pub fn acquire(&self) -> Option<RundownGuard<'_>> {
        let mut current = self.count.load(Ordering::Relaxed);
        loop {
            if current & EX_RUNDOWN_ACTIVE != 0 {
                return None;
            }

            match self.count.compare_exchange_weak(
                current,
                current + EX_RUNDOWN_COUNT_INC,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(RundownGuard { rundown: self }),
                Err(observed) => current = observed,
            }
        }
    }

    /// Refuse new references from now on
    ///
    /// Returns true if there were no references outstanding at that point.
    pub fn begin_rundown(&self) -> bool {
        let old = self.count.fetch_or(EX_RUNDOWN_ACTIVE, Ordering::AcqRel);
        old >> 1 == 0
    }

    /// Start rundown and spin until every outstanding reference is released
    /// (ExWaitForRundownProtectionRelease)
    pub fn wait_for_release(&self) {
        if self.begin_rundown() {
            return;
        }

        while self.reference_count() != 0 {
            core::hint::spin_loop();
        }
    }

    #[inline]
    pub fn is_rundown_active(&self) -> bool {
        self.count.load(Ordering::Acquire) & EX_RUNDOWN_ACTIVE != 0
    }

    /// Outstanding references
    #[inline]
    pub fn reference_count(&self) -> usize {
        self.count.load(Ordering::Acquire) >> 1
    }

    fn release(&self) {
        let old = self.count.fetch_sub(EX_RUNDOWN_COUNT_INC, Ordering::Release);
        debug_assert!(old >> 1 != 0, "rundown reference released twice");
    }
}

impl Default for ExRundownRef {
    fn default() -> Self {
        Self::new()
    }
}

/// An outstanding rundown reference, released on drop
/// (ExReleaseRundownProtection)
pub struct RundownGuard<'a> {
    rundown: &'a ExRundownRef,
}

impl<'a> Drop for RundownGuard<'a> {
    fn drop(&mut self) {
        self.rundown.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_acquire_fails_after_rundown() {
        let rundown = ExRundownRef::new();

        let guard = rundown.acquire().unwrap();
        assert_eq!(rundown.reference_count(), 1);
        drop(guard);
        assert_eq!(rundown.reference_count(), 0);

        rundown.wait_for_release();
        assert!(rundown.is_rundown_active());
        assert!(rundown.acquire().is_none());
    }

    #[test]
    fn test_begin_rundown_reports_outstanding() {
        let rundown = ExRundownRef::new();
        let a = rundown.acquire().unwrap();
        let b = rundown.acquire().unwrap();

        assert!(!rundown.begin_rundown());
        assert!(rundown.acquire().is_none());
        assert_eq!(rundown.reference_count(), 2);

        drop(a);
        drop(b);
        assert_eq!(rundown.reference_count(), 0);
    }

    #[test]
    fn test_wait_blocks_until_released() {
        let rundown = Arc::new(ExRundownRef::new());
        let released = Arc::new(AtomicBool::new(false));

        let holder = {
            let rundown = rundown.clone();
            let released = released.clone();
            let (tx, rx) = std::sync::mpsc::channel();
            let handle = thread::spawn(move || {
                let guard = rundown.acquire().unwrap();
                tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(50));
                released.store(true, Ordering::SeqCst);
                drop(guard);
            });
            rx.recv().unwrap();
            handle
        };

        rundown.wait_for_release();
        assert!(released.load(Ordering::SeqCst));
        holder.join().unwrap();
    }
}
