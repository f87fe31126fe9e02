//! Registry Callbacks
//!
//! Drivers register callbacks to observe or veto registry operations.
//! Every `Nt*Key` service notifies the list twice: once before it touches
//! the tree (a `Pre*`/plain class, whose failure cancels the operation) and
//! once afterwards (a `Post*` class carrying the final status).
//!
//! # Entry States
//!
//! ```text
//!           register              unregister            rundown drained
//! (none) ─────────────► Active ───────────────► PendingDelete ─────────────► Freed
//! ```
//!
//! The list lock is only held for bookkeeping. A callback runs with the lock
//! released and its entry's rundown reference held, so unregistration can
//! wait for in-flight invocations without blocking the rest of the list.
//!
//! # NT Functions
//!
//! - `CmRegisterCallback` / `CmRegisterCallbackEx` - Register a callback
//! - `CmUnRegisterCallback` - Unregister by cookie
//! - `CmiCallRegisteredCallbacks` - Notify every active callback

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;

use super::info::{KeyInformationClass, KeyValueInformationClass};
use super::object::KeyObject;
use super::status::CmStatus;
use crate::ex::ExRundownRef;

/// REG_NOTIFY_CLASS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegNotifyClass {
    DeleteKey = 0,
    SetValueKey = 1,
    DeleteValueKey = 2,
    SetInformationKey = 3,
    RenameKey = 4,
    EnumerateKey = 5,
    EnumerateValueKey = 6,
    QueryKey = 7,
    QueryValueKey = 8,
    QueryMultipleValueKey = 9,
    PreCreateKey = 10,
    PostCreateKey = 11,
    PreOpenKey = 12,
    PostOpenKey = 13,
    KeyHandleClose = 14,
    PostDeleteKey = 15,
    PostSetValueKey = 16,
    PostDeleteValueKey = 17,
    PostSetInformationKey = 18,
    PostRenameKey = 19,
    PostEnumerateKey = 20,
    PostEnumerateValueKey = 21,
    PostQueryKey = 22,
    PostQueryValueKey = 23,
    PostQueryMultipleValueKey = 24,
    PostKeyHandleClose = 25,
}

impl RegNotifyClass {
    /// Post-operation classes
    pub fn is_post(&self) -> bool {
        matches!(
            self,
            Self::PostCreateKey
                | Self::PostOpenKey
                | Self::PostDeleteKey
                | Self::PostSetValueKey
                | Self::PostDeleteValueKey
                | Self::PostSetInformationKey
                | Self::PostRenameKey
                | Self::PostEnumerateKey
                | Self::PostEnumerateValueKey
                | Self::PostQueryKey
                | Self::PostQueryValueKey
                | Self::PostQueryMultipleValueKey
                | Self::PostKeyHandleClose
        )
    }
}

/// Argument handed to a callback (REG_*_KEY_INFORMATION)
#[derive(Debug, Clone, Copy)]
pub enum RegNotifyInformation<'a> {
    /// PreCreateKey, PreOpenKey
    CreateKey { complete_name: &'a str },
    DeleteKey { object: &'a KeyObject },
    SetValueKey {
        object: &'a KeyObject,
        value_name: &'a str,
        value_type: u32,
        data: &'a [u8],
    },
    DeleteValueKey { object: &'a KeyObject, value_name: &'a str },
    SetInformationKey {
        object: &'a KeyObject,
        class: u32,
        length: usize,
    },
    EnumerateKey {
        object: &'a KeyObject,
        index: u32,
        class: KeyInformationClass,
        length: usize,
    },
    EnumerateValueKey {
        object: &'a KeyObject,
        index: u32,
        class: KeyValueInformationClass,
        length: usize,
    },
    QueryKey {
        object: &'a KeyObject,
        class: KeyInformationClass,
        length: usize,
    },
    QueryValueKey {
        object: &'a KeyObject,
        value_name: &'a str,
        class: KeyValueInformationClass,
        length: usize,
    },
    QueryMultipleValueKey {
        object: &'a KeyObject,
        entry_count: usize,
        length: usize,
    },
    /// Every post class (REG_POST_OPERATION_INFORMATION)
    Post {
        object: Option<&'a KeyObject>,
        status: CmStatus,
    },
}

/// Registered callback routine; the closure carries its own context
pub type CmCallbackFunction = dyn Fn(RegNotifyClass, &RegNotifyInformation<'_>) -> CmStatus + Send + Sync;

/// One registration (CM_CALLBACK_CONTEXT_BLOCK)
struct CmCallbackEntry {
    cookie: u64,
    function: Box<CmCallbackFunction>,
    pending_delete: AtomicBool,
    rundown: ExRundownRef,
}

/// Registered callbacks, in registration order
pub struct CmCallbackList {
    entries: Mutex<Vec<Arc<CmCallbackEntry>>>,
    next_cookie: AtomicU64,
    max_callbacks: usize,
}

impl CmCallbackList {
    pub const fn new(max_callbacks: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_cookie: AtomicU64::new(1),
            max_callbacks,
        }
    }

    /// Add a callback at the end of the list (CmRegisterCallback)
    ///
    /// Returns the cookie that unregisters it.
    pub fn register(&self, function: Box<CmCallbackFunction>) -> Result<u64, CmStatus> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_callbacks {
            log::warn!("[CM] Callback table full ({} entries)", entries.len());
            return Err(CmStatus::OutOfMemory);
        }
        entries.try_reserve(1).map_err(|_| CmStatus::OutOfMemory)?;

        let cookie = self.next_cookie.fetch_add(1, Ordering::Relaxed);
        entries.push(Arc::new(CmCallbackEntry {
            cookie,
            function,
            pending_delete: AtomicBool::new(false),
            rundown: ExRundownRef::new(),
        }));

        log::debug!("[CM] Registered callback cookie={}", cookie);
        Ok(cookie)
    }

    /// Remove a callback (CmUnRegisterCallback)
    ///
    /// Returns once no invocation of the callback is still running. A
    /// callback must not unregister itself.
    pub fn unregister(&self, cookie: u64) -> Result<(), CmStatus> {
        let entry = {
            let entries = self.entries.lock();
            let entry = entries
                .iter()
                .find(|e| e.cookie == cookie)
                .ok_or(CmStatus::CookieNotFound)?;
            if entry.pending_delete.swap(true, Ordering::AcqRel) {
                return Err(CmStatus::AlreadyPending);
            }
            // Under the list lock, so a notifier either already holds a
            // reference or will see the acquire fail.
            entry.rundown.begin_rundown();
            Arc::clone(entry)
        };

        entry.rundown.wait_for_release();

        self.entries.lock().retain(|e| !Arc::ptr_eq(e, &entry));
        log::debug!("[CM] Unregistered callback cookie={}", cookie);
        Ok(())
    }

    /// Call every active callback in order (CmiCallRegisteredCallbacks)
    ///
    /// Stops at the first callback that does not return success and hands
    /// its status back.
    pub fn notify(&self, class: RegNotifyClass, info: &RegNotifyInformation<'_>) -> Result<(), CmStatus> {
        let mut entries = self.entries.lock();
        let mut index = 0;

        while index < entries.len() {
            let entry = Arc::clone(&entries[index]);
            if entry.pending_delete.load(Ordering::Acquire) {
                index += 1;
                continue;
            }
            let Some(reference) = entry.rundown.acquire() else {
                index += 1;
                continue;
            };

            drop(entries);
            let status = (entry.function)(class, info);
            entries = self.entries.lock();

            // Entries may have come or gone while unlocked; ours is pinned
            // by the rundown reference.
            if let Some(position) = entries.iter().position(|e| Arc::ptr_eq(e, &entry)) {
                index = position + 1;
            }
            drop(reference);

            if !status.is_success() {
                log::debug!(
                    "[CM] Callback cookie={} failed {:?} for {:?}",
                    entry.cookie,
                    status,
                    class
                );
                return Err(status);
            }
        }

        Ok(())
    }

    /// Registered callbacks, including ones being unregistered
    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}
