//! Registry Services
//!
//! `Registry` is the `Nt*Key` service layer: it ties the handle table, the
//! key parse procedure, the callback list, the tree lock and the backing
//! store together. Every handle-based service runs the same pipeline:
//!
//! ```text
//! reference handle ─► pre-notify ─► lock ─► validate ─► execute ─► unlock
//!                         │                                          │
//!                         └── veto ───────────────────────────► post-notify
//!                                                                    │
//!                                                         durability (success)
//! ```
//!
//! A failed handle reference returns before any callback runs. A veto from
//! a pre-notify callback replaces the operation's status and still reaches
//! the post-notify callbacks. Post-notify failures are logged and counted
//! but never undo a committed mutation.
//!
//! Deleting a key only marks it. The node is unlinked and freed once the
//! last handle to it is closed; see `cm::object`.
//!
//! # NT Functions
//!
//! - `NtCreateKey` / `NtOpenKey` / `NtDeleteKey`
//! - `NtEnumerateKey` / `NtEnumerateValueKey`
//! - `NtQueryKey` / `NtQueryValueKey` / `NtQueryMultipleValueKey`
//! - `NtSetValueKey` / `NtDeleteValueKey` / `NtSetInformationKey`
//! - `NtFlushKey` / `NtSaveKey` / `NtLoadKey` / `NtUnloadKey` / `NtClose`

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ops::Deref;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use super::callback::{CmCallbackList, RegNotifyClass, RegNotifyInformation};
use super::config::{CmConfig, SyncPolicy};
use super::hive::{CmHive, CreateOptions, HiveBackingStore, HiveFlags, HiveId, HiveSet, MemoryBackingStore};
use super::index::OBJ_NAME_PATH_SEPARATOR;
use super::info::{
    cm_query_key_info, cm_query_multiple_values, cm_query_value_info, KeyInformationClass, KeyValueEntry,
    KeyValueInformationClass, Marshaled,
};
use super::lock::CmTreeLock;
use super::object::{KeyId, KeyObject, KeyObjectCache};
use super::parse::{cm_parse_key, cm_path_components, ParseProcedure};
use super::status::CmStatus;
use crate::ob::{AccessMask, Handle, HandleTable};

/// KeyWriteTimeInformation, the only settable key information class
pub const KEY_WRITE_TIME_INFORMATION: u32 = 0;

/// What `create_key` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CreateDisposition {
    /// REG_CREATED_NEW_KEY
    CreatedNew = 1,
    /// REG_OPENED_EXISTING_KEY
    OpenedExisting = 2,
}

/// Status handed to post-notify callbacks for a finished operation
trait OperationStatus {
    fn status(&self) -> CmStatus;
}

impl OperationStatus for () {
    fn status(&self) -> CmStatus {
        CmStatus::Success
    }
}

impl OperationStatus for Marshaled {
    fn status(&self) -> CmStatus {
        self.status
    }
}

fn result_status<T: OperationStatus>(result: &Result<T, CmStatus>) -> CmStatus {
    match result {
        Ok(value) => value.status(),
        Err(status) => *status,
    }
}

fn hive_of<'a>(hives: &'a HiveSet, object: &KeyObject) -> Result<&'a CmHive, CmStatus> {
    hives.get(object.hive()).ok_or(CmStatus::InvalidHandle)
}

fn hive_of_mut<'a>(hives: &'a mut HiveSet, object: &KeyObject) -> Result<&'a mut CmHive, CmStatus> {
    hives.get_mut(object.hive()).ok_or(CmStatus::InvalidHandle)
}

/// Mutations are refused once the key is marked
fn check_live(object: &KeyObject) -> Result<(), CmStatus> {
    if object.is_marked_for_delete() {
        return Err(CmStatus::MarkedForDeletion);
    }
    Ok(())
}

/// Key object referenced through a handle for one service call
///
/// Fields drop in order: the reference goes first, then `reap` runs. A key
/// whose last reference was this one is torn down before the service
/// returns. Must not be dropped while the tree lock is held.
struct ReferencedKey<'r, S: HiveBackingStore> {
    object: Arc<KeyObject>,
    _reap: ReapOnDrop<'r, S>,
}

struct ReapOnDrop<'r, S: HiveBackingStore>(&'r Registry<S>);

impl<S: HiveBackingStore> Drop for ReapOnDrop<'_, S> {
    fn drop(&mut self) {
        self.0.reap();
    }
}

impl<S: HiveBackingStore> Deref for ReferencedKey<'_, S> {
    type Target = KeyObject;

    fn deref(&self) -> &KeyObject {
        &self.object
    }
}

/// Configuration manager instance
pub struct Registry<S: HiveBackingStore = MemoryBackingStore> {
    config: CmConfig,
    tree: CmTreeLock,
    callbacks: CmCallbackList,
    handles: HandleTable<KeyObject>,
    objects: KeyObjectCache,
    store: S,
    /// Serializes flushes so images reach the store in order
    flush_lock: Mutex<()>,
    parse: ParseProcedure,
    post_notify_failures: AtomicU64,
}

impl Registry<MemoryBackingStore> {
    /// Registry backed by an in-memory store
    pub fn new(config: CmConfig) -> Self {
        Self::with_store(config, MemoryBackingStore::new())
    }
}

impl<S: HiveBackingStore> Registry<S> {
    pub fn with_store(config: CmConfig, store: S) -> Self {
        Self {
            config,
            tree: CmTreeLock::new(HiveSet::new()),
            callbacks: CmCallbackList::new(config.max_callbacks),
            handles: HandleTable::with_capacity(config.max_handles),
            objects: KeyObjectCache::new(),
            store,
            flush_lock: Mutex::new(()),
            parse: cm_parse_key,
            post_notify_failures: AtomicU64::new(0),
        }
    }

    /// Replace the key parse procedure
    pub fn with_parse_procedure(mut self, parse: ParseProcedure) -> Self {
        self.parse = parse;
        self
    }

    pub fn config(&self) -> &CmConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Post-notify callbacks that failed since creation
    pub fn post_notify_failures(&self) -> u64 {
        self.post_notify_failures.load(Ordering::Relaxed)
    }

    /// Open handles
    pub fn handle_count(&self) -> usize {
        self.handles.count()
    }

    /// Registered callbacks
    pub fn callback_count(&self) -> usize {
        self.callbacks.count()
    }

    // ------------------------------------------------------------------------
    // Hives and callbacks
    // ------------------------------------------------------------------------

    /// Mount a hive under `\name` and return a handle to its root (NtLoadKey)
    ///
    /// A stable hive starts from the store's image when there is one.
    pub fn load_hive(&self, name: &str, flags: HiveFlags) -> Result<Handle, CmStatus> {
        let image = if flags.contains(HiveFlags::VOLATILE) {
            None
        } else {
            self.store.load_hive(name)?
        };

        let mut hives = self.tree.write();
        if hives.find_by_name(name).is_some() {
            return Err(CmStatus::NameConflict);
        }

        let id = hives.next_id()?;
        let hive = match &image {
            Some(image) => CmHive::from_snapshot(id, name, flags, image, &self.config)?,
            None => CmHive::new(id, name, flags, &self.config)?,
        };
        let root = hive.root();
        hives.insert(hive)?;

        let object = self.objects.reference(&hives, KeyId { hive: id, cell: root })?;
        let handle = self.handles.create_handle(object, AccessMask::KEY_ALL_ACCESS)?;
        log::debug!(
            "[CM] Loaded hive '{}' as {} ({})",
            name,
            id,
            if image.is_some() { "from image" } else { "empty" }
        );
        Ok(handle)
    }

    /// Unmount a hive (NtUnloadKey)
    ///
    /// Refused with `HiveInUse` while any key of the hive is referenced,
    /// the root handle from `load_hive` included. A stable hive is flushed
    /// first and stays loaded if that fails.
    pub fn unload_hive(&self, name: &str) -> Result<(), CmStatus> {
        let id = self.tree.read().find_by_name(name).ok_or(CmStatus::NameNotFound)?;

        loop {
            self.reap();
            if self.objects.has_live_objects(id) {
                return Err(CmStatus::HiveInUse);
            }
            self.sync_hive(id)?;

            // Keys are only referenced under the tree lock
            let mut hives = self.tree.write();
            let hive = hives.get(id).ok_or(CmStatus::NameNotFound)?;
            if self.objects.has_live_objects(id) {
                return Err(CmStatus::HiveInUse);
            }
            if !hive.is_volatile() && !hive.dirty_cells().is_empty() {
                // A teardown landed after the flush
                continue;
            }

            if let Some(hive) = hives.remove(id) {
                log::debug!("[CM] Unloaded hive '{}' ({})", hive.name(), id);
            }
            return Ok(());
        }
    }

    /// Register a callback (CmRegisterCallback); returns its cookie
    pub fn register_callback<F>(&self, function: F) -> Result<u64, CmStatus>
    where
        F: Fn(RegNotifyClass, &RegNotifyInformation<'_>) -> CmStatus + Send + Sync + 'static,
    {
        self.callbacks.register(Box::new(function))
    }

    /// Unregister a callback (CmUnRegisterCallback)
    pub fn unregister_callback(&self, cookie: u64) -> Result<(), CmStatus> {
        self.callbacks.unregister(cookie)
    }

    // ------------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------------

    fn reference(&self, handle: Handle, access: AccessMask) -> Result<ReferencedKey<'_, S>, CmStatus> {
        let object = self.handles.reference_by_handle(handle, access)?;
        Ok(ReferencedKey {
            object,
            _reap: ReapOnDrop(self),
        })
    }

    fn post_notify(&self, class: RegNotifyClass, object: Option<&KeyObject>, status: CmStatus) {
        let info = RegNotifyInformation::Post { object, status };
        if let Err(failure) = self.callbacks.notify(class, &info) {
            self.post_notify_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("[CM] {:?} callback failed with {:?}, ignored", class, failure);
        }
    }

    /// Pre-notify, execute, post-notify
    fn notified<T: OperationStatus>(
        &self,
        pre: RegNotifyClass,
        post: RegNotifyClass,
        object: &KeyObject,
        info: &RegNotifyInformation<'_>,
        execute: impl FnOnce() -> Result<T, CmStatus>,
    ) -> Result<T, CmStatus> {
        if let Err(status) = self.callbacks.notify(pre, info) {
            self.post_notify(post, Some(object), status);
            return Err(status);
        }

        let result = execute();
        self.post_notify(post, Some(object), result_status(&result));
        result
    }

    /// Write a hive's dirty cells to the store (HvSyncHive)
    ///
    /// The store works on a copy taken under the shared lock; the tree lock
    /// is not held while it writes.
    fn sync_hive(&self, id: HiveId) -> Result<(), CmStatus> {
        let _flush = self.flush_lock.lock();

        let (copy, dirty) = {
            let hives = self.tree.read();
            let hive = hives.get(id).ok_or(CmStatus::InvalidHandle)?;
            if hive.is_volatile() {
                return Ok(());
            }
            let dirty = hive.dirty_cells();
            if dirty.is_empty() {
                return Ok(());
            }
            (hive.clone(), dirty)
        };

        self.store.flush_hive(&copy, &dirty)?;

        let mut hives = self.tree.write();
        if let Some(hive) = hives.get_mut(id) {
            // Mutations that landed meanwhile stay dirty for their own flush
            if hive.sequence() == copy.sequence() {
                hive.clear_dirty();
            }
        }
        log::debug!("[CM] Flushed hive '{}', {} dirty cells", copy.name(), dirty.len());
        Ok(())
    }

    /// Flush after a successful mutation when the policy asks for it
    fn durability(&self, id: HiveId) {
        if self.config.sync_policy != SyncPolicy::OnWrite {
            return;
        }
        if let Err(status) = self.sync_hive(id) {
            log::error!("[CM] Flush of hive {} failed: {:?}", id, status);
        }
    }

    /// Tear down marked keys whose last reference is gone
    fn reap(&self) {
        if self.objects.deletions().is_empty() {
            return;
        }

        let mut touched: Vec<HiveId> = Vec::new();
        {
            let mut hives = self.tree.write();
            for id in self.objects.deletions().drain() {
                self.objects.forget(id);
                let Some(hive) = hives.get_mut(id.hive) else {
                    continue;
                };
                match hive.teardown(id.cell) {
                    Ok(()) => {
                        if !touched.contains(&id.hive) {
                            touched.push(id.hive);
                        }
                    }
                    Err(status) => log::warn!("[CM] Teardown of {:?} failed: {:?}", id, status),
                }
            }
        }

        for hive in touched {
            self.durability(hive);
        }
    }

    /// `\HIVE\...` name a create or open will resolve
    fn complete_name(&self, root: Option<&KeyObject>, path: &str) -> String {
        let mut name = String::new();
        if let Some(root) = root {
            name.push_str(root.name());
        }
        for component in cm_path_components(path) {
            name.push(OBJ_NAME_PATH_SEPARATOR);
            name.push_str(component);
        }
        name
    }

    // ------------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------------

    /// Open or create a key (NtCreateKey)
    ///
    /// Every component but the last must already exist.
    pub fn create_key(
        &self,
        root: Option<Handle>,
        path: &str,
        class: Option<&str>,
        options: CreateOptions,
        access: AccessMask,
    ) -> Result<(Handle, CreateDisposition), CmStatus> {
        let start = root.map(|h| self.reference(h, AccessMask::empty())).transpose()?;
        let complete_name = self.complete_name(start.as_deref(), path);
        log::debug!("[CM] NtCreateKey '{}'", complete_name);

        let pre = RegNotifyInformation::CreateKey {
            complete_name: &complete_name,
        };
        if let Err(status) = self.callbacks.notify(RegNotifyClass::PreCreateKey, &pre) {
            self.post_notify(RegNotifyClass::PostCreateKey, None, status);
            return Err(status);
        }

        let result = self.create_locked(start.as_ref().map(|o| o.id()), path, class, options, access);
        drop(start);

        match result {
            Ok((object, handle, disposition)) => {
                self.post_notify(RegNotifyClass::PostCreateKey, Some(&*object), CmStatus::Success);
                if disposition == CreateDisposition::CreatedNew {
                    self.durability(object.hive());
                }
                Ok((handle, disposition))
            }
            Err(status) => {
                self.post_notify(RegNotifyClass::PostCreateKey, None, status);
                Err(status)
            }
        }
    }

    fn create_locked(
        &self,
        start: Option<KeyId>,
        path: &str,
        class: Option<&str>,
        options: CreateOptions,
        access: AccessMask,
    ) -> Result<(Arc<KeyObject>, Handle, CreateDisposition), CmStatus> {
        let mut hives = self.tree.write();
        let parsed = (self.parse)(&hives, start, path)?;

        let (cell, disposition) = if parsed.is_complete() {
            let hive = hives.get(parsed.key.hive).ok_or(CmStatus::InvalidHandle)?;
            hive.check_open(parsed.key.cell)?;
            (parsed.key.cell, CreateDisposition::OpenedExisting)
        } else if parsed.remaining.contains(OBJ_NAME_PATH_SEPARATOR) {
            return Err(CmStatus::PathHasSeparators);
        } else {
            let hive = hives.get_mut(parsed.key.hive).ok_or(CmStatus::InvalidHandle)?;
            let cell = hive.create_key(parsed.key.cell, &parsed.remaining, class, options)?;
            (cell, CreateDisposition::CreatedNew)
        };

        let id = KeyId {
            hive: parsed.key.hive,
            cell,
        };
        let object = self.objects.reference(&hives, id)?;
        let handle = self.handles.create_handle(object.clone(), access)?;
        Ok((object, handle, disposition))
    }

    /// Open an existing key (NtOpenKey)
    pub fn open_key(&self, root: Option<Handle>, path: &str, access: AccessMask) -> Result<Handle, CmStatus> {
        let start = root.map(|h| self.reference(h, AccessMask::empty())).transpose()?;
        let complete_name = self.complete_name(start.as_deref(), path);

        let pre = RegNotifyInformation::CreateKey {
            complete_name: &complete_name,
        };
        if let Err(status) = self.callbacks.notify(RegNotifyClass::PreOpenKey, &pre) {
            self.post_notify(RegNotifyClass::PostOpenKey, None, status);
            return Err(status);
        }

        let result = self.open_locked(start.as_ref().map(|o| o.id()), path, access);
        drop(start);

        match result {
            Ok((object, handle)) => {
                self.post_notify(RegNotifyClass::PostOpenKey, Some(&*object), CmStatus::Success);
                Ok(handle)
            }
            Err(status) => {
                self.post_notify(RegNotifyClass::PostOpenKey, None, status);
                Err(status)
            }
        }
    }

    fn open_locked(
        &self,
        start: Option<KeyId>,
        path: &str,
        access: AccessMask,
    ) -> Result<(Arc<KeyObject>, Handle), CmStatus> {
        let hives = self.tree.read();
        let parsed = (self.parse)(&hives, start, path)?;
        if !parsed.is_complete() {
            return Err(CmStatus::NameNotFound);
        }
        hives
            .get(parsed.key.hive)
            .ok_or(CmStatus::InvalidHandle)?
            .check_open(parsed.key.cell)?;

        let object = self.objects.reference(&hives, parsed.key)?;
        let handle = self.handles.create_handle(object.clone(), access)?;
        Ok((object, handle))
    }

    /// Mark a key for deletion (NtDeleteKey)
    ///
    /// The key disappears when its last handle is closed.
    pub fn delete_key(&self, handle: Handle) -> Result<(), CmStatus> {
        let object = self.reference(handle, AccessMask::DELETE)?;
        let info = RegNotifyInformation::DeleteKey { object: &object };

        self.notified(RegNotifyClass::DeleteKey, RegNotifyClass::PostDeleteKey, &object, &info, || {
            let mut hives = self.tree.write();
            check_live(&object)?;
            hive_of_mut(&mut hives, &object)?.mark_for_delete(object.cell())?;
            object.mark_for_delete();
            log::debug!("[CM] Marked '{}' for deletion", object.name());
            Ok(())
        })
    }

    /// Close a handle (NtClose)
    pub fn close_key(&self, handle: Handle) -> Result<(), CmStatus> {
        let object = self.handles.close_handle(handle)?;
        drop(object);
        self.reap();
        Ok(())
    }

    /// Subkey information by ordinal (NtEnumerateKey)
    ///
    /// Stable subkeys come first, then volatile ones. Ordinals are only
    /// stable while the key is not modified.
    pub fn enumerate_key(
        &self,
        handle: Handle,
        index: u32,
        class: KeyInformationClass,
        buffer: &mut [u8],
    ) -> Result<Marshaled, CmStatus> {
        let object = self.reference(handle, AccessMask::KEY_ENUMERATE_SUB_KEYS)?;
        let info = RegNotifyInformation::EnumerateKey {
            object: &object,
            index,
            class,
            length: buffer.len(),
        };

        self.notified(RegNotifyClass::EnumerateKey, RegNotifyClass::PostEnumerateKey, &object, &info, || {
            let hives = self.tree.read();
            let hive = hive_of(&hives, &object)?;
            let subkey = hive.enumerate_subkey(object.cell(), index)?;
            let name = &hive.key_node(subkey)?.name;
            cm_query_key_info(hive, subkey, class, index, name, buffer)
        })
    }

    /// Key information (NtQueryKey)
    ///
    /// `KeyNameInformation` needs no access right.
    pub fn query_key(&self, handle: Handle, class: KeyInformationClass, buffer: &mut [u8]) -> Result<Marshaled, CmStatus> {
        let access = if class == KeyInformationClass::Name {
            AccessMask::empty()
        } else {
            AccessMask::KEY_QUERY_VALUE
        };
        let object = self.reference(handle, access)?;
        let info = RegNotifyInformation::QueryKey {
            object: &object,
            class,
            length: buffer.len(),
        };

        self.notified(RegNotifyClass::QueryKey, RegNotifyClass::PostQueryKey, &object, &info, || {
            let hives = self.tree.read();
            let hive = hive_of(&hives, &object)?;
            cm_query_key_info(hive, object.cell(), class, 0, object.name(), buffer)
        })
    }

    /// Set key information (NtSetInformationKey)
    ///
    /// Only `KeyWriteTimeInformation`, an 8-byte FILETIME.
    pub fn set_information_key(&self, handle: Handle, class: u32, data: &[u8]) -> Result<(), CmStatus> {
        let object = self.reference(handle, AccessMask::KEY_SET_VALUE)?;
        let info = RegNotifyInformation::SetInformationKey {
            object: &object,
            class,
            length: data.len(),
        };

        let result = self.notified(
            RegNotifyClass::SetInformationKey,
            RegNotifyClass::PostSetInformationKey,
            &object,
            &info,
            || {
                if class != KEY_WRITE_TIME_INFORMATION {
                    return Err(CmStatus::InvalidInfoClass);
                }
                let time: [u8; 8] = data.try_into().map_err(|_| CmStatus::InfoLengthMismatch)?;

                let mut hives = self.tree.write();
                check_live(&object)?;
                hive_of_mut(&mut hives, &object)?.set_write_time(object.cell(), u64::from_le_bytes(time))
            },
        );

        if result.is_ok() {
            self.durability(object.hive());
        }
        result
    }

    /// Flush the key's hive now, whatever the sync policy (NtFlushKey)
    pub fn flush_key(&self, handle: Handle) -> Result<(), CmStatus> {
        let object = self.reference(handle, AccessMask::empty())?;
        self.sync_hive(object.hive())
    }

    /// Write the key's subtree to the store under `target` (NtSaveKey)
    pub fn save_key(&self, handle: Handle, target: &str) -> Result<(), CmStatus> {
        let object = self.reference(handle, AccessMask::empty())?;
        let image = {
            let hives = self.tree.read();
            hive_of(&hives, &object)?.snapshot(object.cell())?
        };
        self.store.save_hive(target, image)
    }

    // ------------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------------

    /// Value information by ordinal (NtEnumerateValueKey)
    pub fn enumerate_value_key(
        &self,
        handle: Handle,
        index: u32,
        class: KeyValueInformationClass,
        buffer: &mut [u8],
    ) -> Result<Marshaled, CmStatus> {
        let object = self.reference(handle, AccessMask::KEY_QUERY_VALUE)?;
        let info = RegNotifyInformation::EnumerateValueKey {
            object: &object,
            index,
            class,
            length: buffer.len(),
        };

        self.notified(
            RegNotifyClass::EnumerateValueKey,
            RegNotifyClass::PostEnumerateValueKey,
            &object,
            &info,
            || {
                let hives = self.tree.read();
                let hive = hive_of(&hives, &object)?;
                let value = hive.enumerate_value(object.cell(), index)?;
                cm_query_value_info(hive, value, class, index, buffer)
            },
        )
    }

    /// Value information by name (NtQueryValueKey)
    pub fn query_value_key(
        &self,
        handle: Handle,
        value_name: &str,
        class: KeyValueInformationClass,
        buffer: &mut [u8],
    ) -> Result<Marshaled, CmStatus> {
        let object = self.reference(handle, AccessMask::KEY_QUERY_VALUE)?;
        let info = RegNotifyInformation::QueryValueKey {
            object: &object,
            value_name,
            class,
            length: buffer.len(),
        };

        self.notified(RegNotifyClass::QueryValueKey, RegNotifyClass::PostQueryValueKey, &object, &info, || {
            let hives = self.tree.read();
            let hive = hive_of(&hives, &object)?;
            let (_, value) = hive.find_value(object.cell(), value_name)?;
            cm_query_value_info(hive, value, class, 0, buffer)
        })
    }

    /// Several values' data packed into one buffer (NtQueryMultipleValueKey)
    pub fn query_multiple_value_key(
        &self,
        handle: Handle,
        entries: &mut [KeyValueEntry],
        buffer: &mut [u8],
    ) -> Result<Marshaled, CmStatus> {
        let object = self.reference(handle, AccessMask::KEY_QUERY_VALUE)?;
        let info = RegNotifyInformation::QueryMultipleValueKey {
            object: &object,
            entry_count: entries.len(),
            length: buffer.len(),
        };

        self.notified(
            RegNotifyClass::QueryMultipleValueKey,
            RegNotifyClass::PostQueryMultipleValueKey,
            &object,
            &info,
            || {
                let hives = self.tree.read();
                let hive = hive_of(&hives, &object)?;
                cm_query_multiple_values(hive, object.cell(), entries, buffer)
            },
        )
    }

    /// Create or replace a value (NtSetValueKey)
    pub fn set_value_key(&self, handle: Handle, value_name: &str, value_type: u32, data: &[u8]) -> Result<(), CmStatus> {
        let object = self.reference(handle, AccessMask::KEY_SET_VALUE)?;
        let info = RegNotifyInformation::SetValueKey {
            object: &object,
            value_name,
            value_type,
            data,
        };

        let result = self.notified(RegNotifyClass::SetValueKey, RegNotifyClass::PostSetValueKey, &object, &info, || {
            let mut hives = self.tree.write();
            check_live(&object)?;
            hive_of_mut(&mut hives, &object)?.set_value(object.cell(), value_name, value_type, data)
        });

        if result.is_ok() {
            self.durability(object.hive());
        }
        result
    }

    /// Remove a value (NtDeleteValueKey)
    pub fn delete_value_key(&self, handle: Handle, value_name: &str) -> Result<(), CmStatus> {
        let object = self.reference(handle, AccessMask::KEY_SET_VALUE)?;
        let info = RegNotifyInformation::DeleteValueKey {
            object: &object,
            value_name,
        };

        let result = self.notified(
            RegNotifyClass::DeleteValueKey,
            RegNotifyClass::PostDeleteValueKey,
            &object,
            &info,
            || {
                let mut hives = self.tree.write();
                check_live(&object)?;
                hive_of_mut(&mut hives, &object)?.delete_value(object.cell(), value_name)
            },
        );

        if result.is_ok() {
            self.durability(object.hive());
        }
        result
    }
}
