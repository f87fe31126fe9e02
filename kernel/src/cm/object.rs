//! Key Objects
//!
//! A key object is what a handle points at. It names a key node by
//! (hive, cell), keeps its parent's object alive, caches the full path it
//! was opened under and mirrors the node's delete mark.
//!
//! There is at most one live object per key node. When the last reference
//! to a marked object goes away its `Drop` only queues the node; whoever
//! next holds the tree lock exclusively tears the node down. Dropping a
//! reference therefore never needs the tree lock.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use super::cell::CellIndex;
use super::hive::{HiveId, HiveSet};
use super::index::OBJ_NAME_PATH_SEPARATOR;
use super::status::CmStatus;

/// Key node address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyId {
    pub hive: HiveId,
    pub cell: CellIndex,
}

/// Nodes whose last key object went away while marked for deletion
#[derive(Debug, Default)]
pub struct DeletionQueue {
    pending: Mutex<Vec<KeyId>>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, key: KeyId) {
        self.pending.lock().push(key);
    }

    /// Take everything queued, oldest first
    pub fn drain(&self) -> Vec<KeyId> {
        core::mem::take(&mut *self.pending.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Registry key object (CM_KEY_BODY)
#[derive(Debug)]
pub struct KeyObject {
    id: KeyId,
    parent: Option<Arc<KeyObject>>,
    /// Full path, `\HIVE\A\B`
    name: String,
    marked: AtomicBool,
    deletions: Arc<DeletionQueue>,
}

impl KeyObject {
    #[inline]
    pub fn id(&self) -> KeyId {
        self.id
    }

    #[inline]
    pub fn hive(&self) -> HiveId {
        self.id.hive
    }

    #[inline]
    pub fn cell(&self) -> CellIndex {
        self.id.cell
    }

    pub fn parent(&self) -> Option<&Arc<KeyObject>> {
        self.parent.as_ref()
    }

    /// Full resolved name
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_marked_for_delete(&self) -> bool {
        self.marked.load(Ordering::Acquire)
    }

    /// Mirror the node's delete mark
    pub fn mark_for_delete(&self) {
        self.marked.store(true, Ordering::Release);
    }
}

impl Drop for KeyObject {
    fn drop(&mut self) {
        if self.is_marked_for_delete() {
            self.deletions.push(self.id);
        }
    }
}

/// Dead slots are swept once the map reaches this size
const KEY_OBJECT_PRUNE_MINIMUM: usize = 64;

#[derive(Debug)]
struct ObjectSlots {
    map: BTreeMap<KeyId, Weak<KeyObject>>,
    /// Map size that triggers the next sweep
    prune_at: usize,
}

impl Default for ObjectSlots {
    fn default() -> Self {
        Self {
            map: BTreeMap::new(),
            prune_at: KEY_OBJECT_PRUNE_MINIMUM,
        }
    }
}

impl ObjectSlots {
    /// Drop slots whose object is gone
    fn prune(&mut self) {
        self.map.retain(|_, weak| weak.strong_count() > 0);
        self.prune_at = (self.map.len() * 2).max(KEY_OBJECT_PRUNE_MINIMUM);
    }
}

/// Open key objects, one per key node
#[derive(Debug, Default)]
pub struct KeyObjectCache {
    objects: Mutex<ObjectSlots>,
    deletions: Arc<DeletionQueue>,
}

impl KeyObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deletions(&self) -> &DeletionQueue {
        &self.deletions
    }

    /// Live object for a node, if any
    pub fn lookup(&self, id: KeyId) -> Option<Arc<KeyObject>> {
        self.objects.lock().map.get(&id).and_then(Weak::upgrade)
    }

    /// Object for a node, creating it and its ancestors' objects as needed
    ///
    /// Caller holds the tree lock (either side).
    pub fn reference(&self, hives: &HiveSet, id: KeyId) -> Result<Arc<KeyObject>, CmStatus> {
        if let Some(object) = self.lookup(id) {
            return Ok(object);
        }

        let hive = hives.get(id.hive).ok_or(CmStatus::InvalidHandle)?;
        let node = hive.key_node(id.cell)?;

        let parent = if node.parent.is_nil() {
            None
        } else {
            Some(self.reference(hives, KeyId { hive: id.hive, cell: node.parent })?)
        };

        let mut name = match &parent {
            Some(parent) => parent.name.clone(),
            None => String::new(),
        };
        name.push(OBJ_NAME_PATH_SEPARATOR);
        name.push_str(&node.name);

        let mut objects = self.objects.lock();
        // Another opener may have won the race while the lock was dropped.
        if let Some(object) = objects.map.get(&id).and_then(Weak::upgrade) {
            return Ok(object);
        }
        if objects.map.len() >= objects.prune_at {
            objects.prune();
        }

        let object = Arc::new(KeyObject {
            id,
            parent,
            name,
            marked: AtomicBool::new(node.is_marked_for_delete()),
            deletions: self.deletions.clone(),
        });
        objects.map.insert(id, Arc::downgrade(&object));
        Ok(object)
    }

    /// Drop the cache slot of a node that is being torn down
    pub fn forget(&self, id: KeyId) {
        let mut objects = self.objects.lock();
        if objects.map.get(&id).is_some_and(|weak| weak.strong_count() == 0) {
            objects.map.remove(&id);
        }
    }

    /// Whether any key object of a hive is still alive
    pub fn has_live_objects(&self, hive: HiveId) -> bool {
        self.objects
            .lock()
            .map
            .iter()
            .any(|(id, weak)| id.hive == hive && weak.strong_count() > 0)
    }

    /// Live objects
    pub fn len(&self) -> usize {
        self.objects.lock().map.values().filter(|w| w.strong_count() > 0).count()
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.objects.lock().map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cm::config::CmConfig;
    use crate::cm::hive::{CmHive, CreateOptions, HiveFlags};

    fn hive_set() -> (HiveSet, KeyId, KeyId) {
        let mut set = HiveSet::new();
        let mut hive = CmHive::new(0, "SOFTWARE", HiveFlags::empty(), &CmConfig::new()).unwrap();
        let root = hive.root();
        let a = hive.create_key(root, "Vendor", None, CreateOptions::empty()).unwrap();
        let b = hive.create_key(a, "Product", None, CreateOptions::empty()).unwrap();
        set.insert(hive).unwrap();
        (set, KeyId { hive: 0, cell: a }, KeyId { hive: 0, cell: b })
    }

    #[test]
    fn test_one_object_per_node() {
        let (set, a, b) = hive_set();
        let cache = KeyObjectCache::new();

        let first = cache.reference(&set, b).unwrap();
        let second = cache.reference(&set, b).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "\\SOFTWARE\\Vendor\\Product");

        // Parent chain is kept alive by the child
        let parent = cache.lookup(a).unwrap();
        assert!(Arc::ptr_eq(first.parent().unwrap(), &parent));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_marked_drop_queues_node() {
        let (set, _, b) = hive_set();
        let cache = KeyObjectCache::new();

        let object = cache.reference(&set, b).unwrap();
        let other = object.clone();
        object.mark_for_delete();

        drop(object);
        assert!(cache.deletions().is_empty());
        drop(other);
        assert_eq!(cache.deletions().drain(), [b]);
        assert!(cache.deletions().is_empty());

        cache.forget(b);
        assert!(cache.lookup(b).is_none());
    }

    #[test]
    fn test_unmarked_drop_is_silent() {
        let (set, a, _) = hive_set();
        let cache = KeyObjectCache::new();
        drop(cache.reference(&set, a).unwrap());
        assert!(cache.deletions().is_empty());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_dead_slots_are_swept() {
        let mut set = HiveSet::new();
        let mut hive = CmHive::new(0, "SOFTWARE", HiveFlags::empty(), &CmConfig::new()).unwrap();
        let root = hive.root();
        let mut keys = Vec::new();
        for i in 0..500 {
            let cell = hive.create_key(root, &format!("Key{}", i), None, CreateOptions::empty()).unwrap();
            keys.push(KeyId { hive: 0, cell });
        }
        set.insert(hive).unwrap();

        let cache = KeyObjectCache::new();
        let held = cache.reference(&set, keys[0]).unwrap();
        for &key in &keys[1..] {
            drop(cache.reference(&set, key).unwrap());
        }

        assert!(cache.slot_count() <= 2 * KEY_OBJECT_PRUNE_MINIMUM);
        assert_eq!(cache.len(), 2);
        assert!(cache.has_live_objects(0));
        drop(held);
        assert!(!cache.has_live_objects(0));
    }
}
