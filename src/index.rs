//! PrimaryIndex: owns the keys, maps each to a weak value slot, and addresses
//! entries by generational handles.
//!
//! Each entry stores its precomputed `u64` hash so that removal by handle
//! never calls back into `K: Hash`. Handles are `slotmap` keys: once an entry
//! is removed its handle never resolves again, even after the storage slot is
//! reused for the same key. Reclamation relies on this to remove by identity.

use crate::error::InsertError;
use crate::notifier::Registration;
use crate::slot::WeakSlot;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Handle(DefaultKey);

pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) slot: WeakSlot<V>,
    pub(crate) registration: Registration,
    hash: u64,
}

impl<K, V> Entry<K, V> {
    /// Cancel this entry's notifier if the value is still alive.
    pub(crate) fn detach(&self) {
        self.slot.cancel(self.registration);
    }
}

pub(crate) struct PrimaryIndex<K, V, S = RandomState> {
    hasher: S,
    table: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Entry<K, V>>,
}

// Bound-free so `Drop` of the owning map can tear down without `K: Hash`.
impl<K, V, S> PrimaryIndex<K, V, S> {
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn resolve(&self, h: Handle) -> Option<&Entry<K, V>> {
        self.slots.get(h.0)
    }

    /// Snapshot of every handle currently in the index.
    pub(crate) fn handles(&self) -> Vec<Handle> {
        self.slots.keys().map(Handle).collect()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &Entry<K, V>> + '_ {
        self.slots.values()
    }

    pub(crate) fn dead_handles(&self) -> Vec<Handle> {
        self.slots
            .iter()
            .filter(|(_, e)| !e.slot.is_alive())
            .map(|(k, _)| Handle(k))
            .collect()
    }

    pub(crate) fn remove(&mut self, h: Handle) -> Option<Entry<K, V>> {
        let entry = self.slots.remove(h.0)?;
        let found = self.table.find_entry(entry.hash, |&k| k == h.0);
        debug_assert!(found.is_ok(), "slot without index entry");
        if let Ok(occupied) = found {
            occupied.remove();
        }
        Some(entry)
    }

    /// Unlink everything and hand the entries back for dropping outside any borrow.
    pub(crate) fn drain(&mut self) -> Vec<Entry<K, V>> {
        self.table.clear();
        self.slots.drain().map(|(_, e)| e).collect()
    }
}

impl<K, V, S> PrimaryIndex<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            table: HashTable::new(),
            slots: SlotMap::with_key(),
        }
    }

    pub(crate) fn find<Q>(&self, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hasher.hash_one(q);
        self.table
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|e| e.key.borrow() == q)
                    .unwrap_or(false)
            })
            .map(|&k| Handle(k))
    }

    pub(crate) fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(q).is_some()
    }

    /// Insert `key` unless present. `attach` runs only on success and receives
    /// the new entry's handle, so it can register a notifier bound to it.
    pub(crate) fn insert_with<F>(&mut self, key: K, attach: F) -> Result<Handle, InsertError>
    where
        F: FnOnce(Handle) -> (WeakSlot<V>, Registration),
    {
        let hash = self.hasher.hash_one(&key);
        match self.table.entry(
            hash,
            |&kk| self.slots.get(kk).map(|e| e.key == key).unwrap_or(false),
            |&kk| self.slots.get(kk).map(|e| e.hash).unwrap_or(0),
        ) {
            hashbrown::hash_table::Entry::Occupied(_) => Err(InsertError::DuplicateKey),
            hashbrown::hash_table::Entry::Vacant(v) => {
                let k = self.slots.insert_with_key(|k| {
                    let (slot, registration) = attach(Handle(k));
                    Entry {
                        key,
                        slot,
                        registration,
                        hash,
                    }
                });
                let _ = v.insert(k);
                Ok(Handle(k))
            }
        }
    }
}
