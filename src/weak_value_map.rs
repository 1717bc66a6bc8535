use crate::error::{CopyError, InsertError, KeyNotFound};
use crate::index::{Entry, Handle, PrimaryIndex};
use crate::policy::ReclaimPolicy;
use crate::slot::Strong;
use core::borrow::Borrow;
use core::cell::RefCell;
use core::hash::{BuildHasher, Hash};
use std::collections::hash_map::RandomState;
use std::rc::{Rc, Weak};

struct Inner<K, V, S> {
    index: RefCell<PrimaryIndex<K, V, S>>,
    // Handles whose value was reclaimed while the index could not be touched.
    pending: RefCell<Vec<Handle>>,
    policy: ReclaimPolicy,
}

impl<K, V, S> Inner<K, V, S> {
    /// Called from a value's drop hook. Never panics into the dropper: a busy
    /// index just means the request waits in `pending`.
    fn reclaim(&self, handle: Handle) {
        if self.policy == ReclaimPolicy::Eager {
            if let Ok(mut index) = self.index.try_borrow_mut() {
                let removed = index.remove(handle);
                drop(index);
                // Key destructors run with the index released.
                drop(removed);
                return;
            }
        }
        log::trace!("queueing removal of {:?}", handle);
        self.pending.borrow_mut().push(handle);
    }

    /// Apply queued removals. Stale handles (entry already removed or key
    /// reused) resolve to nothing and are skipped.
    fn drain_pending(&self) -> usize {
        let pending = core::mem::take(&mut *self.pending.borrow_mut());
        if pending.is_empty() {
            return 0;
        }
        let mut index = match self.index.try_borrow_mut() {
            Ok(index) => index,
            Err(_) => {
                self.pending.borrow_mut().extend(pending);
                return 0;
            }
        };
        let removed: Vec<Entry<K, V>> = pending
            .into_iter()
            .filter_map(|h| index.remove(h))
            .collect();
        drop(index);
        removed.len()
    }

    fn settle(&self) {
        if self.policy == ReclaimPolicy::Eager {
            self.drain_pending();
        }
    }
}

impl<K, V, S> Drop for Inner<K, V, S> {
    fn drop(&mut self) {
        // Values that outlive the map should not keep carrying our hooks.
        for entry in self.index.get_mut().drain() {
            entry.detach();
        }
    }
}

/// A hash map that holds its values weakly.
///
/// Values are shared through `Strong<V>` handles owned elsewhere in the
/// program. The map stores only a `WeakSlot`, and the key disappears when the
/// last `Strong` for its value is dropped. See `ReclaimPolicy` for exactly
/// when.
///
/// `len`, `keys` and `contains_key` look at the index only and may count
/// entries whose value is already gone but whose removal is still queued.
/// Every read that returns values (`get`, `values`, `iter`, `copy_to`,
/// `contains_pair`) skips such entries.
pub struct WeakValueMap<K, V, S = RandomState> {
    inner: Rc<Inner<K, V, S>>,
}

impl<K, V> WeakValueMap<K, V>
where
    K: Eq + Hash + 'static,
    V: 'static,
{
    pub fn new() -> Self {
        Self::with_policy(ReclaimPolicy::default())
    }

    pub fn with_policy(policy: ReclaimPolicy) -> Self {
        Self::with_hasher_and_policy(RandomState::new(), policy)
    }
}

impl<K, V> Default for WeakValueMap<K, V>
where
    K: Eq + Hash + 'static,
    V: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> WeakValueMap<K, V, S>
where
    K: Eq + Hash + 'static,
    V: 'static,
    S: BuildHasher + 'static,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_hasher_and_policy(hasher, ReclaimPolicy::default())
    }

    pub fn with_hasher_and_policy(hasher: S, policy: ReclaimPolicy) -> Self {
        Self {
            inner: Rc::new(Inner {
                index: RefCell::new(PrimaryIndex::with_hasher(hasher)),
                pending: RefCell::new(Vec::new()),
                policy,
            }),
        }
    }

    pub fn policy(&self) -> ReclaimPolicy {
        self.inner.policy
    }

    /// Number of keys in the index. An upper bound on live entries while
    /// removals are queued.
    pub fn len(&self) -> usize {
        self.inner.settle();
        self.inner.index.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries whose value is still alive.
    pub fn live_len(&self) -> usize {
        self.inner.settle();
        self.inner
            .index
            .borrow()
            .entries()
            .filter(|e| e.slot.is_alive())
            .count()
    }

    /// Key presence in the index, regardless of whether the value is alive.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner.settle();
        self.inner.index.borrow().contains_key(key)
    }

    /// Insert `key` pointing weakly at `value`. Fails if `key` is present,
    /// even when its value is dead but not yet removed.
    pub fn insert(&mut self, key: K, value: &Strong<V>) -> Result<(), InsertError> {
        self.inner.settle();
        let mut index = self.inner.index.borrow_mut();
        self.attach(&mut index, key, value).map(|_| ())
    }

    /// Replace whatever `key` maps to. Returns the previous value if it was
    /// still alive.
    pub fn set(&mut self, key: K, value: &Strong<V>) -> Option<Strong<V>> {
        self.inner.settle();
        let mut index = self.inner.index.borrow_mut();
        let previous = index.find(&key).and_then(|h| index.remove(h));
        let attached = self.attach(&mut index, key, value);
        drop(index);
        debug_assert!(attached.is_ok(), "key present right after removal");
        previous.and_then(|e| {
            e.detach();
            e.slot.upgrade()
        })
    }

    fn attach(
        &self,
        index: &mut PrimaryIndex<K, V, S>,
        key: K,
        value: &Strong<V>,
    ) -> Result<Handle, InsertError> {
        let owner: Weak<Inner<K, V, S>> = Rc::downgrade(&self.inner);
        index.insert_with(key, move |handle| {
            let registration = Strong::register(value, move || {
                if let Some(inner) = owner.upgrade() {
                    inner.reclaim(handle);
                }
            });
            (Strong::downgrade(value), registration)
        })
    }

    /// Live value for `key`. `None` if absent or already reclaimed.
    pub fn get<Q>(&self, key: &Q) -> Option<Strong<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner.settle();
        let index = self.inner.index.borrow();
        let h = index.find(key)?;
        index.resolve(h).and_then(|e| e.slot.upgrade())
    }

    /// Like `get`, but reports a missing or reclaimed value as an error.
    pub fn fetch<Q>(&self, key: &Q) -> Result<Strong<V>, KeyNotFound>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get(key).ok_or(KeyNotFound)
    }

    /// Live value for `key`, or a freshly built one that is registered under
    /// `key` before being handed back. The caller owns the returned handle;
    /// the entry lives as long as some clone of it does.
    pub fn get_or_insert_with<F>(&mut self, key: K, make: F) -> Strong<V>
    where
        F: FnOnce() -> V,
    {
        if let Some(existing) = self.get(&key) {
            return existing;
        }
        let value = Strong::new(make());
        self.set(key, &value);
        value
    }

    /// True if `key` maps to a live value equal to `value`.
    pub fn contains_pair<Q>(&self, key: &Q, value: &V) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: PartialEq,
    {
        match self.get(key) {
            Some(current) => *current == *value,
            None => false,
        }
    }

    /// Remove `key`. Returns true if it was in the index, alive or not.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove_entry(key).is_some()
    }

    /// Remove `key` and return its value if it was still alive.
    pub fn take<Q>(&mut self, key: &Q) -> Option<Strong<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove_entry(key).and_then(|e| e.slot.upgrade())
    }

    /// Remove `key` only if it maps to a live value equal to `value`.
    pub fn remove_if_eq<Q>(&mut self, key: &Q, value: &V) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: PartialEq,
    {
        self.inner.settle();
        let found = {
            let index = self.inner.index.borrow();
            index
                .find(key)
                .and_then(|h| index.resolve(h).and_then(|e| e.slot.upgrade()).map(|v| (h, v)))
        };
        let Some((handle, current)) = found else {
            return false;
        };
        // User `PartialEq` runs with the index released.
        if *current != *value {
            return false;
        }
        let removed = self.inner.index.borrow_mut().remove(handle);
        match removed {
            Some(entry) => {
                entry.detach();
                true
            }
            None => false,
        }
    }

    fn remove_entry<Q>(&mut self, key: &Q) -> Option<Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner.settle();
        let entry = {
            let mut index = self.inner.index.borrow_mut();
            let h = index.find(key)?;
            index.remove(h)
        }?;
        entry.detach();
        Some(entry)
    }

    pub fn clear(&mut self) {
        let entries = self.inner.index.borrow_mut().drain();
        self.inner.pending.borrow_mut().clear();
        for entry in &entries {
            entry.detach();
        }
    }

    /// Snapshot of the keys in the index, including any whose removal is queued.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.inner.settle();
        self.inner
            .index
            .borrow()
            .entries()
            .map(|e| e.key.clone())
            .collect()
    }

    /// Snapshot of the live values.
    pub fn values(&self) -> Vec<Strong<V>> {
        self.inner.settle();
        self.inner
            .index
            .borrow()
            .entries()
            .filter_map(|e| e.slot.upgrade())
            .collect()
    }

    /// Copy every live `(key, value)` pair into `buf` starting at `offset`.
    /// Nothing is written if they do not all fit. Returns the number copied.
    pub fn copy_to(
        &self,
        buf: &mut [Option<(K, Strong<V>)>],
        offset: usize,
    ) -> Result<usize, CopyError>
    where
        K: Clone,
    {
        let live: Vec<(K, Strong<V>)> = self.iter().collect();
        let available = buf.len().saturating_sub(offset);
        if offset > buf.len() || live.len() > available {
            return Err(CopyError::BufferTooSmall {
                required: live.len(),
                available,
            });
        }
        let copied = live.len();
        for (dst, pair) in buf[offset..].iter_mut().zip(live) {
            *dst = Some(pair);
        }
        Ok(copied)
    }

    /// Iterate over live entries. The set of keys is fixed when the iterator
    /// is created; liveness is checked as each item is produced, so values
    /// dropped mid-iteration are skipped.
    pub fn iter(&self) -> Iter<'_, K, V, S>
    where
        K: Clone,
    {
        self.inner.settle();
        let handles = self.inner.index.borrow().handles();
        Iter {
            inner: &*self.inner,
            handles: handles.into_iter(),
        }
    }

    /// Deliver queued removals and drop every entry whose value is gone.
    /// This is the only place queued removals are applied under
    /// `ReclaimPolicy::Deferred`. Returns the number of entries removed.
    pub fn purge(&mut self) -> usize {
        let delivered = self.inner.drain_pending();
        let mut index = self.inner.index.borrow_mut();
        let dead = index.dead_handles();
        let swept: Vec<Entry<K, V>> = dead.into_iter().filter_map(|h| index.remove(h)).collect();
        drop(index);
        let total = delivered + swept.len();
        log::debug!(
            "purge removed {} entries ({} queued, {} swept)",
            total,
            delivered,
            swept.len()
        );
        total
    }
}

/// Iterator over live `(key, value)` pairs of a `WeakValueMap`.
pub struct Iter<'a, K, V, S> {
    inner: &'a Inner<K, V, S>,
    handles: std::vec::IntoIter<Handle>,
}

impl<'a, K, V, S> Iterator for Iter<'a, K, V, S>
where
    K: Clone,
{
    type Item = (K, Strong<V>);

    fn next(&mut self) -> Option<Self::Item> {
        for h in self.handles.by_ref() {
            let index = self.inner.index.borrow();
            let item = index
                .resolve(h)
                .and_then(|e| e.slot.upgrade().map(|v| (e.key.clone(), v)));
            drop(index);
            if item.is_some() {
                return item;
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.handles.len()))
    }
}

impl<'a, K, V, S> IntoIterator for &'a WeakValueMap<K, V, S>
where
    K: Eq + Hash + Clone + 'static,
    V: 'static,
    S: BuildHasher + 'static,
{
    type Item = (K, Strong<V>);
    type IntoIter = Iter<'a, K, V, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, S> core::fmt::Debug for WeakValueMap<K, V, S>
where
    K: Eq + Hash + Clone + core::fmt::Debug + 'static,
    V: core::fmt::Debug + 'static,
    S: BuildHasher + 'static,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A removal request queued for an entry that has since been replaced
    /// must not evict the replacement.
    #[test]
    fn stale_queued_handle_spares_reused_key() {
        let mut m: WeakValueMap<u32, &'static str> = WeakValueMap::new();
        let old = Strong::new("old");
        m.insert(1, &old).unwrap();
        let stale = m.inner.index.borrow().find(&1).unwrap();

        let new = Strong::new("new");
        assert_eq!(m.set(1, &new).as_deref(), Some(&"old"));
        m.inner.pending.borrow_mut().push(stale);

        assert_eq!(m.purge(), 0);
        assert_eq!(m.get(&1).as_deref(), Some(&"new"));
        drop(old);
    }

    /// While the index is borrowed (here, by a test holding it open), the
    /// reclaim hook queues instead of touching it; the next call applies it.
    #[test]
    fn busy_index_defers_to_next_operation() {
        let mut m: WeakValueMap<u32, u32> = WeakValueMap::new();
        let v = Strong::new(5);
        m.insert(9, &v).unwrap();
        {
            let _busy = m.inner.index.borrow();
            drop(v);
            assert_eq!(m.inner.pending.borrow().len(), 1);
        }
        assert_eq!(m.len(), 0);
        assert!(m.inner.pending.borrow().is_empty());
    }

    #[test]
    fn removal_cancels_notifier_of_live_value() {
        let mut m: WeakValueMap<u32, u32> = WeakValueMap::new();
        let v = Strong::new(1);
        m.insert(1, &v).unwrap();
        m.insert(2, &v).unwrap();
        assert_eq!(Strong::pending_hooks(&v), 2);
        assert!(m.remove(&1));
        assert_eq!(Strong::pending_hooks(&v), 1);
        m.clear();
        assert_eq!(Strong::pending_hooks(&v), 0);
    }

    #[test]
    fn dropping_map_detaches_from_surviving_values() {
        let v = Strong::new(3u8);
        {
            let mut m: WeakValueMap<&'static str, u8> = WeakValueMap::new();
            m.insert("a", &v).unwrap();
            assert_eq!(Strong::pending_hooks(&v), 1);
        }
        assert_eq!(Strong::pending_hooks(&v), 0);
    }
}
