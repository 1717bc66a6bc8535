//! weak-value-map: a single-threaded hash map whose values are held weakly
//! and whose entries vanish once the value is dropped elsewhere.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a registry that never keeps its values alive. Owners hold
//!   `Strong<V>` handles; the map holds `WeakSlot<V>`s and removes a key as
//!   soon as the last `Strong` for its value goes away.
//! - Layers:
//!   - `slot`: `Strong<V>` (an `Rc` around the value and its hook table) and
//!     `WeakSlot<V>` (an `rc::Weak` that can upgrade for a read).
//!   - `notifier`: per-value table of one-shot reclamation hooks, fired from
//!     the value's drop before the value itself is dropped.
//!   - `index::PrimaryIndex<K, V, S>`: owns the keys; `hashbrown::HashTable`
//!     over `slotmap` storage so every entry has a generational `Handle`.
//!   - `WeakValueMap<K, V, S>`: public API tying the three together.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` through `Rc`.
//! - Keys are strong, values are weak. No weak keys.
//! - Duplicate inserts fail; `set` replaces.
//!
//! Reclamation
//! - Each entry registers one hook on its value capturing a `Weak` to the
//!   map and the entry's `Handle`. The hook removes by handle, never by key:
//!   a handle whose entry was removed resolves to nothing, so a late
//!   notification cannot evict a newer entry for the same key.
//! - Hooks never mutate the index while it is borrowed. If it is (a value
//!   dropped from inside user `Eq`/`Hash`/`Drop` code running under a map
//!   operation), or if the map uses `ReclaimPolicy::Deferred`, the handle is
//!   queued and applied later.
//! - A panicking hook is logged through `log` and swallowed. It never
//!   unwinds into the code that dropped the value.
//! - Explicit `remove`/`set`/`clear` and dropping the map cancel the hooks
//!   of values that are still alive.
//!
//! Staleness
//! - With `ReclaimPolicy::Eager` a key leaves the map when its value drops,
//!   or at the start of the next map call if the map was busy. With
//!   `Deferred` it stays in `len`/`keys`/`contains_key` until `purge`.
//! - Reads that yield values always check liveness first, so a reclaimed
//!   value is never observable through the map.
//!
//! Notes and non-goals
//! - No persistence, no eviction policy other than reclamation.
//! - Keys are immutable post-insert.

mod error;
mod index;
mod notifier;
mod policy;
mod slot;
mod weak_value_map;

// Public surface
pub use error::{CopyError, InsertError, KeyNotFound};
pub use policy::ReclaimPolicy;
pub use slot::{Strong, WeakSlot};
pub use weak_value_map::{Iter, WeakValueMap};
