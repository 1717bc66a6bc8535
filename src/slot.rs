//! Owning `Strong` handles and the non-owning `WeakSlot` the map stores.

use crate::notifier::{Hooks, Registration};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::ops::Deref;
use std::rc::{Rc, Weak};

// Allocation shared by all `Strong`s of one value. The hook table lives next
// to the value so its identity is the allocation itself.
struct Tracked<V> {
    hooks: Hooks,
    value: V,
}

impl<V> Drop for Tracked<V> {
    fn drop(&mut self) {
        // Strong count is already zero here: every slot upgrade fails before
        // any hook observes the map, and `value` is dropped after the hooks.
        self.hooks.fire_all();
    }
}

/// Shared owning handle to a value that can be stored in a `WeakValueMap`.
///
/// Behaves like `Rc<V>`: cloning is cheap and the value is dropped together
/// with the last `Strong`. Equality, hashing and `Debug` delegate
/// to `V`; use `Strong::ptr_eq` for identity.
pub struct Strong<V> {
    rc: Rc<Tracked<V>>,
}

impl<V> Strong<V> {
    pub fn new(value: V) -> Self {
        Self {
            rc: Rc::new(Tracked {
                hooks: Hooks::new(),
                value,
            }),
        }
    }

    pub fn downgrade(this: &Self) -> WeakSlot<V> {
        WeakSlot {
            weak: Rc::downgrade(&this.rc),
        }
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.rc, &other.rc)
    }

    pub fn strong_count(this: &Self) -> usize {
        Rc::strong_count(&this.rc)
    }

    pub(crate) fn register<F>(this: &Self, hook: F) -> Registration
    where
        F: FnOnce() + 'static,
    {
        this.rc.hooks.register(hook)
    }

    #[cfg(test)]
    pub(crate) fn pending_hooks(this: &Self) -> usize {
        this.rc.hooks.len()
    }
}

impl<V> Clone for Strong<V> {
    fn clone(&self) -> Self {
        Self {
            rc: self.rc.clone(),
        }
    }
}

impl<V> Deref for Strong<V> {
    type Target = V;
    fn deref(&self) -> &V {
        &self.rc.value
    }
}

impl<V> AsRef<V> for Strong<V> {
    fn as_ref(&self) -> &V {
        &self.rc.value
    }
}

impl<V> Borrow<V> for Strong<V> {
    fn borrow(&self) -> &V {
        &self.rc.value
    }
}

impl<V> From<V> for Strong<V> {
    fn from(value: V) -> Self {
        Self::new(value)
    }
}

impl<V: PartialEq> PartialEq for Strong<V> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<V: Eq> Eq for Strong<V> {}

impl<V: Hash> Hash for Strong<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state)
    }
}

impl<V: fmt::Debug> fmt::Debug for Strong<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<V: fmt::Display> fmt::Display for Strong<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

/// Non-owning handle to a `Strong` value. Never keeps the value alive.
///
/// Once the last `Strong` is dropped the slot is dead for good; there is no
/// way back.
pub struct WeakSlot<V> {
    weak: Weak<Tracked<V>>,
}

impl<V> WeakSlot<V> {
    pub fn new(value: &Strong<V>) -> Self {
        Strong::downgrade(value)
    }

    /// Temporary strong access if the value is still alive.
    pub fn upgrade(&self) -> Option<Strong<V>> {
        self.weak.upgrade().map(|rc| Strong { rc })
    }

    pub fn is_alive(&self) -> bool {
        self.weak.strong_count() > 0
    }

    /// Same allocation as `value`. Holds for dead slots too.
    pub fn points_to(&self, value: &Strong<V>) -> bool {
        core::ptr::eq(self.weak.as_ptr(), Rc::as_ptr(&value.rc))
    }

    pub(crate) fn cancel(&self, registration: Registration) -> bool {
        match self.weak.upgrade() {
            Some(rc) => rc.hooks.cancel(registration),
            None => false,
        }
    }
}

impl<V> Clone for WeakSlot<V> {
    fn clone(&self) -> Self {
        Self {
            weak: self.weak.clone(),
        }
    }
}

impl<V> fmt::Debug for WeakSlot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_alive() {
            f.write_str("WeakSlot(alive)")
        } else {
            f.write_str("WeakSlot(dead)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashSet;

    #[test]
    fn slot_does_not_extend_lifetime() {
        let s = Strong::new(String::from("v"));
        let slot = WeakSlot::new(&s);
        assert!(slot.is_alive());
        assert_eq!(slot.upgrade().as_deref().map(String::as_str), Some("v"));
        assert_eq!(Strong::strong_count(&s), 1);

        drop(s);
        assert!(!slot.is_alive());
        assert!(slot.upgrade().is_none());
        // Dead is terminal.
        assert!(slot.upgrade().is_none());
    }

    #[test]
    fn slot_keeps_clones_alive_until_last_owner() {
        let a = Strong::new(7u32);
        let b = a.clone();
        let slot = Strong::downgrade(&a);
        drop(a);
        assert!(slot.is_alive());
        assert!(slot.points_to(&b));
        drop(b);
        assert!(!slot.is_alive());
    }

    #[test]
    fn hooks_fire_once_when_last_owner_drops() {
        let fired = Rc::new(Cell::new(0));
        let a = Strong::new(1u8);
        let slot = Strong::downgrade(&a);
        let f = fired.clone();
        let s2 = slot.clone();
        Strong::register(&a, move || {
            // The value is already unreachable when the hook runs.
            assert!(!s2.is_alive());
            f.set(f.get() + 1);
        });
        let b = a.clone();
        drop(a);
        assert_eq!(fired.get(), 0);
        drop(b);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn cancel_through_slot() {
        let fired = Rc::new(Cell::new(false));
        let a = Strong::new(());
        let f = fired.clone();
        let reg = Strong::register(&a, move || f.set(true));
        let slot = Strong::downgrade(&a);
        assert_eq!(Strong::pending_hooks(&a), 1);
        assert!(slot.cancel(reg));
        assert_eq!(Strong::pending_hooks(&a), 0);
        drop(a);
        assert!(!fired.get());
        assert!(!slot.cancel(reg));
    }

    #[test]
    fn equality_is_by_value_not_identity() {
        let a = Strong::new("x".to_string());
        let b = Strong::new("x".to_string());
        assert_eq!(a, b);
        assert!(!Strong::ptr_eq(&a, &b));
        assert!(!Strong::downgrade(&a).points_to(&b));
    }

    /// `Borrow<V>` lets hashed collections of `Strong<V>` be queried with a
    /// plain `V`, which needs `Hash`/`Eq` to agree with `V`'s.
    #[test]
    fn borrow_agrees_with_hash_and_eq() {
        let mut set: HashSet<Strong<String>> = HashSet::new();
        set.insert(Strong::from("a".to_string()));
        set.insert(Strong::new("b".to_string()));
        assert!(set.contains(&"a".to_string()));
        assert!(set.contains(&"b".to_string()));
        assert!(!set.contains(&"c".to_string()));
        // An equal but distinct instance is the same set element.
        assert!(!set.insert(Strong::new("a".to_string())));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn as_ref_and_display_delegate() {
        let s = Strong::from(42u32);
        assert_eq!(*s.as_ref(), 42);
        assert_eq!(s.to_string(), "42");
        assert_eq!(format!("{:?}", s), "42");
    }
}
