//! One-shot reclamation hooks attached to a value's allocation.
//!
//! Every `Strong<V>` allocation carries a `Hooks` table. Maps register a hook
//! per entry and get back a `Registration` token they can later use to
//! cancel it. When the last strong owner goes away, `fire_all` takes the
//! whole table out and runs each hook exactly once.

use core::cell::RefCell;
use slotmap::{DefaultKey, SlotMap};
use std::panic::{catch_unwind, AssertUnwindSafe};

pub(crate) type Hook = Box<dyn FnOnce()>;

/// Token for one registered hook. Only meaningful for the table that minted it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Registration(DefaultKey);

#[derive(Default)]
pub(crate) struct Hooks {
    table: RefCell<SlotMap<DefaultKey, Hook>>,
}

impl Hooks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register<F>(&self, hook: F) -> Registration
    where
        F: FnOnce() + 'static,
    {
        Registration(self.table.borrow_mut().insert(Box::new(hook)))
    }

    /// Drop an unfired hook. Returns false if it already fired or was cancelled.
    pub(crate) fn cancel(&self, registration: Registration) -> bool {
        self.table.borrow_mut().remove(registration.0).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.table.borrow().len()
    }

    /// Run every pending hook once. A panicking hook is logged and swallowed;
    /// the remaining hooks still run.
    pub(crate) fn fire_all(&self) {
        let table = core::mem::take(&mut *self.table.borrow_mut());
        for (_, hook) in table {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(hook)) {
                let msg = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("<non-string panic payload>");
                log::warn!("reclamation hook panicked, ignoring: {}", msg);
            }
        }
    }
}

impl core::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hooks").field("pending", &self.len()).finish()
    }
}
