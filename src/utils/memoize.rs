//! Per-instance memoization of derived quantities.
//!
//! An operator is immutable from the caller's point of view, so quantities derived
//! from it (a dense materialization, a root decomposition) never go stale. [`Memo`]
//! stores them under an operation key the first time they are requested and hands out
//! shared references afterwards.
//!
//! The cache uses a `RefCell` and is therefore neither `Send` nor `Sync`: population
//! follows a single-writer discipline on the owning thread.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::Rc,
};

/// Hit and miss counters of a [`Memo`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStats {
    pub hits: usize,
    pub misses: usize,
}

/// An owned mapping from operation key to a previously computed result.
#[derive(Default)]
pub struct Memo {
    entries: RefCell<HashMap<String, Rc<dyn Any>>>,
    hits: Cell<usize>,
    misses: Cell<usize>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a key from an operation name and a fingerprint of its arguments.
    pub fn key(name: &str, args: &impl fmt::Debug) -> String {
        format!("{name}{args:?}")
    }

    /// Returns the value cached under `key`, computing and storing it with `init` on
    /// the first request.
    ///
    /// The borrow on the map is released while `init` runs, so `init` may itself
    /// consult this cache.
    pub fn get_or_try_insert<T, E, F>(&self, key: &str, init: F) -> Result<Rc<T>, E>
    where
        T: Any,
        F: FnOnce() -> Result<T, E>,
    {
        let cached = self.entries.borrow().get(key).cloned();
        if let Some(entry) = cached {
            if let Ok(value) = entry.downcast::<T>() {
                self.hits.set(self.hits.get() + 1);
                log::trace!("memo hit for `{key}`");
                return Ok(value);
            }
        }

        self.misses.set(self.misses.get() + 1);
        log::trace!("memo miss for `{key}`");
        let value = Rc::new(init()?);
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.clone() as Rc<dyn Any>);
        Ok(value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MemoStats {
        MemoStats {
            hits: self.hits.get(),
            misses: self.misses.get(),
        }
    }
}

impl Clone for Memo {
    // Cached values are immutable, so a clone may share them.
    fn clone(&self) -> Self {
        Self {
            entries: RefCell::new(self.entries.borrow().clone()),
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }
}

impl fmt::Debug for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.entries.borrow().keys().cloned().collect();
        keys.sort();
        f.debug_struct("Memo")
            .field("keys", &keys)
            .field("stats", &self.stats())
            .finish()
    }
}
