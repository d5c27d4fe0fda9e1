//! Path-keyed lazy cells over aggregate state.
//!
//! A [`Store`] turns "one big struct" into fine-grained reactive state
//! without materializing a cell per field up front: each path gets its
//! [`Cell`] the first time it is read or written, seeded by the `init`
//! closure at that call site. Writes to one path notify only that path's
//! dependents. Nested aggregates hang off [`child`](Store::child) stores,
//! again created only when actually accessed.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::cell::Cell;

pub struct Store {
    inner: Rc<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    slots: RefCell<HashMap<String, Box<dyn Any>>>,
}

enum Lookup<T> {
    Hit(T),
    Mismatch,
    Missing,
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StoreInner::default()),
        }
    }

    fn lookup<V: Clone + 'static>(&self, path: &str) -> Lookup<V> {
        let slots = self.inner.slots.borrow();
        match slots.get(path) {
            Some(slot) => match slot.downcast_ref::<V>() {
                Some(v) => Lookup::Hit(v.clone()),
                None => Lookup::Mismatch,
            },
            None => Lookup::Missing,
        }
    }

    fn insert<V: 'static>(&self, path: &str, value: V) {
        self.inner
            .slots
            .borrow_mut()
            .insert(path.to_string(), Box::new(value));
    }

    /// The cell for `path`, created from `init` on first access.
    pub fn cell<V: Clone + 'static>(&self, path: &str, init: impl FnOnce() -> V) -> Cell<V> {
        match self.lookup::<Cell<V>>(path) {
            Lookup::Hit(c) => return c,
            Lookup::Mismatch => {
                log::warn!("store: path '{path}' reused with a different type; replacing.");
            }
            Lookup::Missing => {}
        }
        let c = Cell::new(init());
        self.insert(path, c.clone());
        c
    }

    /// Tracked read of `path`, creating the cell from `init` when absent.
    pub fn get<V: Clone + 'static>(&self, path: &str, init: impl FnOnce() -> V) -> V {
        self.cell(path, init).get()
    }

    /// Writes `path`. An absent path is created holding `value` without a
    /// notification; nothing can have observed it yet.
    pub fn set<V: Clone + 'static>(&self, path: &str, value: V) {
        match self.lookup::<Cell<V>>(path) {
            Lookup::Hit(c) => c.set(value),
            Lookup::Mismatch => {
                log::warn!("store: path '{path}' reused with a different type; replacing.");
                self.insert(path, Cell::new(value));
            }
            Lookup::Missing => self.insert(path, Cell::new(value)),
        }
    }

    /// A nested store under `path`, created lazily.
    pub fn child(&self, path: &str) -> Store {
        match self.lookup::<Store>(path) {
            Lookup::Hit(s) => return s,
            Lookup::Mismatch => {
                log::warn!("store: path '{path}' reused with a different type; replacing.");
            }
            Lookup::Missing => {}
        }
        let s = Store::new();
        self.insert(path, s.clone());
        s
    }

    /// Number of paths materialized so far.
    pub fn len(&self) -> usize {
        self.inner.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.borrow().is_empty()
    }
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

pub fn store() -> Store {
    Store::new()
}
