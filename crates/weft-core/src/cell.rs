use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::{self, NodeKey, NodeKind};

/// Mutable reactive storage. Cloning the handle shares the value.
///
/// Reads made through [`get`](Cell::get) inside a tracked evaluation (a
/// derived value or a reaction) register a dependency edge; [`peek`](Cell::peek)
/// is the untracked escape hatch. Writes notify dependents, deferred to the
/// end of the enclosing [`batch`](crate::batch) when one is open.
pub struct Cell<T: 'static> {
    inner: Rc<CellInner<T>>,
}

struct CellInner<T> {
    key: NodeKey,
    value: RefCell<T>,
}

impl<T: 'static> Cell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(CellInner {
                key: runtime::new_node(NodeKind::Cell, None),
                value: RefCell::new(value),
            }),
        }
    }

    /// Current value; registers a dependency edge when a tracked evaluation
    /// is active.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        runtime::register_read(self.inner.key);
        self.inner.value.borrow().clone()
    }

    /// Current value without registering any dependency edge.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Borrows the value for `f` without cloning it. Tracked like `get`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        runtime::register_read(self.inner.key);
        f(&self.inner.value.borrow())
    }

    /// Stores `value` and notifies dependents. Outside a batch this settles
    /// immediately, equivalent to a one-write transaction.
    pub fn set(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
        runtime::notify_write(self.inner.key);
    }

    /// Like `set`, but skips notification when the new value compares equal
    /// to the current one.
    pub fn set_if_changed(&self, value: T)
    where
        T: PartialEq,
    {
        if *self.inner.value.borrow() == value {
            return;
        }
        self.set(value);
    }

    /// Mutates the value in place, then notifies dependents.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.borrow_mut());
        runtime::notify_write(self.inner.key);
    }

    /// Number of notifying writes this cell has seen.
    pub fn version(&self) -> u64 {
        runtime::epoch(self.inner.key)
    }

    pub(crate) fn key(&self) -> NodeKey {
        self.inner.key
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        runtime::release(self.key);
    }
}

pub fn cell<T: 'static>(value: T) -> Cell<T> {
    Cell::new(value)
}
