use std::cell::RefCell;
use std::rc::Rc;

use crate::error::CycleError;
use crate::runtime::{self, NodeFlags, NodeKey, NodeKind};
use crate::scope;

/// Lazily evaluated, memoized value with dynamically tracked dependencies.
///
/// The evaluation function does not run at creation. The first read runs it
/// inside a tracking context; later reads return the cached value until a
/// dependency write marks this node dirty, and the next read recomputes.
/// A dirty-but-unread value is allowed to be stale; only a read pays for
/// recomputation.
pub struct Derived<T: 'static> {
    inner: Rc<DerivedInner<T>>,
}

struct DerivedInner<T> {
    key: NodeKey,
    compute: Box<dyn Fn() -> T>,
    cached: RefCell<Option<T>>,
}

impl<T: Clone + 'static> Derived<T> {
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        let inner = Rc::new(DerivedInner {
            key: runtime::new_node(NodeKind::Derived, None),
            compute: Box::new(compute),
            cached: RefCell::new(None),
        });
        scope::register_disposer({
            let inner = inner.clone();
            Box::new(move || runtime::release(inner.key))
        });
        Self { inner }
    }

    /// Current value, recomputing first when dirty or never evaluated.
    /// Registers a dependency edge when a tracked evaluation is active.
    ///
    /// Panics on a cyclic evaluation; use [`try_get`](Derived::try_get) to
    /// handle that case as a value.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(v) => v,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible form of [`get`](Derived::get).
    pub fn try_get(&self) -> Result<T, CycleError> {
        runtime::register_read(self.inner.key);
        self.read()
    }

    /// Current value without registering a dependency edge for the caller.
    /// Still recomputes when dirty, tracking this node's own dependencies.
    pub fn peek(&self) -> T {
        match self.read() {
            Ok(v) => v,
            Err(err) => panic!("{err}"),
        }
    }

    fn read(&self) -> Result<T, CycleError> {
        let Some(flags) = runtime::flags(self.inner.key) else {
            // Disposed: the last cached value, forever. A node disposed
            // before its first read evaluates untracked instead.
            if let Some(v) = self.inner.cached.borrow().as_ref() {
                return Ok(v.clone());
            }
            return Ok(runtime::untracked(|| (self.inner.compute)()));
        };
        if flags.contains(NodeFlags::RUNNING) {
            return Err(CycleError);
        }
        if !flags.contains(NodeFlags::DIRTY)
            && let Some(v) = self.inner.cached.borrow().as_ref()
        {
            return Ok(v.clone());
        }
        let v = runtime::with_tracked(self.inner.key, || (self.inner.compute)());
        *self.inner.cached.borrow_mut() = Some(v.clone());
        runtime::mark_clean(self.inner.key);
        Ok(v)
    }

    /// Makes this node permanently inert: dependency notifications are
    /// ignored and reads return the last cached value. Idempotent.
    pub fn dispose(&self) {
        runtime::release(self.inner.key);
    }

    pub fn is_disposed(&self) -> bool {
        !runtime::contains(self.inner.key)
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for DerivedInner<T> {
    fn drop(&mut self) {
        runtime::release(self.key);
    }
}

pub fn derived<T: Clone + 'static>(compute: impl Fn() -> T + 'static) -> Derived<T> {
    Derived::new(compute)
}
