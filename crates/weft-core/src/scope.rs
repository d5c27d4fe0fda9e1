use std::cell::RefCell;
use std::rc::{Rc, Weak};

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<Weak<ScopeInner>>> = const { RefCell::new(None) };
}

/// Ownership boundary for reactive nodes.
///
/// Derived values and reactions created while a scope is current are
/// registered to it; [`dispose`](Scope::dispose) tears them all down,
/// recursing into nested scopes first. Disposal is idempotent.
pub struct Scope {
    inner: Rc<ScopeInner>,
}

struct ScopeInner {
    disposed: RefCell<bool>,
    disposers: RefCell<Vec<Box<dyn FnOnce()>>>,
    children: RefCell<Vec<Scope>>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                disposed: RefCell::new(false),
                disposers: RefCell::new(Vec::new()),
                children: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Runs `f` with this scope current, restoring the previous one after.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Restore(Option<Weak<ScopeInner>>);
        impl Drop for Restore {
            fn drop(&mut self) {
                let prev = self.0.take();
                CURRENT_SCOPE.with(|current| *current.borrow_mut() = prev);
            }
        }

        let prev = CURRENT_SCOPE.with(|current| {
            current
                .borrow_mut()
                .replace(Rc::downgrade(&self.inner))
        });
        let _restore = Restore(prev);
        f()
    }

    pub fn add_disposer(&self, disposer: impl FnOnce() + 'static) {
        if *self.inner.disposed.borrow() {
            disposer();
            return;
        }
        self.inner.disposers.borrow_mut().push(Box::new(disposer));
    }

    /// Registers `child` so it is disposed together with this scope.
    pub fn adopt(&self, child: Scope) {
        if *self.inner.disposed.borrow() {
            child.dispose();
            return;
        }
        self.inner.children.borrow_mut().push(child);
    }

    /// Disposes every owned node and nested scope. A second call is a no-op.
    pub fn dispose(&self) {
        {
            let mut disposed = self.inner.disposed.borrow_mut();
            if *disposed {
                return;
            }
            *disposed = true;
        }
        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        for child in children {
            child.dispose();
        }
        let disposers = std::mem::take(&mut *self.inner.disposers.borrow_mut());
        for disposer in disposers {
            disposer();
        }
    }

    pub fn is_disposed(&self) -> bool {
        *self.inner.disposed.borrow()
    }
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if *self.disposed.borrow() {
            return;
        }
        let children = std::mem::take(&mut *self.children.borrow_mut());
        drop(children);
        let disposers = std::mem::take(&mut *self.disposers.borrow_mut());
        for disposer in disposers {
            disposer();
        }
    }
}

/// Runs `f` inside a fresh scope and returns its result together with the
/// scope. The new scope is adopted by the enclosing one, if any, so
/// disposing a parent tears down the whole subtree.
pub fn scope<R>(f: impl FnOnce() -> R) -> (R, Scope) {
    let s = Scope::new();
    if let Some(parent) = current_scope() {
        parent.adopt(s.clone());
    }
    let result = s.run(f);
    (result, s)
}

pub fn current_scope() -> Option<Scope> {
    CURRENT_SCOPE.with(|current| {
        current
            .borrow()
            .as_ref()
            .and_then(|weak| weak.upgrade().map(|inner| Scope { inner }))
    })
}

/// Registers `f` to run when the current scope is disposed. Without a
/// current scope the callback is dropped; it has no owner to fire it.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    if let Some(scope) = current_scope() {
        scope.add_disposer(f);
    }
}

/// Registers a node disposer with the current scope, if one is active.
pub(crate) fn register_disposer(disposer: Box<dyn FnOnce()>) {
    if let Some(scope) = current_scope() {
        scope.add_disposer(disposer);
    }
}
