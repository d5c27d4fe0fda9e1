use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::runtime::{self, NodeKey, NodeKind, Rerun};
use crate::scope;

type Cleanup = Box<dyn FnOnce()>;
type RunFn = Box<dyn FnMut() -> Option<Cleanup>>;

/// Eagerly re-run side effect with dynamically tracked dependencies.
///
/// The body runs once at creation, inside a tracking context. Whenever a
/// tracked dependency changes it runs again, once per settled batch, after
/// every write of that batch has applied. [`dispose`](Reaction::dispose)
/// makes it permanently inert.
pub struct Reaction {
    inner: Rc<ReactionInner>,
}

struct ReactionInner {
    key: NodeKey,
    run: RefCell<RunFn>,
    cleanup: RefCell<Option<Cleanup>>,
}

impl Reaction {
    pub fn new(mut run: impl FnMut() + 'static) -> Self {
        Self::build(Box::new(move || {
            run();
            None
        }))
    }

    /// Like [`new`](Reaction::new), but the body returns a cleanup callback
    /// that runs before the next re-run and on disposal.
    pub fn with_cleanup<C: FnOnce() + 'static>(mut run: impl FnMut() -> C + 'static) -> Self {
        Self::build(Box::new(move || Some(Box::new(run()) as Cleanup)))
    }

    fn build(run: RunFn) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ReactionInner>| {
            let runner: Weak<dyn Rerun> = weak.clone();
            ReactionInner {
                key: runtime::new_node(NodeKind::Reaction, Some(runner)),
                run: RefCell::new(run),
                cleanup: RefCell::new(None),
            }
        });
        scope::register_disposer({
            let inner = inner.clone();
            Box::new(move || inner.dispose())
        });
        inner.rerun();
        Self { inner }
    }

    /// Unsubscribes from every dependency and makes the reaction inert,
    /// running any cleanup from the last run. Idempotent; safe to call from
    /// inside the reaction's own body.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        !runtime::contains(self.inner.key)
    }
}

impl Clone for Reaction {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl ReactionInner {
    fn dispose(&self) {
        if !runtime::contains(self.key) {
            return;
        }
        // Release first so a cleanup that writes cells cannot re-schedule us.
        runtime::release(self.key);
        if let Some(c) = self.cleanup.borrow_mut().take() {
            c();
        }
    }
}

impl Rerun for ReactionInner {
    fn rerun(&self) {
        if !runtime::contains(self.key) {
            return;
        }
        if let Some(c) = self.cleanup.borrow_mut().take() {
            c();
        }
        let mut run = self.run.borrow_mut();
        let next_cleanup = runtime::with_tracked(self.key, || (*run)());
        drop(run);
        if let Some(c) = next_cleanup {
            if runtime::contains(self.key) {
                *self.cleanup.borrow_mut() = Some(c);
            } else {
                // Disposed during its own run; the fresh cleanup would
                // otherwise never fire.
                c();
            }
        }
    }
}

impl Drop for ReactionInner {
    fn drop(&mut self) {
        runtime::release(self.key);
        if let Some(c) = self.cleanup.get_mut().take() {
            c();
        }
    }
}
