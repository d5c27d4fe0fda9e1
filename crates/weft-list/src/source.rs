use weft_core::{Cell, Derived};

/// Anything the reconciler can observe as an ordered sequence.
///
/// `read` runs inside the reconciler's tracked evaluation, so sources
/// backed by reactive state re-trigger reconciliation on change. A plain
/// `Vec` is a one-shot literal; wrap a closure with [`pull`] when the
/// sequence is assembled from other reactive reads.
pub trait ListSource<T> {
    fn read(&self) -> Vec<T>;
}

impl<T: Clone + 'static> ListSource<T> for Vec<T> {
    fn read(&self) -> Vec<T> {
        self.clone()
    }
}

impl<T: Clone + 'static> ListSource<T> for Cell<Vec<T>> {
    fn read(&self) -> Vec<T> {
        self.get()
    }
}

impl<T: Clone + 'static> ListSource<T> for Derived<Vec<T>> {
    fn read(&self) -> Vec<T> {
        self.get()
    }
}

/// A pull-function source; see [`pull`].
pub struct Pull<F>(F);

/// Wraps a zero-argument closure as a [`ListSource`]. The closure may read
/// any reactive state; those reads are tracked like any other.
pub fn pull<T, F: Fn() -> Vec<T>>(f: F) -> Pull<F> {
    Pull(f)
}

impl<T, F: Fn() -> Vec<T>> ListSource<T> for Pull<F> {
    fn read(&self) -> Vec<T> {
        (self.0)()
    }
}
