use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

use smallvec::SmallVec;
use weft_core::{Cell, Reaction, Scope, on_cleanup, untracked};

use crate::diff::longest_increasing;
use crate::source::ListSource;

/// Output units produced by one entry's render call. Most entries render a
/// single unit; `From` also accepts a `Vec` for entries that span several.
pub struct Units<U>(pub(crate) SmallVec<[Rc<U>; 1]>);

impl<U> From<U> for Units<U> {
    fn from(unit: U) -> Self {
        Units(smallvec::smallvec![Rc::new(unit)])
    }
}

impl<U> From<Vec<U>> for Units<U> {
    fn from(units: Vec<U>) -> Self {
        Units(units.into_iter().map(Rc::new).collect())
    }
}

/// One structural operation against the physical output. Operations apply
/// in the order they were emitted; every `before` anchor names a unit that
/// earlier operations (or reuse-in-place) have already positioned, with
/// `None` meaning the end of the region. Anchors are relative, so a batch
/// of operations replays correctly even if the surrounding region was
/// detached in the meantime.
pub enum ListOp<U> {
    /// Place freshly rendered units immediately before `before`.
    Insert {
        units: SmallVec<[Rc<U>; 1]>,
        before: Option<Rc<U>>,
    },
    /// Move surviving units, as a block, immediately before `before`.
    Relocate {
        units: SmallVec<[Rc<U>; 1]>,
        before: Option<Rc<U>>,
    },
    /// Take these units out of the output.
    Remove { units: SmallVec<[Rc<U>; 1]> },
}

/// Per-entry handle passed to the tracked-item render callback: a narrow
/// window onto the item at this key, updated in place as the source
/// changes. `get` subscribes, `peek` does not.
pub struct ItemCell<T: 'static> {
    cell: Cell<T>,
}

impl<T: Clone + 'static> ItemCell<T> {
    pub fn get(&self) -> T {
        self.cell.get()
    }

    pub fn peek(&self) -> T {
        self.cell.peek()
    }
}

impl<T> Clone for ItemCell<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

enum Render<T: 'static, U> {
    Plain {
        render: Box<dyn Fn(&T) -> Units<U>>,
        same: Box<dyn Fn(&T, &T) -> bool>,
    },
    Tracked(Box<dyn Fn(ItemCell<T>) -> Units<U>>),
}

enum ItemSlot<T: 'static> {
    Plain(T),
    Tracked(Cell<T>),
}

struct Entry<T: 'static, U> {
    units: SmallVec<[Rc<U>; 1]>,
    scope: Scope,
    item: ItemSlot<T>,
    /// Position in the output as of the last settled update.
    pos: usize,
}

type EntryRef<T, U> = Rc<RefCell<Entry<T, U>>>;

struct ListState<K, T: 'static, U> {
    entries: HashMap<K, EntryRef<T, U>>,
    order: Vec<EntryRef<T, U>>,
    ops: Vec<ListOp<U>>,
    disposed: bool,
}

struct ListInner<T: 'static, K, U> {
    key_fn: Box<dyn Fn(&T, usize) -> K>,
    render: Render<T, U>,
    state: RefCell<ListState<K, T, U>>,
}

impl<T, K, U> ListInner<T, K, U>
where
    T: Clone + 'static,
    K: Eq + Hash + Clone + Debug + 'static,
    U: 'static,
{
    fn render_entry(&self, item: T) -> EntryRef<T, U> {
        let scope = Scope::new();
        let (units, slot) = match &self.render {
            Render::Plain { render, .. } => {
                let units = scope.run(|| untracked(|| render(&item)));
                (units.0, ItemSlot::Plain(item))
            }
            Render::Tracked(render) => {
                let item_cell = Cell::new(item);
                let handle = ItemCell {
                    cell: item_cell.clone(),
                };
                let units = scope.run(|| untracked(|| render(handle)));
                (units.0, ItemSlot::Tracked(item_cell))
            }
        };
        Rc::new(RefCell::new(Entry {
            units,
            scope,
            item: slot,
            pos: 0,
        }))
    }

    /// One reconciliation pass against a fresh snapshot of the source.
    fn update(&self, items: Vec<T>) {
        if self.state.borrow().disposed {
            return;
        }

        // New key sequence; on duplicates the first occurrence wins.
        let mut keyed: Vec<(K, T)> = Vec::with_capacity(items.len());
        let mut seen: HashSet<K> = HashSet::with_capacity(items.len());
        let mut duplicates = 0usize;
        let mut first_dup: Option<K> = None;
        for (i, item) in items.into_iter().enumerate() {
            let key = (self.key_fn)(&item, i);
            if !seen.insert(key.clone()) {
                duplicates += 1;
                if first_dup.is_none() {
                    first_dup = Some(key);
                }
                continue;
            }
            keyed.push((key, item));
        }
        if let Some(key) = first_dup {
            log::warn!(
                "keyed list: dropped {duplicates} item(s) with duplicate keys \
                 (first: {key:?}); keeping the first occurrence of each"
            );
        }

        let mut old_entries = {
            let mut st = self.state.borrow_mut();
            std::mem::take(&mut st.entries)
        };

        // Partition against the previous entries.
        enum Plan<T: 'static, K, U> {
            Carry {
                key: K,
                entry: EntryRef<T, U>,
                prev_pos: usize,
            },
            Fresh {
                key: K,
                item: T,
            },
        }

        let mut plan: Vec<Plan<T, K, U>> = Vec::with_capacity(keyed.len());
        let mut to_dispose: Vec<EntryRef<T, U>> = Vec::new();
        let mut tracked_writes: Vec<(Cell<T>, T)> = Vec::new();
        for (key, item) in keyed {
            let Some(entry) = old_entries.remove(&key) else {
                plan.push(Plan::Fresh { key, item });
                continue;
            };
            enum What<T: 'static> {
                Keep,
                KeepWrite(Cell<T>),
                Replace,
            }
            let (what, prev_pos) = {
                let e = entry.borrow();
                let what = match (&self.render, &e.item) {
                    (Render::Tracked(_), ItemSlot::Tracked(cell)) => What::KeepWrite(cell.clone()),
                    (Render::Plain { same, .. }, ItemSlot::Plain(old)) => {
                        if same(old, &item) {
                            What::Keep
                        } else {
                            What::Replace
                        }
                    }
                    _ => What::Replace,
                };
                (what, e.pos)
            };
            match what {
                What::Keep => plan.push(Plan::Carry {
                    key,
                    entry,
                    prev_pos,
                }),
                What::KeepWrite(cell) => {
                    tracked_writes.push((cell, item));
                    plan.push(Plan::Carry {
                        key,
                        entry,
                        prev_pos,
                    });
                }
                What::Replace => {
                    to_dispose.push(entry);
                    plan.push(Plan::Fresh { key, item });
                }
            }
        }
        // Whatever is left vanished from the source.
        to_dispose.extend(old_entries.drain().map(|(_, e)| e));

        // Tear down dropped entries before anything new renders.
        let mut ops: Vec<ListOp<U>> = Vec::new();
        for entry in &to_dispose {
            let (units, scope) = {
                let e = entry.borrow();
                (e.units.clone(), e.scope.clone())
            };
            scope.dispose();
            if !units.is_empty() {
                ops.push(ListOp::Remove { units });
            }
        }

        // Surviving tracked items update through their cell, no re-render.
        for (cell, item) in tracked_writes {
            cell.set(item);
        }

        // Build the new order, rendering fresh entries as they appear.
        let mut entries = HashMap::with_capacity(plan.len());
        let mut new_order: Vec<EntryRef<T, U>> = Vec::with_capacity(plan.len());
        let mut prev_positions: Vec<Option<usize>> = Vec::with_capacity(plan.len());
        for p in plan {
            match p {
                Plan::Carry {
                    key,
                    entry,
                    prev_pos,
                } => {
                    entries.insert(key, entry.clone());
                    new_order.push(entry);
                    prev_positions.push(Some(prev_pos));
                }
                Plan::Fresh { key, item } => {
                    let entry = self.render_entry(item);
                    entries.insert(key, entry.clone());
                    new_order.push(entry);
                    prev_positions.push(None);
                }
            }
        }

        // Entries on a longest increasing run of previous positions are
        // already ordered relative to one another and stay put; everything
        // else settles immediately before its nearest settled right-hand
        // neighbor, walking back to front.
        let carried: Vec<(usize, usize)> = prev_positions
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|p| (i, p)))
            .collect();
        let prev_seq: Vec<usize> = carried.iter().map(|&(_, p)| p).collect();
        let mut in_place = vec![false; new_order.len()];
        for j in longest_increasing(&prev_seq) {
            in_place[carried[j].0] = true;
        }

        let mut anchor: Option<Rc<U>> = None;
        for i in (0..new_order.len()).rev() {
            let units = new_order[i].borrow().units.clone();
            if in_place[i] {
                if let Some(first) = units.first() {
                    anchor = Some(first.clone());
                }
                continue;
            }
            if units.is_empty() {
                continue;
            }
            let first = units[0].clone();
            let op = if prev_positions[i].is_some() {
                ListOp::Relocate {
                    units,
                    before: anchor.clone(),
                }
            } else {
                ListOp::Insert {
                    units,
                    before: anchor.clone(),
                }
            };
            ops.push(op);
            anchor = Some(first);
        }

        for (i, entry) in new_order.iter().enumerate() {
            entry.borrow_mut().pos = i;
        }

        let mut st = self.state.borrow_mut();
        if st.disposed {
            // Disposed out from under us by a callback; tear down what this
            // pass built instead of publishing it.
            drop(st);
            for entry in new_order {
                let scope = entry.borrow().scope.clone();
                scope.dispose();
            }
            return;
        }
        st.entries = entries;
        st.order = new_order;
        st.ops.extend(ops);
    }
}

pub(crate) trait ListCore<U> {
    fn units(&self) -> Vec<Rc<U>>;
    fn take_ops(&self) -> Vec<ListOp<U>>;
    fn len(&self) -> usize;
    fn dispose(&self);
    fn is_disposed(&self) -> bool;
}

impl<T, K, U> ListCore<U> for ListInner<T, K, U>
where
    T: Clone + 'static,
    K: Eq + Hash + Clone + Debug + 'static,
    U: 'static,
{
    fn units(&self) -> Vec<Rc<U>> {
        let st = self.state.borrow();
        st.order
            .iter()
            .flat_map(|e| e.borrow().units.clone())
            .collect()
    }

    fn take_ops(&self) -> Vec<ListOp<U>> {
        std::mem::take(&mut self.state.borrow_mut().ops)
    }

    fn len(&self) -> usize {
        self.state.borrow().order.len()
    }

    fn dispose(&self) {
        let order = {
            let mut st = self.state.borrow_mut();
            if st.disposed {
                return;
            }
            st.disposed = true;
            st.entries.clear();
            st.ops.clear();
            std::mem::take(&mut st.order)
        };
        for entry in order {
            let scope = entry.borrow().scope.clone();
            scope.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.state.borrow().disposed
    }
}

/// Live keyed view over a reactive sequence.
///
/// Holds the reaction that re-runs reconciliation when the source changes.
/// [`units`](KeyedList::units) is the current output in order;
/// [`take_ops`](KeyedList::take_ops) drains the structural operations a
/// mirroring renderer should apply to its own tree.
pub struct KeyedList<U: 'static> {
    core: Rc<dyn ListCore<U>>,
    reaction: Reaction,
}

impl<U: 'static> KeyedList<U> {
    pub fn units(&self) -> Vec<Rc<U>> {
        self.core.units()
    }

    pub fn take_ops(&self) -> Vec<ListOp<U>> {
        self.core.take_ops()
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.len() == 0
    }

    /// Stops observing the source and disposes every live entry.
    /// Idempotent.
    pub fn dispose(&self) {
        self.reaction.dispose();
        self.core.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }
}

fn build<S, T, K, U>(source: S, inner: Rc<ListInner<T, K, U>>) -> KeyedList<U>
where
    S: ListSource<T> + 'static,
    T: Clone + 'static,
    K: Eq + Hash + Clone + Debug + 'static,
    U: 'static,
{
    let reaction = Reaction::new({
        let inner = inner.clone();
        move || {
            let items = source.read();
            inner.update(items);
        }
    });
    // Tear down with the scope that created the list, if any.
    on_cleanup({
        let inner = inner.clone();
        move || ListCore::dispose(&*inner)
    });
    KeyedList {
        core: inner,
        reaction,
    }
}

/// Keyed reconciliation in untracked-item mode: `render` sees the bare
/// item. A surviving key whose item changed is torn down and re-rendered;
/// use [`each_tracked`] to route item changes through a cell instead.
///
/// Keys may be computed from the item alone or item plus index (positional
/// fallback). The key map uses `Eq + Hash`; float keys need a wrapper that
/// provides both.
pub fn each<S, T, K, U, R>(
    source: S,
    key_fn: impl Fn(&T, usize) -> K + 'static,
    render: impl Fn(&T) -> R + 'static,
) -> KeyedList<U>
where
    S: ListSource<T> + 'static,
    T: Clone + PartialEq + 'static,
    K: Eq + Hash + Clone + Debug + 'static,
    U: 'static,
    R: Into<Units<U>>,
{
    let inner = Rc::new(ListInner {
        key_fn: Box::new(key_fn),
        render: Render::Plain {
            render: Box::new(move |item| render(item).into()),
            same: Box::new(|a: &T, b: &T| a == b),
        },
        state: RefCell::new(ListState {
            entries: HashMap::new(),
            order: Vec::new(),
            ops: Vec::new(),
            disposed: false,
        }),
    });
    build(source, inner)
}

/// Keyed reconciliation in tracked-item mode: `render` receives an
/// [`ItemCell`] and runs once per key; while the key survives, item
/// changes are written into the cell in place and only the entry's own
/// dependents re-run.
pub fn each_tracked<S, T, K, U, R>(
    source: S,
    key_fn: impl Fn(&T, usize) -> K + 'static,
    render: impl Fn(ItemCell<T>) -> R + 'static,
) -> KeyedList<U>
where
    S: ListSource<T> + 'static,
    T: Clone + 'static,
    K: Eq + Hash + Clone + Debug + 'static,
    U: 'static,
    R: Into<Units<U>>,
{
    let inner = Rc::new(ListInner {
        key_fn: Box::new(key_fn),
        render: Render::Tracked(Box::new(move |item| render(item).into())),
        state: RefCell::new(ListState {
            entries: HashMap::new(),
            order: Vec::new(),
            ops: Vec::new(),
            disposed: false,
        }),
    });
    build(source, inner)
}
